//! Planner configuration.
//!
//! Only pooling and id-allocation knobs are configurable. The batch and round
//! bounds are fixed constants: catalogs are compiled against them.
//!
//! ```
//! use batchplan::config::PlannerConfig;
//!
//! let config = PlannerConfig::from_json_str(r#"{ "plan_pool_idle": 16 }"#).unwrap();
//! assert_eq!(config.plan_pool_idle, 16);
//! assert!(!config.pool_profiling);
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;

/// Maximum number of statements in one batch.
pub const MAX_BATCH_SIZE: usize = 128;

/// Maximum number of rounds (fragments in one statement's chain).
pub const MAX_ROUND_SIZE: usize = 10;

/// First id issued by a default-constructed
/// [`DependencyIdAllocator`](crate::dependency::DependencyIdAllocator).
pub const DEFAULT_FIRST_DEPENDENCY_ID: u32 = 9000;

/// Tunables for a [`BatchPlanner`](crate::planner::BatchPlanner) and the
/// site-wide resources it shares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum number of idle batch plans each planner keeps for reuse.
    pub plan_pool_idle: usize,
    /// Count plan creations and reuses in the planner metrics.
    pub pool_profiling: bool,
    /// First dependency id handed out by the site allocator.
    pub first_dependency_id: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            plan_pool_idle: 200,
            pool_profiling: false,
            first_dependency_id: DEFAULT_FIRST_DEPENDENCY_ID,
        }
    }
}

impl PlannerConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not a valid configuration document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("Failed to parse planner configuration")
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_to_string(path)
            .with_context(|| format!("Failed to read planner configuration {}", path.display()))?;
        Self::from_json_str(&text)
    }
}
