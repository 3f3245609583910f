//! Bound statement parameters and their wire encoding.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// A single bound parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// The parameters bound to one statement of a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet(pub Vec<ParamValue>);

impl ParameterSet {
    #[must_use]
    pub fn new(values: Vec<ParamValue>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ParamValue> {
        self.0.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ParameterSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")
    }
}

/// Turns a parameter set into the buffer shipped with each fragment task.
pub trait ParamEncoder: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be encoded.
    fn encode(&self, params: &ParameterSet) -> Result<Vec<u8>>;
}

/// Default encoder: `postcard` over the serde representation.
#[derive(Clone, Copy, Debug, Default)]
pub struct PostcardEncoder;

impl ParamEncoder for PostcardEncoder {
    fn encode(&self, params: &ParameterSet) -> Result<Vec<u8>> {
        postcard::to_allocvec(params).context("postcard encoding failed")
    }
}

/// Decode a buffer produced by [`PostcardEncoder`].
///
/// # Errors
///
/// Returns an error if `bytes` is not a valid encoding.
pub fn decode_postcard(bytes: &[u8]) -> Result<ParameterSet> {
    postcard::from_bytes(bytes).context("postcard decoding failed")
}
