//! Fragment task batches handed to the execution layer.

use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

use crate::catalog::FragmentId;
use crate::dependency::DependencyId;
use crate::partition::PartitionId;

/// How the receiving partition should treat a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TaskType {
    /// Fragments of a system procedure, run once per partition.
    SysProcPerPartition,
    /// Fragments of a user procedure.
    UserProc,
}

/// One fragment to execute, with everything the partition needs to run it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskFragment {
    pub fragment_id: FragmentId,
    /// `None` when the fragment consumes no other fragment's output.
    pub input_dependency: Option<DependencyId>,
    pub output_dependency: DependencyId,
    pub stmt_index: usize,
    /// Encoded parameters of the owning statement, shared by its fragments.
    pub params: Arc<[u8]>,
}

/// All fragments of one round destined for one partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FragmentTaskBatch {
    pub txn_id: u64,
    pub client_handle: u64,
    pub source_partition: PartitionId,
    pub destination_partition: PartitionId,
    pub round: usize,
    /// AND of the read-only flags of every fragment in the batch.
    pub read_only: bool,
    pub task_type: TaskType,
    /// Reserved. Always `false`.
    pub final_task: bool,
    pub fragments: Vec<TaskFragment>,
}

impl FragmentTaskBatch {
    #[must_use]
    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        self.fragments.iter().map(|f| f.fragment_id).collect()
    }

    #[must_use]
    pub fn input_dependency_ids(&self) -> Vec<Option<DependencyId>> {
        self.fragments.iter().map(|f| f.input_dependency).collect()
    }

    #[must_use]
    pub fn output_dependency_ids(&self) -> Vec<DependencyId> {
        self.fragments.iter().map(|f| f.output_dependency).collect()
    }

    #[must_use]
    pub fn stmt_indexes(&self) -> Vec<usize> {
        self.fragments.iter().map(|f| f.stmt_index).collect()
    }

    /// The task runs at the partition that coordinates the transaction.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.source_partition == self.destination_partition
    }
}

impl Display for FragmentTaskBatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(
            f,
            "FragmentTask[txn=#{}, round={:02}, partition={}, read_only={}, fragments=[",
            self.txn_id, self.round, self.destination_partition, self.read_only
        )?;
        for (i, frag) in self.fragments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let input = frag
                .input_dependency
                .map_or_else(|| "NULL".to_string(), |d| d.to_string());
            write!(
                f,
                "{}(stmt={}, in={input}, out={})",
                frag.fragment_id, frag.stmt_index, frag.output_dependency
            )?;
        }
        write!(f, "]]")
    }
}
