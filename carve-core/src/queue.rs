//! Ordered queue of deferred structural operations.
//!
//! FIFO by default, user-reorderable and removable prior to execution.
//! Execution is strictly sequential in the current list order; a partially
//! failed batch can be re-run after the caller fixes the underlying issue,
//! because already-completed entries are skipped.

use crate::copy::{self, CopyEndpoint};
use crate::errors::{EngineError, EngineResult};
use crate::model::{format_bytes, PartitionRef};
use crate::operations::{self, FormatFs};
use carve_hal::PartitionHal;
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A deferred unit of work with its kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BatchKind {
    Create {
        disk: String,
        part_type: String,
        size_bytes: u64,
    },
    Delete {
        target: PartitionRef,
    },
    Format {
        device: String,
        fs: FormatFs,
    },
    Resize {
        target: PartitionRef,
        size_bytes: u64,
    },
    Copy {
        source: CopyEndpoint,
        dest: CopyEndpoint,
    },
    Move {
        source: PartitionRef,
        dest: PartitionRef,
    },
}

impl BatchKind {
    pub fn describe(&self) -> String {
        match self {
            BatchKind::Create {
                disk,
                part_type,
                size_bytes,
            } => format!(
                "Create {part_type} partition on {disk} ({})",
                format_bytes(*size_bytes)
            ),
            BatchKind::Delete { target } => format!("Delete partition {target}"),
            BatchKind::Format { device, fs } => format!("Format {device} as {fs}"),
            BatchKind::Resize { target, size_bytes } => {
                format!("Resize {target} to {}", format_bytes(*size_bytes))
            }
            BatchKind::Copy { source, dest } => {
                format!("Copy {} to {}", source.device, dest.device)
            }
            BatchKind::Move { source, dest } => format!("Move {source} to {dest}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOperation {
    pub id: u64,
    pub kind: BatchKind,
    pub description: String,
    pub status: BatchStatus,
    pub error: Option<String>,
}

/// Counts accumulated over one `execute_all` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    operations: Vec<BatchOperation>,
    next_id: u64,
}

/// Single-writer queue object with interior locking, so status reads and
/// progress callbacks from another execution context stay consistent.
#[derive(Debug)]
pub struct BatchQueue {
    state: Mutex<QueueState>,
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                operations: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Enqueues an operation and returns its id.
    pub fn add(&self, kind: BatchKind) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        let description = kind.describe();
        state.operations.push(BatchOperation {
            id,
            kind,
            description,
            status: BatchStatus::Pending,
            error: None,
        });
        id
    }

    /// Removes a queued operation by id.
    pub fn remove(&self, id: u64) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| EngineError::Validation(format!("operation with ID {id} not found")))?;
        state.operations.remove(index);
        Ok(())
    }

    /// Moves an operation to a new position in the queue.
    pub fn move_operation(&self, id: u64, new_position: usize) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| EngineError::Validation(format!("operation with ID {id} not found")))?;
        if new_position >= state.operations.len() {
            return Err(EngineError::Validation(format!(
                "invalid position {new_position}"
            )));
        }
        let op = state.operations.remove(index);
        state.operations.insert(new_position, op);
        Ok(())
    }

    /// Snapshot of all operations in current order.
    pub fn operations(&self) -> Vec<BatchOperation> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().operations.clear();
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    pub fn completed_count(&self) -> usize {
        self.count_status(BatchStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count_status(BatchStatus::Failed)
    }

    pub fn has_pending(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .any(|op| op.status == BatchStatus::Pending)
    }

    fn count_status(&self, status: BatchStatus) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|op| op.status == status)
            .count()
    }

    fn set_status(&self, id: u64, status: BatchStatus, error: Option<String>) {
        let mut state = self.state.lock().unwrap();
        if let Some(op) = state.operations.iter_mut().find(|op| op.id == id) {
            op.status = status;
            op.error = error;
        }
    }

    /// Executes every non-completed operation in current order.
    ///
    /// `on_progress(current, total, description)` fires before each entry
    /// starts. With `stop_on_error` a failure halts execution immediately,
    /// leaving later entries pending, and returns that entry's error;
    /// otherwise execution continues and the summary accumulates the
    /// failed count alongside the completed count.
    pub fn execute_all(
        &self,
        hal: &dyn PartitionHal,
        stop_on_error: bool,
        mut on_progress: Option<&mut dyn FnMut(usize, usize, &str)>,
    ) -> EngineResult<BatchSummary> {
        let snapshot = self.operations();
        let total = snapshot.len();
        if total == 0 {
            return Err(EngineError::Validation(
                "no operations to execute".to_string(),
            ));
        }

        let mut summary = BatchSummary::default();
        for (i, op) in snapshot.iter().enumerate() {
            if op.status == BatchStatus::Completed {
                continue;
            }

            self.set_status(op.id, BatchStatus::Running, None);
            if let Some(cb) = on_progress.as_deref_mut() {
                cb(i + 1, total, &op.description);
            }

            match execute_kind(hal, &op.kind) {
                Ok(()) => {
                    self.set_status(op.id, BatchStatus::Completed, None);
                    summary.completed += 1;
                }
                Err(err) => {
                    log::warn!("batch operation {} failed: {err}", op.id);
                    self.set_status(op.id, BatchStatus::Failed, Some(err.to_string()));
                    summary.failed += 1;
                    if stop_on_error {
                        return Err(err);
                    }
                }
            }
        }

        Ok(summary)
    }
}

fn execute_kind(hal: &dyn PartitionHal, kind: &BatchKind) -> EngineResult<()> {
    match kind {
        BatchKind::Create {
            disk,
            part_type,
            size_bytes,
        } => operations::create_partition(hal, disk, *size_bytes, part_type),
        BatchKind::Delete { target } => operations::delete_partition(hal, target),
        BatchKind::Format { device, fs } => operations::format_partition(hal, device, *fs),
        BatchKind::Resize { target, size_bytes } => {
            operations::resize_partition(hal, target, *size_bytes)
        }
        BatchKind::Copy { source, dest } => copy::copy_partition(hal, source, dest, None),
        BatchKind::Move { source, dest } => copy::move_partition(hal, source, dest, None),
    }
}
