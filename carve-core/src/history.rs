//! Append-only history of applied structural operations with undo/redo.
//!
//! Reversibility is fixed at creation time by operation kind: create,
//! resize, and attribute changes have well-defined, non-destructive
//! inverses; delete, format, and copy cannot reconstruct destroyed data.
//!
//! Undo and redo are two-phase because the inverse action is an external,
//! potentially-failing subprocess: first reserve the history slot (flip
//! the reversed flag, move the cursor), then attempt the action; if the
//! action fails the caller cancels the reservation so history never claims
//! an undo that did not happen on disk.

use crate::attributes::GptAttr;
use crate::errors::{EngineError, EngineResult};
use crate::model::{format_bytes, PartitionRef};
use crate::operations::{apply_action, ExternalAction};
use carve_hal::PartitionHal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    Create,
    Delete,
    Format,
    Resize,
    Copy,
    Attribute,
}

impl OperationKind {
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            OperationKind::Create | OperationKind::Resize | OperationKind::Attribute
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub description: String,
    pub reversible: bool,
    pub reversed: bool,
    /// The exact inverse operation, present only for reversible kinds.
    pub undo_action: Option<ExternalAction>,
    /// The original operation in re-applicable form.
    pub redo_action: Option<ExternalAction>,
}

#[derive(Debug, Default)]
struct HistoryState {
    entries: Vec<HistoryEntry>,
    next_id: u64,
    /// Index of the most recently applied, non-reversed entry; -1 if none.
    current_pos: isize,
}

/// A reserved undo slot: the flag is flipped and the cursor moved, the
/// external inverse action has not run yet.
#[derive(Debug, Clone)]
pub struct UndoReservation {
    pub entry_id: u64,
    pub description: String,
    pub action: ExternalAction,
    prior_pos: isize,
}

/// A reserved redo slot; mirror image of [`UndoReservation`].
#[derive(Debug, Clone)]
pub struct RedoReservation {
    pub entry_id: u64,
    pub description: String,
    pub action: ExternalAction,
    prior_pos: isize,
}

/// Single-writer history object. Interior locking keeps status reads from
/// other execution contexts (progress callbacks, status panes) safe.
#[derive(Debug)]
pub struct OperationHistory {
    state: Mutex<HistoryState>,
}

impl Default for OperationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationHistory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HistoryState {
                entries: Vec::new(),
                next_id: 1,
                current_pos: -1,
            }),
        }
    }

    /// Appends an entry, discarding any reversed entries after the cursor.
    /// Redo history is irrevocably lost the moment a fresh operation is
    /// recorded after an undo.
    fn record(
        &self,
        kind: OperationKind,
        description: String,
        undo_action: Option<ExternalAction>,
        redo_action: Option<ExternalAction>,
    ) {
        let mut state = self.state.lock().unwrap();
        let keep = (state.current_pos + 1) as usize;
        state.entries.truncate(keep);

        let entry = HistoryEntry {
            id: state.next_id,
            timestamp: Utc::now(),
            kind,
            description,
            reversible: kind.is_reversible(),
            reversed: false,
            undo_action,
            redo_action,
        };
        state.entries.push(entry);
        state.current_pos = state.entries.len() as isize - 1;
        state.next_id += 1;
    }

    pub fn record_create(&self, target: &PartitionRef, size_bytes: u64, part_type: &str) {
        self.record(
            OperationKind::Create,
            format!(
                "Created partition {target} ({part_type}, {})",
                format_bytes(size_bytes)
            ),
            Some(ExternalAction::DeletePartition {
                target: target.clone(),
            }),
            Some(ExternalAction::CreatePartition {
                disk: target.disk.clone(),
                part_type: part_type.to_string(),
                size_bytes,
            }),
        );
    }

    pub fn record_delete(&self, target: &PartitionRef, size_bytes: u64, fs: &str) {
        self.record(
            OperationKind::Delete,
            format!(
                "Deleted partition {target} ({fs}, {})",
                format_bytes(size_bytes)
            ),
            None,
            None,
        );
    }

    pub fn record_format(&self, device: &str, old_fs: &str, new_fs: &str) {
        self.record(
            OperationKind::Format,
            format!("Formatted {device} from {old_fs} to {new_fs}"),
            None,
            None,
        );
    }

    pub fn record_resize(&self, target: &PartitionRef, old_size_bytes: u64, new_size_bytes: u64) {
        self.record(
            OperationKind::Resize,
            format!(
                "Resized {target} from {} to {}",
                format_bytes(old_size_bytes),
                format_bytes(new_size_bytes)
            ),
            Some(ExternalAction::ResizePartition {
                target: target.clone(),
                size_bytes: old_size_bytes,
            }),
            Some(ExternalAction::ResizePartition {
                target: target.clone(),
                size_bytes: new_size_bytes,
            }),
        );
    }

    pub fn record_copy(&self, source: &str, dest: &str, size_bytes: u64) {
        self.record(
            OperationKind::Copy,
            format!("Copied {source} to {dest} ({})", format_bytes(size_bytes)),
            None,
            None,
        );
    }

    pub fn record_attribute_change(&self, device: &str, attr: GptAttr, now_set: bool) {
        let (verb, undo, redo) = if now_set {
            (
                "Set",
                ExternalAction::UnsetAttribute {
                    device: device.to_string(),
                    attribute: attr,
                },
                ExternalAction::SetAttribute {
                    device: device.to_string(),
                    attribute: attr,
                },
            )
        } else {
            (
                "Unset",
                ExternalAction::SetAttribute {
                    device: device.to_string(),
                    attribute: attr,
                },
                ExternalAction::UnsetAttribute {
                    device: device.to_string(),
                    attribute: attr,
                },
            )
        };
        self.record(
            OperationKind::Attribute,
            format!("{verb} {attr} on {device}"),
            Some(undo),
            Some(redo),
        );
    }

    /// True when the entry at the cursor is reversible and not reversed.
    pub fn can_undo(&self) -> bool {
        let state = self.state.lock().unwrap();
        let Ok(pos) = usize::try_from(state.current_pos) else {
            return false;
        };
        state
            .entries
            .get(pos)
            .map(|e| e.reversible && !e.reversed)
            .unwrap_or(false)
    }

    /// True when the entry just after the cursor is reversed.
    pub fn can_redo(&self) -> bool {
        let state = self.state.lock().unwrap();
        let next = (state.current_pos + 1) as usize;
        state.entries.get(next).map(|e| e.reversed).unwrap_or(false)
    }

    /// Phase one of undo: flip the reversed flag and move the cursor.
    ///
    /// The caller must either apply the returned inverse action or call
    /// [`cancel_undo`](Self::cancel_undo) to roll the reservation back.
    pub fn reserve_undo(&self) -> EngineResult<UndoReservation> {
        let mut state = self.state.lock().unwrap();
        let pos = usize::try_from(state.current_pos)
            .map_err(|_| EngineError::NotReversible("no operation to undo".to_string()))?;
        let prior_pos = state.current_pos;

        let entry = state
            .entries
            .get_mut(pos)
            .ok_or_else(|| EngineError::NotReversible("no operation to undo".to_string()))?;
        if !entry.reversible {
            return Err(EngineError::NotReversible(format!(
                "operation '{}' is not reversible",
                entry.description
            )));
        }
        if entry.reversed {
            return Err(EngineError::NotReversible(
                "operation already reversed".to_string(),
            ));
        }
        let action = entry.undo_action.clone().ok_or_else(|| {
            EngineError::NotReversible("operation has no recorded inverse".to_string())
        })?;

        entry.reversed = true;
        let reservation = UndoReservation {
            entry_id: entry.id,
            description: entry.description.clone(),
            action,
            prior_pos,
        };
        state.current_pos -= 1;
        Ok(reservation)
    }

    /// Rolls back a failed undo: restores the flag and the cursor so the
    /// history matches what actually happened on disk.
    pub fn cancel_undo(&self, reservation: &UndoReservation) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.id == reservation.entry_id)
        {
            entry.reversed = false;
        }
        state.current_pos = reservation.prior_pos;
    }

    /// Phase one of redo: requires the entry after the cursor to be
    /// reversed; clears the flag and advances the cursor.
    pub fn reserve_redo(&self) -> EngineResult<RedoReservation> {
        let mut state = self.state.lock().unwrap();
        let prior_pos = state.current_pos;
        let next = (state.current_pos + 1) as usize;

        if next >= state.entries.len() {
            return Err(EngineError::NotReversible(
                "no operation to redo".to_string(),
            ));
        }
        let entry = &mut state.entries[next];
        if !entry.reversed {
            return Err(EngineError::NotReversible(
                "operation was not reversed".to_string(),
            ));
        }
        let action = entry.redo_action.clone().ok_or_else(|| {
            EngineError::NotReversible("operation cannot be re-applied".to_string())
        })?;

        entry.reversed = false;
        let reservation = RedoReservation {
            entry_id: entry.id,
            description: entry.description.clone(),
            action,
            prior_pos,
        };
        state.current_pos += 1;
        Ok(reservation)
    }

    /// Rolls back a failed redo.
    pub fn cancel_redo(&self, reservation: &RedoReservation) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.id == reservation.entry_id)
        {
            entry.reversed = true;
        }
        state.current_pos = reservation.prior_pos;
    }

    /// Full two-phase undo against the tool layer.
    pub fn undo(&self, hal: &dyn PartitionHal) -> EngineResult<String> {
        let reservation = self.reserve_undo()?;
        log::info!("undoing: {}", reservation.description);
        if let Err(err) = apply_action(hal, &reservation.action) {
            self.cancel_undo(&reservation);
            return Err(err);
        }
        Ok(reservation.description)
    }

    /// Full two-phase redo against the tool layer.
    pub fn redo(&self, hal: &dyn PartitionHal) -> EngineResult<String> {
        let reservation = self.reserve_redo()?;
        log::info!("redoing: {}", reservation.description);
        if let Err(err) = apply_action(hal, &reservation.action) {
            self.cancel_redo(&reservation);
            return Err(err);
        }
        Ok(reservation.description)
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.state.lock().unwrap().entries.clone()
    }

    /// The most recent `count` entries.
    pub fn recent_entries(&self, count: usize) -> Vec<HistoryEntry> {
        let state = self.state.lock().unwrap();
        let start = state.entries.len().saturating_sub(count);
        state.entries[start..].to_vec()
    }

    pub fn current_position(&self) -> isize {
        self.state.lock().unwrap().current_pos
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.current_pos = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carve_hal::FakeHal;

    fn target() -> PartitionRef {
        PartitionRef::new("ada0", 3)
    }

    #[test]
    fn create_then_undo_then_redo_round_trips() {
        let hal = FakeHal::new();
        let history = OperationHistory::new();
        history.record_create(&target(), 1024 * 1024 * 1024, "freebsd-ufs");

        assert!(history.can_undo());
        assert!(!history.can_redo());

        history.undo(&hal).unwrap();
        assert!(!history.can_undo());
        assert!(history.can_redo());
        assert!(history.entries()[0].reversed);

        history.redo(&hal).unwrap();
        assert!(history.can_undo());
        assert!(!history.can_redo());
        assert!(!history.entries()[0].reversed);
    }

    #[test]
    fn recording_after_undo_truncates_redo_history() {
        let hal = FakeHal::new();
        let history = OperationHistory::new();
        history.record_create(&target(), 1 << 30, "freebsd-ufs");
        history.record_resize(&target(), 1 << 30, 2 << 30);

        history.undo(&hal).unwrap();
        assert!(history.can_redo());

        history.record_create(&PartitionRef::new("ada0", 4), 1 << 30, "freebsd-swap");
        assert!(!history.can_redo());

        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, OperationKind::Create);
    }

    #[test]
    fn destructive_kinds_are_not_reversible() {
        let history = OperationHistory::new();
        history.record_delete(&target(), 1 << 30, "UFS");
        assert!(!history.can_undo());
        assert!(matches!(
            history.reserve_undo().unwrap_err(),
            EngineError::NotReversible(_)
        ));

        history.record_format("ada0p3", "UFS", "ext4");
        assert!(!history.can_undo());

        history.record_copy("ada0p3", "ada1p3", 1 << 30);
        assert!(!history.can_undo());
    }

    #[test]
    fn failed_undo_rolls_the_reservation_back() {
        let hal = FakeHal::new();
        let history = OperationHistory::new();
        history.record_create(&target(), 1 << 30, "freebsd-ufs");
        let pos_before = history.current_position();

        hal.fail_next("gpart", "gpart: Device busy");
        let err = history.undo(&hal).unwrap_err();
        assert!(matches!(err, EngineError::Tool(_)));

        // History still claims the operation is applied.
        assert!(history.can_undo());
        assert!(!history.can_redo());
        assert!(!history.entries()[0].reversed);
        assert_eq!(history.current_position(), pos_before);
    }

    #[test]
    fn failed_redo_rolls_the_reservation_back() {
        let hal = FakeHal::new();
        let history = OperationHistory::new();
        history.record_resize(&target(), 1 << 30, 2 << 30);
        history.undo(&hal).unwrap();

        hal.fail_next("gpart", "gpart: Device busy");
        assert!(history.redo(&hal).is_err());
        assert!(history.can_redo());
        assert!(history.entries()[0].reversed);
    }

    #[test]
    fn redo_with_nothing_reversed_is_rejected() {
        let history = OperationHistory::new();
        history.record_create(&target(), 1 << 30, "freebsd-ufs");
        assert!(!history.can_redo());
        assert!(matches!(
            history.reserve_redo().unwrap_err(),
            EngineError::NotReversible(_)
        ));
    }

    #[test]
    fn attribute_changes_undo_to_the_opposite_verb() {
        let hal = FakeHal::new();
        let history = OperationHistory::new();
        history.record_attribute_change("ada0p1", GptAttr::Bootme, true);

        assert!(history.can_undo());
        let reservation = history.reserve_undo().unwrap();
        assert!(matches!(
            reservation.action,
            ExternalAction::UnsetAttribute { .. }
        ));
        history.cancel_undo(&reservation);

        history.undo(&hal).unwrap();
        assert!(hal.has_operation(|op| matches!(
            op,
            carve_hal::Operation::Gpart { op, .. } if op.contains("UnsetAttr")
        )));
    }

    #[test]
    fn recent_entries_returns_the_tail() {
        let history = OperationHistory::new();
        for i in 0..5 {
            history.record_format(&format!("ada0p{i}"), "UFS", "ext4");
        }
        let recent = history.recent_entries(2);
        assert_eq!(recent.len(), 2);
        assert!(recent[1].description.contains("ada0p4"));

        history.clear();
        assert!(history.entries().is_empty());
        assert_eq!(history.current_position(), -1);
    }
}
