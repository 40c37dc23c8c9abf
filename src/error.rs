//! Error types for journal lifecycle operations.
//!
//! Aggregation never returns these; it logs an [`InconsistentReference`] and
//! keeps going with whatever data is left.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::JournalAction;
use crate::models::JournalStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    /// The actor's role (or ownership) does not allow the action.
    WrongRole,
    /// The journal is finalized.
    TerminalState,
    /// The action is not defined from the current status.
    InvalidSourceState,
    /// A teacher return request is already waiting for the coordinator.
    DuplicatePendingRequest,
}

impl ViolationReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WrongRole => "wrong_role",
            Self::TerminalState => "terminal_state",
            Self::InvalidSourceState => "invalid_source_state",
            Self::DuplicatePendingRequest => "duplicate_pending_request",
        }
    }
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the authorization table does not allow. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} journal {journal_id} while {current}: {reason}")]
pub struct LifecycleViolation {
    pub journal_id: Uuid,
    pub current: JournalStatus,
    pub action: JournalAction,
    pub reason: ViolationReason,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Violation(#[from] LifecycleViolation),

    /// The stored journal moved on after it was read; re-fetch and retry.
    #[error(
        "journal {journal_id} was modified concurrently \
         (expected {expected} at revision {revision})"
    )]
    ConcurrentModification {
        journal_id: Uuid,
        expected: JournalStatus,
        revision: i64,
    },

    #[error("journal {0} not found")]
    JournalNotFound(Uuid),

    #[error("record store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Whether the caller should re-fetch and try the same action again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Lesson,
    Evaluation,
    Grade,
    AttendanceMark,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Lesson => "lesson",
            Self::Evaluation => "evaluation",
            Self::Grade => "grade",
            Self::AttendanceMark => "attendance mark",
        };
        f.write_str(label)
    }
}

/// A record pointing at a parent the aggregation cannot find.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inconsistent {kind} {record_id}: {detail}")]
pub struct InconsistentReference {
    pub kind: RecordKind,
    pub record_id: Uuid,
    pub detail: String,
}

impl InconsistentReference {
    pub fn new(kind: RecordKind, record_id: Uuid, detail: impl Into<String>) -> Self {
        Self {
            kind,
            record_id,
            detail: detail.into(),
        }
    }

    /// Logs the inconsistency; the caller skips the record.
    pub fn report(self) {
        tracing::warn!(
            kind = %self.kind,
            record_id = %self.record_id,
            detail = %self.detail,
            "skipping inconsistent record"
        );
    }
}
