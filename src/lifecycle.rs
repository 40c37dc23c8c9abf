//! Journal lifecycle: who may move a journal between statuses, and when.
//!
//! ```text
//! PENDING --submit--> SUBMITTED --finalize--> FINALIZED
//!                      |    ^
//!               return |    | submit
//!                      v    |
//!                     RETURNED
//! ```
//!
//! Submit and request-return belong to the teacher who owns the journal;
//! return and finalize belong to the coordinator. `RETURNED -> FINALIZED` is
//! only available under [`FinalizeSource::SubmittedOrReturned`].
//!
//! [`attempt_transition`] is pure. [`JournalLifecycle::apply`] persists the
//! result through a compare-and-swap so that two concurrent requests read
//! from the same status cannot both succeed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{FinalizeSource, LifecyclePolicy};
use crate::error::{LifecycleError, LifecycleViolation, ViolationReason};
use crate::models::{Actor, Journal, JournalStatus, RequestOrigin, ReturnRequest, Role};
use crate::store::{JournalStore, StatusUpdate, UpdateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    Submit,
    Return,
    Finalize,
    RequestReturn,
}

impl JournalAction {
    pub const ALL: [Self; 4] = [
        Self::Submit,
        Self::Return,
        Self::Finalize,
        Self::RequestReturn,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Return => "return",
            Self::Finalize => "finalize",
            Self::RequestReturn => "request-return",
        }
    }

    /// Role allowed to trigger the action.
    pub const fn required_role(&self) -> Role {
        match self {
            Self::Submit | Self::RequestReturn => Role::Teacher,
            Self::Return | Self::Finalize => Role::Coordinator,
        }
    }
}

impl fmt::Display for JournalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub action: JournalAction,
    pub from: JournalStatus,
    pub to: JournalStatus,
}

const fn rule(action: JournalAction, from: JournalStatus, to: JournalStatus) -> TransitionRule {
    TransitionRule { action, from, to }
}

pub const TRANSITION_TABLE: &[TransitionRule] = &[
    rule(JournalAction::Submit, JournalStatus::Pending, JournalStatus::Submitted),
    rule(JournalAction::Submit, JournalStatus::Returned, JournalStatus::Submitted),
    rule(JournalAction::Return, JournalStatus::Submitted, JournalStatus::Returned),
    rule(JournalAction::Finalize, JournalStatus::Submitted, JournalStatus::Finalized),
    rule(JournalAction::RequestReturn, JournalStatus::Submitted, JournalStatus::Submitted),
];

/// Only part of the table when finalizing a returned journal is allowed.
pub const RETURNED_FINALIZE_RULE: TransitionRule = rule(
    JournalAction::Finalize,
    JournalStatus::Returned,
    JournalStatus::Finalized,
);

fn find_rule(
    policy: &LifecyclePolicy,
    action: JournalAction,
    from: JournalStatus,
) -> Option<TransitionRule> {
    let extra = match policy.finalize_from {
        FinalizeSource::SubmittedOnly => None,
        FinalizeSource::SubmittedOrReturned => Some(RETURNED_FINALIZE_RULE),
    };

    TRANSITION_TABLE
        .iter()
        .copied()
        .chain(extra)
        .find(|rule| rule.action == action && rule.from == from)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub action: JournalAction,
    pub actor: Actor,
    /// Coordinator observation on return, teacher comment on request-return.
    pub comment: Option<String>,
}

impl TransitionRequest {
    pub fn new(action: JournalAction, actor: Actor) -> Self {
        Self {
            action,
            actor,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Checks the authorization table without touching the journal.
pub fn authorize(
    journal: &Journal,
    action: JournalAction,
    actor: &Actor,
    policy: &LifecyclePolicy,
) -> Result<TransitionRule, LifecycleViolation> {
    let violation = |reason| LifecycleViolation {
        journal_id: journal.id,
        current: journal.status,
        action,
        reason,
    };

    if journal.status.is_terminal() {
        return Err(violation(ViolationReason::TerminalState));
    }

    let permitted = match action.required_role() {
        Role::Teacher => actor.owns(journal),
        role => actor.role == role,
    };
    if !permitted {
        return Err(violation(ViolationReason::WrongRole));
    }

    let rule = find_rule(policy, action, journal.status)
        .ok_or_else(|| violation(ViolationReason::InvalidSourceState))?;

    if action == JournalAction::RequestReturn && journal.return_request.is_some() {
        return Err(violation(ViolationReason::DuplicatePendingRequest));
    }

    Ok(rule)
}

/// Returns the journal as it would look after `request`, or why it cannot happen.
pub fn attempt_transition(
    journal: &Journal,
    request: &TransitionRequest,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> Result<Journal, LifecycleViolation> {
    let rule = authorize(journal, request.action, &request.actor, policy)?;
    let mut next = journal.clone();
    next.status = rule.to;

    match request.action {
        JournalAction::Submit => next.return_request = None,
        JournalAction::Return => {
            next.return_request = Some(ReturnRequest {
                comment: request.comment.clone(),
                requested_at: now,
                origin: RequestOrigin::Coordinator,
            });
        }
        JournalAction::RequestReturn => {
            next.return_request = Some(ReturnRequest {
                comment: request.comment.clone(),
                requested_at: now,
                origin: RequestOrigin::Teacher,
            });
        }
        JournalAction::Finalize => {}
    }

    Ok(next)
}

/// Actions `actor` could perform right now, for enabling UI controls.
pub fn allowed_actions(
    journal: &Journal,
    actor: &Actor,
    policy: &LifecyclePolicy,
) -> Vec<JournalAction> {
    JournalAction::ALL
        .into_iter()
        .filter(|action| authorize(journal, *action, actor, policy).is_ok())
        .collect()
}

/// Teacher editability of lessons, evaluations, grades and attendance.
pub fn can_edit_records(journal: &Journal, actor: &Actor) -> bool {
    matches!(
        journal.status,
        JournalStatus::Pending | JournalStatus::Returned
    ) && actor.owns(journal)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub journal_id: Uuid,
    pub from: JournalStatus,
    pub to: JournalStatus,
    pub action: JournalAction,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

type TransitionCallback = Box<dyn Fn(&TransitionRecord) + Send + Sync>;

/// Applies transitions against a [`JournalStore`] and notifies registered callbacks.
pub struct JournalLifecycle {
    policy: LifecyclePolicy,
    callbacks: Vec<TransitionCallback>,
}

impl JournalLifecycle {
    pub fn new(policy: LifecyclePolicy) -> Self {
        Self {
            policy,
            callbacks: Vec::new(),
        }
    }

    /// Registers a callback run after each persisted transition.
    pub fn on_transition<F>(&mut self, callback: F)
    where
        F: Fn(&TransitionRecord) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub async fn apply<S: JournalStore>(
        &self,
        store: &S,
        journal_id: Uuid,
        request: &TransitionRequest,
    ) -> Result<Journal, LifecycleError> {
        let journal = store
            .fetch_journal(journal_id)
            .await?
            .ok_or(LifecycleError::JournalNotFound(journal_id))?;

        let now = Utc::now();
        let mut next = match attempt_transition(&journal, request, &self.policy, now) {
            Ok(next) => next,
            Err(violation) => {
                tracing::debug!(
                    journal_id = %journal_id,
                    actor = %request.actor.id,
                    role = %request.actor.role,
                    %violation,
                    "transition rejected"
                );
                return Err(violation.into());
            }
        };

        let update = StatusUpdate {
            journal_id,
            expected_status: journal.status,
            expected_revision: journal.revision,
            status: next.status,
            return_request: next.return_request.clone(),
            action: request.action,
            actor: request.actor,
        };

        match store.update_journal_status(&update).await? {
            UpdateOutcome::Applied => {}
            UpdateOutcome::Conflict => {
                tracing::warn!(
                    journal_id = %journal_id,
                    action = %request.action,
                    "journal changed underneath transition"
                );
                return Err(LifecycleError::ConcurrentModification {
                    journal_id,
                    expected: journal.status,
                    revision: journal.revision,
                });
            }
        }

        next.revision = journal.revision + 1;
        tracing::info!(
            journal_id = %journal_id,
            action = %request.action,
            from = %journal.status,
            to = %next.status,
            actor = %request.actor.id,
            "journal transition applied"
        );

        let record = TransitionRecord {
            journal_id,
            from: journal.status,
            to: next.status,
            action: request.action,
            actor: request.actor,
            at: now,
        };
        for callback in &self.callbacks {
            callback(&record);
        }

        Ok(next)
    }
}

impl Default for JournalLifecycle {
    fn default() -> Self {
        Self::new(LifecyclePolicy::default())
    }
}
