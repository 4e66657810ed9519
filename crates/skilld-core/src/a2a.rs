//! Agent-to-agent delegation wire contract.
//!
//! `DelegationMessage` is the unit exchanged between agents. Its status moves
//! through an explicit state machine:
//!
//! ```text
//! pending --accept--> accepted --(execution)--> completed
//! pending --reject--> rejected
//! accepted --failure--> failed
//! ```
//!
//! `completed`, `rejected`, and `failed` are terminal; a terminal message is
//! never mutated again. A message stuck in `pending` past the configured
//! timeout is driven to `failed` by the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delegation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
    Failed,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether this status ends the message's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `pending -> failed` is permitted for timeout expiry; terminal states
    /// permit nothing.
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Accepted | Self::Rejected | Self::Failed) => true,
            (Self::Accepted, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised when a transition would violate the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid delegation transition: {from} -> {to} (task {task_id})")]
pub struct InvalidTransition {
    pub task_id: Uuid,
    pub from: DelegationStatus,
    pub to: DelegationStatus,
}

/// The unit exchanged in agent-to-agent delegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationMessage {
    /// Unique per delegation; used for correlation and idempotent replay
    /// detection. Never reused within a session.
    pub task_id: Uuid,
    /// Tag or skill name the sender needs handled.
    pub capability_required: String,
    /// Forwarded context / task description.
    pub payload: String,
    /// Identity of the delegating agent.
    pub sender_id: String,
    pub status: DelegationStatus,
    /// Result text, set on `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure or rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DelegationMessage {
    /// Create a new pending message with a fresh time-ordered task id.
    pub fn new(
        capability_required: impl Into<String>,
        payload: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::now_v7(),
            capability_required: capability_required.into(),
            payload: payload.into(),
            sender_id: sender_id.into(),
            status: DelegationStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status transition, enforcing the state machine.
    pub fn transition(&mut self, next: DelegationStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                task_id: self.task_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition to `completed` with a result.
    pub fn complete(&mut self, result: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(DelegationStatus::Completed)?;
        self.result = Some(result.into());
        Ok(())
    }

    /// Transition to `failed` with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(DelegationStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Transition to `rejected` with a reason.
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(DelegationStatus::Rejected)?;
        self.error = Some(reason.into());
        Ok(())
    }
}
