//! Event types for the session audit trail.
//!
//! Every notable runtime decision (match, disclosure, tier degradation,
//! delegation lifecycle, turn outcome) is recorded as a typed event so a
//! session's history can be inspected and asserted on.

use crate::tier::ModelTier;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SkillsMatched,
    SkillDisclosed,
    SkillTruncated,
    TierDegraded,
    DelegationSent,
    DelegationCompleted,
    DelegationFailed,
    TurnCompleted,
    TurnFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkillsMatched => "SKILLS_MATCHED",
            Self::SkillDisclosed => "SKILL_DISCLOSED",
            Self::SkillTruncated => "SKILL_TRUNCATED",
            Self::TierDegraded => "TIER_DEGRADED",
            Self::DelegationSent => "DELEGATION_SENT",
            Self::DelegationCompleted => "DELEGATION_COMPLETED",
            Self::DelegationFailed => "DELEGATION_FAILED",
            Self::TurnCompleted => "TURN_COMPLETED",
            Self::TurnFailed => "TURN_FAILED",
        }
    }
}

/// Payload for SKILLS_MATCHED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsMatchedPayload {
    pub session_id: Uuid,
    pub query: String,
    /// Skill names in ranked order.
    pub skills: Vec<String>,
}

/// Payload for SKILL_DISCLOSED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDisclosedPayload {
    pub session_id: Uuid,
    pub skill: String,
    /// Characters charged against the session budget.
    pub chars: usize,
    /// Cumulative disclosed characters after this load.
    pub total_chars: usize,
}

/// Payload for SKILL_TRUNCATED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillTruncatedPayload {
    pub session_id: Uuid,
    pub skill: String,
    pub original_size: usize,
    pub max_body_chars: usize,
}

/// Payload for TIER_DEGRADED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDegradedPayload {
    pub session_id: Uuid,
    pub requested: ModelTier,
    pub resolved: ModelTier,
    pub provider: String,
}

/// Payload for DELEGATION_SENT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationSentPayload {
    pub session_id: Uuid,
    pub task_id: Uuid,
    pub capability_required: String,
    pub peer: String,
}

/// Payload for DELEGATION_COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationCompletedPayload {
    pub session_id: Uuid,
    pub task_id: Uuid,
}

/// Payload for DELEGATION_FAILED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationFailedPayload {
    pub session_id: Uuid,
    pub task_id: Uuid,
    /// Final status ("rejected" or "failed").
    pub status: String,
    pub reason: String,
}

/// Payload for TURN_COMPLETED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCompletedPayload {
    pub session_id: Uuid,
    /// Skills disclosed during this turn, in disclosure order.
    pub skills: Vec<String>,
    /// Tier of the model that served the turn.
    pub tier: ModelTier,
    /// Whether the turn was served by a peer agent.
    pub delegated: bool,
}

/// Payload for TURN_FAILED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnFailedPayload {
    pub session_id: Uuid,
    pub reason: String,
}

/// Union type for all event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    SkillsMatched(SkillsMatchedPayload),
    SkillDisclosed(SkillDisclosedPayload),
    SkillTruncated(SkillTruncatedPayload),
    TierDegraded(TierDegradedPayload),
    DelegationSent(DelegationSentPayload),
    DelegationCompleted(DelegationCompletedPayload),
    DelegationFailed(DelegationFailedPayload),
    TurnCompleted(TurnCompletedPayload),
    TurnFailed(TurnFailedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SkillsMatched(_) => EventType::SkillsMatched,
            Self::SkillDisclosed(_) => EventType::SkillDisclosed,
            Self::SkillTruncated(_) => EventType::SkillTruncated,
            Self::TierDegraded(_) => EventType::TierDegraded,
            Self::DelegationSent(_) => EventType::DelegationSent,
            Self::DelegationCompleted(_) => EventType::DelegationCompleted,
            Self::DelegationFailed(_) => EventType::DelegationFailed,
            Self::TurnCompleted(_) => EventType::TurnCompleted,
            Self::TurnFailed(_) => EventType::TurnFailed,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
