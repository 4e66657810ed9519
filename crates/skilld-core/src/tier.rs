//! Model capability tiers.
//!
//! Tiers are ordered by capability, not cost: `Pro` can do everything
//! `Thinking` can, which can do everything `Fast` can. Latency and price are
//! not assumed to follow that order.

use serde::{Deserialize, Serialize};

/// Capability class used to pick the cheapest sufficient model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Quick responses, simple tasks.
    Fast,
    /// Balanced reasoning, most tasks.
    Thinking,
    /// Advanced reasoning, complex analysis and planning.
    Pro,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Thinking => "thinking",
            Self::Pro => "pro",
        }
    }

    /// Next tier one step toward `Fast`, or `None` from `Fast`.
    ///
    /// This is the only tier crossing the resolver performs on its own;
    /// escalation toward `Pro` never happens implicitly.
    pub fn downgrade(&self) -> Option<Self> {
        match self {
            Self::Pro => Some(Self::Thinking),
            Self::Thinking => Some(Self::Fast),
            Self::Fast => None,
        }
    }

    /// Parse a tier name as it appears in SKILL.md frontmatter or config.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fast" => Some(Self::Fast),
            "thinking" => Some(Self::Thinking),
            "pro" => Some(Self::Pro),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
