//! Lazy skill body loading with budget enforcement.
//!
//! Bodies are read from disk only when a skill is actually selected for a
//! turn. Each load is charged against the session's cumulative character
//! budget before any session state changes, so a rejected load leaves the
//! session exactly as it was. Loaded bodies are cached per session and
//! never evicted within a session's lifetime.

use crate::session::Session;
use skilld_core::events::{EventPayload, SkillDisclosedPayload, SkillTruncatedPayload};
use skilld_core::skills::{extract_body, SkillDescriptor, SkillError};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// One worked example parsed from a skill body's `## Examples` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillExample {
    /// What the user asked.
    pub user: String,
    /// What the agent should do.
    pub action: String,
}

/// A fully loaded skill body.
#[derive(Debug, Clone)]
pub struct SkillBody {
    pub name: String,
    /// Markdown instructions, possibly truncated.
    pub instructions: String,
    pub examples: Vec<SkillExample>,
    /// Tool names the skill expects to be available.
    pub declared_tools: Vec<String>,
    /// Characters charged against the session budget.
    pub chars: usize,
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("skill body not found for '{name}' at {path}")]
    NotFound { name: String, path: PathBuf },
    #[error(
        "context budget exceeded loading '{skill}': {requested} chars over budget \
         ({used} of {limit} used)"
    )]
    BudgetExceeded {
        skill: String,
        requested: usize,
        used: usize,
        limit: usize,
    },
    #[error("invalid skill body for '{name}': {source}")]
    Invalid { name: String, source: SkillError },
}

/// Loads skill bodies on demand, enforcing per-body and per-session
/// character limits.
#[derive(Debug, Clone, Copy)]
pub struct SkillLoader {
    max_body_chars: usize,
    context_budget_chars: usize,
}

impl SkillLoader {
    pub fn new(max_body_chars: usize, context_budget_chars: usize) -> Self {
        Self {
            max_body_chars,
            context_budget_chars,
        }
    }

    /// Load a skill body into the session.
    ///
    /// A repeated load of an already-disclosed skill returns the cached
    /// body and charges nothing. On a budget rejection the session is
    /// left untouched, keeping every earlier disclosure usable.
    pub fn load(
        &self,
        descriptor: &SkillDescriptor,
        session: &mut Session,
    ) -> Result<Arc<SkillBody>, LoadError> {
        if let Some(cached) = session.body(&descriptor.name) {
            debug!(skill = %descriptor.name, "skill body cache hit");
            return Ok(cached);
        }

        let skill_file = descriptor.path.join("SKILL.md");
        let content = fs::read_to_string(&skill_file).map_err(|e| {
            warn!(
                skill = %descriptor.name,
                path = %skill_file.display(),
                error = %e,
                "failed to read skill body"
            );
            LoadError::NotFound {
                name: descriptor.name.clone(),
                path: skill_file.clone(),
            }
        })?;

        let body = extract_body(&content).map_err(|source| LoadError::Invalid {
            name: descriptor.name.clone(),
            source,
        })?;

        let original_size = body.len();
        let mut instructions = body.trim().to_string();
        let mut truncated = false;

        if instructions.len() > self.max_body_chars {
            // Truncate at a safe boundary (don't split multi-byte chars).
            let truncate_at = instructions
                .char_indices()
                .take_while(|(i, _)| *i < self.max_body_chars)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);

            instructions.truncate(truncate_at);
            instructions.push_str("\n\n[Content truncated...]");
            truncated = true;
        }

        let examples = parse_examples(&instructions);
        let chars = instructions.len();

        let used = session.disclosed_chars();
        if used + chars > self.context_budget_chars {
            return Err(LoadError::BudgetExceeded {
                skill: descriptor.name.clone(),
                requested: chars,
                used,
                limit: self.context_budget_chars,
            });
        }

        let body = Arc::new(SkillBody {
            name: descriptor.name.clone(),
            instructions,
            examples,
            declared_tools: descriptor.required_tools.clone(),
            chars,
            truncated,
        });

        if truncated {
            session.record_event(EventPayload::SkillTruncated(SkillTruncatedPayload {
                session_id: session.id,
                skill: descriptor.name.clone(),
                original_size,
                max_body_chars: self.max_body_chars,
            }));
        }
        session.record_disclosure(Arc::clone(&body));
        session.record_event(EventPayload::SkillDisclosed(SkillDisclosedPayload {
            session_id: session.id,
            skill: descriptor.name.clone(),
            chars,
            total_chars: session.disclosed_chars(),
        }));
        debug!(
            skill = %descriptor.name,
            chars,
            total = session.disclosed_chars(),
            "skill body disclosed"
        );

        Ok(body)
    }
}

/// Parse `- user:` / `action:` pairs from a `## Examples` section.
///
/// Anything outside that section, or bullets without both halves, is
/// ignored rather than rejected.
fn parse_examples(body: &str) -> Vec<SkillExample> {
    let mut examples = Vec::new();
    let mut in_section = false;
    let mut pending_user: Option<String> = None;

    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("##") {
            in_section = heading.trim().eq_ignore_ascii_case("examples");
            pending_user = None;
            continue;
        }
        if !in_section {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("- user:") {
            pending_user = Some(rest.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("action:") {
            if let Some(user) = pending_user.take() {
                examples.push(SkillExample {
                    user,
                    action: rest.trim().to_string(),
                });
            }
        }
    }

    examples
}
