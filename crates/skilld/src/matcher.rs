//! Skill matching and selection.
//!
//! Selection is two-phase: explicit `@skill-name` hints in the query are
//! honored first, then remaining slots fill with lexical matches against
//! descriptor tags, name segments, and description words. Scoring is pure
//! over (snapshot, query), so the same inputs always rank the same way;
//! ties break on ascending skill name.

use crate::registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use skilld_core::skills::SkillDescriptor;
use std::collections::HashSet;

/// Selection strategy used for choosing skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Skills were selected from explicit `@skill-name` hints in the query.
    Hint,
    /// Skills were selected by lexical matching.
    Lexical,
    /// No skills were selected.
    None,
}

/// A selected skill with its selection reason.
#[derive(Debug, Clone)]
pub struct MatchedSkill {
    pub descriptor: SkillDescriptor,
    /// Reason for selection (e.g., "hint: @skill-name" or "keyword: pdf").
    pub reason: String,
    pub score: usize,
}

/// Result of skill selection for one query.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub skills: Vec<MatchedSkill>,
    pub strategy: SelectionStrategy,
    /// Non-fatal selection problems (e.g., hinted skill not found).
    pub errors: Vec<String>,
}

/// Ranks registry descriptors against a query.
///
/// The shipped implementation is [`KeywordMatcher`]; an embedding-based
/// re-ranker can slot in behind the same trait without touching the
/// orchestrator.
pub trait Matcher: Send + Sync {
    fn select(&self, snapshot: &RegistrySnapshot, query: &str, top_k: usize) -> MatchOutcome;
}

/// Tag weight for an exact tag hit.
const TAG_WEIGHT: usize = 3;
/// Weight for a hit on a hyphen segment of the skill name.
const NAME_WEIGHT: usize = 2;
/// Weight for a description word overlap.
const DESC_WEIGHT: usize = 1;

/// Deterministic lexical matcher over tags, name segments, and description.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordMatcher;

impl Matcher for KeywordMatcher {
    fn select(&self, snapshot: &RegistrySnapshot, query: &str, top_k: usize) -> MatchOutcome {
        let mut selected: Vec<MatchedSkill> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut used_names: HashSet<String> = HashSet::new();

        // Phase 1: explicit hints, in query order.
        let hints = extract_hints(query);
        for hint in &hints {
            if selected.len() >= top_k {
                break;
            }

            if let Some(descriptor) = snapshot.get(hint) {
                if used_names.insert(descriptor.name.clone()) {
                    selected.push(MatchedSkill {
                        descriptor: descriptor.clone(),
                        reason: format!("hint: @{hint}"),
                        score: 0,
                    });
                }
            } else {
                errors.push(format!("hinted skill not found: @{hint}"));
            }
        }

        let hinted = !selected.is_empty();

        // Phase 2: fill remaining slots lexically.
        let remaining = top_k.saturating_sub(selected.len());
        if remaining > 0 {
            selected.extend(lexical_matches(snapshot, query, &used_names, remaining));
        }

        let strategy = if selected.is_empty() {
            SelectionStrategy::None
        } else if hinted {
            SelectionStrategy::Hint
        } else {
            SelectionStrategy::Lexical
        };

        MatchOutcome {
            skills: selected,
            strategy,
            errors,
        }
    }
}

/// Extract `@skill-name` hints from query text, preserving order.
fn extract_hints(query: &str) -> Vec<String> {
    let mut hints = Vec::new();
    for token in query.split_whitespace() {
        if let Some(name) = token.strip_prefix('@') {
            let name = name.trim_end_matches(|c: char| !c.is_alphanumeric());
            if !name.is_empty() && !hints.iter().any(|h| h == name) {
                hints.push(name.to_string());
            }
        }
    }
    hints
}

fn lexical_matches(
    snapshot: &RegistrySnapshot,
    query: &str,
    exclude: &HashSet<String>,
    limit: usize,
) -> Vec<MatchedSkill> {
    let query_keywords = extract_keywords(query);
    if query_keywords.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<MatchedSkill> = Vec::new();

    for skill in snapshot.skills() {
        if exclude.contains(&skill.name) {
            continue;
        }

        // Split name on hyphens so "pdf-processing" matches "pdf".
        let name_keywords: HashSet<String> = skill
            .name
            .split('-')
            .filter(|s| s.len() >= 2)
            .map(str::to_lowercase)
            .collect();
        let tag_keywords: HashSet<String> =
            skill.tags.iter().map(|t| t.to_lowercase()).collect();
        let desc_keywords = extract_keywords(&skill.description);

        let mut score = 0usize;
        let mut matches: Vec<&str> = Vec::new();

        for kw in &query_keywords {
            let weight = if tag_keywords.contains(kw) {
                TAG_WEIGHT
            } else if name_keywords.contains(kw) {
                NAME_WEIGHT
            } else if desc_keywords.contains(kw) {
                DESC_WEIGHT
            } else {
                continue;
            };
            score += weight;
            matches.push(kw);
        }

        if score > 0 {
            matches.sort_unstable();
            let reason_keywords: Vec<_> = matches.iter().take(3).copied().collect();
            scored.push(MatchedSkill {
                descriptor: skill.clone(),
                reason: format!("keyword: {}", reason_keywords.join(", ")),
                score,
            });
        }
    }

    // Score descending, name ascending on ties.
    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.descriptor.name.cmp(&b.descriptor.name))
    });

    scored.truncate(limit);
    scored
}

/// Lowercase alphanumeric words of at least 3 characters.
fn extract_keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}
