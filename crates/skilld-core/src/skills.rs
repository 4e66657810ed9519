//! Skill descriptor types and SKILL.md frontmatter parsing.
//!
//! A skill source is a markdown document with a YAML metadata block followed
//! by a free-text body. Only the metadata block is parsed eagerly; the body
//! (instructions, examples, tool declarations) is read lazily by the loader.

use crate::tier::ModelTier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Skill location indicating where the skill was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLocation {
    /// Skill from a project-local directory (e.g., `.skilld/skills`).
    Project,
    /// Skill from a global directory (e.g., `~/.skilld/skills`).
    Global,
}

impl SkillLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

/// Immutable metadata record for a discoverable skill.
///
/// Built once at registry construction time from SKILL.md frontmatter and
/// never mutated; a registry rebuild replaces the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    /// Skill name (1-64 chars, lowercase alphanumeric + single hyphens).
    /// Unique within a registry snapshot.
    pub name: String,
    /// What the skill does and when to use it (1-1024 chars). Used for
    /// matching.
    pub description: String,
    /// Semantic version string.
    pub version: String,
    /// Tags for categorization and exact-match scoring.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Capability tier hint. A skill declaring `pro` that cannot be served
    /// locally becomes a delegation candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_tier: Option<ModelTier>,
    /// Tool names the skill expects to be available at execution time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tools: Vec<String>,
    /// Absolute path to the skill directory; the loader resolves
    /// `<path>/SKILL.md` to fetch the body.
    pub path: PathBuf,
    /// Where the skill was discovered.
    pub location: SkillLocation,
}

/// Error type for skill parsing and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkillError {
    #[error("missing YAML frontmatter")]
    MissingFrontmatter,
    #[error("invalid YAML frontmatter: {0}")]
    InvalidYaml(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("invalid description: {0}")]
    InvalidDescription(String),
    #[error("invalid tier: {0}")]
    InvalidTier(String),
}

/// Raw frontmatter as parsed from YAML.
#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    tags: Option<Vec<String>>,
    tier: Option<String>,
    #[serde(rename = "required-tools")]
    required_tools: Option<String>,
}

/// Validates a skill name.
///
/// Rules:
/// - 1-64 characters
/// - Lowercase letters, numbers, and hyphens only
/// - Must not start or end with hyphen
/// - Must not contain consecutive hyphens
pub fn validate_name(name: &str) -> Result<(), SkillError> {
    if name.is_empty() {
        return Err(SkillError::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > 64 {
        return Err(SkillError::InvalidName(format!(
            "name exceeds 64 characters (got {})",
            name.len()
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(SkillError::InvalidName(
            "name cannot start or end with hyphen".to_string(),
        ));
    }
    if name.contains("--") {
        return Err(SkillError::InvalidName(
            "name cannot contain consecutive hyphens".to_string(),
        ));
    }
    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(SkillError::InvalidName(format!(
                "invalid character '{}': only lowercase letters, numbers, and hyphens allowed",
                c
            )));
        }
    }
    Ok(())
}

/// Validates a skill description (1-1024 characters).
pub fn validate_description(description: &str) -> Result<(), SkillError> {
    if description.is_empty() {
        return Err(SkillError::InvalidDescription(
            "description cannot be empty".to_string(),
        ));
    }
    if description.len() > 1024 {
        return Err(SkillError::InvalidDescription(format!(
            "description exceeds 1024 characters (got {})",
            description.len()
        )));
    }
    Ok(())
}

/// Extracts YAML frontmatter from SKILL.md content.
///
/// Frontmatter must be delimited by `---` lines at the start of the file.
fn extract_frontmatter(content: &str) -> Result<&str, SkillError> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return Err(SkillError::MissingFrontmatter);
    }

    let after_open = &trimmed[3..];
    let after_newline = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_newline
        .find("\n---")
        .or_else(|| after_newline.find("\r\n---"));

    match close_pos {
        Some(pos) => Ok(&after_newline[..pos]),
        None => Err(SkillError::MissingFrontmatter),
    }
}

/// Parses SKILL.md content and extracts a validated descriptor.
pub fn parse_skill_md(
    content: &str,
    path: PathBuf,
    location: SkillLocation,
) -> Result<SkillDescriptor, SkillError> {
    let frontmatter_str = extract_frontmatter(content)?;

    let raw: RawFrontmatter = serde_yaml::from_str(frontmatter_str)
        .map_err(|e| SkillError::InvalidYaml(e.to_string()))?;

    let name = raw.name.ok_or(SkillError::MissingField("name"))?;
    validate_name(&name)?;

    let description = raw
        .description
        .ok_or(SkillError::MissingField("description"))?;
    validate_description(&description)?;

    let preferred_tier = match raw.tier {
        Some(ref t) => Some(ModelTier::parse(t).ok_or_else(|| {
            SkillError::InvalidTier(format!(
                "'{}' is not a tier (expected fast, thinking, or pro)",
                t
            ))
        })?),
        None => None,
    };

    // required-tools is a space-delimited string, matching allowed-tools in
    // the Agent Skills format.
    let required_tools = raw
        .required_tools
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default();

    Ok(SkillDescriptor {
        name,
        description,
        version: raw.version.unwrap_or_else(|| "1.0.0".to_string()),
        tags: raw.tags.unwrap_or_default(),
        preferred_tier,
        required_tools,
        path,
        location,
    })
}

/// Extracts the body content after the YAML frontmatter.
///
/// Returns the markdown body or an empty string if no body exists.
pub fn extract_body(content: &str) -> Result<&str, SkillError> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return Err(SkillError::MissingFrontmatter);
    }

    let after_open = &trimmed[3..];
    let after_newline = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    if let Some(pos) = after_newline.find("\n---") {
        let after_close = &after_newline[pos + 4..];
        let body = after_close
            .strip_prefix('\n')
            .or_else(|| after_close.strip_prefix("\r\n"))
            .unwrap_or(after_close);
        Ok(body.trim())
    } else if let Some(pos) = after_newline.find("\r\n---") {
        let after_close = &after_newline[pos + 5..];
        let body = after_close
            .strip_prefix('\n')
            .or_else(|| after_close.strip_prefix("\r\n"))
            .unwrap_or(after_close);
        Ok(body.trim())
    } else {
        Err(SkillError::MissingFrontmatter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_accepts_valid_names() {
        assert!(validate_name("pdf").is_ok());
        assert!(validate_name("pdf-processing").is_ok());
        assert!(validate_name("data-analysis").is_ok());
        assert!(validate_name("a1b2c3").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn validate_name_rejects_invalid_names() {
        assert!(matches!(
            validate_name("").unwrap_err(),
            SkillError::InvalidName(_)
        ));
        assert!(matches!(
            validate_name(&"a".repeat(65)).unwrap_err(),
            SkillError::InvalidName(_)
        ));
        assert!(matches!(
            validate_name("PDF-Processing").unwrap_err(),
            SkillError::InvalidName(_)
        ));
        assert!(matches!(
            validate_name("-pdf").unwrap_err(),
            SkillError::InvalidName(_)
        ));
        assert!(matches!(
            validate_name("pdf-").unwrap_err(),
            SkillError::InvalidName(_)
        ));
        assert!(matches!(
            validate_name("pdf--processing").unwrap_err(),
            SkillError::InvalidName(_)
        ));
        assert!(matches!(
            validate_name("pdf_processing").unwrap_err(),
            SkillError::InvalidName(_)
        ));
    }

    #[test]
    fn validate_description_bounds() {
        assert!(validate_description("A simple skill.").is_ok());
        assert!(validate_description(&"x".repeat(1024)).is_ok());
        assert!(validate_description("").is_err());
        assert!(validate_description(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn parse_skill_md_basic() {
        let content = r#"---
name: pdf-processing
description: Extract text and tables from PDF files.
---

# PDF Processing

Instructions here.
"#;
        let desc = parse_skill_md(
            content,
            PathBuf::from("/skills/pdf-processing"),
            SkillLocation::Project,
        )
        .expect("should parse");
        assert_eq!(desc.name, "pdf-processing");
        assert_eq!(desc.description, "Extract text and tables from PDF files.");
        assert_eq!(desc.version, "1.0.0");
        assert!(desc.tags.is_empty());
        assert!(desc.preferred_tier.is_none());
        assert!(desc.required_tools.is_empty());
        assert_eq!(desc.path, PathBuf::from("/skills/pdf-processing"));
        assert_eq!(desc.location, SkillLocation::Project);
    }

    #[test]
    fn parse_skill_md_with_optional_fields() {
        let content = r#"---
name: data-analysis
description: Analyze tabular data and produce summaries.
version: 2.1.0
tags: [data, analysis, csv]
tier: pro
required-tools: read_csv run_query
---

Body content.
"#;
        let desc = parse_skill_md(
            content,
            PathBuf::from("/skills/data-analysis"),
            SkillLocation::Global,
        )
        .expect("should parse");
        assert_eq!(desc.version, "2.1.0");
        assert_eq!(desc.tags, vec!["data", "analysis", "csv"]);
        assert_eq!(desc.preferred_tier, Some(ModelTier::Pro));
        assert_eq!(desc.required_tools, vec!["read_csv", "run_query"]);
        assert_eq!(desc.location, SkillLocation::Global);
    }

    #[test]
    fn parse_skill_md_missing_frontmatter() {
        let content = "# No frontmatter\n\nJust markdown.";
        let err = parse_skill_md(
            content,
            PathBuf::from("/skills/bad"),
            SkillLocation::Project,
        )
        .unwrap_err();
        assert!(matches!(err, SkillError::MissingFrontmatter));
    }

    #[test]
    fn parse_skill_md_missing_closing_delimiter() {
        let content = "---\nname: bad\ndescription: No closing\n";
        let err = parse_skill_md(
            content,
            PathBuf::from("/skills/bad"),
            SkillLocation::Project,
        )
        .unwrap_err();
        assert!(matches!(err, SkillError::MissingFrontmatter));
    }

    #[test]
    fn parse_skill_md_missing_required_fields() {
        let err = parse_skill_md(
            "---\ndescription: Has description but no name.\n---\n",
            PathBuf::from("/skills/bad"),
            SkillLocation::Project,
        )
        .unwrap_err();
        assert!(matches!(err, SkillError::MissingField("name")));

        let err = parse_skill_md(
            "---\nname: has-name\n---\n",
            PathBuf::from("/skills/bad"),
            SkillLocation::Project,
        )
        .unwrap_err();
        assert!(matches!(err, SkillError::MissingField("description")));
    }

    #[test]
    fn parse_skill_md_invalid_tier() {
        let content = "---\nname: valid-name\ndescription: Valid description.\ntier: opus\n---\n";
        let err = parse_skill_md(
            content,
            PathBuf::from("/skills/bad"),
            SkillLocation::Project,
        )
        .unwrap_err();
        assert!(matches!(err, SkillError::InvalidTier(_)));
    }

    #[test]
    fn extract_body_returns_content() {
        let content = r#"---
name: test
description: Test skill.
---

# Instructions

Do this thing.
"#;
        let body = extract_body(content).expect("should extract body");
        assert!(body.contains("# Instructions"));
        assert!(body.contains("Do this thing."));
    }

    #[test]
    fn extract_body_empty() {
        let content = "---\nname: test\ndescription: Test skill.\n---\n";
        let body = extract_body(content).expect("should extract body");
        assert!(body.is_empty());
    }

    #[test]
    fn descriptor_serializes() {
        let desc = SkillDescriptor {
            name: "test".to_string(),
            description: "A test skill.".to_string(),
            version: "1.0.0".to_string(),
            tags: vec!["test".to_string()],
            preferred_tier: Some(ModelTier::Fast),
            required_tools: vec![],
            path: PathBuf::from("/skills/test"),
            location: SkillLocation::Project,
        };
        let json = serde_json::to_string(&desc).expect("should serialize");
        assert!(json.contains("\"name\":\"test\""));
        assert!(json.contains("\"preferred_tier\":\"fast\""));
        assert!(json.contains("\"location\":\"project\""));
    }
}
