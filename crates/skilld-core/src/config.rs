//! Configuration parsing for the agent runtime.
//!
//! Uses the key=value format from `.skilld/config`.
//! Precedence: CLI flags > `--config` file > `.skilld/config` > defaults.

use crate::tier::ModelTier;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Runtime configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity this agent announces as `sender_id` in delegation messages.
    pub agent_id: String,

    // Skill discovery
    /// Directories to scan for skills in priority order.
    pub skills_dirs: Vec<PathBuf>,

    // Matching and disclosure
    /// Maximum skills the matcher returns per turn (default: 3).
    pub match_top_k: usize,
    /// Session disclosure ceiling, measured in characters of instructions
    /// plus examples across all loaded skills (default: 60000).
    pub context_budget_chars: usize,
    /// Maximum characters loaded from a single SKILL.md body before
    /// truncation (default: 20000).
    pub max_body_chars: usize,

    // Model selection
    /// Default LLM provider identity (default: anthropic).
    pub default_provider: String,
    /// Providers configured for this process, in preference order.
    pub providers: Vec<String>,
    /// Model name override for the fast tier on the default provider.
    pub model_fast: Option<String>,
    /// Model name override for the thinking tier on the default provider.
    pub model_thinking: Option<String>,
    /// Model name override for the pro tier on the default provider.
    pub model_pro: Option<String>,

    // Delegation
    /// Seconds a delegation may sit without a terminal reply before it is
    /// treated as failed (default: 30).
    pub delegation_timeout_sec: u32,
    /// Base URLs of peer agents available for delegation.
    pub peer_agents: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: "skilld".to_string(),
            skills_dirs: vec![
                PathBuf::from(".skilld/skills"),
                dirs::home_dir()
                    .map_or_else(|| PathBuf::from("~/.skilld/skills"), |h| h.join(".skilld/skills")),
            ],
            match_top_k: 3,
            context_budget_chars: 60000,
            max_body_chars: 20000,
            default_provider: "anthropic".to_string(),
            providers: vec!["anthropic".to_string()],
            model_fast: None,
            model_thinking: None,
            model_pro: None,
            delegation_timeout_sec: 30,
            peer_agents: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "agent_id" => self.agent_id = value.to_string(),
            "skills_dirs" => {
                self.skills_dirs = value.split_whitespace().map(PathBuf::from).collect();
            }
            "match_top_k" => self.match_top_k = Self::parse_int(key, value)?,
            "context_budget_chars" => self.context_budget_chars = Self::parse_int(key, value)?,
            "max_body_chars" => self.max_body_chars = Self::parse_int(key, value)?,
            "default_provider" => self.default_provider = value.to_string(),
            "providers" => {
                self.providers = value.split_whitespace().map(String::from).collect();
            }
            "model_fast" => self.model_fast = Some(value.to_string()),
            "model_thinking" => self.model_thinking = Some(value.to_string()),
            "model_pro" => self.model_pro = Some(value.to_string()),
            "delegation_timeout_sec" => {
                self.delegation_timeout_sec = value.parse().map_err(|_| ConfigError::InvalidInt {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
            }
            "peer_agents" => {
                self.peer_agents = value.split_whitespace().map(String::from).collect();
            }
            _ => {
                // Warn but don't fail for unknown keys.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_int(key: &str, value: &str) -> Result<usize, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Model override for a tier on the default provider, if configured.
    pub fn model_override(&self, tier: ModelTier) -> Option<&str> {
        match tier {
            ModelTier::Fast => self.model_fast.as_deref(),
            ModelTier::Thinking => self.model_thinking.as_deref(),
            ModelTier::Pro => self.model_pro.as_deref(),
        }
    }

    /// Resolve relative skill directories against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        self.skills_dirs = self
            .skills_dirs
            .iter()
            .map(|path| {
                if path.is_relative() {
                    workspace_root.join(path)
                } else {
                    path.clone()
                }
            })
            .collect();
    }
}

/// Optional dependency for resolving user directories.
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.agent_id, "skilld");
        assert_eq!(config.match_top_k, 3);
        assert_eq!(config.context_budget_chars, 60000);
        assert_eq!(config.max_body_chars, 20000);
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.providers, vec!["anthropic"]);
        assert_eq!(config.delegation_timeout_sec, 30);
        assert!(config.peer_agents.is_empty());
        assert!(!config.skills_dirs.is_empty());
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
agent_id="analysis-agent"
match_top_k=5
context_budget_chars=120000
delegation_timeout_sec=10
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.agent_id, "analysis-agent");
        assert_eq!(config.match_top_k, 5);
        assert_eq!(config.context_budget_chars, 120000);
        assert_eq!(config.delegation_timeout_sec, 10);
    }

    #[test]
    fn parse_skills_dirs() {
        let mut config = Config::default();
        config
            .parse_content("skills_dirs=.skills ~/.skills")
            .unwrap();
        assert_eq!(
            config.skills_dirs,
            vec![PathBuf::from(".skills"), PathBuf::from("~/.skills")]
        );
    }

    #[test]
    fn parse_providers_and_models() {
        let mut config = Config::default();
        let content = r#"
default_provider=openai
providers=openai anthropic
model_fast=gpt-4o-mini
model_pro=o1
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.providers, vec!["openai", "anthropic"]);
        assert_eq!(config.model_override(ModelTier::Fast), Some("gpt-4o-mini"));
        assert_eq!(config.model_override(ModelTier::Thinking), None);
        assert_eq!(config.model_override(ModelTier::Pro), Some("o1"));
    }

    #[test]
    fn parse_peer_agents() {
        let mut config = Config::default();
        config
            .parse_content("peer_agents=http://localhost:7711 http://localhost:7712")
            .unwrap();
        assert_eq!(config.peer_agents.len(), 2);
    }

    #[test]
    fn invalid_int_is_rejected() {
        let mut config = Config::default();
        assert!(config.parse_content("match_top_k=lots").is_err());
    }

    #[test]
    fn invalid_line_is_rejected() {
        let mut config = Config::default();
        assert!(config.parse_content("no equals sign here").is_err());
    }

    #[test]
    fn from_file_merges_over_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("skilld.conf");
        std::fs::write(&path, "agent_id=\"file-agent\"\nmatch_top_k=2\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.agent_id, "file-agent");
        assert_eq!(config.match_top_k, 2);
        // Untouched keys keep their defaults.
        assert_eq!(config.context_budget_chars, 60000);
    }

    #[test]
    fn from_missing_file_is_an_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::from_file(&dir.path().join("absent.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn resolve_paths_joins_relative_dirs() {
        let mut config = Config::default();
        config.skills_dirs = vec![PathBuf::from(".skilld/skills"), PathBuf::from("/abs/skills")];
        config.resolve_paths(Path::new("/workspace"));
        assert_eq!(
            config.skills_dirs,
            vec![
                PathBuf::from("/workspace/.skilld/skills"),
                PathBuf::from("/abs/skills"),
            ]
        );
    }
}
