//! Skill registry: directory scanning, descriptor parsing, and immutable
//! snapshots.
//!
//! Discovery scans the configured directories in priority order (project
//! directories before global ones), parses each `SKILL.md` frontmatter
//! eagerly, and never reads a skill body. The resulting descriptors are
//! frozen into a [`RegistrySnapshot`]; matching always runs against a
//! snapshot, so a concurrent rescan can never change results mid-turn.

use skilld_core::config::Config;
use skilld_core::skills::{parse_skill_md, SkillDescriptor, SkillError, SkillLocation};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Parse/load error details for a single skill directory.
#[derive(Debug)]
pub struct DiscoveryError {
    /// Skill name (directory name fallback).
    pub name: String,
    /// Path to the SKILL.md file that failed.
    pub path: PathBuf,
    /// Underlying parse/load error.
    pub error: SkillError,
}

/// An immutable view of the registry at one point in time.
///
/// Descriptors keep discovery order, which is also the dedupe priority
/// order. The digest covers every descriptor's name and version, so two
/// snapshots with the same digest expose the same skill set.
#[derive(Debug)]
pub struct RegistrySnapshot {
    skills: Vec<SkillDescriptor>,
    by_name: HashMap<String, usize>,
    digest: String,
}

impl RegistrySnapshot {
    /// Build a snapshot from already-deduplicated descriptors.
    fn new(skills: Vec<SkillDescriptor>) -> Self {
        let mut by_name = HashMap::with_capacity(skills.len());
        let mut hasher = Sha256::new();
        for (i, skill) in skills.iter().enumerate() {
            by_name.insert(skill.name.clone(), i);
            hasher.update(skill.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(skill.version.as_bytes());
            hasher.update(b"\n");
        }
        let digest = format!("{:x}", hasher.finalize());
        Self {
            skills,
            by_name,
            digest,
        }
    }

    /// Empty snapshot, used before the first scan completes.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[cfg(test)]
    pub(crate) fn from_skills_for_tests(skills: Vec<SkillDescriptor>) -> Self {
        Self::new(skills)
    }

    /// Look up a descriptor by skill name.
    pub fn get(&self, name: &str) -> Option<&SkillDescriptor> {
        self.by_name.get(name).map(|&i| &self.skills[i])
    }

    /// All descriptors in discovery order.
    pub fn skills(&self) -> &[SkillDescriptor] {
        &self.skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Content digest over (name, version) pairs.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Shared registry handle. Readers clone an `Arc` snapshot and keep using
/// it for the duration of a turn; `rescan` swaps the snapshot atomically.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(RegistrySnapshot::empty())),
        }
    }

    /// Current snapshot. Cheap; bumps an `Arc` refcount.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Rescan the configured directories and swap in a fresh snapshot.
    ///
    /// Returns the errors recorded during the scan; a skill that fails to
    /// parse is skipped, never fatal.
    pub fn rescan(&self, config: &Config, workspace_root: &Path) -> Vec<DiscoveryError> {
        let result = discover_skills(config, workspace_root);
        let snapshot = Arc::new(RegistrySnapshot::new(result.skills));
        debug!(
            count = snapshot.len(),
            digest = %snapshot.digest(),
            "registry snapshot swapped"
        );
        match self.inner.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        result.errors
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of skill discovery with any per-skill errors.
#[derive(Debug)]
pub struct DiscoveryResult {
    pub skills: Vec<SkillDescriptor>,
    pub errors: Vec<DiscoveryError>,
}

/// Discover all skills from the configured directories.
///
/// Directories are scanned in configuration order; project-local
/// directories come first, so on a duplicate name the project copy wins.
/// Invalid frontmatter skips the skill and records an error.
pub fn discover_skills(config: &Config, workspace_root: &Path) -> DiscoveryResult {
    let mut skills = Vec::new();
    let mut errors = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    for dir in &config.skills_dirs {
        let resolved = if dir.is_relative() {
            workspace_root.join(dir)
        } else {
            dir.clone()
        };

        let location = if resolved.starts_with(workspace_root) {
            SkillLocation::Project
        } else {
            SkillLocation::Global
        };

        scan_directory(
            &resolved,
            location,
            &mut skills,
            &mut errors,
            &mut seen_names,
        );
    }

    debug!(
        count = skills.len(),
        errors = errors.len(),
        "discovered skills"
    );

    DiscoveryResult { skills, errors }
}

/// Scan a single directory of skill subdirectories.
fn scan_directory(
    dir: &Path,
    location: SkillLocation,
    skills: &mut Vec<SkillDescriptor>,
    errors: &mut Vec<DiscoveryError>,
    seen_names: &mut HashSet<String>,
) {
    if !dir.is_dir() {
        debug!(path = %dir.display(), "skills directory not found, skipping");
        return;
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                path = %dir.display(),
                error = %e,
                "failed to read skills directory"
            );
            return;
        }
    };

    // Sort entries so a scan of the same tree is always the same snapshot.
    let mut skill_dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    skill_dirs.sort();

    for skill_dir in skill_dirs {
        let skill_md_path = skill_dir.join("SKILL.md");
        if !skill_md_path.exists() {
            debug!(
                path = %skill_dir.display(),
                "no SKILL.md found, skipping"
            );
            continue;
        }

        let content = match fs::read_to_string(&skill_md_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    path = %skill_md_path.display(),
                    error = %e,
                    "failed to read SKILL.md"
                );
                errors.push(DiscoveryError {
                    name: dir_name(&skill_dir),
                    path: skill_md_path.clone(),
                    error: SkillError::InvalidYaml(format!("IO error: {e}")),
                });
                continue;
            }
        };

        match parse_skill_md(&content, skill_dir.clone(), location) {
            Ok(descriptor) => {
                // Duplicate names keep the first match in search order.
                if seen_names.contains(&descriptor.name) {
                    debug!(
                        name = %descriptor.name,
                        path = %skill_dir.display(),
                        "duplicate skill name, skipping"
                    );
                    continue;
                }

                seen_names.insert(descriptor.name.clone());
                skills.push(descriptor);
            }
            Err(e) => {
                warn!(
                    path = %skill_md_path.display(),
                    error = %e,
                    "failed to parse SKILL.md"
                );
                errors.push(DiscoveryError {
                    name: dir_name(&skill_dir),
                    path: skill_md_path.clone(),
                    error: e,
                });
            }
        }
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}
