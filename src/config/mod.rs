//! Configuration management for gatecheck
//!
//! Servers tune the policy through a `.gatecheck.yml` / `.gatecheck.yaml` /
//! `.gatecheck.json` file committed to the pushed branch, or through a
//! server-side file passed with `--config`. Everything has a default so a
//! repository without configuration gets the stock policy.

use anyhow::{Context as _, Result};
use git2::Oid;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::git::refs::RefUpdate;
use crate::git::GitQuery;

pub mod checkers;

/// Config file names probed at the top of the pushed tree, in order.
pub const CONFIG_CANDIDATES: [&str; 3] = [".gatecheck.yml", ".gatecheck.yaml", ".gatecheck.json"];

/// Main configuration structure for gatecheck
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatecheckConfig {
    /// Commit message rules
    pub message: MessageConfig,

    /// Changed-file path rules
    pub paths: PathsConfig,

    /// Waiver tag policy
    pub waivers: WaiverConfig,

    /// Worker pool and subprocess settings
    pub executor: ExecutorConfig,

    /// Check names to disable entirely
    pub ignored: Vec<String>,

    /// Allowed clock skew for commit timestamps (seconds)
    #[serde(default = "default_timestamp_tolerance")]
    pub timestamp_tolerance_secs: i64,
}

/// Commit message rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Summary length that triggers the first warning
    pub summary_soft_length: usize,

    /// Summary length that should never be exceeded
    pub summary_hard_length: usize,

    /// Maximum body line length
    pub body_line_length: usize,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            summary_soft_length: 50,
            summary_hard_length: 72,
            body_line_length: 80,
        }
    }
}

/// Changed-file path rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Glob patterns a committed path must match
    pub allowed_patterns: Vec<String>,

    /// Paths longer than this are flagged
    pub max_length: usize,

    /// Extensions whose paths must be lower-case
    pub lower_case_extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            allowed_patterns: vec!["**".to_string()],
            max_length: 255,
            lower_case_extensions: vec!["pp".to_string(), "py".to_string(), "sh".to_string()],
        }
    }
}

/// Waiver tag policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaiverConfig {
    /// Commit tags that soften failing results
    pub tags: Vec<String>,

    /// Whether waiver tags also cover crashed or timed-out checkers
    pub cover_tool_failures: bool,
}

impl Default for WaiverConfig {
    fn default() -> Self {
        Self {
            tags: vec![
                "WIP".to_string(),
                "HOTFIX".to_string(),
                "MESS".to_string(),
                "TEMP".to_string(),
            ],
            cover_tool_failures: false,
        }
    }
}

/// Worker pool and subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum concurrent checker subprocesses (0 = auto-detect)
    pub max_workers: usize,

    /// Per-check subprocess timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            timeout_secs: 60,
        }
    }
}

fn default_timestamp_tolerance() -> i64 {
    2
}

impl GatecheckConfig {
    /// Parse configuration content, dispatching on the file name.
    pub fn from_slice(name: &str, content: &[u8]) -> Result<Self> {
        let config = if name.ends_with(".json") {
            serde_json::from_slice(content)
                .with_context(|| format!("failed to parse config file: {name}"))?
        } else {
            serde_yaml::from_slice(content)
                .with_context(|| format!("failed to parse config file: {name}"))?
        };
        Ok(config)
    }

    /// Load a server-side configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_slice(&path.to_string_lossy(), &content)
    }

    /// Load configuration from the tip tree of the first pushed branch, or
    /// fall back to the defaults. Deletions never carry configuration.
    pub fn from_push(git: &dyn GitQuery, updates: &[RefUpdate]) -> Self {
        let tip = updates
            .iter()
            .find(|u| u.relevant() && !u.is_tag() && !u.is_delete())
            .map(|u| u.new);
        match tip {
            Some(tip) => Self::from_tip(git, tip).unwrap_or_default(),
            None => Self::default(),
        }
    }

    fn from_tip(git: &dyn GitQuery, tip: Oid) -> Option<Self> {
        let commit = git.commit(tip).ok()?;
        for candidate in CONFIG_CANDIDATES {
            if let Ok(Some(content)) = git.tree_blob(&commit, candidate) {
                match Self::from_slice(candidate, &content) {
                    Ok(config) => return Some(config),
                    Err(err) => {
                        tracing::warn!(candidate, %err, "ignoring unparseable config in pushed tree");
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Whether a check was disabled by name.
    pub fn is_ignored(&self, check_name: &str) -> bool {
        self.ignored.iter().any(|ignored| ignored == check_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GatecheckConfig::default();
        assert_eq!(config.message.summary_hard_length, 72);
        assert_eq!(config.paths.allowed_patterns, vec!["**".to_string()]);
        assert!(config.waivers.tags.contains(&"WIP".to_string()));
        assert!(!config.waivers.cover_tool_failures);
        assert_eq!(config.executor.timeout_secs, 60);
    }

    #[test]
    fn parses_partial_yaml() {
        let yaml = b"message:\n  summary_hard_length: 60\nignored:\n  - CheckTimestamps\n";
        let config = GatecheckConfig::from_slice(".gatecheck.yml", yaml).unwrap();
        assert_eq!(config.message.summary_hard_length, 60);
        // Untouched sections keep their defaults.
        assert_eq!(config.message.summary_soft_length, 50);
        assert!(config.is_ignored("CheckTimestamps"));
        assert!(!config.is_ignored("CheckCommitSummary"));
    }

    #[test]
    fn parses_json_variant() {
        let json = br#"{"waivers": {"cover_tool_failures": true}}"#;
        let config = GatecheckConfig::from_slice(".gatecheck.json", json).unwrap();
        assert!(config.waivers.cover_tool_failures);
    }

    #[test]
    fn rejects_malformed_content() {
        assert!(GatecheckConfig::from_slice(".gatecheck.yml", b"message: [oops").is_err());
    }
}
