//! Worker configuration parsing.
//!
//! ```kdl
//! interactive #false
//! update-in-place #true
//! git-failure "fatal: could not read Username" within=20 kind="auth" message="Failed to authenticate. Do you still have access to this repo?"
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Substring git prints when it needs credentials it was not given.
pub const MISSING_CREDENTIALS_PATTERN: &str = "fatal: could not read Username";

/// Shown when git failed for lack of credentials.
pub const AUTH_FAILURE_MESSAGE: &str =
    "Failed to authenticate. Do you still have access to this repo?";

/// Match offset bound of the default credentials rule, in characters.
pub const DEFAULT_PATTERN_WITHIN: usize = 20;

/// Settings for a single job run by this worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Allow commands to run under a pseudo-terminal.
    pub interactive: bool,
    /// Update an existing checkout in place instead of cloning fresh.
    pub update_in_place: bool,
    /// Git failure classification rules, evaluated in order.
    pub failure_rules: Vec<FailureRule>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interactive: true,
            update_in_place: true,
            failure_rules: FailureRule::defaults(),
        }
    }
}

impl WorkerConfig {
    /// Read and parse a worker configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_worker_config(&content)
    }
}

/// Classification applied when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote refused or never received credentials.
    #[default]
    Auth,
    /// Any other recognised git failure.
    Git,
}

/// A git output pattern and the message shown when it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRule {
    pub pattern: String,
    /// The pattern only matches when it starts fewer than this many
    /// characters into the output.
    pub within: usize,
    pub kind: FailureKind,
    pub message: String,
}

impl FailureRule {
    pub fn defaults() -> Vec<Self> {
        vec![Self {
            pattern: MISSING_CREDENTIALS_PATTERN.to_string(),
            within: DEFAULT_PATTERN_WITHIN,
            kind: FailureKind::Auth,
            message: AUTH_FAILURE_MESSAGE.to_string(),
        }]
    }
}

/// Parse a worker configuration from KDL text.
pub fn parse_worker_config(kdl: &str) -> ConfigResult<WorkerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = WorkerConfig::default();
    let mut rules = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "interactive" => {
                config.interactive = get_first_bool_arg(node, "interactive")?;
            }
            "update-in-place" | "update_in_place" => {
                config.update_in_place = get_first_bool_arg(node, "update-in-place")?;
            }
            "git-failure" => {
                rules.push(parse_failure_rule(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if !rules.is_empty() {
        config.failure_rules = rules;
    }

    Ok(config)
}

fn parse_failure_rule(node: &KdlNode) -> ConfigResult<FailureRule> {
    let pattern = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("git-failure pattern".to_string()))?;

    let message = get_string_prop(node, "message")
        .ok_or_else(|| ConfigError::MissingField(format!("message for '{}'", pattern)))?;

    let within = match node.get("within") {
        Some(value) => value
            .as_integer()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "within".to_string(),
                message: format!("expected a non-negative integer, got {}", value),
            })?,
        None => DEFAULT_PATTERN_WITHIN,
    };

    let kind = match get_string_prop(node, "kind").as_deref() {
        None | Some("auth") => FailureKind::Auth,
        Some("git") => FailureKind::Git,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "kind".to_string(),
                message: format!("unknown failure kind: {}", other),
            });
        }
    };

    Ok(FailureRule {
        pattern,
        within,
        kind,
        message,
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode, field: &str) -> ConfigResult<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?
        .value()
        .as_bool()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected #true or #false".to_string(),
        })
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_worker_config("").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert!(config.interactive);
        assert!(config.update_in_place);
        assert_eq!(config.failure_rules.len(), 1);
        assert_eq!(config.failure_rules[0].within, 20);
    }

    #[test]
    fn test_parse_flags() {
        let kdl = r#"
            interactive #false
            update-in-place #false
        "#;

        let config = parse_worker_config(kdl).unwrap();
        assert!(!config.interactive);
        assert!(!config.update_in_place);
    }

    #[test]
    fn test_parse_failure_rules_replace_defaults() {
        let kdl = r#"
            git-failure "Permission denied (publickey)" within=40 message="Deploy key rejected"
            git-failure "Could not resolve host" kind="git" message="Repository host unreachable"
        "#;

        let config = parse_worker_config(kdl).unwrap();
        assert_eq!(config.failure_rules.len(), 2);
        assert_eq!(config.failure_rules[0].pattern, "Permission denied (publickey)");
        assert_eq!(config.failure_rules[0].within, 40);
        assert_eq!(config.failure_rules[0].kind, FailureKind::Auth);
        assert_eq!(config.failure_rules[1].within, DEFAULT_PATTERN_WITHIN);
        assert_eq!(config.failure_rules[1].kind, FailureKind::Git);
    }

    #[test]
    fn test_rule_without_message_is_rejected() {
        let result = parse_worker_config(r#"git-failure "fatal""#);
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }

    #[test]
    fn test_non_bool_flag_is_rejected() {
        let result = parse_worker_config(r#"interactive "yes""#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = parse_worker_config(r#"git-failure "x" kind="network" message="m""#);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.kdl");
        std::fs::write(&path, "interactive #false\n").unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert!(!config.interactive);
        assert!(config.update_in_place);
    }
}
