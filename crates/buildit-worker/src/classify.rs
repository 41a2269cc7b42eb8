//! Git failure classification.

use buildit_config::{FailureKind, FailureRule};

/// Message used when no rule matches a failed git command.
pub const GENERIC_GIT_FAILURE: &str = "Git failure";

/// Outcome of classifying a finished git command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure {
        kind: FailureKind,
        exit_code: i32,
        /// User-facing message including the exit code.
        message: String,
    },
}

/// Ordered list of rules matched against a failed git command's output.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    rules: Vec<FailureRule>,
}

impl FailureClassifier {
    pub fn new(rules: Vec<FailureRule>) -> Self {
        Self { rules }
    }

    /// Classify a git command's result. Stderr is searched, or stdout when
    /// stderr is empty; the first rule whose pattern starts within its
    /// bound wins.
    pub fn classify(&self, exit_code: i32, stdout: &str, stderr: &str) -> Verdict {
        if exit_code == 0 {
            return Verdict::Success;
        }

        let text = if stderr.is_empty() { stdout } else { stderr };
        let (kind, message) = self
            .rules
            .iter()
            .find(|rule| matches_within(text, &rule.pattern, rule.within))
            .map(|rule| (rule.kind, rule.message.as_str()))
            .unwrap_or((FailureKind::Git, GENERIC_GIT_FAILURE));

        Verdict::Failure {
            kind,
            exit_code,
            message: format!("{} (exit code: {})", message, exit_code),
        }
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(FailureRule::defaults())
    }
}

/// Whether the first occurrence of `pattern` starts fewer than `within`
/// characters into `text`.
fn matches_within(text: &str, pattern: &str, within: usize) -> bool {
    text.find(pattern)
        .is_some_and(|byte_offset| text[..byte_offset].chars().count() < within)
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_config::worker::AUTH_FAILURE_MESSAGE;

    #[test]
    fn test_zero_exit_is_success() {
        let verdict = FailureClassifier::default().classify(0, "ok", "");
        assert_eq!(verdict, Verdict::Success);
    }

    #[test]
    fn test_missing_credentials_near_start_is_auth_failure() {
        let stderr = "remote: ...\nfatal: could not read Username for 'https://github.com'";
        let verdict = FailureClassifier::default().classify(128, "", stderr);

        assert_eq!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Auth,
                exit_code: 128,
                message: format!("{} (exit code: 128)", AUTH_FAILURE_MESSAGE),
            }
        );
    }

    #[test]
    fn test_unrelated_error_is_generic() {
        let verdict = FailureClassifier::default().classify(1, "", "some unrelated error");
        assert_eq!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Git,
                exit_code: 1,
                message: "Git failure (exit code: 1)".to_string(),
            }
        );
    }

    #[test]
    fn test_pattern_past_bound_is_generic() {
        let stderr = format!("{}fatal: could not read Username", "x".repeat(20));
        let verdict = FailureClassifier::default().classify(128, "", &stderr);
        assert!(matches!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Git,
                ..
            }
        ));

        let stderr = format!("{}fatal: could not read Username", "x".repeat(19));
        let verdict = FailureClassifier::default().classify(128, "", &stderr);
        assert!(matches!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Auth,
                ..
            }
        ));
    }

    #[test]
    fn test_stdout_searched_when_stderr_empty() {
        let verdict =
            FailureClassifier::default().classify(128, "fatal: could not read Username", "");
        assert!(matches!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Auth,
                ..
            }
        ));
    }

    #[test]
    fn test_offset_counts_characters_not_bytes() {
        // Ten two-byte characters: byte offset 20, character offset 10.
        let stderr = format!("{}fatal: could not read Username", "é".repeat(10));
        let verdict = FailureClassifier::default().classify(128, "", &stderr);
        assert!(matches!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Auth,
                ..
            }
        ));
    }

    #[test]
    fn test_rules_are_evaluated_in_order() {
        let classifier = FailureClassifier::new(vec![
            FailureRule {
                pattern: "fatal".to_string(),
                within: 100,
                kind: FailureKind::Git,
                message: "First".to_string(),
            },
            FailureRule {
                pattern: "fatal: could not read Username".to_string(),
                within: 100,
                kind: FailureKind::Auth,
                message: "Second".to_string(),
            },
        ]);

        let verdict = classifier.classify(2, "", "fatal: could not read Username");
        assert_eq!(
            verdict,
            Verdict::Failure {
                kind: FailureKind::Git,
                exit_code: 2,
                message: "First (exit code: 2)".to_string(),
            }
        );
    }
}
