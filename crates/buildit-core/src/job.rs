//! Job specification as handed to the worker by the queue.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Branch used when the job carries no commit information.
pub const DEFAULT_BRANCH: &str = "master";

/// Commit message used when the job carries no commit information.
pub const MANUAL_START_MESSAGE: &str = "manual start";

/// Immutable description of a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    /// Queue-assigned job identifier.
    pub job_id: String,
    /// Owner of the job.
    pub user_id: String,
    /// SSH clone URL of the repository.
    pub repo_ssh_url: String,
    /// Project-level repository configuration.
    pub repo_config: RepoConfig,
    /// Commit that triggered the job, absent for manual runs.
    #[serde(default)]
    pub commit_info: Option<CommitInfo>,
    /// API key for token-authenticated clones.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Repository configuration stored with the project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Canonical repository URL reported with every lifecycle event.
    pub url: String,
    /// Deploy key used by authenticated git operations.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Project environment overrides for launched commands.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobData {
    /// Branch the working directory should be synchronized to.
    pub fn branch(&self) -> &str {
        self.commit_info
            .as_ref()
            .and_then(|c| c.branch.as_deref())
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }

    pub fn commit_message(&self) -> &str {
        self.commit_info
            .as_ref()
            .and_then(|c| c.message.as_deref())
            .filter(|m| !m.is_empty())
            .unwrap_or(MANUAL_START_MESSAGE)
    }

    pub fn private_key(&self) -> Option<&str> {
        self.repo_config.private_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_job() {
        let json = r#"{
            "job_id": "job-1",
            "user_id": "user-1",
            "repo_ssh_url": "git@github.com:acme/widgets.git",
            "repo_config": { "url": "https://github.com/acme/widgets" }
        }"#;

        let job: JobData = serde_json::from_str(json).unwrap();
        assert_eq!(job.job_id, "job-1");
        assert!(job.repo_config.env.is_empty());
        assert_eq!(job.branch(), DEFAULT_BRANCH);
        assert_eq!(job.commit_message(), MANUAL_START_MESSAGE);
    }

    #[test]
    fn test_branch_from_commit_info() {
        let job = JobData {
            job_id: "job-1".to_string(),
            user_id: "user-1".to_string(),
            repo_ssh_url: "git@github.com:acme/widgets.git".to_string(),
            repo_config: RepoConfig::default(),
            commit_info: Some(CommitInfo {
                branch: Some("feature/login".to_string()),
                message: Some("Add login".to_string()),
            }),
            api_key: None,
        };

        assert_eq!(job.branch(), "feature/login");
        assert_eq!(job.commit_message(), "Add login");
    }
}
