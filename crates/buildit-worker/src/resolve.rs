//! Repository URL resolution, commit hints and per-branch domain names.

use buildit_core::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static REPO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:ssh|https?|git)://)?(?:[^@/]+@)?(?P<host>[^:/]+)(?::\d+)?[:/](?P<owner>[^/]+)/(?P<name>[^/]+?)(?:\.git)?/?$",
    )
    .unwrap()
});

static HINT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[buildit\s+([^\]]+)\]").unwrap());

/// Longest DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Host, owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPath {
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl RepoPath {
    /// Parse scp-style (`git@host:owner/name.git`), `ssh://` and `https://`
    /// repository URLs.
    pub fn parse(url: &str) -> Result<Self> {
        let caps = REPO_REGEX
            .captures(url.trim())
            .ok_or_else(|| Error::InvalidInput(format!("unrecognised repository URL: {}", url)))?;
        Ok(Self {
            host: caps["host"].to_string(),
            owner: caps["owner"].to_string(),
            name: caps["name"].to_string(),
        })
    }

    pub fn https_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.name)
    }
}

/// Authenticated URL for git, and a credential-free URL for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrls {
    pub auth: String,
    pub display: String,
}

pub trait UrlResolver: Send + Sync {
    fn resolve(
        &self,
        ssh_url: &str,
        private_key: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<RepoUrls>;
}

/// Resolves GitHub-style repository URLs.
///
/// With a deploy key git uses the SSH URL; otherwise it clones over HTTPS,
/// with the API key as the username when one is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct GithubUrlResolver;

impl UrlResolver for GithubUrlResolver {
    fn resolve(
        &self,
        ssh_url: &str,
        private_key: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<RepoUrls> {
        let repo = RepoPath::parse(ssh_url)?;
        let display = repo.https_url();

        let auth = match (private_key, api_key) {
            (Some(_), _) => ssh_url.to_string(),
            (None, Some(token)) => {
                let mut url = Url::parse(&format!("{}.git", display))
                    .map_err(|e| Error::InvalidInput(format!("invalid repository URL: {}", e)))?;
                url.set_username(token)
                    .map_err(|_| Error::InvalidInput("cannot embed API key in URL".to_string()))?;
                url.to_string()
            }
            (None, None) => format!("{}.git", display),
        };

        Ok(RepoUrls { auth, display })
    }
}

/// Extracts an optional directive from a commit message.
pub trait HintParser: Send + Sync {
    fn parse(&self, message: &str) -> Option<String>;
}

/// Reads hints written as `[buildit <hint>]` anywhere in the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagHintParser;

impl HintParser for TagHintParser {
    fn parse(&self, message: &str) -> Option<String> {
        HINT_REGEX
            .captures(message)
            .map(|caps| caps[1].trim().to_string())
            .filter(|hint| !hint.is_empty())
    }
}

/// DNS label identifying a repository branch, e.g.
/// `feature-login-widgets-acme`.
///
/// Labels longer than 63 characters are truncated and suffixed with a short
/// hash of the full label so they stay unique.
pub fn repo_domain(repo_url: &str, branch: &str) -> String {
    let raw = match RepoPath::parse(repo_url) {
        Ok(repo) => format!("{}-{}-{}", branch, repo.name, repo.owner),
        Err(_) => format!("{}-{}", branch, repo_url),
    };
    let label = sanitize_label(&raw);

    if label.len() <= MAX_LABEL_LEN {
        return label;
    }

    let digest = format!("{:x}", md5::compute(label.as_bytes()));
    let head = label[..MAX_LABEL_LEN - 9].trim_end_matches('-');
    format!("{}-{}", head, &digest[..8])
}

fn sanitize_label(raw: &str) -> String {
    let mut label = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            label.push(c);
        } else if !label.is_empty() && !label.ends_with('-') {
            label.push('-');
        }
    }
    label.trim_end_matches('-').to_string()
}
