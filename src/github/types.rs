use std::collections::HashSet;

/// Snapshot of an open pull request, fetched fresh every cycle.
/// Note: Not Deserialize; built from the host's wire records in github/mod.rs.
#[derive(Debug, Clone)]
pub struct PullRequest {
    /// Host-wide id
    pub id: u64,
    /// PR number within the repository (e.g., 42)
    pub number: u64,
    /// PR title
    pub title: String,
    /// Browser URL
    pub url: String,
    /// Names of the labels currently attached
    pub labels: HashSet<String>,
    /// Source branch name
    pub head_ref: String,
    /// Source branch tip
    pub head_sha: String,
    /// Target branch name
    pub base_ref: String,
    /// Whether the source branch lives in a fork
    pub is_cross_repository: bool,
    /// Draft pull requests are never selected
    pub draft: bool,
}

impl PullRequest {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
}

/// Host-computed mergeability of a single pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStatus {
    /// `None` while the host is still computing it
    pub mergeable: Option<bool>,
    /// Why the pull request can or cannot be merged (e.g., "clean", "blocked")
    pub mergeable_state: String,
}

/// Protection rules of a target branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchProtection {
    pub protected: bool,
    /// Status-check contexts the branch requires; empty when unprotected
    pub required_contexts: Vec<String>,
}

/// One check-run reported for a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRun {
    pub name: String,
    /// "queued", "in_progress" or "completed"
    pub status: String,
    /// Only present once completed
    pub conclusion: Option<String>,
}

/// One legacy commit status reported for a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusItem {
    pub context: String,
    /// "success", "pending", "failure" or "error"
    pub state: String,
}

/// The two kinds of CI signal the host reports for a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckSummary {
    CheckRuns(Vec<CheckRun>),
    Statuses(Vec<StatusItem>),
}

/// Merge strategy the host should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(MergeMethod::Merge),
            "squash" => Ok(MergeMethod::Squash),
            "rebase" => Ok(MergeMethod::Rebase),
            _ => Err(s.to_string()),
        }
    }
}
