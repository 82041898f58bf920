//! In-memory `RepoApi` used by the decision-logic tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{
    ApiError, BranchProtection, CheckRun, CheckSummary, Label, MergeMethod, MergeStatus,
    PullRequest, RepoApi, StatusItem,
};

/// Every call the mock received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPulls,
    MergeStatus(u64),
    BranchProtection(String),
    CheckRuns(String),
    Statuses(String),
    Merge(u64, MergeMethod),
    UpdateBranch(u64),
    DeleteBranch(String),
    IssueLabels(u64),
    RemoveLabel(u64, String),
    PostComment(u64, String),
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListPulls,
    MergeStatus,
    BranchProtection,
    CheckRuns,
    Statuses,
    Merge,
    UpdateBranch,
    DeleteBranch,
    IssueLabels,
    RemoveLabel,
    PostComment,
}

pub struct MockRepo {
    pulls: Mutex<Vec<PullRequest>>,
    merge_status: Mutex<MergeStatus>,
    protection: Mutex<BranchProtection>,
    check_runs: Mutex<Vec<CheckRun>>,
    statuses: Mutex<Vec<StatusItem>>,
    issue_labels: Mutex<HashMap<u64, Vec<String>>>,
    failing: Mutex<HashSet<Op>>,
    calls: Mutex<Vec<Call>>,
}

/// Build a same-repository pull request carrying the given labels.
pub fn pull(number: u64, labels: &[&str]) -> PullRequest {
    PullRequest {
        id: 1000 + number,
        number,
        title: format!("PR {number}"),
        url: format!("https://github.com/org/repo/pull/{number}"),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        head_ref: format!("feature/{number}"),
        head_sha: format!("sha{number}"),
        base_ref: "main".to_string(),
        is_cross_repository: false,
        draft: false,
    }
}

pub fn check_run(name: &str, status: &str, conclusion: Option<&str>) -> CheckRun {
    CheckRun {
        name: name.to_string(),
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
    }
}

pub fn status_item(context: &str, state: &str) -> StatusItem {
    StatusItem {
        context: context.to_string(),
        state: state.to_string(),
    }
}

impl MockRepo {
    pub fn new(pulls: Vec<PullRequest>) -> Self {
        let issue_labels = pulls
            .iter()
            .map(|p| (p.number, p.labels.iter().cloned().collect()))
            .collect();
        Self {
            pulls: Mutex::new(pulls),
            merge_status: Mutex::new(MergeStatus {
                mergeable: Some(true),
                mergeable_state: "clean".to_string(),
            }),
            protection: Mutex::new(BranchProtection::default()),
            check_runs: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            issue_labels: Mutex::new(issue_labels),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_merge_status(&self, mergeable: Option<bool>, state: &str) {
        *self.merge_status.lock().unwrap() = MergeStatus {
            mergeable,
            mergeable_state: state.to_string(),
        };
    }

    pub fn set_required(&self, contexts: &[&str]) {
        *self.protection.lock().unwrap() = BranchProtection {
            protected: true,
            required_contexts: contexts.iter().map(|c| c.to_string()).collect(),
        };
    }

    pub fn set_check_runs(&self, runs: Vec<CheckRun>) {
        *self.check_runs.lock().unwrap() = runs;
    }

    pub fn set_statuses(&self, items: Vec<StatusItem>) {
        *self.statuses.lock().unwrap() = items;
    }

    /// Override the labels the issue endpoint reports for a pull request.
    pub fn set_issue_labels(&self, number: u64, labels: &[&str]) {
        self.issue_labels
            .lock()
            .unwrap()
            .insert(number, labels.iter().map(|l| l.to_string()).collect());
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|&c| pred(c)).count()
    }

    /// Comments posted so far, as (pr number, body).
    pub fn comments(&self) -> Vec<(u64, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::PostComment(n, body) => Some((*n, body.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call, op: Op) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(&op) {
            return Err(ApiError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                url: format!("mock://{op:?}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RepoApi for MockRepo {
    fn name(&self) -> &str {
        "org/repo"
    }

    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, ApiError> {
        self.record(Call::ListPulls, Op::ListPulls)?;
        Ok(self.pulls.lock().unwrap().clone())
    }

    async fn merge_status(&self, number: u64) -> Result<MergeStatus, ApiError> {
        self.record(Call::MergeStatus(number), Op::MergeStatus)?;
        Ok(self.merge_status.lock().unwrap().clone())
    }

    async fn branch_protection(&self, branch: &str) -> Result<BranchProtection, ApiError> {
        self.record(
            Call::BranchProtection(branch.to_string()),
            Op::BranchProtection,
        )?;
        Ok(self.protection.lock().unwrap().clone())
    }

    async fn check_runs(&self, sha: &str) -> Result<CheckSummary, ApiError> {
        self.record(Call::CheckRuns(sha.to_string()), Op::CheckRuns)?;
        Ok(CheckSummary::CheckRuns(self.check_runs.lock().unwrap().clone()))
    }

    async fn statuses(&self, sha: &str) -> Result<CheckSummary, ApiError> {
        self.record(Call::Statuses(sha.to_string()), Op::Statuses)?;
        Ok(CheckSummary::Statuses(self.statuses.lock().unwrap().clone()))
    }

    async fn merge(&self, pr: &PullRequest, method: MergeMethod) -> Result<(), ApiError> {
        self.record(Call::Merge(pr.number, method), Op::Merge)
    }

    async fn update_branch(&self, pr: &PullRequest) -> Result<(), ApiError> {
        self.record(Call::UpdateBranch(pr.number), Op::UpdateBranch)
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), ApiError> {
        self.record(Call::DeleteBranch(branch.to_string()), Op::DeleteBranch)
    }

    async fn issue_labels(&self, number: u64) -> Result<Vec<Label>, ApiError> {
        self.record(Call::IssueLabels(number), Op::IssueLabels)?;
        Ok(self
            .issue_labels
            .lock()
            .unwrap()
            .get(&number)
            .map(|labels| {
                labels
                    .iter()
                    .map(|name| Label { name: name.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<(), ApiError> {
        self.record(Call::RemoveLabel(number, label.to_string()), Op::RemoveLabel)?;
        let mut labels = self.issue_labels.lock().unwrap();
        let current = labels.entry(number).or_default();
        match current.iter().position(|l| l == label) {
            Some(i) => {
                current.remove(i);
                Ok(())
            }
            None => Err(ApiError::Status {
                status: StatusCode::NOT_FOUND,
                url: format!("mock://issues/{number}/labels/{label}"),
            }),
        }
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), ApiError> {
        self.record(Call::PostComment(number, body.to_string()), Op::PostComment)
    }
}
