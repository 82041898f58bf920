use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::github::{ApiError, BranchProtection, CheckRun, CheckSummary, RepoApi, StatusItem};

/// Reduced state of a single check-run or commit status.
/// Ordered so that `max` yields the worst of two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckState {
    Success,
    Pending,
    Failure,
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckState::Success => write!(f, "SUCCESS"),
            CheckState::Pending => write!(f, "PENDING"),
            CheckState::Failure => write!(f, "FAILURE"),
        }
    }
}

impl From<&CheckRun> for CheckState {
    fn from(run: &CheckRun) -> Self {
        match run.conclusion.as_deref() {
            Some("failure" | "action_required" | "cancelled" | "timed_out") => {
                CheckState::Failure
            }
            _ if run.status == "completed" => CheckState::Success,
            _ => CheckState::Pending,
        }
    }
}

impl From<&StatusItem> for CheckState {
    fn from(item: &StatusItem) -> Self {
        match item.state.as_str() {
            "failure" | "error" => CheckState::Failure,
            "pending" => CheckState::Pending,
            _ => CheckState::Success,
        }
    }
}

impl CheckSummary {
    /// (name, state) for every entry regardless of kind.
    pub fn states(&self) -> Vec<(&str, CheckState)> {
        match self {
            CheckSummary::CheckRuns(runs) => runs
                .iter()
                .map(|run| (run.name.as_str(), CheckState::from(run)))
                .collect(),
            CheckSummary::Statuses(items) => items
                .iter()
                .map(|item| (item.context.as_str(), CheckState::from(item)))
                .collect(),
        }
    }
}

/// Outcome of evaluating a pull request's checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every required check succeeded (or none are required)
    Passing,
    /// At least one check failed
    Failing,
    /// Nothing failed but something is still running
    Pending,
}

/// Build the name→state map for the required contexts only.
/// Required names with no reported entry stay `Pending`; a name reported
/// more than once keeps its worst state.
pub fn required_states(
    required: &[String],
    summaries: &[CheckSummary],
) -> HashMap<String, CheckState> {
    let mut states: HashMap<String, Option<CheckState>> =
        required.iter().map(|name| (name.clone(), None)).collect();

    for summary in summaries {
        for (name, state) in summary.states() {
            if let Some(slot) = states.get_mut(name) {
                *slot = Some(slot.map_or(state, |current| current.max(state)));
            }
        }
    }

    states
        .into_iter()
        .map(|(name, state)| (name, state.unwrap_or(CheckState::Pending)))
        .collect()
}

/// Reduce required-check states: any failure wins, then all-success passes.
pub fn reduce(states: &HashMap<String, CheckState>) -> Verdict {
    if states.values().any(|s| *s == CheckState::Failure) {
        Verdict::Failing
    } else if states.values().all(|s| *s == CheckState::Success) {
        Verdict::Passing
    } else {
        Verdict::Pending
    }
}

/// Evaluate the required checks guarding the target branch of a pull request.
///
/// An unprotected branch has nothing required and passes without touching
/// the check or status endpoints. Protection that cannot be read counts as
/// no required checks; failures fetching the check summaries propagate.
#[instrument(skip(api), fields(repo = %api.name()))]
pub async fn evaluate_required(
    api: &dyn RepoApi,
    base_ref: &str,
    head_sha: &str,
) -> Result<Verdict, ApiError> {
    let BranchProtection {
        protected,
        required_contexts,
    } = match api.branch_protection(base_ref).await {
        Ok(protection) => protection,
        Err(e) => {
            warn!(error = %e, base = base_ref, "could not read protection, assuming none");
            BranchProtection::default()
        }
    };

    if !protected || required_contexts.is_empty() {
        debug!(protected, "no required checks");
        return Ok(Verdict::Passing);
    }

    let summaries = [api.check_runs(head_sha).await?, api.statuses(head_sha).await?];
    let states = required_states(&required_contexts, &summaries);
    for (name, state) in &states {
        debug!(check = %name, %state, "required check");
    }
    Ok(reduce(&states))
}

/// Whether any reported check or status, required or not, has failed.
#[instrument(skip(api), fields(repo = %api.name()))]
pub async fn any_failure(api: &dyn RepoApi, head_sha: &str) -> Result<bool, ApiError> {
    let summaries = [api.check_runs(head_sha).await?, api.statuses(head_sha).await?];
    let failed: Vec<&str> = summaries
        .iter()
        .flat_map(|s| s.states())
        .filter(|(_, state)| *state == CheckState::Failure)
        .map(|(name, _)| name)
        .collect();
    if !failed.is_empty() {
        debug!(failed = ?failed, "failing checks");
    }
    Ok(!failed.is_empty())
}
