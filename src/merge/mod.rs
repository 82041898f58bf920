pub mod state;

pub use state::{classify, MergeState};

use tracing::{debug, info, instrument, warn};

use crate::checks::{self, Verdict};
use crate::config::Policy;
use crate::github::{PullRequest, RepoApi};
use crate::labels::{remove_automerge_labels, LabelRemovalReason};

/// What one decision step did for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No labeled pull request found
    Idle,
    /// Nothing to do until the host or CI catches up
    Waiting,
    Merged,
    /// The merge call failed and the labels were taken off
    MergeFailed,
    BranchUpdated,
    LabelRemoved(LabelRemovalReason),
    /// A call failed or no label could be taken off; retried next cycle
    Error,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Idle => write!(f, "idle"),
            Outcome::Waiting => write!(f, "waiting"),
            Outcome::Merged => write!(f, "merged"),
            Outcome::MergeFailed => write!(f, "merge failed"),
            Outcome::BranchUpdated => write!(f, "branch updated"),
            Outcome::LabelRemoved(reason) => write!(f, "label removed ({reason})"),
            Outcome::Error => write!(f, "error"),
        }
    }
}

/// Pick the one pull request to work on this cycle.
///
/// The host lists newest first, so the last match is the oldest. Priority
/// labeled pull requests win over plain automerge ones; drafts are skipped.
pub fn select<'a>(pulls: &'a [PullRequest], policy: &Policy) -> Option<&'a PullRequest> {
    let oldest_with = |label: &str| {
        pulls
            .iter()
            .rev()
            .find(|pr| !pr.draft && pr.has_label(label))
    };
    oldest_with(policy.priority_label.as_str())
        .or_else(|| oldest_with(policy.automerge_label.as_str()))
}

/// Fetch and classify mergeability; a failed fetch counts as `Bad`.
pub async fn merge_state(api: &dyn RepoApi, number: u64) -> MergeState {
    match api.merge_status(number).await {
        Ok(status) => classify(&status),
        Err(e) => {
            warn!(pr = number, error = %e, "failed to fetch merge status");
            MergeState::Bad
        }
    }
}

/// Run one decision step for a repository: select, classify, act.
#[instrument(skip_all, fields(repo = %api.name()))]
pub async fn process_repository(api: &dyn RepoApi, policy: &Policy) -> Outcome {
    let pulls = match api.list_open_pulls().await {
        Ok(pulls) => pulls,
        Err(e) => {
            warn!(error = %e, "failed to list pull requests");
            return Outcome::Error;
        }
    };

    let Some(pr) = select(&pulls, policy) else {
        debug!(open = pulls.len(), "no labeled pull request");
        return Outcome::Idle;
    };

    let state = merge_state(api, pr.number).await;
    info!(
        pr = pr.number,
        id = pr.id,
        title = %pr.title,
        url = %pr.url,
        %state,
        "selected pull request"
    );

    match state {
        MergeState::Clean => merge(api, pr, policy).await,
        MergeState::Behind => update_branch(api, pr).await,
        MergeState::Blocked => blocked(api, pr, policy).await,
        MergeState::Unstable => unstable(api, pr, policy).await,
        MergeState::Unmergeable => {
            evict(api, pr, policy, LabelRemovalReason::MergeConflicts).await
        }
        MergeState::Bad => evict(api, pr, policy, LabelRemovalReason::Default).await,
        MergeState::Waiting => Outcome::Waiting,
    }
}

async fn merge(api: &dyn RepoApi, pr: &PullRequest, policy: &Policy) -> Outcome {
    if let Err(e) = api.merge(pr, policy.merge_method).await {
        warn!(pr = pr.number, error = %e, "merge failed");
        if !remove_automerge_labels(api, pr, policy, LabelRemovalReason::Default).await {
            warn!(pr = pr.number, "no automerge label removed after failed merge");
        }
        return Outcome::MergeFailed;
    }
    info!(pr = pr.number, method = %policy.merge_method, "merged");

    if pr.is_cross_repository {
        debug!(pr = pr.number, "head is in a fork, leaving branch alone");
    } else if let Err(e) = api.delete_branch(&pr.head_ref).await {
        warn!(pr = pr.number, branch = %pr.head_ref, error = %e, "failed to delete branch");
    }
    Outcome::Merged
}

async fn update_branch(api: &dyn RepoApi, pr: &PullRequest) -> Outcome {
    match api.update_branch(pr).await {
        Ok(()) => {
            info!(pr = pr.number, branch = %pr.head_ref, "updated branch");
            Outcome::BranchUpdated
        }
        Err(e) => {
            warn!(pr = pr.number, error = %e, "failed to update branch");
            Outcome::Error
        }
    }
}

/// BLOCKED: required checks decide. When they all pass the remaining
/// blocker is assumed to be review.
async fn blocked(api: &dyn RepoApi, pr: &PullRequest, policy: &Policy) -> Outcome {
    match checks::evaluate_required(api, &pr.base_ref, &pr.head_sha).await {
        Ok(Verdict::Passing) => {
            evict(api, pr, policy, LabelRemovalReason::OutstandingReviews).await
        }
        Ok(Verdict::Failing) => evict(api, pr, policy, LabelRemovalReason::StatusChecks).await,
        Ok(Verdict::Pending) => {
            debug!(pr = pr.number, "required checks pending");
            Outcome::Waiting
        }
        Err(e) => {
            warn!(pr = pr.number, error = %e, "failed to evaluate required checks");
            Outcome::Error
        }
    }
}

/// UNSTABLE: only non-required checks are failing or pending.
async fn unstable(api: &dyn RepoApi, pr: &PullRequest, policy: &Policy) -> Outcome {
    if policy.ignore_optional_statuses {
        return merge(api, pr, policy).await;
    }
    match checks::any_failure(api, &pr.head_sha).await {
        Ok(true) => evict(api, pr, policy, LabelRemovalReason::OptionalChecks).await,
        Ok(false) => Outcome::Waiting,
        Err(e) => {
            warn!(pr = pr.number, error = %e, "failed to fetch checks");
            Outcome::Error
        }
    }
}

async fn evict(
    api: &dyn RepoApi,
    pr: &PullRequest,
    policy: &Policy,
    reason: LabelRemovalReason,
) -> Outcome {
    if remove_automerge_labels(api, pr, policy, reason).await {
        Outcome::LabelRemoved(reason)
    } else {
        warn!(pr = pr.number, %reason, "no automerge label removed");
        Outcome::Error
    }
}
