use tracing::{debug, info, instrument, warn};

use crate::config::Policy;
use crate::github::{PullRequest, RepoApi};

/// Why the automerge labels are being taken off a pull request.
/// Selects the comment posted afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelRemovalReason {
    Default,
    StatusChecks,
    MergeConflicts,
    OutstandingReviews,
    OptionalChecks,
}

impl std::fmt::Display for LabelRemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelRemovalReason::Default => write!(f, "DEFAULT"),
            LabelRemovalReason::StatusChecks => write!(f, "STATUS_CHECKS"),
            LabelRemovalReason::MergeConflicts => write!(f, "MERGE_CONFLICTS"),
            LabelRemovalReason::OutstandingReviews => write!(f, "OUTSTANDING_REVIEWS"),
            LabelRemovalReason::OptionalChecks => write!(f, "OPTIONAL_CHECKS"),
        }
    }
}

impl LabelRemovalReason {
    /// Comment body explaining the removal to the pull request's author.
    pub fn comment(&self, label: &str) -> String {
        let cause = match self {
            LabelRemovalReason::Default => {
                "this pull request could not be merged automatically"
            }
            LabelRemovalReason::StatusChecks => "one or more required status checks failed",
            LabelRemovalReason::MergeConflicts => {
                "it has merge conflicts with the target branch"
            }
            LabelRemovalReason::OutstandingReviews => {
                "all required status checks passed but merging is still blocked, \
                 most likely by outstanding review requests"
            }
            LabelRemovalReason::OptionalChecks => "a status check that is not required failed",
        };
        format!(
            "The `{label}` label was removed because {cause}. \
             Once this is addressed, add the label again to re-queue the pull request."
        )
    }
}

/// Take the automerge and priority labels off a pull request, then post the
/// comment for `reason` if at least one label was actually removed.
///
/// Labels that are not present are skipped. Returns whether any label was
/// removed.
#[instrument(skip_all, fields(repo = %api.name(), pr = pr.number, %reason))]
pub async fn remove_automerge_labels(
    api: &dyn RepoApi,
    pr: &PullRequest,
    policy: &Policy,
    reason: LabelRemovalReason,
) -> bool {
    let current: Vec<String> = match api.issue_labels(pr.number).await {
        Ok(labels) => labels.into_iter().map(|l| l.name).collect(),
        Err(e) => {
            warn!(error = %e, "could not fetch labels, using snapshot");
            pr.labels.iter().cloned().collect()
        }
    };

    let mut removed_any = false;
    for label in [&policy.automerge_label, &policy.priority_label] {
        if !current.iter().any(|l| l == label) {
            debug!(%label, "label not present");
            continue;
        }
        match api.remove_label(pr.number, label).await {
            Ok(()) => {
                info!(%label, "removed label");
                removed_any = true;
            }
            Err(e) => warn!(%label, error = %e, "failed to remove label"),
        }
    }

    if removed_any {
        let body = reason.comment(&policy.automerge_label);
        if let Err(e) = api.post_comment(pr.number, &body).await {
            warn!(error = %e, "failed to post removal comment");
        }
    }

    removed_any
}
