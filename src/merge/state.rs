use crate::github::MergeStatus;

/// Classification of why a pull request can or cannot be merged right now.
/// Derived fresh from `MergeStatus` every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Clean,
    Behind,
    Blocked,
    Unstable,
    Waiting,
    Unmergeable,
    Bad,
}

impl std::fmt::Display for MergeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeState::Clean => write!(f, "CLEAN"),
            MergeState::Behind => write!(f, "BEHIND"),
            MergeState::Blocked => write!(f, "BLOCKED"),
            MergeState::Unstable => write!(f, "UNSTABLE"),
            MergeState::Waiting => write!(f, "WAITING"),
            MergeState::Unmergeable => write!(f, "UNMERGEABLE"),
            MergeState::Bad => write!(f, "BAD"),
        }
    }
}

/// Map the host's mergeability onto a `MergeState`.
///
/// A pending `mergeable` wins over everything, then `false`, then the
/// mergeable-state string decides.
pub fn classify(status: &MergeStatus) -> MergeState {
    match status.mergeable {
        None => MergeState::Waiting,
        Some(false) => MergeState::Unmergeable,
        Some(true) => match status.mergeable_state.as_str() {
            "behind" => MergeState::Behind,
            "clean" => MergeState::Clean,
            "blocked" => MergeState::Blocked,
            "has_hooks" => MergeState::Waiting,
            "unstable" => MergeState::Unstable,
            "unknown" => MergeState::Waiting,
            _ => MergeState::Bad,
        },
    }
}
