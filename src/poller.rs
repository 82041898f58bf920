use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};

use crate::config::Policy;
use crate::github::RepoApi;
use crate::merge::{process_repository, Outcome};

/// Run one decision step for every repository concurrently and wait for all
/// of them. Results are sorted by repository name.
///
/// Each repository gets its own task; calls within a task stay sequential.
pub async fn run_cycle(repos: &[Arc<dyn RepoApi>], policy: &Policy) -> Vec<(String, Outcome)> {
    let mut tasks = JoinSet::new();
    for api in repos {
        let api = Arc::clone(api);
        let policy = policy.clone();
        let span = info_span!("repository", repo = %api.name());
        tasks.spawn(
            async move {
                let outcome = process_repository(api.as_ref(), &policy).await;
                (api.name().to_string(), outcome)
            }
            .instrument(span),
        );
    }

    let mut results = Vec::with_capacity(repos.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!(error = %e, "repository task failed"),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Poll forever: one cycle, then sleep `interval`. Returns on Ctrl-C.
pub async fn run(repos: Vec<Arc<dyn RepoApi>>, policy: Policy, interval: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    run_until(repos, policy, interval, ctrl_c).await;
}

/// Poll until `shutdown` completes. The shutdown future is polled for the
/// whole run, so it also interrupts a cycle in progress.
pub async fn run_until(
    repos: Vec<Arc<dyn RepoApi>>,
    policy: Policy,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> u64 {
    tokio::pin!(shutdown);
    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        tokio::select! {
            results = run_cycle(&repos, &policy).instrument(info_span!("cycle", cycle)) => {
                for (repo, outcome) in &results {
                    info!(cycle, %repo, %outcome, "cycle result");
                }
            }
            _ = &mut shutdown => {
                info!(cycle, "interrupted during cycle, stopping");
                return cycle;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => {
                info!(cycle, "interrupted, stopping");
                return cycle;
            }
        }
    }
}
