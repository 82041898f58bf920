mod checks;
mod config;
mod github;
mod labels;
mod merge;
mod poller;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use github::{RepoApi, RepoClient};

/// automerge-bot: polls GitHub repositories and drives pull requests labeled
/// for automatic merging through checks to a merge, or takes the label off
/// with a comment explaining why.
#[derive(Parser, Debug)]
#[command(name = "automerge-bot", version, about)]
struct Cli {
    /// Config file (defaults to .automerge.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit, for an external scheduler
    #[arg(long)]
    once: bool,

    /// Seconds between cycles, overriding the config file
    #[arg(short, long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(secs) = cli.interval {
        config.automerge.interval_secs = Some(secs);
    }
    let settings = config.resolve()?;
    debug!(
        repositories = settings.repositories.len(),
        label = %settings.policy.automerge_label,
        priority_label = %settings.policy.priority_label,
        merge_method = %settings.policy.merge_method,
        ignore_optional_statuses = settings.policy.ignore_optional_statuses,
        "resolved configuration"
    );

    let repos = settings
        .repositories
        .iter()
        .map(|base| {
            RepoClient::new(base.clone(), &settings.token, settings.request_timeout)
                .map(|client| Arc::new(client) as Arc<dyn RepoApi>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if cli.once {
        info!(repositories = repos.len(), "running one cycle");
        let results = poller::run_cycle(&repos, &settings.policy)
            .instrument(info_span!("single_cycle"))
            .await;
        for (repo, outcome) in results {
            info!(%repo, %outcome, "cycle result");
        }
        return Ok(());
    }

    info!(
        repositories = repos.len(),
        interval_secs = settings.interval.as_secs(),
        "starting poll loop"
    );
    poller::run(repos, settings.policy, settings.interval).await;
    info!("done");

    Ok(())
}
