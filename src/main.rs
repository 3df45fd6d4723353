use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use tagscout::config::Config;
use tagscout::core::PreferenceModel;
use tagscout::download::{DownloadQueue, DownloadWorker, HttpDownloadClient};
use tagscout::event::{DiscoveryEngine, TerminalFeedback};
use tagscout::index::SearchCache;
use tagscout::query::{HttpSearchClient, StatusServer};
use tagscout::stats::{report_loop, SessionStats};
use tagscout::storage::{
    backup_snapshot, LocalFileIndex, PersistedState, SessionState, SnapshotStore, StateStore,
};

#[derive(Parser, Debug)]
#[command(name = "tagscout", version, about = "Adaptive tag-driven image discovery")]
struct Cli {
    /// Config file (default: ./tagscout.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the discovery loop and the download worker (default)
    Run,
    /// Write a fresh empty state file
    Init {
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Print a JSON summary of the saved state
    Inspect {
        /// Number of top-ranked tags to show
        #[arg(long, default_value = "20")]
        top: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Init { force } => init(&config, force),
        Command::Inspect { top } => inspect(&config, top),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting tagscout: adaptive tag-driven image discovery");

    backup_snapshot(&config.state_path, &config.backup_dir)?;

    let store = Arc::new(SnapshotStore::new(config.state_path.clone()));
    let session = Arc::new(SessionState::open(store, config.discovery.max_width)?);
    let stats = Arc::new(SessionStats::default());

    let queued = session.read(|s| s.download_queue.iter().cloned().collect::<Vec<_>>());
    let local_files = LocalFileIndex::scan(
        &config.scan_dirs(),
        &config.local_file_regex()?,
        &queued,
    );

    let search_client = Arc::new(HttpSearchClient::new(
        config.search.base_url.clone(),
        config.credentials_path.clone(),
        Duration::from_secs(config.search.request_timeout_secs),
    )?);
    let download_client = Arc::new(HttpDownloadClient::new(
        config.credentials_path.clone(),
        Duration::from_secs(config.download.request_timeout_secs),
    )?);

    // 下载 worker
    let queue = DownloadQueue::new(session.clone());
    let worker = DownloadWorker::new(
        queue.clone(),
        download_client,
        config.image_dir.clone(),
        config.download_backoff(),
        stats.clone(),
    );
    tokio::spawn(worker.run());

    // 状态接口
    if let Some(port) = config.status_port {
        let server = StatusServer::new(session.clone(), stats.clone());
        tokio::spawn(async move {
            if let Err(e) = server.run(port).await {
                tracing::error!("Status server stopped: {}", e);
            }
        });
        tracing::info!("Status via: http://127.0.0.1:{}/status", port);
    }

    // 定期会话报告
    tokio::spawn(report_loop(
        stats.clone(),
        session.clone(),
        config.report_interval_secs,
    ));

    let cache = SearchCache::new(
        session.clone(),
        search_client,
        config.search.page_size,
        config.search_retry(),
        stats.clone(),
    );
    let mut engine = DiscoveryEngine::new(
        session.clone(),
        PreferenceModel::new(session.clone(), config.discovery.max_width),
        cache,
        queue,
        Arc::new(TerminalFeedback::stdin(
            config.discovery.preview_command.clone(),
        )),
        local_files,
        stats,
    )
    .with_idle_backoff(Duration::from_secs(config.discovery.idle_backoff_secs));

    // 每次状态变化都已落盘，Ctrl-C 直接退出即可
    tokio::select! {
        res = engine.run() => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        }
    }
    Ok(())
}

fn init(config: &Config, force: bool) -> anyhow::Result<()> {
    if config.state_path.exists() && !force {
        anyhow::bail!(
            "{:?} already exists (use --force to overwrite)",
            config.state_path
        );
    }
    backup_snapshot(&config.state_path, &config.backup_dir)?;
    SnapshotStore::new(config.state_path.clone()).save_atomic(&PersistedState::default())?;
    tracing::info!("Initialized empty state at {:?}", config.state_path);
    Ok(())
}

#[derive(Serialize)]
struct StateSummary {
    width: usize,
    tag_count: usize,
    top_tags: Vec<(String, f64)>,
    download_queue: Vec<String>,
    disliked: usize,
    combinations: Vec<CombinationSummary>,
}

#[derive(Serialize)]
struct CombinationSummary {
    tags: String,
    seen: usize,
    exhausted: bool,
}

fn inspect(config: &Config, top: usize) -> anyhow::Result<()> {
    let store = SnapshotStore::new(config.state_path.clone());
    let Some(state) = store.load()? else {
        anyhow::bail!("no state at {:?}", config.state_path);
    };

    let mut combinations: Vec<CombinationSummary> = state
        .cache
        .iter()
        .map(|(combination, entry)| CombinationSummary {
            tags: combination.to_string(),
            seen: entry.seen.len(),
            exhausted: entry.exhausted,
        })
        .collect();
    combinations.sort_by(|a, b| a.tags.cmp(&b.tags));

    let summary = StateSummary {
        width: state.width,
        tag_count: state.tag_scores.len(),
        top_tags: state.tag_scores.ranked().into_iter().take(top).collect(),
        download_queue: state.download_queue.iter().cloned().collect(),
        disliked: state.disliked_ids.len(),
        combinations,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
