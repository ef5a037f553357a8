// Entry point: three subcommands over the one binary, the way the
// teacher's CLI exposes multiple subcommands over one executable.
//
//   subspace host                     -- run the coordinator (Sandbox
//                                         Host, Message Router, Body-File
//                                         Bridges, Template Syncer on
//                                         startup)
//   subspace cyber --name N --workspace P
//                                      -- run one cyber's Cognitive Loop
//   subspace sync --template T --workspace W
//                                      -- one-shot Template Syncer run

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use subspace::action::builtin;
use subspace::action::{ActionContext, ActionCoordinator};
use subspace::bridge::request::FileRequestChannel;
use subspace::bridge::BodyFileBridge;
use subspace::brain::BrainServer;
use subspace::cognitive::CognitiveLoop;
use subspace::config::{load_settings, OwnershipTable, Settings};
use subspace::events::EventBus;
use subspace::logging;
use subspace::memory::MemorySystem;
use subspace::metrics::Metrics;
use subspace::perception::PerceptionScanner;
use subspace::provider::HttpLlmProvider;
use subspace::router::backoff::Backoff;
use subspace::router::MessageRouter;
use subspace::sandbox::SandboxHost;
use subspace::syncer::TemplateSyncer;
use subspace::task::CommunityTaskStore;

#[derive(Parser)]
#[command(name = "subspace", about = "Coordinator and cognitive-loop runtime for sandboxed AI agents")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator: Sandbox Host, Message Router, Body-File
    /// Bridges, and a startup Template Syncer pass.
    Host,
    /// Run one cyber's cognitive loop in this process.
    Cyber {
        #[arg(long)]
        name: String,
        #[arg(long)]
        workspace: PathBuf,
    },
    /// One-shot Template Syncer run.
    Sync {
        #[arg(long)]
        template: PathBuf,
        #[arg(long)]
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Host => run_host(settings).await,
        Commands::Cyber { name, workspace } => run_cyber(settings, name, workspace).await,
        Commands::Sync { template, workspace } => run_sync(settings, template, workspace).await,
    }
}

async fn run_host(settings: Settings) -> Result<()> {
    logging::init_tracing();
    info!(workspace = %settings.workspace_root.display(), "starting coordinator");

    let events = Arc::new(EventBus::new());
    let metrics = Metrics::new();
    let cancel = CancellationToken::new();

    let cybers_root = settings.workspace_root.join("cybers");
    std::fs::create_dir_all(&cybers_root).context("failed to create cybers directory")?;

    // Reconcile every existing cyber workspace against the template before
    // accepting any new work (spec §4.4 "runs at host startup").
    let syncer = TemplateSyncer::new(settings.ownership.clone());
    if let Ok(entries) = std::fs::read_dir(&cybers_root) {
        for entry in entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
            let live_root = entry.path();
            let history_path = live_root.join(".internal").join("sync_history.jsonl");
            if let Err(err) = syncer.sync(&settings.template_root, &live_root, &history_path) {
                warn!(cyber = ?entry.file_name(), error = %err, "startup sync failed");
            }
        }
    }

    let sandbox = Arc::new(SandboxHost::new(
        settings.workspace_root.clone(),
        settings.template_root.clone(),
        settings.sandbox.clone(),
        Arc::clone(&events),
        Arc::clone(&metrics),
    ));

    let router = MessageRouter::new(
        settings.workspace_root.clone(),
        Backoff::new(settings.router.backoff_base_ms, settings.router.max_retries),
        Arc::clone(&events),
        Arc::clone(&metrics),
    );

    let provider: Arc<dyn subspace::provider::LlmProvider> = Arc::new(HttpLlmProvider::new(
        std::env::var("SUBSPACE_BRAIN_ENDPOINT").unwrap_or_else(|_| "http://localhost:8080/v1/chat/completions".to_string()),
        std::env::var("SUBSPACE_BRAIN_API_KEY").ok(),
        Duration::from_millis(settings.bridge.brain_timeout_ms),
    ));
    let brain_server = Arc::new(BrainServer::new(
        provider,
        settings.bridge.signature_cache_capacity,
        "default",
        3,
        Duration::from_millis(200),
    ));

    let router_interval = Duration::from_millis(500);
    let bridge_poll = Duration::from_millis(200);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                cancel.cancel();
                break;
            }
            _ = tokio::time::sleep(router_interval) => {
                if let Err(err) = router.route_once().await {
                    warn!(error = %err, "router pass failed");
                }

                for cyber_name in sandbox.running_cybers().await {
                    let cyber_root = cybers_root.join(&cyber_name);
                    let bridge = BodyFileBridge::new(
                        cyber_name,
                        &cyber_root,
                        Arc::clone(&brain_server),
                        false,
                        settings.bridge.in_flight_window,
                        bridge_poll,
                    );
                    bridge.drain_once(&cancel).await;
                }
            }
        }
    }

    Ok(())
}

async fn run_cyber(settings: Settings, name: String, workspace: PathBuf) -> Result<()> {
    logging::init_tracing_for_cyber(&name);
    info!(cyber = %name, workspace = %workspace.display(), "starting cyber process");

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let snapshot_path = workspace.join(subspace::config::constants::MEMORY_SNAPSHOT_PATH);
    let memory = Arc::new(Mutex::new(MemorySystem::new(
        workspace.clone(),
        name.clone(),
        snapshot_path,
        Duration::from_secs(settings.memory.content_cache_ttl_secs),
    )));
    {
        let mut memory_guard = memory.lock().await;
        memory_guard.load_snapshot().ok();
    }

    let scan_state_path = workspace.join(subspace::config::constants::SCAN_STATE_PATH);
    let scan_dirs = vec![
        PathBuf::from("inbox"),
        PathBuf::from("memory"),
        PathBuf::from("grid"),
    ];
    let scanner = PerceptionScanner::new(workspace.clone(), scan_dirs, scan_state_path)
        .context("failed to initialize perception scanner")?;

    let community_tasks_dir = workspace
        .parent()
        .map(|cybers_root| cybers_root.parent().unwrap_or(cybers_root).join("grid").join("community"))
        .unwrap_or_else(|| workspace.join("grid/community"));
    let community_tasks = Arc::new(CommunityTaskStore::new(&community_tasks_dir));

    let brain_dir = subspace::bridge::request::directory_for(&workspace, "brain");
    let brain_channel = Arc::new(FileRequestChannel::new(brain_dir));

    let mut coordinator = ActionCoordinator::new();
    builtin::register_all(&mut coordinator);
    let coordinator = Arc::new(coordinator);

    let action_ctx = ActionContext {
        cyber_name: name.clone(),
        memory: Arc::clone(&memory),
        outbox_dir: workspace.join("outbox"),
        community_tasks: Some(community_tasks),
        script_variables: Mutex::new(serde_json::Map::new()),
        brain_channel: Some(Arc::clone(&brain_channel)),
        cancel: cancel.clone(),
        model_preset: "default".to_string(),
    };

    let mut cognitive_loop = CognitiveLoop::new(
        name,
        workspace,
        memory,
        scanner,
        action_ctx,
        coordinator,
        brain_channel,
        cancel,
        "default".to_string(),
        settings.memory.token_budget,
    );

    cognitive_loop.run().await
}

async fn run_sync(settings: Settings, template: PathBuf, workspace: PathBuf) -> Result<()> {
    logging::init_tracing();
    let ownership: OwnershipTable = settings.ownership;
    let syncer = TemplateSyncer::new(ownership);
    let history_path = workspace.join(subspace::config::constants::SYNC_HISTORY_PATH);
    let report = syncer.sync(&template, &workspace, &history_path)?;
    info!(
        overwritten = report.overwritten,
        skipped = report.skipped,
        created = report.created,
        conflicts = report.conflicts.len(),
        "sync complete"
    );
    if !report.conflicts.is_empty() {
        warn!(paths = ?report.conflicts, "sync left conflicts for manual resolution");
    }
    Ok(())
}
