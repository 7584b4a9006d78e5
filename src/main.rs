// ABOUTME: Entry point for the drydock CLI application.
// ABOUTME: Parses arguments, wires the agent from config and dispatches commands.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use drydock::agent::Agent;
use drydock::config::{self, Config};
use drydock::error::Result;
use drydock::executor::{Executor, ProcessRunner, SystemRunner};
use drydock::lease::{HeartbeatExtender, LeaseManager, LeaseSweeper};
use drydock::maintenance::MaintenanceController;
use drydock::notify::{HookNotifier, LogNotifier, Notifiers};
use drydock::staging::Stager;
use drydock::store::{ArtifactStore, PgStore, TaskStore};
use drydock::types::WorkerId;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // -v wins over RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { force, backend } => {
            let cwd = env::current_dir()?;
            let path = config::init_config(&cwd, backend.into(), force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            println!("Backend: {}", config.backend.kind());
            println!(
                "Lease timeout: {}s, heartbeat every {}s, poll every {}s",
                config.lease.timeout.as_secs(),
                config.heartbeat_interval.as_secs(),
                config.poll_interval.as_secs()
            );
            connect(&config).await?;
            println!("Store: reachable");
            Ok(())
        }
        Commands::Sweep { watch } => {
            let config = load_config(cli.config.as_deref())?;
            let store: Arc<dyn TaskStore> = Arc::new(connect(&config).await?);
            let sweeper = LeaseSweeper::new(store, config.lease.timeout);

            match watch {
                Some(interval) => {
                    let total = sweeper.run(interval, shutdown_channel()).await;
                    info!(total, "sweeper stopped");
                }
                None => {
                    let swept = sweeper.sweep_once().await?;
                    println!("Swept {} expired lease(s)", swept.len());
                }
            }
            Ok(())
        }
        Commands::Run { once } => {
            let config = load_config(cli.config.as_deref())?;
            let store = Arc::new(connect(&config).await?);
            let agent = build_agent(&config, store);

            if once {
                if agent.run_once().await?.is_none() {
                    agent.idle().await;
                }
            } else {
                agent.run(shutdown_channel()).await;
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(&env::current_dir()?),
    }
}

async fn connect(config: &Config) -> Result<PgStore> {
    let url = config.database_url.resolve()?;
    let store = PgStore::connect(
        &url,
        config.store.max_connections,
        config.store.connect_timeout,
    )
    .await?;
    Ok(store)
}

fn build_agent(config: &Config, store: Arc<PgStore>) -> Agent {
    let tasks: Arc<dyn TaskStore> = store.clone();
    let artifacts: Arc<dyn ArtifactStore> = store;
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);

    let leases = LeaseManager::new(tasks.clone(), WorkerId::current());
    let executor = Executor::new(config.backend.build(runner.clone()), artifacts.clone());
    let stager = Stager::new(&config.staging.dir, config.staging.secure_wipe);

    let maintenance = if config.maintenance.enabled {
        let controller = MaintenanceController::new(&config.maintenance.flag_path, runner.clone())
            .with_store(tasks.clone());
        match &config.maintenance.reload_command {
            Some(command) => controller.with_reload(command.clone(), config.maintenance.reload_timeout),
            None => controller,
        }
    } else {
        MaintenanceController::disabled(runner.clone())
    };

    let mut notifiers = Notifiers::new().with(Arc::new(LogNotifier));
    if let Some(hook) = &config.notify.hook {
        notifiers = notifiers.with(Arc::new(HookNotifier::new(
            hook,
            config.notify.hook_timeout,
            runner,
        )));
    }

    let agent = Agent::new(leases, artifacts, stager, executor)
        .with_maintenance(maintenance)
        .with_heartbeat(HeartbeatExtender::new(config.heartbeat_interval))
        .with_notifiers(notifiers)
        .with_poll_interval(config.poll_interval);

    if config.lease.sweep_on_idle {
        agent.with_sweeper(LeaseSweeper::new(tasks, config.lease.timeout))
    } else {
        agent
    }
}

/// Flips to true on SIGINT or SIGTERM.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                let _ = ctrl_c.await;
            }
        }
        info!("shutdown requested, finishing current task");
        let _ = tx.send(true);
    });
    rx
}
