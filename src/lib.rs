pub mod central;
pub mod collectors;
pub mod config_sync;
pub mod db;
pub mod error;
pub mod settings;
pub mod supervisor;
pub mod sync;
pub mod utils;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};

use central::PgCentralStore;
use collectors::{
    desktop_loop, input_loop, DesktopTracker, InputTracker, XdotoolSource, XprintidleSource,
};
use config_sync::{
    connect_config, reconcile_loop, ConfigMode, ConfigSource, FallbackConfig, PgConfigSource,
    Reconciler,
};
use db::Database;
use settings::AgentSettings;
use supervisor::Supervised;
use sync::{sync_loop, SyncEngine};
use utils::{identity::host_identifier, logging};
use watch::{NotifyHook, WatchPolicy};

/// Start every component, block until SIGINT/SIGTERM, then stop them in
/// order: producers first (flushing their buffers), replication last.
pub async fn run() -> Result<()> {
    logging::init();
    info!("reprospective agent starting up...");

    let settings = AgentSettings::load_default()?;
    let host = host_identifier();
    info!("host identifier: {host}");

    let database = Database::new(settings.local_db_path.clone())
        .context("failed to open local store")?;
    info!("local store at {}", database.path().display());

    // The pool connects lazily: an unreachable server still gets a sync
    // engine, whose runs fail transiently until the server is back.
    let central = match settings.central.database_url.as_deref() {
        Some(url) => match PgCentralStore::connect_lazy(
            url,
            settings.central.max_connections,
            settings.acquire_timeout(),
        ) {
            Ok(store) => {
                if !store.ensure_schema().await {
                    warn!("central store not reachable yet, sync runs will retry");
                }
                Some(store)
            }
            Err(err) => {
                error!("central store disabled, buffering locally only: {err:#}");
                None
            }
        },
        None => {
            warn!("no central database configured, buffering locally only");
            None
        }
    };

    // Producers.
    let mut producers = Vec::new();

    let fallback = FallbackConfig::from_static(&settings.watch.directories);
    let source = central
        .as_ref()
        .map(|store| Arc::new(PgConfigSource::new(store.pool().clone())) as Arc<dyn ConfigSource>);
    let mode = connect_config(source, &fallback).await;

    let policy = Arc::new(WatchPolicy::new(
        &settings.watch.exclude_patterns,
        settings.watch.buffer_max_events,
        settings.flush_interval(),
    )?);
    let mut reconciler = Reconciler::new(Arc::new(NotifyHook), Arc::new(database.clone()), policy);
    match &mode {
        ConfigMode::Central(source) => {
            if let Err(err) = reconciler.reconcile_once(source.as_ref()).await {
                warn!("initial watch target read failed, retrying next interval: {err:#}");
            }
        }
        ConfigMode::Fallback => {
            reconciler.apply(&fallback.desired_paths()).await;
        }
    }
    let reconcile_interval = settings.reconcile_interval();
    producers.push(Supervised::spawn("watch reconciler", move |token| {
        reconcile_loop(reconciler, mode.source(), reconcile_interval, token)
    }));

    if settings.desktop.enabled {
        let tracker = DesktopTracker::new(database.clone());
        let interval = settings.desktop_poll_interval();
        producers.push(Supervised::spawn("desktop tracker", move |token| {
            desktop_loop(tracker, Arc::new(XdotoolSource), interval, token)
        }));
    }

    if settings.input.enabled {
        match InputTracker::start(database.clone(), settings.idle_timeout()).await {
            Ok(tracker) => {
                let poll = settings.input_poll_interval();
                let check = settings.timeout_check_interval();
                producers.push(Supervised::spawn("input tracker", move |token| {
                    input_loop(tracker, Arc::new(XprintidleSource), poll, check, token)
                }));
            }
            Err(err) => error!("input tracking disabled: {err:#}"),
        }
    }

    // Replication.
    let replication = central.as_ref().map(|store| {
        let engine = Arc::new(SyncEngine::new(
            Arc::new(database.clone()),
            Arc::new(store.clone()),
            host.clone(),
            settings.sync.batch_size,
        ));
        let interval = settings.sync_interval();
        Supervised::spawn("sync engine", move |token| sync_loop(engine, interval, token))
    });

    shutdown_signal().await;
    info!("shutdown requested");

    for task in producers {
        let name = task.name();
        if let Err(err) = task.stop().await {
            error!("{name} did not stop cleanly: {err:#}");
        }
    }
    if let Some(task) = replication {
        if let Err(err) = task.stop().await {
            error!("sync engine did not stop cleanly: {err:#}");
        }
    }
    if let Some(store) = central {
        store.close().await;
    }

    info!("reprospective agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
