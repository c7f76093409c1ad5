use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use stagehand_core::config::apply_env_overrides;
use stagehand_core::registry;
use stagehand_core::types::{AppConfig, AppName};
use stagehand_deploy::{DeployError, DeployRecord, Deployer};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::{rotate_logs, RotationPolicy};
use crate::logging::init_tracing;
use crate::paths::{apps_dir, logs_dir, socket_path, DEBOUNCE_WINDOW, ROTATION_INTERVAL};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::watch::{is_registry_yaml, is_relevant_event_kind, Debouncer, WatchSet};

type AppCache = HashMap<AppName, AppConfig>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Deploy,
    Rollback,
}

struct DeployJob {
    app: AppName,
    action: JobAction,
    source: &'static str,
    /// `None` for watcher-triggered jobs nobody waits on.
    respond_to: Option<oneshot::Sender<Result<JobSummary, String>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub app: String,
    pub action: JobAction,
    pub source: String,
    pub deploy_id: String,
    pub phase: String,
    pub release: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u128,
}

impl JobSummary {
    fn from_record(record: &DeployRecord, action: JobAction, source: &str, started: Instant) -> Self {
        Self {
            app: record.app.to_string(),
            action,
            source: source.to_string(),
            deploy_id: record.id.to_string(),
            phase: record.phase.as_str().to_string(),
            release: record.release.as_ref().map(ToString::to_string),
            error: record.error.clone(),
            duration_ms: started.elapsed().as_millis(),
        }
    }
}

/// Last job result per app, shown by `status`.
#[derive(Debug, Clone, Serialize)]
struct AppOutcome {
    phase: String,
    at_unix: u64,
    release: Option<String>,
}

/// State shared between the daemon tasks.
struct Shared {
    home: PathBuf,
    cache: RwLock<AppCache>,
    outcomes: RwLock<HashMap<AppName, AppOutcome>>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing("info");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let shared = Arc::new(Shared {
        cache: RwLock::new(load_app_cache(&home)?),
        outcomes: RwLock::new(HashMap::new()),
        started_at_unix: unix_seconds_now(),
        home,
    });

    let (job_tx, job_rx) = mpsc::channel::<DeployJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(shared, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = processor_task(shared, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(shared, job_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = shared.home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down daemon");
                        let _ = shutdown.send(());
                        Ok(())
                    }
                    Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                }
            }
        })
    };

    tracing::info!(socket = %socket_path(&shared.home).display(), "daemon started");

    let (watcher_result, processor_result, socket_result, rotation_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    shared: Arc<Shared>,
    job_tx: mpsc::Sender<DeployJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Canonical so event paths match the `starts_with` checks.
    let apps = apps_dir(&shared.home);
    let apps = fs::canonicalize(&apps).map_err(|e| io_err(&apps, e))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&apps, RecursiveMode::NonRecursive)?;

    let mut sources = WatchSet::default();
    sources.sync(&mut watcher, shared.cache.read().await.values())?;
    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until(deadline) => {
                for app in debouncer.take_due(Instant::now()) {
                    tracing::info!(app = %app, "source changed, queueing deploy");
                    let job = DeployJob {
                        app,
                        action: JobAction::Deploy,
                        source: "watcher",
                        respond_to: None,
                    };
                    job_tx
                        .send(job)
                        .await
                        .map_err(|_| DaemonError::ChannelClosed("deploy queue"))?;
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watch error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                let mut registry_changed = false;
                for path in &event.paths {
                    if is_registry_yaml(path, &apps) {
                        registry_changed = true;
                    } else if let Some(app) = sources.app_for(path) {
                        debouncer.touch(app, Instant::now());
                    }
                }

                if registry_changed {
                    match refresh_cache(shared.clone()).await {
                        Ok(()) => {
                            let cache = shared.cache.read().await;
                            sources.sync(&mut watcher, cache.values())?;
                            tracing::info!(apps = cache.len(), watched = sources.len(), "app registry reloaded");
                        }
                        Err(err) => tracing::warn!(error = %err, "app registry reload failed, keeping previous set"),
                    }
                }
            }
        }
    }

    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

async fn processor_task(
    shared: Arc<Shared>,
    mut job_rx: mpsc::Receiver<DeployJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let outcome = run_job(&shared, &job).await;
                match &outcome {
                    Ok(summary) => {
                        tracing::info!(
                            app = %summary.app,
                            action = ?summary.action,
                            source = job.source,
                            phase = %summary.phase,
                            duration_ms = summary.duration_ms as u64,
                            "deploy job finished"
                        );
                        shared.outcomes.write().await.insert(
                            job.app.clone(),
                            AppOutcome {
                                phase: summary.phase.clone(),
                                at_unix: unix_seconds_now(),
                                release: summary.release.clone(),
                            },
                        );
                    }
                    Err(err) => tracing::error!(app = %job.app, source = job.source, error = %err, "deploy job failed"),
                }
                if let Some(respond_to) = job.respond_to {
                    let _ = respond_to.send(outcome);
                }
            }
        }
    }
    Ok(())
}

async fn run_job(shared: &Shared, job: &DeployJob) -> Result<JobSummary, String> {
    let config = shared
        .cache
        .read()
        .await
        .get(&job.app)
        .cloned()
        .ok_or_else(|| format!("unknown app '{}'", job.app))?;

    let home = shared.home.clone();
    let action = job.action;
    let started = Instant::now();
    let record = tokio::task::spawn_blocking(move || -> Result<DeployRecord, DeployError> {
        let deployer = Deployer::new(&home, config)?;
        match action {
            JobAction::Deploy => deployer.deploy(),
            JobAction::Rollback => deployer.rollback(),
        }
    })
    .await
    .map_err(|err| format!("deploy task join error: {err}"))?
    .map_err(|err| err.to_string())?;

    Ok(JobSummary::from_record(&record, action, job.source, started))
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    shared: Arc<Shared>,
    job_tx: mpsc::Sender<DeployJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, job_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    shared: Arc<Shared>,
    job_tx: mpsc::Sender<DeployJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&shared, &job_tx, &shutdown_tx, &request).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    shared: &Shared,
    job_tx: &mpsc::Sender<DeployJob>,
    shutdown_tx: &broadcast::Sender<()>,
    request: &DaemonRequest,
) -> DaemonResponse {
    let action = match request.cmd.as_str() {
        "status" => return DaemonResponse::ok(build_status_payload(shared).await),
        "stop" => {
            let _ = shutdown_tx.send(());
            return DaemonResponse::ok(json!({ "stopping": true }));
        }
        "deploy" => JobAction::Deploy,
        "rollback" => JobAction::Rollback,
        other => return DaemonResponse::error(format!("unknown command '{other}'")),
    };

    let Some(app) = request.app.as_deref() else {
        return DaemonResponse::error(format!("'{}' requires an app", request.cmd));
    };
    let app = AppName::from(app);
    if !shared.cache.read().await.contains_key(&app) {
        return DaemonResponse::error(format!("unknown app '{app}'"));
    }

    match enqueue(job_tx, app, action, "socket").await {
        Ok(summary) => DaemonResponse::ok(json!(summary)),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn enqueue(
    job_tx: &mpsc::Sender<DeployJob>,
    app: AppName,
    action: JobAction,
    source: &'static str,
) -> Result<JobSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(DeployJob {
            app,
            action,
            source,
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("deploy queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("deploy response"))?
        .map_err(DaemonError::Protocol)
}

async fn build_status_payload(shared: &Shared) -> Value {
    let configs: Vec<(AppName, bool)> = {
        let cache = shared.cache.read().await;
        let mut v: Vec<_> = cache
            .values()
            .map(|c| (c.name.clone(), c.auto_deploy))
            .collect();
        v.sort();
        v
    };
    let outcomes = shared.outcomes.read().await.clone();

    let apps: Vec<Value> = configs
        .iter()
        .map(|(name, auto_deploy)| {
            let outcome = outcomes.get(name);
            json!({
                "name": name.as_str(),
                "auto_deploy": auto_deploy,
                "last_outcome": outcome.map(|o| o.phase.as_str()),
                "last_deploy_at_unix": outcome.map(|o| o.at_unix).unwrap_or(0),
                "release": outcome.and_then(|o| o.release.as_deref()),
            })
        })
        .collect();

    json!({
        "running": true,
        "started_at_unix": shared.started_at_unix,
        "apps": apps,
        "socket": socket_path(&shared.home).display().to_string(),
    })
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::SocketInUse {
                socket: socket.to_path_buf(),
            })
        }
        Err(err) => tracing::warn!(
            socket = %socket.display(),
            error = %err,
            "removing stale daemon socket before bind"
        ),
    }

    match fs::remove_file(socket) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(io_err(socket, err)),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Log rotation, cache, helpers
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // Failures are logged inside rotate_logs.
                let _ = tokio::task::spawn_blocking(move || {
                    rotate_logs(&home, RotationPolicy::default());
                })
                .await;
            }
        }
    }
    Ok(())
}

/// Registered apps with secret overrides applied.
/// Registered apps with env overrides applied. Apps that fail validation are
/// left out, the same configs the CLI refuses to deploy.
fn load_app_cache(home: &Path) -> Result<AppCache, DaemonError> {
    Ok(registry::list_apps_at(home)?
        .into_iter()
        .filter_map(|mut config| {
            apply_env_overrides(&mut config);
            match config.validate() {
                Ok(()) => Some((config.name.clone(), config)),
                Err(err) => {
                    tracing::warn!(app = %config.name, error = %err, "skipping invalid app config");
                    None
                }
            }
        })
        .collect())
}

async fn refresh_cache(shared: Arc<Shared>) -> Result<(), DaemonError> {
    let home = shared.home.clone();
    let refreshed = tokio::task::spawn_blocking(move || load_app_cache(&home))
        .await
        .map_err(|err| DaemonError::Protocol(format!("cache refresh join error: {err}")))??;
    *shared.cache.write().await = refreshed;
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [apps_dir(home), logs_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!("{task} task join failure: {err}"))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
