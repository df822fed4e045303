use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use chrono::{DateTime, Utc};
use sharehost_core::{
    AccessFilter, AccessLogEntry, PathId, PermissionLevel, ProtocolName, ProtocolSettings,
    Settings, UserAccount, UserId,
};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::{managed_logs, rotate_logs, RotationPolicy};
use crate::orchestrator::Orchestrator;
use crate::paths::{logs_dir, run_dir, socket_path, watched_dirs, DEBOUNCE_WINDOW, SERVICE_NAME};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::report::{Caller, NewSharedPath, OperationReport, SharedPathUpdate};

const DEFAULT_PAGE: usize = 100;
const DEFAULT_TAIL_LINES: usize = 200;

/// Who asked for a full synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncSource {
    Watcher,
    Socket,
}

struct SyncJob {
    source: SyncSource,
    respond_to: oneshot::Sender<SyncSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub source: &'static str,
    pub reports: Vec<OperationReport>,
    pub duration_ms: u128,
}

/// Timestamps surfaced by `daemon_status` (Unix seconds, 0 = never).
#[derive(Debug, Default)]
struct RuntimeStats {
    started_at: u64,
    last_sync_at: AtomicU64,
    last_reconcile_at: AtomicU64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(state_dir: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let settings = Settings::load_for_state_dir(state_dir)?;
    let orchestrator = Orchestrator::system(state_dir.to_path_buf(), settings)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(Arc::new(orchestrator)))
}

/// Run the socket server, record watcher, sync processor, reconcile loop and
/// log rotation until shutdown is requested.
pub async fn run(orchestrator: Arc<Orchestrator>) -> Result<(), DaemonError> {
    let state_dir = orchestrator.state_dir().to_path_buf();
    ensure_runtime_dirs(&state_dir)?;
    tracing::info!(state_dir = %state_dir.display(), "sharehost daemon starting");

    let stats = Arc::new(RuntimeStats {
        started_at: unix_seconds_now(),
        ..Default::default()
    });
    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let state_dir = state_dir.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(state_dir, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = orchestrator.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(orchestrator, stats, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = orchestrator.clone();
        let stats = stats.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                orchestrator,
                stats,
                sync_tx,
                shutdown.clone(),
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let reconcile_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = orchestrator.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let result = reconcile_task(orchestrator, stats, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let logs = managed_logs(&state_dir, orchestrator.settings());
        tokio::spawn(async move {
            let result = log_rotation_task(logs, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move { signal_task(shutdown).await })
    };

    let (watcher_result, processor_result, socket_result, reconcile_result, rotation_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        reconcile_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("reconcile", reconcile_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("sharehost daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn watcher_task(
    state_dir: PathBuf,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut roots = Vec::new();
    for dir in watched_dirs(&state_dir) {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        let dir = fs::canonicalize(&dir).map_err(|e| io_err(&dir, e))?;
        watcher.watch(&dir, RecursiveMode::Recursive)?;
        tracing::debug!(path = %dir.display(), "watching record directory");
        roots.push(dir);
    }

    let mut debounce = Debouncer::new(DEBOUNCE_WINDOW);
    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                debounce.clear();
                match enqueue_sync(&sync_tx, SyncSource::Watcher).await {
                    Ok(summary) => tracing::info!(
                        protocols = summary.reports.len(),
                        duration_ms = summary.duration_ms,
                        "watcher-triggered sync completed",
                    ),
                    Err(err) => tracing::error!(error = %err, "watcher-triggered sync failed"),
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if event.paths.iter().any(|p| is_record_yaml(p, &roots)) {
                    debounce.note(Instant::now());
                }
            }
        }
    }
    Ok(())
}

async fn sync_processor_task(
    orchestrator: Arc<Orchestrator>,
    stats: Arc<RuntimeStats>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let orchestrator = orchestrator.clone();
                let reports = tokio::task::spawn_blocking(move || {
                    orchestrator.synchronize_all(&Caller::local(), false).unwrap_or_default()
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))?;

                stats.last_sync_at.store(unix_seconds_now(), Ordering::Relaxed);
                for report in reports.iter().filter(|r| !r.succeeded()) {
                    tracing::warn!(
                        protocol = %report.protocol,
                        outcome = ?report.outcome,
                        detail = report.detail.as_deref().unwrap_or(""),
                        "protocol not synchronized",
                    );
                }
                let source = match job.source {
                    SyncSource::Watcher => "watcher",
                    SyncSource::Socket => "socket",
                };
                let _ = job.respond_to.send(SyncSummary {
                    source,
                    reports,
                    duration_ms: started.elapsed().as_millis(),
                });
            }
        }
    }
    Ok(())
}

async fn reconcile_task(
    orchestrator: Arc<Orchestrator>,
    stats: Arc<RuntimeStats>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(orchestrator.settings().reconcile_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let orchestrator = orchestrator.clone();
                let reports = tokio::task::spawn_blocking(move || orchestrator.reconcile_all())
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("reconcile join error: {err}")))?;
                stats.last_reconcile_at.store(unix_seconds_now(), Ordering::Relaxed);
                for report in reports.iter().filter(|r| r.detail.is_some()) {
                    tracing::info!(
                        protocol = %report.protocol,
                        outcome = ?report.outcome,
                        detail = report.detail.as_deref().unwrap_or(""),
                        "reconcile",
                    );
                }
            }
        }
    }
    Ok(())
}

async fn log_rotation_task(
    logs: Vec<PathBuf>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let logs = logs.clone();
                // Failures are logged inside rotate_logs.
                tokio::task::spawn_blocking(move || rotate_logs(&logs, RotationPolicy::default()))
                    .await
                    .ok();
            }
        }
    }
    Ok(())
}

async fn signal_task(shutdown: broadcast::Sender<()>) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut shutdown_rx = shutdown.subscribe();
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|err| DaemonError::Protocol(format!("SIGTERM handler failed: {err}")))?;
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
            let _ = shutdown.send(());
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                tracing::info!("received ctrl-c, shutting down daemon");
                let _ = shutdown.send(());
                Ok(())
            }
            Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    orchestrator: Arc<Orchestrator>,
    stats: Arc<RuntimeStats>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(orchestrator.state_dir());
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let orchestrator = orchestrator.clone();
                let stats = stats.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, orchestrator, stats, sync_tx, shutdown_tx).await {
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
    orchestrator: Arc<Orchestrator>,
    stats: Arc<RuntimeStats>,
    sync_tx: mpsc::Sender<SyncJob>,
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
        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let response = DaemonResponse::from_error(&DaemonError::Protocol(format!(
                    "invalid request JSON: {err}"
                )));
                write_response(&mut writer, &response).await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        tracing::debug!(cmd = %cmd, protocol = request.protocol.as_deref().unwrap_or(""), "request");
        let response = match cmd.as_str() {
            "daemon_status" => DaemonResponse::ok(status_payload(orchestrator.state_dir(), &stats)),
            "shutdown" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            "sync" if !is_dry_run(&request) => {
                let caller = request.caller.clone().unwrap_or_else(Caller::local);
                if caller.is_admin {
                    match enqueue_sync(&sync_tx, SyncSource::Socket).await {
                        Ok(summary) => DaemonResponse::ok(json!(summary)),
                        Err(err) => DaemonResponse::from_error(&err),
                    }
                } else {
                    DaemonResponse::from_error(&DaemonError::Forbidden {
                        operation: "synchronize_all",
                    })
                }
            }
            _ => {
                let orchestrator = orchestrator.clone();
                tokio::task::spawn_blocking(move || dispatch(&orchestrator, &request))
                    .await
                    .map_err(|err| DaemonError::Protocol(format!("request join error: {err}")))?
            }
        };

        write_response(&mut writer, &response).await?;
        if cmd == "shutdown" {
            break;
        }
    }
    Ok(())
}

fn status_payload(state_dir: &Path, stats: &RuntimeStats) -> Value {
    json!({
        "running": true,
        "service": SERVICE_NAME,
        "pid": std::process::id(),
        "started_at_unix": stats.started_at,
        "last_sync_at_unix": stats.last_sync_at.load(Ordering::Relaxed),
        "last_reconcile_at_unix": stats.last_reconcile_at.load(Ordering::Relaxed),
        "socket": socket_path(state_dir).display().to_string(),
        "state_dir": state_dir.display().to_string(),
    })
}

fn is_dry_run(request: &DaemonRequest) -> bool {
    request
        .payload
        .as_ref()
        .and_then(|p| p.get("dry_run"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

async fn enqueue_sync(sync_tx: &mpsc::Sender<SyncJob>, source: SyncSource) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;
    rx.await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))
}

// ---------------------------------------------------------------------------
// Request dispatch
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IdPayload {
    id: PathId,
}

#[derive(Deserialize)]
struct PathUpdatePayload {
    id: PathId,
    #[serde(flatten)]
    update: SharedPathUpdate,
}

#[derive(Deserialize)]
struct GrantPayload {
    path_id: PathId,
    user_id: UserId,
    permission: PermissionLevel,
}

#[derive(Deserialize)]
struct RevokePayload {
    path_id: PathId,
    user_id: UserId,
}

#[derive(Deserialize)]
struct ListAccessPayload {
    #[serde(default)]
    path_id: Option<PathId>,
}

#[derive(Deserialize)]
struct SyncPayload {
    #[serde(default)]
    dry_run: bool,
}

#[derive(Deserialize)]
struct AccessLogsPayload {
    #[serde(flatten)]
    filter: AccessFilter,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_page")]
    limit: usize,
}

#[derive(Deserialize)]
struct SincePayload {
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct EventsPayload {
    #[serde(default = "default_page")]
    limit: usize,
}

#[derive(Deserialize)]
struct TailPayload {
    #[serde(default = "default_tail_lines")]
    lines: usize,
}

fn default_page() -> usize {
    DEFAULT_PAGE
}

fn default_tail_lines() -> usize {
    DEFAULT_TAIL_LINES
}

/// Run one request against the orchestrator. Lifecycle commands answer with
/// their [`OperationReport`]; a report that did not succeed is `ok: false`
/// with the report still attached as `data`.
pub fn dispatch(orchestrator: &Orchestrator, request: &DaemonRequest) -> DaemonResponse {
    let caller = request.caller.clone().unwrap_or_else(Caller::local);
    let protocol = || {
        request
            .protocol
            .clone()
            .ok_or_else(|| DaemonError::Protocol(format!("'{}' requires a protocol", request.cmd)))
    };

    let result: Result<DaemonResponse, DaemonError> = (|| {
        let o = orchestrator;
        match request.cmd.as_str() {
            "ping" => Ok(json!({ "pong": true })),
            "list_protocols" => to_value(o.list_protocols(&caller)),
            "get_protocol" => to_value(o.get_protocol(&caller, &protocol()?)?),
            "get_status" => to_value(o.get_status(&caller, &protocol()?)?),

            "install" => return Ok(report_response(o.install(&caller, &protocol()?))),
            "start" => return Ok(report_response(o.start(&caller, &protocol()?))),
            "stop" => return Ok(report_response(o.stop(&caller, &protocol()?))),
            "uninstall" => return Ok(report_response(o.uninstall(&caller, &protocol()?))),
            "reset" => return Ok(report_response(o.reset(&caller, &protocol()?))),
            "reconcile" => return Ok(report_response(o.reconcile(&caller, &protocol()?))),
            "update_config" => {
                let settings: ProtocolSettings = payload(request)?;
                return Ok(report_response(o.update_config(&caller, &protocol()?, settings)));
            }

            "list_paths" => to_value(o.list_paths(&caller)?),
            "create_path" => to_value(o.create_path(&caller, payload::<NewSharedPath>(request)?)?),
            "update_path" => {
                let p: PathUpdatePayload = payload(request)?;
                to_value(o.update_path(&caller, &p.id, p.update)?)
            }
            "delete_path" => {
                let p: IdPayload = payload(request)?;
                to_value(o.delete_path(&caller, &p.id)?)
            }

            "list_access" => {
                let p: ListAccessPayload = payload(request)?;
                to_value(o.list_access(&caller, p.path_id.as_ref())?)
            }
            "grant_access" => {
                let p: GrantPayload = payload(request)?;
                to_value(o.grant_access(&caller, &p.path_id, &p.user_id, p.permission)?)
            }
            "revoke_access" => {
                let p: RevokePayload = payload(request)?;
                to_value(o.revoke_access(&caller, &p.path_id, &p.user_id)?)
            }

            "list_users" => to_value(o.list_users(&caller)?),
            "upsert_user" => to_value(o.upsert_user(&caller, payload::<UserAccount>(request)?)?),

            "sync" => {
                let p: SyncPayload = payload(request)?;
                to_value(o.synchronize_all(&caller, p.dry_run)?)
            }
            "diff" => to_value(o.diff(&caller, &protocol()?)?),

            "access_logs" => {
                let p: AccessLogsPayload = payload(request)?;
                to_value(o.access_logs(&caller, p.filter, p.offset, p.limit)?)
            }
            "log_summary" => {
                let p: SincePayload = payload(request)?;
                to_value(o.log_summary(&caller, p.since)?)
            }
            "events" => {
                let p: EventsPayload = payload(request)?;
                let filter = request.protocol.as_deref().map(ProtocolName::from);
                to_value(o.lifecycle_events(&caller, filter, p.limit)?)
            }
            "record_access" => {
                o.record_access(&caller, payload::<AccessLogEntry>(request)?)?;
                Ok(json!({ "recorded": true }))
            }
            "tail_logs" => {
                let p: TailPayload = payload(request)?;
                to_value(o.tail_service_logs(&caller, &protocol()?, p.lines)?)
            }
            other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
        }
        .map(DaemonResponse::ok)
    })();

    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(cmd = %request.cmd, kind = err.kind(), error = %err, "request failed");
            DaemonResponse::from_error(&err)
        }
    }
}

fn report_response(report: OperationReport) -> DaemonResponse {
    if report.succeeded() {
        return DaemonResponse::ok(json!(report));
    }
    DaemonResponse {
        ok: false,
        error: report.detail.clone(),
        kind: report.kind.clone(),
        data: Some(json!(report)),
    }
}

/// Missing payloads deserialize from `{}` so all-default payloads may be
/// omitted.
fn payload<T: DeserializeOwned>(request: &DaemonRequest) -> Result<T, DaemonError> {
    let value = request
        .payload
        .clone()
        .unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value)
        .map_err(|err| DaemonError::Protocol(format!("invalid '{}' payload: {err}", request.cmd)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, DaemonError> {
    Ok(serde_json::to_value(value)?)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trailing-edge coalescing: a burst of record writes yields one sync,
/// `window` after the last event.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    fn note(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn clear(&mut self) {
        self.deadline = None;
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Record files only; the store's `.tmp` staging files are skipped.
fn is_record_yaml(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(state_dir: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(state_dir), logs_dir(state_dir)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filters (default `info`); `SHAREHOST_LOG_FORMAT=json` switches
/// to one JSON object per line for journald shippers.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SHAREHOST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt().json().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
