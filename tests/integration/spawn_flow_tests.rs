//! End-to-end canvas runs on the headless backend.
//!
//! The backend's launch hook plays the canvas process: it checks that the
//! rendezvous endpoint already exists, then connects with the real peer
//! connector and follows a script.
//!
//! Validates:
//! - selection, user cancellation, canvas error, and disconnect outcomes
//! - timeout and controller cancellation send a best-effort close
//! - spawn failure and resolution failure leak nothing
//! - only the first terminal message counts
//! - display-only runs retain and reuse the pane
//! - overlapping runs in one scope never tear down each other's pane
//! - the deadline bounds a stalled launch and tolerates oversized values

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use canvas_spawn::config::CanvasKindConfig;
use canvas_spawn::ipc::{
    connect_with_retry, CanvasMessage, ControllerMessage, PeerEvent, RetryPolicy,
};
use canvas_spawn::orchestrator::{
    CanvasRequest, CanvasResolver, CanvasSpawner, ConfigResolver, SpawnOptions,
};
use canvas_spawn::pane::{
    HeadlessBackend, MemoryScopeStore, PaneBackend, PaneManager, PaneSettings, ScopeContext,
    ScopeStore,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Script {
    Select(Value),
    SelectAfter(Duration, Value),
    Cancel(Option<String>),
    Fail(String),
    SelectThenCancel(Value),
    Disconnect,
    Silent,
}

struct Canvas {
    endpoint_seen: Arc<Mutex<Vec<bool>>>,
    inbox: mpsc::UnboundedReceiver<ControllerMessage>,
}

impl Canvas {
    async fn next_message(&mut self) -> ControllerMessage {
        tokio::time::timeout(WAIT, self.inbox.recv())
            .await
            .expect("canvas message before timeout")
            .expect("canvas still running")
    }

    fn endpoint_checks(&self) -> Vec<bool> {
        self.endpoint_seen.lock().expect("lock").clone()
    }
}

fn meeting_slot() -> Value {
    json!({
        "startTime": "2026-01-15T14:00:00.000Z",
        "endTime": "2026-01-15T14:30:00.000Z",
        "duration": 30
    })
}

fn arg_value<'a>(command: &'a str, flag: &str) -> Option<&'a str> {
    let mut words = command.split_whitespace();
    words.find(|word| *word == flag)?;
    words.next()
}

fn socket_arg(command: &str) -> Option<PathBuf> {
    arg_value(command, "--socket").map(PathBuf::from)
}

async fn play(endpoint: PathBuf, script: Script, inbox: mpsc::UnboundedSender<ControllerMessage>) {
    let policy = RetryPolicy {
        max_attempts: 20,
        delay: Duration::from_millis(10),
    };
    let Ok(mut connection) = connect_with_retry(&endpoint, policy).await else {
        return;
    };
    connection
        .send(CanvasMessage::Ready {
            scenario: "meeting-picker".into(),
        })
        .expect("send ready");

    match script {
        Script::Select(data) => connection
            .send(CanvasMessage::Selected { data })
            .expect("send selected"),
        Script::SelectAfter(delay, data) => {
            tokio::time::sleep(delay).await;
            connection
                .send(CanvasMessage::Selected { data })
                .expect("send selected");
        }
        Script::Cancel(reason) => connection
            .send(CanvasMessage::Cancelled { reason })
            .expect("send cancelled"),
        Script::Fail(message) => connection
            .send(CanvasMessage::Error { message })
            .expect("send error"),
        Script::SelectThenCancel(data) => {
            connection
                .send(CanvasMessage::Selected { data })
                .expect("send selected");
            connection
                .send(CanvasMessage::Cancelled { reason: None })
                .expect("send cancelled");
        }
        Script::Disconnect => {
            connection.close().await;
            return;
        }
        Script::Silent => {}
    }

    while let Some(event) = connection.recv().await {
        if let PeerEvent::Message(message) = event {
            let _ = inbox.send(message);
        }
    }
    connection.close().await;
}

fn scripted_backend(script: Script) -> (Arc<HeadlessBackend>, Canvas) {
    routed_backend(move |_instance_id| script.clone())
}

/// Backend whose canvases follow the script chosen for their `--id`.
fn routed_backend(
    route: impl Fn(&str) -> Script + Send + Sync + 'static,
) -> (Arc<HeadlessBackend>, Canvas) {
    let endpoint_seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, inbox) = mpsc::unbounded_channel();

    let seen = Arc::clone(&endpoint_seen);
    let backend = HeadlessBackend::with_launch_hook(Arc::new(move |_pane: &str, command: &str| {
        let Some(endpoint) = socket_arg(command) else {
            return;
        };
        let script = route(arg_value(command, "--id").unwrap_or_default());
        seen.lock().expect("lock").push(endpoint.exists());
        tokio::spawn(play(endpoint, script, tx.clone()));
    }));

    (
        Arc::new(backend),
        Canvas {
            endpoint_seen,
            inbox,
        },
    )
}

fn resolver() -> Arc<dyn CanvasResolver> {
    let mut canvases = HashMap::new();
    canvases.insert(
        "calendar".to_owned(),
        CanvasKindConfig {
            command: vec!["canvas-peer".into()],
            scenarios: vec!["meeting-picker".into(), "display".into()],
        },
    );
    Arc::new(ConfigResolver::new(canvases))
}

fn spawner_with(
    backend: &Arc<HeadlessBackend>,
    socket_dir: &Path,
    tweak: impl FnOnce(&mut SpawnOptions),
) -> (CanvasSpawner, Arc<MemoryScopeStore>) {
    let store = Arc::new(MemoryScopeStore::new());
    let manager = PaneManager::new(
        Arc::clone(backend) as Arc<dyn PaneBackend>,
        Arc::clone(&store) as Arc<dyn ScopeStore>,
        ScopeContext {
            session: Some("/tmp/tmux-1000/default,7,0".into()),
            pane: Some("%0".into()),
            cwd: PathBuf::from("/work"),
        },
        PaneSettings {
            interrupt_grace: Duration::from_millis(5),
            ..PaneSettings::default()
        },
    );
    let mut options = SpawnOptions {
        socket_dir: socket_dir.to_path_buf(),
        ..SpawnOptions::default()
    };
    tweak(&mut options);
    (
        CanvasSpawner::new(Arc::new(manager), resolver(), options),
        store,
    )
}

fn spawner(backend: &Arc<HeadlessBackend>, socket_dir: &Path) -> CanvasSpawner {
    spawner_with(backend, socket_dir, |_| {}).0
}

fn request(id: &str, timeout: Duration) -> CanvasRequest {
    CanvasRequest {
        instance_id: Some(id.into()),
        timeout,
        config: json!({"title": "Pick a meeting slot"}),
        ..CanvasRequest::new("calendar", "meeting-picker")
    }
}

fn sockets_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).expect("read dir").count()
}

// ── Terminal outcomes ───────────────────────────────────────────────────────

#[tokio::test]
async fn selection_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, canvas) = scripted_backend(Script::Select(meeting_slot()));
    let spawner = spawner(&backend, dir.path());

    let result = spawner.run_canvas(request("calendar-1", WAIT)).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.data, Some(meeting_slot()));
    assert_eq!(result.instance_id, "calendar-1");
    assert!(result.pane_id.is_some());
    assert_eq!(
        canvas.endpoint_checks(),
        vec![true],
        "endpoint must exist before launch"
    );
    assert!(!dir.path().join("canvas-calendar-1.sock").exists());
    assert!(
        backend.pane_ids().expect("ids").is_empty(),
        "pane released after awaited result"
    );
}

#[tokio::test]
async fn user_cancellation_is_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::Cancel(Some("dismissed".into())));
    let spawner = spawner(&backend, dir.path());

    let result = spawner.run_canvas(request("calendar-2", WAIT)).await;

    assert!(result.success);
    assert_eq!(result.cancelled, Some(true));
    assert_eq!(result.reason.as_deref(), Some("dismissed"));
    assert!(result.data.is_none());
}

#[tokio::test]
async fn canvas_error_is_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::Fail("calendar unavailable".into()));
    let spawner = spawner(&backend, dir.path());

    let result = spawner.run_canvas(request("calendar-3", WAIT)).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("calendar unavailable"));
}

#[tokio::test]
async fn disconnect_without_answer_is_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::Disconnect);
    let spawner = spawner(&backend, dir.path());

    let result = spawner.run_canvas(request("calendar-4", WAIT)).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("peer disconnected unexpectedly"));
}

#[tokio::test]
async fn only_first_terminal_message_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::SelectThenCancel(meeting_slot()));
    let spawner = spawner(&backend, dir.path());

    let result = spawner.run_canvas(request("calendar-5", WAIT)).await;

    assert!(result.success);
    assert_eq!(result.data, Some(meeting_slot()));
    assert!(result.cancelled.is_none());
}

// ── Timeout and cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn short_timeout_without_canvas() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(HeadlessBackend::new());
    let spawner = spawner(&backend, dir.path());

    let result = spawner
        .run_canvas(request("calendar-6", Duration::from_millis(50)))
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Timeout waiting for user selection")
    );
    assert_eq!(sockets_in(dir.path()), 0, "endpoint removed after timeout");
}

#[tokio::test]
async fn timeout_sends_close_to_connected_canvas() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, mut canvas) = scripted_backend(Script::Silent);
    let spawner = spawner(&backend, dir.path());

    let result = spawner
        .run_canvas(request("calendar-7", Duration::from_millis(500)))
        .await;

    assert_eq!(
        result.error.as_deref(),
        Some("Timeout waiting for user selection")
    );
    assert_eq!(canvas.next_message().await, ControllerMessage::Close);
}

#[tokio::test]
async fn controller_cancellation_closes_canvas() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, mut canvas) = scripted_backend(Script::Silent);
    let spawner = spawner(&backend, dir.path());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let result = spawner
        .run_canvas_with_cancel(request("calendar-8", WAIT), cancel)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("cancelled by controller"));
    assert_eq!(canvas.next_message().await, ControllerMessage::Close);
}

// ── Failures before the await ───────────────────────────────────────────────

#[tokio::test]
async fn spawn_failure_leaks_no_endpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, canvas) = scripted_backend(Script::Silent);
    backend.fail_splits(true).expect("toggle");
    let spawner = spawner(&backend, dir.path());

    let result = tokio::time::timeout(WAIT, spawner.run_canvas(request("calendar-9", WAIT)))
        .await
        .expect("spawn failure must resolve immediately");

    assert!(!result.success);
    let error = result.error.expect("error text");
    assert!(error.starts_with("failed to spawn canvas:"), "got {error}");
    assert!(result.pane_id.is_none());
    assert_eq!(sockets_in(dir.path()), 0);
    assert!(canvas.endpoint_checks().is_empty(), "nothing launched");
}

#[tokio::test]
async fn unknown_kind_fails_before_binding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(HeadlessBackend::new());
    let spawner = spawner(&backend, dir.path());

    let result = spawner
        .run_canvas(CanvasRequest::new("spreadsheet", "grid"))
        .await;

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .is_some_and(|e| e.contains("unknown canvas kind")));
    assert!(result.instance_id.starts_with("spreadsheet-"));
    assert_eq!(sockets_in(dir.path()), 0);
    assert!(backend.pane_ids().expect("ids").is_empty());
}

#[tokio::test]
async fn unknown_scenario_fails_before_binding() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(HeadlessBackend::new());
    let spawner = spawner(&backend, dir.path());

    let result = spawner
        .run_canvas(CanvasRequest::new("calendar", "agenda"))
        .await;

    assert!(!result.success);
    assert!(backend.pane_ids().expect("ids").is_empty());
}

// ── Pane handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn display_only_runs_reuse_the_pane() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, canvas) = scripted_backend(Script::Silent);
    let spawner = spawner(&backend, dir.path());

    let display = |id: &str| CanvasRequest {
        wait_for_result: false,
        instance_id: Some(id.into()),
        ..CanvasRequest::new("calendar", "display")
    };

    let first = spawner.run_canvas(display("calendar-10")).await;
    let second = spawner.run_canvas(display("calendar-11")).await;

    assert!(first.success && second.success);
    assert!(first.pane_id.is_some());
    assert_eq!(first.pane_id, second.pane_id, "same pane reused");
    assert_eq!(backend.pane_ids().expect("ids").len(), 1);
    assert!(canvas.endpoint_checks().is_empty(), "no socket for display-only");
    assert_eq!(sockets_in(dir.path()), 0);
}

#[tokio::test]
async fn retained_pane_survives_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::Select(meeting_slot()));
    let (spawner, store) = spawner_with(&backend, dir.path(), |options| {
        options.retain_pane_after_result = true;
    });

    let result = spawner.run_canvas(request("calendar-12", WAIT)).await;

    let pane_id = result.pane_id.expect("pane id");
    assert!(backend.pane_ids().expect("ids").contains(&pane_id));
    let scope = spawner.panes().scope().to_owned();
    assert_eq!(
        store.get(&scope).expect("get").map(|r| r.pane_id),
        Some(pane_id)
    );
}

#[tokio::test]
async fn config_is_pushed_on_ready_when_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, mut canvas) = scripted_backend(Script::Silent);
    let (spawner, _store) = spawner_with(&backend, dir.path(), |options| {
        options.push_config_on_ready = true;
    });

    let result = spawner
        .run_canvas(request("calendar-13", Duration::from_millis(500)))
        .await;

    assert!(!result.success);
    assert_eq!(
        canvas.next_message().await,
        ControllerMessage::Update {
            config: json!({"title": "Pick a meeting slot"})
        }
    );
    assert_eq!(canvas.next_message().await, ControllerMessage::Close);
}

// ── Overlapping runs ────────────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_runs_keep_the_newer_canvas_pane() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = routed_backend(|instance_id| match instance_id {
        "calendar-20" => Script::Silent,
        _ => Script::SelectAfter(Duration::from_millis(600), meeting_slot()),
    });
    let spawner = spawner(&backend, dir.path());

    let first = async {
        let result = spawner
            .run_canvas(request("calendar-20", Duration::from_millis(300)))
            .await;
        let alive = backend.pane_ids().expect("ids");
        (result, alive)
    };
    let second = async {
        tokio::time::sleep(Duration::from_millis(80)).await;
        spawner.run_canvas(request("calendar-21", WAIT)).await
    };
    let ((first, alive_after_first), second) = tokio::join!(first, second);

    assert_eq!(
        first.error.as_deref(),
        Some("Timeout waiting for user selection")
    );
    assert!(second.success, "unexpected failure: {:?}", second.error);
    assert_eq!(second.data, Some(meeting_slot()));

    let pane_id = second.pane_id.expect("second pane");
    assert_eq!(first.pane_id.as_deref(), Some(pane_id.as_str()), "pane reused");
    assert!(
        alive_after_first.contains(&pane_id),
        "first run must not kill the pane the second run took over"
    );
    assert_eq!(
        backend.killed().expect("killed"),
        vec![pane_id],
        "pane killed once, by the run that held it last"
    );
}

// ── Deadline edges ──────────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_timeout_does_not_overflow() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::Select(meeting_slot()));
    let spawner = spawner(&backend, dir.path());

    let result = spawner
        .run_canvas(request("calendar-22", Duration::from_secs(u64::MAX)))
        .await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.data, Some(meeting_slot()));
}

#[tokio::test]
async fn deadline_bounds_a_stalled_launch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(HeadlessBackend::new());
    backend.stall_splits(true).expect("toggle");
    let spawner = spawner(&backend, dir.path());

    let result = tokio::time::timeout(
        WAIT,
        spawner.run_canvas(request("calendar-23", Duration::from_millis(200))),
    )
    .await
    .expect("stalled launch must still resolve at the deadline");

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Timeout waiting for user selection")
    );
    assert!(result.pane_id.is_none());
    assert_eq!(sockets_in(dir.path()), 0);
}

#[tokio::test]
async fn launch_carries_configured_retry_schedule() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (backend, _canvas) = scripted_backend(Script::Select(meeting_slot()));
    let (spawner, _store) = spawner_with(&backend, dir.path(), |options| {
        options.retry = RetryPolicy {
            max_attempts: 7,
            delay: Duration::from_millis(15),
        };
        options.retain_pane_after_result = true;
    });

    let result = spawner.run_canvas(request("calendar-24", WAIT)).await;

    let pane_id = result.pane_id.expect("pane id");
    let launches = backend.launches(&pane_id).expect("launches");
    assert_eq!(arg_value(&launches[0], "--connect-attempts"), Some("7"));
    assert_eq!(arg_value(&launches[0], "--connect-delay-ms"), Some("15"));
}
