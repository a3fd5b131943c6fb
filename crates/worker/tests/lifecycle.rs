//! Task lifecycle tests driving the real worker actor with real child
//! processes. `/bin/sh` stands in for the transcoder binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use transcode_core::protocol::{
    KillRequest, OutboundMessage, StatsReport, TaskPayload, TaskRequest, TaskStatus, TaskUpdate,
};
use transcode_worker::config::WorkerConfig;
use transcode_worker::worker::{Worker, WorkerEvent};

const WAIT: Duration = Duration::from_secs(10);
const QUIET: Duration = Duration::from_millis(500);

struct Harness {
    events: mpsc::UnboundedSender<WorkerEvent>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(extra: &[(&str, &str)]) -> Self {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("TRANSCODER_PATH".to_string(), "/bin".to_string()),
            ("TRANSCODER_NAME".to_string(), "sh".to_string()),
            ("HOSTNAME".to_string(), "test-host".to_string()),
        ]);
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        let config = WorkerConfig::from_lookup(|key| vars.get(key).cloned()).expect("valid config");

        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (worker, worker_rx) = Worker::new(Arc::new(config), 500, outbound_tx);
        let events = worker.events();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(worker_rx, cancel.clone()));

        Self {
            events,
            outbound,
            cancel,
            handle,
        }
    }

    fn send(&self, event: WorkerEvent) {
        self.events.send(event).expect("worker is running");
    }

    /// Request a job whose environment carries only a `PATH`.
    fn request(&self, task_id: &str, args: &[&str]) {
        let env = HashMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]);
        self.request_with(task_id, args, env, None);
    }

    fn request_with(
        &self,
        task_id: &str,
        args: &[&str],
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) {
        self.send(WorkerEvent::TaskRequest(TaskRequest {
            task_id: task_id.to_string(),
            payload: TaskPayload {
                args: args.iter().map(|a| a.to_string()).collect(),
                env,
                cwd,
            },
        }));
    }

    fn kill(&self, task_id: &str) {
        self.send(WorkerEvent::TaskKill(KillRequest {
            task_id: task_id.to_string(),
        }));
    }

    async fn next(&mut self) -> OutboundMessage {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("message in time")
            .expect("outbound channel open")
    }

    async fn next_update(&mut self) -> TaskUpdate {
        match self.next().await {
            OutboundMessage::TaskUpdate(update) => update,
            other => panic!("expected task update, got {other:?}"),
        }
    }

    /// Connect, report a CPU sample, and return the resulting stats.
    async fn stats(&mut self) -> StatsReport {
        self.send(WorkerEvent::Connected);
        self.send(WorkerEvent::CpuSampled(Ok(25.0)));
        match self.next().await {
            OutboundMessage::Stats(report) => report,
            other => panic!("expected stats, got {other:?}"),
        }
    }

    async fn assert_quiet(&mut self) {
        let result = tokio::time::timeout(QUIET, self.outbound.recv()).await;
        assert!(result.is_err(), "unexpected message: {result:?}");
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("worker stops")
            .expect("worker does not panic");
    }
}

// ---------------------------------------------------------------------------
// Normal completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transcode_request_reports_received_inprogress_done() {
    let mut h = Harness::start(&[]);
    let dir = tempfile::tempdir().expect("temp dir");

    h.request_with("t1", &["-i", "in.mp4"], HashMap::new(), Some(dir.path().to_path_buf()));

    let received = h.next_update().await;
    assert_eq!(received.task_id, "t1");
    assert_eq!(received.status, TaskStatus::Received);
    assert_eq!(h.next_update().await.status, TaskStatus::InProgress);

    let done = h.next_update().await;
    assert_eq!(done.status, TaskStatus::Done);
    let code = done.exit_code.expect("process exited normally");
    assert_eq!(done.result, Some(code == 0));
    assert!(done.error.is_none());

    h.assert_quiet().await;
    h.stop().await;
}

#[tokio::test]
async fn zero_exit_is_success() {
    let mut h = Harness::start(&[]);
    h.request("ok", &["-c", "exit 0"]);

    h.next_update().await;
    h.next_update().await;
    assert_eq!(h.next_update().await, TaskUpdate::exited("ok", Some(0)));
    h.stop().await;
}

#[tokio::test]
async fn nonzero_exit_is_failure_without_error() {
    let mut h = Harness::start(&[]);
    h.request("bad", &["-c", "exit 3"]);

    h.next_update().await;
    h.next_update().await;
    let done = h.next_update().await;
    assert_eq!(done.result, Some(false));
    assert_eq!(done.exit_code, Some(3));
    assert!(done.error.is_none());
    h.stop().await;
}

#[tokio::test]
async fn diagnostic_payload_runs_sleep() {
    let mut h = Harness::start(&[("DIAGNOSTIC_SLEEP_MS", "200"), ("FFMPEG_HWACCEL", "vaapi")]);
    h.request("diag", &["testpayload"]);

    assert_eq!(h.next_update().await.status, TaskStatus::Received);
    assert_eq!(h.next_update().await.status, TaskStatus::InProgress);
    assert_eq!(h.next_update().await, TaskUpdate::exited("diag", Some(0)));
    h.stop().await;
}

#[tokio::test]
async fn concurrent_tasks_each_finish_once() {
    let mut h = Harness::start(&[]);
    h.request("a", &["-c", "sleep 0.2; exit 0"]);
    h.request("b", &["-c", "exit 1"]);

    let mut terminal = HashMap::new();
    while terminal.len() < 2 {
        let update = h.next_update().await;
        if update.is_terminal() {
            assert!(
                terminal.insert(update.task_id.clone(), update).is_none(),
                "duplicate terminal update"
            );
        }
    }
    assert_eq!(terminal["a"].result, Some(true));
    assert_eq!(terminal["b"].result, Some(false));

    h.assert_quiet().await;
    assert_eq!(h.stats().await.tasks, 0);
    h.stop().await;
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_environment_is_exactly_the_payload_env() {
    let mut h = Harness::start(&[]);
    let env = HashMap::from([("JOB_MARKER".to_string(), "1".to_string())]);
    h.request_with(
        "env",
        &["-c", r#"[ "$JOB_MARKER" = 1 ] && [ -z "$CARGO_MANIFEST_DIR" ]"#],
        env,
        None,
    );

    h.next_update().await;
    h.next_update().await;
    assert_eq!(h.next_update().await, TaskUpdate::exited("env", Some(0)));
    h.stop().await;
}

#[tokio::test]
async fn orchestrator_arch_values_are_not_passed_through() {
    let mut h = Harness::start(&[]);
    let env = HashMap::from([("PLEX_ARCH".to_string(), "from-orchestrator".to_string())]);
    h.request_with(
        "arch",
        &["-c", r#"[ "$PLEX_ARCH" != from-orchestrator ]"#],
        env,
        None,
    );

    h.next_update().await;
    h.next_update().await;
    assert_eq!(h.next_update().await, TaskUpdate::exited("arch", Some(0)));
    h.stop().await;
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_transcoder_reports_received_inprogress_then_error() {
    let mut h = Harness::start(&[("TRANSCODER_NAME", "no-such-transcoder")]);
    h.request("t1", &["-i", "in.mp4"]);

    assert_eq!(h.next_update().await, TaskUpdate::received("t1"));
    assert_eq!(h.next_update().await, TaskUpdate::in_progress("t1"));
    let done = h.next_update().await;
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.result, Some(false));
    assert!(done.exit_code.is_none());
    assert_matches!(done.error, Some(message) => {
        assert!(message.contains("no-such-transcoder"), "{message}");
    });

    h.assert_quiet().await;
    assert_eq!(h.stats().await.tasks, 0);
    h.stop().await;
}

#[tokio::test]
async fn duplicate_task_id_is_rejected_without_touching_running_task() {
    let mut h = Harness::start(&[]);
    h.request("dup", &["-c", "sleep 30"]);
    h.next_update().await;
    assert_eq!(h.next_update().await.status, TaskStatus::InProgress);

    h.request("dup", &["-c", "exit 0"]);
    assert_eq!(h.next_update().await, TaskUpdate::received("dup"));
    assert_eq!(h.next_update().await, TaskUpdate::in_progress("dup"));
    let rejected = h.next_update().await;
    assert_eq!(rejected.status, TaskStatus::Done);
    assert_eq!(rejected.result, Some(false));
    assert!(rejected.error.is_some());

    assert_eq!(h.stats().await.tasks, 1);

    h.kill("dup");
    h.assert_quiet().await;
    h.stop().await;
}

// ---------------------------------------------------------------------------
// Kill
// ---------------------------------------------------------------------------

#[tokio::test]
async fn killed_task_gets_no_terminal_update() {
    let mut h = Harness::start(&[]);
    h.request("long", &["-c", "sleep 30"]);
    h.next_update().await;
    assert_eq!(h.next_update().await.status, TaskStatus::InProgress);

    h.kill("long");

    // Removed from the registry as soon as the kill is processed.
    assert_eq!(h.stats().await.tasks, 0);
    h.assert_quiet().await;
    h.stop().await;
}

#[tokio::test]
async fn kill_for_unknown_task_is_noop() {
    let mut h = Harness::start(&[]);
    h.kill("ghost");

    let stats = h.stats().await;
    assert_eq!(stats.tasks, 0);
    assert_eq!(stats.cpu, 25.0);
    assert_eq!(stats.ops, 500);
    h.stop().await;
}

#[tokio::test]
async fn task_id_can_be_reused_after_kill() {
    let mut h = Harness::start(&[]);
    h.request("reuse", &["-c", "sleep 30"]);
    h.next_update().await;
    h.next_update().await;
    h.kill("reuse");

    h.request("reuse", &["-c", "sleep 0.3; exit 0"]);
    assert_eq!(h.next_update().await, TaskUpdate::received("reuse"));
    assert_eq!(h.next_update().await, TaskUpdate::in_progress("reuse"));
    // The killed process's exit must not complete the new run.
    assert_eq!(h.next_update().await, TaskUpdate::exited("reuse", Some(0)));

    h.assert_quiet().await;
    h.stop().await;
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_report_running_tasks() {
    let mut h = Harness::start(&[]);
    h.request("busy", &["-c", "sleep 30"]);
    h.next_update().await;
    h.next_update().await;

    assert_eq!(
        h.stats().await,
        StatsReport {
            cpu: 25.0,
            tasks: 1,
            ops: 500,
        }
    );

    h.send(WorkerEvent::Disconnected);
    h.send(WorkerEvent::CpuSampled(Ok(30.0)));
    h.assert_quiet().await;

    h.kill("busy");
    h.stop().await;
}
