//! The worker's control flow.
//!
//! [`Worker`] is an actor: it exclusively owns the task registry and CPU
//! state, and everything that happens to the worker (orchestrator
//! requests, process exits, CPU samples, connection changes) reaches it
//! as a [`WorkerEvent`] on one channel. Outgoing protocol messages are
//! queued on the outbound channel drained by the connection task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use transcode_core::accel::inject_accel;
use transcode_core::cpu::CpuLoad;
use transcode_core::env_overlay;
use transcode_core::protocol::{
    KillRequest, OutboundMessage, StatsReport, TaskPayload, TaskRequest, TaskUpdate,
};
use transcode_core::task::{TaskLifecycle, TaskOutcome};
use transcode_core::types::RunId;

use crate::config::WorkerConfig;
use crate::error::SampleError;
use crate::registry::{RegisteredTask, TaskRegistry};
use crate::supervisor::{spawn_supervised, JobSpec, ProcessExit};

/// First argument that selects the diagnostic job instead of the transcoder.
pub const DIAGNOSTIC_PAYLOAD: &str = "testpayload";

/// Everything the control flow reacts to.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The orchestrator channel is up and the announce has been sent.
    Connected,
    Disconnected,
    TaskRequest(TaskRequest),
    TaskKill(KillRequest),
    ProcessExited(ProcessExit),
    CpuSampled(Result<f64, SampleError>),
}

pub struct Worker {
    config: Arc<WorkerConfig>,
    ops: u64,
    registry: TaskRegistry,
    cpu: CpuLoad,
    connected: bool,
    next_run_id: RunId,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl Worker {
    /// Create the worker and the receiving end of its event channel.
    ///
    /// `ops` is the static throughput score reported with every stats
    /// message.
    pub fn new(
        config: Arc<WorkerConfig>,
        ops: u64,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let worker = Self {
            config,
            ops,
            registry: TaskRegistry::new(),
            cpu: CpuLoad::default(),
            connected: false,
            next_run_id: 1,
            events_tx,
            outbound,
        };
        (worker, events_rx)
    }

    /// Sender for posting events to this worker.
    pub fn events(&self) -> mpsc::UnboundedSender<WorkerEvent> {
        self.events_tx.clone()
    }

    /// Process events until `cancel` fires, then terminate remaining tasks.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        self.shutdown();
    }

    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Connected => {
                tracing::info!(active_tasks = self.registry.size(), "Orchestrator connected");
                self.connected = true;
            }
            WorkerEvent::Disconnected => {
                tracing::warn!("Orchestrator disconnected");
                self.connected = false;
            }
            WorkerEvent::TaskRequest(request) => self.handle_task_request(request),
            WorkerEvent::TaskKill(request) => self.handle_kill(&request.task_id),
            WorkerEvent::ProcessExited(exit) => self.handle_process_exit(exit),
            WorkerEvent::CpuSampled(result) => self.handle_cpu_sample(result),
        }
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    fn handle_task_request(&mut self, request: TaskRequest) {
        if let Err(e) = request.validate() {
            tracing::warn!(error = %e, "Rejecting task request");
            return;
        }

        let TaskRequest { task_id, payload } = request;
        let (mut lifecycle, received) = TaskLifecycle::receive(task_id.clone());
        self.send_update(received);

        if self.registry.contains(&task_id) {
            tracing::warn!(task_id = %task_id, "Duplicate request for an active task");
            self.fail_task(
                &mut lifecycle,
                format!("Task {task_id} is already running"),
            );
            return;
        }

        let spec = self.job_spec(&task_id, payload);
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let events = self.events_tx.clone();
        let spawned = spawn_supervised(&spec, &task_id, run_id, move |exit| {
            let _ = events.send(WorkerEvent::ProcessExited(exit));
        });

        match spawned {
            Ok(process) => {
                tracing::info!(task_id = %task_id, run_id, pid = ?process.pid(), "Task started");
                if let Some(update) = lifecycle.start() {
                    self.send_update(update);
                }
                self.registry.register(
                    task_id,
                    RegisteredTask {
                        run_id,
                        lifecycle,
                        process,
                    },
                );
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to start task");
                self.fail_task(&mut lifecycle, e.to_string());
            }
        }
    }

    /// Finish a task that never got a running process.
    ///
    /// Still reports `inprogress` first, so every task the orchestrator
    /// sees goes `received -> inprogress -> done`.
    fn fail_task(&self, lifecycle: &mut TaskLifecycle, message: String) {
        if let Some(update) = lifecycle.start() {
            self.send_update(update);
        }
        if let Some(update) = lifecycle.complete(TaskOutcome::Error { message }) {
            self.send_update(update);
        }
    }

    /// Build the command line for a task request.
    fn job_spec(&self, task_id: &str, payload: TaskPayload) -> JobSpec {
        let env = env_overlay::overlay(&payload.env);

        if payload.args.first().map(String::as_str) == Some(DIAGNOSTIC_PAYLOAD) {
            tracing::info!(task_id = %task_id, args = ?payload.args, env = ?env, "Running diagnostic payload");
            return JobSpec::diagnostic(self.config.diagnostic_sleep);
        }

        let args = match &self.config.hwaccel {
            Some(accel) => inject_accel(&payload.args, accel),
            None => payload.args,
        };

        JobSpec {
            program: self.config.transcoder_binary(),
            args,
            env: Some(env),
            cwd: payload.cwd,
        }
    }

    fn handle_kill(&mut self, task_id: &str) {
        match self.registry.remove(task_id) {
            Some(mut task) => {
                if !task.process.kill() {
                    tracing::warn!(task_id = %task_id, run_id = task.run_id, "Process already exiting");
                }
                tracing::info!(task_id = %task_id, run_id = task.run_id, "Task killed");
            }
            None => {
                tracing::debug!(task_id = %task_id, "Kill for unknown task ignored");
            }
        }
    }

    fn handle_process_exit(&mut self, exit: ProcessExit) {
        let ProcessExit {
            task_id,
            run_id,
            outcome,
        } = exit;

        // Killed tasks and replaced entries no longer match.
        if self.registry.lookup(&task_id).map(|t| t.run_id) != Some(run_id) {
            tracing::debug!(task_id = %task_id, run_id, "Ignoring exit of untracked process");
            return;
        }

        let Some(mut task) = self.registry.remove(&task_id) else {
            return;
        };
        if let Some(update) = task.lifecycle.complete(outcome) {
            tracing::info!(
                task_id = %task_id,
                run_id,
                exit_code = ?update.exit_code,
                result = ?update.result,
                "Task finished",
            );
            self.send_update(update);
        }
    }

    /// Signal every remaining task on shutdown.
    fn shutdown(&mut self) {
        for (task_id, mut task) in self.registry.drain() {
            tracing::info!(task_id = %task_id, run_id = task.run_id, "Terminating task on shutdown");
            task.process.kill();
        }
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    fn handle_cpu_sample(&mut self, result: Result<f64, SampleError>) {
        match result {
            Ok(percent) => {
                self.cpu.record(percent);
                if self.connected {
                    let report = StatsReport {
                        cpu: self.cpu.report_value(),
                        tasks: self.registry.size(),
                        ops: self.ops,
                    };
                    tracing::debug!(cpu = report.cpu, tasks = report.tasks, "Reporting stats");
                    self.send(OutboundMessage::Stats(report));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "CPU sample failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    fn send_update(&self, update: TaskUpdate) {
        self.send(OutboundMessage::TaskUpdate(update));
    }

    fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("Outbound channel closed, dropping message");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
