//! Interactive-side owner of the tunnel worker.
//!
//! The controller holds at most one [`WorkerContext`], turns its events into
//! [`DashboardState`] changes and outward [`ControllerEvent`]s, runs the
//! telemetry sampler for each run and answers credential challenges through an
//! [`AuthPrompter`]. It is driven by the front end:
//!
//! ```text
//! loop {
//!     let signal = controller.next_signal().await;
//!     controller.handle_signal(signal);
//! }
//! ```

mod logic;
mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config;
use crate::core::telemetry::{self, TelemetrySnapshot};
use crate::core::LogBridge;
use crate::engine::{AuthKind, EngineFactory, Mode};
use crate::error::AppError;
use crate::settings::Config;
use crate::worker::{
    event_channel, EventReceiver, WorkerContext, WorkerEvent, WorkerOptions, WorkerState,
};

pub use logic::{status_label, toggle_action, ToggleAction};
pub use state::{DashboardState, LogLine};

/// Asks the user for a credential. `None` means the prompt was cancelled.
#[async_trait]
pub trait AuthPrompter: Send + Sync {
    async fn prompt(&self, kind: AuthKind, payload: Option<String>) -> Option<String>;

    /// Close any prompt still open once its run is over.
    fn cancel_pending(&self) {}
}

/// Outward notification for the front end.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    Log(LogLine),
    Status { connected: bool },
    Telemetry(TelemetrySnapshot),
    AuthPrompt { kind: AuthKind, payload: Option<String> },
    ModeChanged { mode: Mode, local_ip: String },
    Fault { kind: &'static str, message: String },
}

/// Input to [`Controller::handle_signal`].
#[derive(Debug)]
pub enum Signal {
    Worker(WorkerEvent),
    Telemetry { run: u64, snapshot: TelemetrySnapshot },
    AuthResolved { kind: AuthKind },
    ShutdownTimedOut { run: u64 },
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub worker: WorkerOptions,
    pub sample_interval: Duration,
    /// How long a stopped worker may take to reach `Stopped`.
    pub shutdown_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            worker: WorkerOptions::default(),
            sample_interval: Duration::from_secs(config::STATS_INTERVAL_SECS),
            shutdown_timeout: Duration::from_secs(config::SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

pub struct Controller {
    config: Arc<Config>,
    engines: Arc<dyn EngineFactory>,
    prompter: Arc<dyn AuthPrompter>,
    log_bridge: LogBridge,
    options: ControllerOptions,
    dashboard: DashboardState,
    worker: Option<Arc<WorkerContext>>,
    worker_events: Option<EventReceiver>,
    /// Incremented per start; tags sampler and watchdog signals.
    run_id: u64,
    sampler: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    /// Open credential prompts of the current run.
    prompts: Vec<JoinHandle<()>>,
    internal_tx: mpsc::UnboundedSender<Signal>,
    internal_rx: mpsc::UnboundedReceiver<Signal>,
    updates: mpsc::UnboundedSender<ControllerEvent>,
}

impl Controller {
    pub fn new(
        config: Arc<Config>,
        engines: Arc<dyn EngineFactory>,
        prompter: Arc<dyn AuthPrompter>,
        log_bridge: LogBridge,
        options: ControllerOptions,
        updates: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let mode = Mode::default();
        let dashboard = DashboardState::new(mode, config.ip_for_mode(mode));
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            engines,
            prompter,
            log_bridge,
            options,
            dashboard,
            worker: None,
            worker_events: None,
            run_id: 0,
            sampler: None,
            watchdog: None,
            prompts: Vec::new(),
            internal_tx,
            internal_rx,
            updates,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dashboard(&self) -> &DashboardState {
        &self.dashboard
    }

    pub fn mode(&self) -> Mode {
        self.dashboard.mode
    }

    /// State of the current (or most recent) worker.
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.worker.as_ref().map(|w| w.state())
    }

    /// Start when idle or stopped, stop when starting or running.
    pub fn toggle(&mut self) -> Result<(), AppError> {
        match toggle_action(self.worker_state()) {
            ToggleAction::Start => self.start(),
            ToggleAction::Stop => {
                self.stop();
                Ok(())
            }
            ToggleAction::Wait => Err(AppError::InvalidState(
                "Previous worker is still stopping".into(),
            )),
        }
    }

    /// Launch a fresh worker in the current mode.
    pub fn start(&mut self) -> Result<(), AppError> {
        logic::ensure_can_start(self.worker_state())?;

        let (tx, rx) = event_channel();
        let worker = Arc::new(WorkerContext::new(
            self.engines.create(),
            tx,
            self.log_bridge.clone(),
            self.options.worker.clone(),
        ));
        self.finish_run();
        self.dashboard.reset_run();
        self.run_id += 1;
        self.worker = Some(Arc::clone(&worker));
        self.worker_events = Some(rx);

        let started = Instant::now();
        let result = worker.start(self.dashboard.mode);
        self.dashboard.worker_state = Some(worker.state());
        result?;

        let run = self.run_id;
        let signals = self.internal_tx.clone();
        self.sampler = Some(telemetry::start_sampler(
            worker,
            self.options.sample_interval,
            started,
            move |snapshot| {
                let _ = signals.send(Signal::Telemetry { run, snapshot });
            },
        ));
        tracing::info!("Tunnel run {run} started in {} mode", self.dashboard.mode);
        Ok(())
    }

    /// Request the live worker to stop and arm the shutdown watchdog.
    /// A no-op when nothing is starting or running.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.clone() else {
            return;
        };
        if !worker.state().is_active() {
            return;
        }

        worker.stop();
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        self.close_prompts();
        self.dashboard.worker_state = Some(worker.state());

        let run = self.run_id;
        let timeout = self.options.shutdown_timeout;
        let signals = self.internal_tx.clone();
        self.watchdog = Some(tokio::spawn(async move {
            if !worker.wait_stopped(timeout).await {
                let _ = signals.send(Signal::ShutdownTimedOut { run });
            }
        }));
        tracing::info!("Stop requested for tunnel run {run}");
    }

    /// Switch between client and server. Refused while a worker is live.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), AppError> {
        logic::ensure_mode_change_allowed(self.worker_state())?;
        self.dashboard.mode = mode;
        self.dashboard.local_ip = self.config.ip_for_mode(mode).to_string();
        self.emit(ControllerEvent::ModeChanged {
            mode,
            local_ip: self.dashboard.local_ip.clone(),
        });
        Ok(())
    }

    pub fn switch_mode(&mut self) -> Result<(), AppError> {
        self.set_mode(self.dashboard.mode.toggled())
    }

    /// Replace the settings used by future runs.
    pub fn update_config(&mut self, config: Config) {
        self.config = Arc::new(config);
        self.dashboard.local_ip = self.config.ip_for_mode(self.dashboard.mode).to_string();
    }

    /// Wait for the next worker event or internal signal. Cancel-safe.
    pub async fn next_signal(&mut self) -> Signal {
        tokio::select! {
            Some(event) = recv_worker(&mut self.worker_events) => Signal::Worker(event),
            Some(signal) = self.internal_rx.recv() => signal,
        }
    }

    pub fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Worker(event) => self.handle_worker_event(event),
            Signal::Telemetry { run, snapshot } => {
                if run == self.run_id && self.worker_state() == Some(WorkerState::Running) {
                    self.dashboard.telemetry = Some(snapshot.clone());
                    self.emit(ControllerEvent::Telemetry(snapshot));
                }
            }
            Signal::AuthResolved { kind } => {
                if self.dashboard.pending_auth == Some(kind) {
                    self.dashboard.pending_auth = None;
                }
            }
            Signal::ShutdownTimedOut { run } => {
                if run == self.run_id {
                    let err = AppError::UnresponsiveShutdown(format!(
                        "Worker did not stop within {:?}",
                        self.options.shutdown_timeout
                    ));
                    tracing::error!("{err}");
                    self.fault(&err);
                }
            }
        }
        self.dashboard.worker_state = self.worker_state();
    }

    /// Stop any live worker and wait for it, bounded by the shutdown timeout.
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        let Some(worker) = self.worker.clone() else {
            return Ok(());
        };
        self.stop();
        if worker.state() == WorkerState::Idle {
            return Ok(());
        }

        let timeout = self.options.shutdown_timeout;
        if worker.wait_stopped(timeout).await {
            self.finish_run();
            self.dashboard.worker_state = Some(WorkerState::Stopped);
            Ok(())
        } else {
            Err(AppError::UnresponsiveShutdown(format!(
                "Worker did not stop within {timeout:?}"
            )))
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Log(record) => {
                let line = LogLine {
                    time: logic::clock_hms(&chrono::Local::now()),
                    severity: record.severity,
                    message: record.message,
                };
                self.dashboard.push_log(line.clone());
                self.emit(ControllerEvent::Log(line));
            }
            WorkerEvent::Status(true) => {
                self.dashboard.connected = true;
                self.emit(ControllerEvent::Status { connected: true });
            }
            WorkerEvent::Status(false) => {
                self.finish_run();
                self.emit(ControllerEvent::Status { connected: false });
            }
            WorkerEvent::Traffic => {
                self.dashboard.traffic_ticks += 1;
            }
            WorkerEvent::AuthRequest(request) => {
                let kind = request.kind;
                self.dashboard.pending_auth = Some(kind);
                self.emit(ControllerEvent::AuthPrompt {
                    kind,
                    payload: request.payload.clone(),
                });

                // Prompts run beside the event loop so it keeps draining events.
                let prompter = Arc::clone(&self.prompter);
                let signals = self.internal_tx.clone();
                self.prompts.retain(|task| !task.is_finished());
                self.prompts.push(tokio::spawn(async move {
                    let answer = prompter.prompt(kind, request.payload).await;
                    request.responder.answer(answer);
                    let _ = signals.send(Signal::AuthResolved { kind });
                }));
            }
        }
    }

    /// Tear down per-run interactive state. Safe to call more than once.
    fn finish_run(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.close_prompts();
        self.dashboard.connected = false;
    }

    /// Abort prompt tasks so a dead run cannot keep claiming user input.
    /// Dropping a task's responder resolves its request as cancelled.
    fn close_prompts(&mut self) {
        for task in self.prompts.drain(..) {
            task.abort();
        }
        self.prompter.cancel_pending();
        self.dashboard.pending_auth = None;
    }

    fn fault(&self, err: &AppError) {
        self.emit(ControllerEvent::Fault {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.updates.send(event);
    }
}

async fn recv_worker(events: &mut Option<EventReceiver>) -> Option<WorkerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
