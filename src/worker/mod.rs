//! Isolated execution context for the core engine.
//!
//! Each run gets a dedicated OS thread that owns a current-thread tokio
//! runtime, the engine's cooperative scheduler. The interactive side talks to
//! it through three channels only:
//! - worker → interactive: [`WorkerEvent`]s over an unbounded mpsc channel
//! - interactive → worker, credentials: the [`AuthRelay`] handoff
//! - interactive → worker, shutdown: `Handle::spawn` of the engine's shutdown
//!   coroutine onto the worker runtime
//!
//! Engine failures (errors, panics, scheduler construction) are contained at
//! this boundary and reported as events; they never reach the caller.

pub mod relay;
pub mod state;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, watch};

use crate::config;
use crate::core::log_bridge::{LogBridge, LogRecord, LogSubscription, Severity};
use crate::engine::{AuthKind, CoreEngine, EngineCallbacks, Mode};
use crate::error::AppError;

pub use relay::{AuthAnswer, AuthError, AuthRelay, AuthRequest, AuthResponder};
pub use state::{StateCell, WorkerState};

/// One-way notification from the worker to the interactive side.
#[derive(Debug)]
pub enum WorkerEvent {
    Log(LogRecord),
    /// `true` once the engine is up, `false` exactly once when the run ends.
    Status(bool),
    /// The engine moved traffic.
    Traffic,
    AuthRequest(AuthRequest),
}

pub type EventSender = mpsc::UnboundedSender<WorkerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<WorkerEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Bounds applied to one worker run.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Longest the engine may block waiting for a credential.
    pub auth_timeout: Duration,
    /// Grace period for orphaned engine tasks when the runtime is torn down.
    pub drain_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(config::AUTH_TIMEOUT_SECS),
            drain_timeout: Duration::from_millis(config::RUNTIME_DRAIN_MS),
        }
    }
}

/// Hosts one engine run on an isolated thread.
/// Implements Drop to request shutdown if discarded while active.
pub struct WorkerContext {
    engine: Arc<dyn CoreEngine>,
    state: StateCell,
    relay: AuthRelay,
    events: EventSender,
    log_bridge: LogBridge,
    /// Spawn handle of the live engine runtime; `None` outside the run.
    loop_handle: Arc<Mutex<Option<Handle>>>,
    options: WorkerOptions,
    _worker_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerContext {
    pub fn new(
        engine: Arc<dyn CoreEngine>,
        events: EventSender,
        log_bridge: LogBridge,
        options: WorkerOptions,
    ) -> Self {
        let relay = AuthRelay::new(events.clone(), options.auth_timeout);
        Self {
            engine,
            state: StateCell::new(),
            relay,
            events,
            log_bridge,
            loop_handle: Arc::new(Mutex::new(None)),
            options,
            _worker_thread: Mutex::new(None),
        }
    }

    /// Launch the engine in `mode` on a fresh thread. Only valid from `Idle`.
    pub fn start(&self, mode: Mode) -> Result<(), AppError> {
        if !self.state.advance(WorkerState::Starting) {
            return Err(AppError::InvalidState(format!(
                "worker cannot start while {}",
                self.state.get()
            )));
        }

        let run = WorkerRun {
            engine: Arc::clone(&self.engine),
            state: self.state.clone(),
            relay: self.relay.clone(),
            events: self.events.clone(),
            loop_handle: Arc::clone(&self.loop_handle),
            drain_timeout: self.options.drain_timeout,
            mode,
            logs: self.log_bridge.subscribe(self.events.clone()),
        };

        let spawned = std::thread::Builder::new()
            .name(config::WORKER_THREAD_NAME.into())
            .spawn(move || run.execute());

        match spawned {
            Ok(thread) => {
                *self
                    ._worker_thread
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(thread);
                tracing::info!("Worker started in {mode} mode");
                Ok(())
            }
            Err(e) => {
                // The closure (and its log subscription) was dropped with the failed spawn.
                tracing::error!("Failed to spawn worker thread: {e}");
                emit_log(&self.events, Severity::Error, format!("Error: {e}"));
                self.state.advance(WorkerState::Stopping);
                self.state.advance(WorkerState::Stopped);
                let _ = self.events.send(WorkerEvent::Status(false));
                Err(AppError::Io(format!("failed to spawn worker thread: {e}")))
            }
        }
    }

    /// Request cooperative shutdown. Never blocks; safe to call repeatedly and
    /// from any thread. A no-op unless the worker is starting or running.
    pub fn stop(&self) {
        let handle = lock_handle(&self.loop_handle);
        let state = self.state.get();
        if !state.is_active() {
            tracing::debug!("Stop ignored while worker is {state}");
            return;
        }

        self.engine.set_running(false);
        self.relay.cancel();
        self.state.advance(WorkerState::Stopping);

        match handle.as_ref() {
            Some(handle) => {
                let engine = Arc::clone(&self.engine);
                handle.spawn(async move { engine.shutdown().await });
                tracing::info!("Engine shutdown scheduled on worker loop");
            }
            None => tracing::info!("Stop requested before engine loop started"),
        }
    }

    /// Advisory read of the engine packet counter.
    pub fn cumulative_count(&self) -> u64 {
        self.engine.packet_count()
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Wait until the worker reaches `Stopped`. Returns `false` on timeout.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let reached = tokio::time::timeout(timeout, async move {
            rx.wait_for(|s| *s == WorkerState::Stopped).await.is_ok()
        })
        .await;
        reached.unwrap_or(false)
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        if self.state.get().is_active() {
            tracing::warn!("WorkerContext dropped while active, requesting shutdown");
            self.stop();
        }
    }
}

fn lock_handle(slot: &Mutex<Option<Handle>>) -> MutexGuard<'_, Option<Handle>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn emit_log(events: &EventSender, severity: Severity, message: String) {
    let _ = events.send(WorkerEvent::Log(LogRecord { message, severity }));
}

/// Everything the worker thread owns for one run.
struct WorkerRun {
    engine: Arc<dyn CoreEngine>,
    state: StateCell,
    relay: AuthRelay,
    events: EventSender,
    loop_handle: Arc<Mutex<Option<Handle>>>,
    drain_timeout: Duration,
    mode: Mode,
    logs: LogSubscription,
}

impl WorkerRun {
    fn execute(self) {
        let WorkerRun {
            engine,
            state,
            relay,
            events,
            loop_handle,
            drain_timeout,
            mode,
            logs,
        } = self;

        emit_log(
            &events,
            Severity::Info,
            format!("Initializing core: {}", mode.as_str().to_uppercase()),
        );

        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => {
                if begin_run(&engine, &state, &relay, &events, &loop_handle, &runtime) {
                    let _ = events.send(WorkerEvent::Status(true));
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        runtime.block_on(engine.run(mode))
                    }));
                    match outcome {
                        Ok(Ok(())) => tracing::info!("Core engine finished"),
                        Ok(Err(e)) => report_failure(&events, format!("Error: {e:#}")),
                        Err(panic) => report_failure(
                            &events,
                            format!("Engine panicked: {}", panic_message(panic.as_ref())),
                        ),
                    }
                }
                end_run(&engine, &state, &loop_handle);
                relay.cancel();
                runtime.shutdown_timeout(drain_timeout);
            }
            Err(e) => {
                report_failure(&events, format!("Error: failed to build engine scheduler: {e}"));
                state.advance(WorkerState::Stopping);
            }
        }

        // Detach engine logs before the context is discarded.
        drop(logs);
        state.advance(WorkerState::Stopped);
        let _ = events.send(WorkerEvent::Status(false));
        tracing::info!("Worker stopped");
    }
}

/// Publish the loop handle and arm the engine. Returns `false` if a stop
/// arrived while the worker was still starting.
fn begin_run(
    engine: &Arc<dyn CoreEngine>,
    state: &StateCell,
    relay: &AuthRelay,
    events: &EventSender,
    loop_handle: &Mutex<Option<Handle>>,
    runtime: &tokio::runtime::Runtime,
) -> bool {
    // Serialized with stop() through the handle lock.
    let mut handle = lock_handle(loop_handle);
    if state.get() != WorkerState::Starting {
        tracing::info!("Stop arrived during startup, engine not started");
        return false;
    }
    engine.set_callbacks(bind_callbacks(relay, events));
    engine.set_running(true);
    *handle = Some(runtime.handle().clone());
    state.advance(WorkerState::Running)
}

fn end_run(engine: &Arc<dyn CoreEngine>, state: &StateCell, loop_handle: &Mutex<Option<Handle>>) {
    let mut handle = lock_handle(loop_handle);
    *handle = None;
    engine.set_running(false);
    state.advance(WorkerState::Stopping);
}

fn report_failure(events: &EventSender, message: String) {
    tracing::error!("{message}");
    emit_log(events, Severity::Error, message);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wire the engine's callback slots to this run's relay and event stream.
fn bind_callbacks(relay: &AuthRelay, events: &EventSender) -> EngineCallbacks {
    let traffic = events.clone();
    let phone = relay.clone();
    let code = relay.clone();
    let pass = relay.clone();
    EngineCallbacks {
        on_traffic: Arc::new(move || {
            let _ = traffic.send(WorkerEvent::Traffic);
        }),
        auth_phone: Arc::new(move || phone.request_or_abandon(AuthKind::Phone, None)),
        auth_code: Arc::new(move |payload| code.request_or_abandon(AuthKind::Code, payload)),
        auth_pass: Arc::new(move || pass.request_or_abandon(AuthKind::Password, None)),
    }
}
