//! Self-contained engine for running the control surface without a linked core.
//!
//! Follows a [`DemoScript`]: answers scripted credential challenges, then
//! advances its packet counter on a fixed tick until the configured duration
//! elapses or a shutdown arrives. Also serves as the scripted engine in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{AuthKind, CoreEngine, EngineCallbacks, Mode};
use crate::config::ENGINE_LOG_TARGET;

/// What the demo engine does during one run.
#[derive(Debug, Clone)]
pub struct DemoScript {
    /// Challenges issued in order before traffic starts.
    pub challenges: Vec<(AuthKind, Option<String>)>,
    /// Base number of packets added per tick.
    pub packets_per_tick: u64,
    pub tick: Duration,
    /// Finish on its own after this long. `None` runs until shutdown.
    pub run_for: Option<Duration>,
    /// Fail the run with this message after the challenges.
    pub fail_with: Option<String>,
}

impl Default for DemoScript {
    fn default() -> Self {
        Self {
            challenges: Vec::new(),
            packets_per_tick: 4,
            tick: Duration::from_millis(200),
            run_for: None,
            fail_with: None,
        }
    }
}

pub struct DemoEngine {
    script: DemoScript,
    callbacks: Mutex<EngineCallbacks>,
    running: AtomicBool,
    packets: AtomicU64,
    stop: Notify,
    answers: Mutex<Vec<(AuthKind, Option<String>)>>,
}

impl DemoEngine {
    pub fn new(script: DemoScript) -> Self {
        Self {
            script,
            callbacks: Mutex::new(EngineCallbacks::detached()),
            running: AtomicBool::new(false),
            packets: AtomicU64::new(0),
            stop: Notify::new(),
            answers: Mutex::new(Vec::new()),
        }
    }

    /// Answers received so far, in challenge order.
    pub fn answers(&self) -> Vec<(AuthKind, Option<String>)> {
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn callbacks(&self) -> EngineCallbacks {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn challenge(&self, callbacks: &EngineCallbacks, kind: AuthKind, payload: Option<String>) {
        tracing::info!(target: ENGINE_LOG_TARGET, "Transport requests {kind}");
        let answer = match kind {
            AuthKind::Phone => (callbacks.auth_phone)(),
            AuthKind::Code => (callbacks.auth_code)(payload),
            AuthKind::Password => (callbacks.auth_pass)(),
        };
        if answer.is_none() {
            tracing::warn!(target: ENGINE_LOG_TARGET, "No {kind} supplied, continuing without it");
        }
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, answer));
    }
}

#[async_trait]
impl CoreEngine for DemoEngine {
    fn set_callbacks(&self, callbacks: EngineCallbacks) {
        *self.callbacks.lock().unwrap_or_else(|e| e.into_inner()) = callbacks;
    }

    async fn run(&self, mode: Mode) -> anyhow::Result<()> {
        tracing::info!(target: ENGINE_LOG_TARGET, "Demo engine starting in {mode} mode");
        let callbacks = self.callbacks();

        for (kind, payload) in self.script.challenges.iter().cloned() {
            if !self.is_running() {
                tracing::info!(target: ENGINE_LOG_TARGET, "Stopped during authorization");
                return Ok(());
            }
            self.challenge(&callbacks, kind, payload);
        }

        if let Some(reason) = &self.script.fail_with {
            anyhow::bail!("{reason}");
        }

        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(self.script.tick);
        let mut tick_no = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.notified() => break,
            }
            if !self.is_running() {
                break;
            }
            if let Some(limit) = self.script.run_for {
                if started.elapsed() >= limit {
                    break;
                }
            }

            tick_no += 1;
            let burst = self.script.packets_per_tick + tick_no % 5;
            self.packets.fetch_add(burst, Ordering::Relaxed);
            (callbacks.on_traffic)();
            tracing::debug!(target: ENGINE_LOG_TARGET, "Forwarded batch of {burst} packets");
        }

        tracing::info!(
            target: ENGINE_LOG_TARGET,
            "Demo engine finished after {} packets",
            self.packet_count()
        );
        Ok(())
    }

    async fn shutdown(&self) {
        tracing::info!(target: ENGINE_LOG_TARGET, "Shutdown requested");
        self.running.store(false, Ordering::Relaxed);
        self.stop.notify_one();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    fn packet_count(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}
