//! Traffic telemetry: turns the engine's cumulative packet counter into a
//! smoothed per-second display signal.
//!
//! - [`RollingWindow`] keeps the last N per-second deltas, pre-filled with zeros
//! - [`TrafficSampler`] derives deltas and the synthetic display metrics
//! - [`start_sampler`] polls a worker once per interval while it is Running

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config;
use crate::worker::{WorkerContext, WorkerState};

/// Fixed-length FIFO of per-second deltas. Always exactly `capacity` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingWindow {
    values: VecDeque<u64>,
    capacity: usize,
}

impl RollingWindow {
    /// A window of `capacity` zeros.
    pub fn primed(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: std::iter::repeat(0).take(capacity).collect(),
            capacity,
        }
    }

    /// Append `value`, evicting the oldest entry.
    pub fn push(&mut self, value: u64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> u64 {
        self.values.back().copied().unwrap_or(0)
    }

    /// Oldest to newest.
    pub fn to_vec(&self) -> Vec<u64> {
        self.values.iter().copied().collect()
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::primed(config::ACTIVITY_WINDOW_LEN)
    }
}

/// One observation of the cumulative counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySample {
    /// Unix seconds.
    pub timestamp: i64,
    pub cumulative_count: u64,
    pub delta: u64,
}

/// Display-ready telemetry for one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub sample: TelemetrySample,
    /// Synthetic throughput in KB/s.
    pub speed_kbs: f64,
    /// Synthetic volume moved this session in MB.
    pub total_mb: f64,
    pub latency_ms: u64,
    pub uptime: String,
    /// Oldest to newest per-second deltas.
    pub activity: Vec<u64>,
}

/// Per-run delta tracker. A fresh one is created for every run.
#[derive(Debug, Clone)]
pub struct TrafficSampler {
    previous: u64,
    window: RollingWindow,
    started: Instant,
}

impl TrafficSampler {
    pub fn new(started: Instant) -> Self {
        Self {
            previous: 0,
            window: RollingWindow::default(),
            started,
        }
    }

    /// Fold one counter reading into the window. A reading lower than the
    /// previous one yields a zero delta and becomes the new baseline.
    pub fn observe(&mut self, current: u64) -> TelemetrySnapshot {
        let delta = current.saturating_sub(self.previous);
        self.previous = current;
        self.window.push(delta);

        TelemetrySnapshot {
            sample: TelemetrySample {
                timestamp: unix_timestamp(),
                cumulative_count: current,
                delta,
            },
            speed_kbs: speed_kbs(delta),
            total_mb: total_mb(current),
            latency_ms: config::LATENCY_BASE_MS + delta % 10,
            uptime: format_uptime(self.started.elapsed()),
            activity: self.window.to_vec(),
        }
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }
}

pub fn speed_kbs(delta: u64) -> f64 {
    config::SPEED_COEFFICIENT * delta as f64 * config::PACKET_SIZE_KB
}

pub fn total_mb(cumulative: u64) -> f64 {
    cumulative as f64 * config::PACKET_SIZE_KB / 1024.0
}

/// `HH:MM:SS`; hours keep counting past 24.
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Format a KB/s figure compactly.
pub fn format_speed(kbs: f64) -> String {
    if kbs < 1024.0 {
        format!("{:.1} KB/s", kbs)
    } else {
        format!("{:.2} MB/s", kbs / 1024.0)
    }
}

pub fn format_volume(mb: f64) -> String {
    if mb < 1024.0 {
        format!("{:.2} MB", mb)
    } else {
        format!("{:.2} GB", mb / 1024.0)
    }
}

pub fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Spawn the per-run sampler. Ticks every `interval` (first tick one interval
/// after start), samples only while the worker is Running and exits as soon as
/// the worker leaves Running.
pub fn start_sampler<F>(
    worker: Arc<WorkerContext>,
    interval: Duration,
    started: Instant,
    publish: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(TelemetrySnapshot) + Send + 'static,
{
    tokio::spawn(async move {
        let mut sampler = TrafficSampler::new(started);
        let mut states = worker.subscribe_state();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            let ticked = tokio::select! {
                _ = ticker.tick() => true,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    false
                }
            };

            match worker.state() {
                WorkerState::Running => {}
                WorkerState::Stopping | WorkerState::Stopped => break,
                WorkerState::Idle | WorkerState::Starting => continue,
            }
            if ticked {
                publish(sampler.observe(worker.cumulative_count()));
            }
        }
        tracing::debug!("Telemetry sampler finished");
    })
}
