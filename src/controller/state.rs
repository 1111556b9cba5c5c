//! Externally observable controller state.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config;
use crate::core::{Severity, TelemetrySnapshot};
use crate::engine::{AuthKind, Mode};
use crate::worker::WorkerState;

/// A log line as shown in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// `HH:MM:SS` when the controller received it.
    pub time: String,
    pub severity: Severity,
    pub message: String,
}

/// What the dashboard shows. Rebuilt incrementally from worker events.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub mode: Mode,
    pub local_ip: String,
    pub connected: bool,
    pub worker_state: Option<WorkerState>,
    pub log: VecDeque<LogLine>,
    pub telemetry: Option<TelemetrySnapshot>,
    /// Traffic callbacks received during the current run.
    pub traffic_ticks: u64,
    pub pending_auth: Option<AuthKind>,
}

impl DashboardState {
    pub fn new(mode: Mode, local_ip: impl Into<String>) -> Self {
        Self {
            mode,
            local_ip: local_ip.into(),
            connected: false,
            worker_state: None,
            log: VecDeque::new(),
            telemetry: None,
            traffic_ticks: 0,
            pending_auth: None,
        }
    }

    /// Append to the feed, dropping the oldest line past capacity.
    pub fn push_log(&mut self, line: LogLine) {
        if self.log.len() == config::LOG_FEED_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    /// Clear per-run fields at the start of a run.
    pub fn reset_run(&mut self) {
        self.connected = false;
        self.telemetry = None;
        self.traffic_ticks = 0;
        self.pending_auth = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> LogLine {
        LogLine {
            time: "00:00:00".into(),
            severity: Severity::Info,
            message: format!("line {n}"),
        }
    }

    #[test]
    fn test_log_feed_is_bounded() {
        let mut state = DashboardState::new(Mode::Client, "10.0.0.2");
        for n in 0..config::LOG_FEED_CAPACITY + 3 {
            state.push_log(line(n));
        }
        assert_eq!(state.log.len(), config::LOG_FEED_CAPACITY);
        assert_eq!(state.log.front().unwrap().message, "line 3");
    }

    #[test]
    fn test_reset_run_keeps_log_and_mode() {
        let mut state = DashboardState::new(Mode::Server, "10.0.0.1");
        state.push_log(line(0));
        state.connected = true;
        state.traffic_ticks = 9;
        state.pending_auth = Some(AuthKind::Code);

        state.reset_run();
        assert!(!state.connected);
        assert_eq!(state.traffic_ticks, 0);
        assert_eq!(state.pending_auth, None);
        assert_eq!(state.log.len(), 1);
        assert_eq!(state.mode, Mode::Server);
    }
}
