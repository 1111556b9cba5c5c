//! Pure decision functions behind the controller's lifecycle commands.
//!
//! These take plain values (no worker or channel handles) and can be
//! unit-tested without spawning anything.

use std::fmt;

use chrono::{DateTime, TimeZone};

use crate::error::AppError;
use crate::worker::WorkerState;

/// What `toggle()` should do given the current worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Start,
    Stop,
    /// The previous worker is still shutting down.
    Wait,
}

/// `None` means no worker has been created yet.
pub fn toggle_action(state: Option<WorkerState>) -> ToggleAction {
    match state {
        None | Some(WorkerState::Idle) | Some(WorkerState::Stopped) => ToggleAction::Start,
        Some(WorkerState::Starting) | Some(WorkerState::Running) => ToggleAction::Stop,
        Some(WorkerState::Stopping) => ToggleAction::Wait,
    }
}

/// Only one worker may be live at a time.
pub fn ensure_can_start(state: Option<WorkerState>) -> Result<(), AppError> {
    match state {
        None | Some(WorkerState::Idle) | Some(WorkerState::Stopped) => Ok(()),
        Some(WorkerState::Stopping) => Err(AppError::InvalidState(
            "Previous worker is still stopping".into(),
        )),
        Some(state) => Err(AppError::InvalidState(format!("Worker is already {state}"))),
    }
}

pub fn ensure_mode_change_allowed(state: Option<WorkerState>) -> Result<(), AppError> {
    if state.is_some_and(WorkerState::is_live) {
        return Err(AppError::InvalidState(
            "Mode can only be changed while the tunnel is stopped".into(),
        ));
    }
    Ok(())
}

/// Indicator text for the status line.
pub fn status_label(connected: bool, state: Option<WorkerState>) -> &'static str {
    match (connected, state) {
        (true, _) => "ONLINE",
        (false, Some(WorkerState::Starting)) | (false, Some(WorkerState::Running)) => "CONNECTING",
        (false, Some(WorkerState::Stopping)) => "STOPPING",
        _ => "OFFLINE",
    }
}

/// `HH:MM:SS` in the time zone of `at`, used to stamp log lines.
pub fn clock_hms<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerState::*;

    #[test]
    fn test_toggle_action() {
        assert_eq!(toggle_action(None), ToggleAction::Start);
        assert_eq!(toggle_action(Some(Idle)), ToggleAction::Start);
        assert_eq!(toggle_action(Some(Stopped)), ToggleAction::Start);
        assert_eq!(toggle_action(Some(Starting)), ToggleAction::Stop);
        assert_eq!(toggle_action(Some(Running)), ToggleAction::Stop);
        assert_eq!(toggle_action(Some(Stopping)), ToggleAction::Wait);
    }

    #[test]
    fn test_ensure_can_start() {
        assert!(ensure_can_start(None).is_ok());
        assert!(ensure_can_start(Some(Stopped)).is_ok());
        let err = ensure_can_start(Some(Stopping)).unwrap_err();
        assert_eq!(err.kind(), "InvalidState");
        assert!(err.to_string().contains("still stopping"));
        assert!(ensure_can_start(Some(Running)).is_err());
    }

    #[test]
    fn test_mode_change_only_without_live_worker() {
        assert!(ensure_mode_change_allowed(None).is_ok());
        assert!(ensure_mode_change_allowed(Some(Idle)).is_ok());
        assert!(ensure_mode_change_allowed(Some(Stopped)).is_ok());
        for live in [Starting, Running, Stopping] {
            assert!(ensure_mode_change_allowed(Some(live)).is_err());
        }
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(true, Some(Running)), "ONLINE");
        assert_eq!(status_label(false, Some(Starting)), "CONNECTING");
        assert_eq!(status_label(false, Some(Stopping)), "STOPPING");
        assert_eq!(status_label(false, Some(Stopped)), "OFFLINE");
        assert_eq!(status_label(false, None), "OFFLINE");
    }

    #[test]
    fn test_clock_hms() {
        use chrono::{FixedOffset, Local, Utc};

        let utc = Utc.timestamp_opt(86_400 + 3_725, 0).unwrap();
        assert_eq!(clock_hms(&utc), "01:02:05");

        // Follows the offset of the given time zone, not UTC.
        let moscow = FixedOffset::east_opt(3 * 3600).unwrap();
        assert_eq!(clock_hms(&utc.with_timezone(&moscow)), "04:02:05");
        let west = FixedOffset::west_opt(5 * 3600).unwrap();
        assert_eq!(clock_hms(&utc.with_timezone(&west)), "20:02:05");

        let now = Local::now();
        assert_eq!(clock_hms(&now), now.format("%H:%M:%S").to_string());
    }
}
