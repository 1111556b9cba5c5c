//! Core logic shared by the worker and the controller.
//!
//! - [`log_bridge`]: engine `tracing` records republished as worker events
//! - [`telemetry`]: rolling traffic window and synthetic throughput metrics

pub mod log_bridge;
pub mod telemetry;

pub use log_bridge::{LogBridge, LogRecord, LogSubscription, Severity};
pub use telemetry::{RollingWindow, TelemetrySample, TelemetrySnapshot, TrafficSampler};
