//! Contract between the control surface and the core tunneling engine.
//!
//! The engine (capture, encryption, batching, transport) lives outside this
//! crate. The worker drives it exclusively through [`CoreEngine`]:
//! - callbacks for traffic ticks and the three credential challenges
//! - an entry coroutine that runs until completion or cancellation
//! - a cooperative shutdown coroutine plus a `running` flag
//! - a cumulative packet counter read for display

pub mod demo;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which end of the tunnel this process plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Client,
    Server,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Client => "client",
            Mode::Server => "server",
        }
    }

    /// The other mode.
    pub fn toggled(self) -> Self {
        match self {
            Mode::Client => Mode::Server,
            Mode::Server => Mode::Client,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Mode::Client),
            "server" => Ok(Mode::Server),
            other => Err(format!("unknown mode {other:?} (expected client or server)")),
        }
    }
}

/// Kind of credential the engine is asking the user for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Phone,
    Code,
    Password,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Phone => "phone",
            AuthKind::Code => "code",
            AuthKind::Password => "password",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fired by the engine whenever it moves traffic.
pub type TrafficCallback = Arc<dyn Fn() + Send + Sync>;
/// Synchronous challenge without a payload. `None` means the user gave no answer.
pub type PromptCallback = Arc<dyn Fn() -> Option<String> + Send + Sync>;
/// Synchronous challenge carrying an optional hint from the transport (e.g. "2FA").
pub type CodeCallback = Arc<dyn Fn(Option<String>) -> Option<String> + Send + Sync>;

/// Callback slots installed into the engine before each run.
#[derive(Clone)]
pub struct EngineCallbacks {
    pub on_traffic: TrafficCallback,
    pub auth_phone: PromptCallback,
    pub auth_code: CodeCallback,
    pub auth_pass: PromptCallback,
}

impl EngineCallbacks {
    /// Callbacks that drop traffic ticks and answer every challenge with `None`.
    pub fn detached() -> Self {
        Self {
            on_traffic: Arc::new(|| {}),
            auth_phone: Arc::new(|| None),
            auth_code: Arc::new(|_| None),
            auth_pass: Arc::new(|| None),
        }
    }
}

impl Default for EngineCallbacks {
    fn default() -> Self {
        Self::detached()
    }
}

impl fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCallbacks").finish_non_exhaustive()
    }
}

/// The core tunneling engine as seen by the worker.
///
/// `run` and `shutdown` are polled on the worker's single-threaded scheduler.
/// `packet_count` and the running flag may be read from any thread; they are
/// advisory and never used for correctness decisions.
#[async_trait]
pub trait CoreEngine: Send + Sync + 'static {
    /// Install the callback slots. Called once per run, before `run`.
    fn set_callbacks(&self, callbacks: EngineCallbacks);

    /// Entry coroutine. Returns when the tunnel finishes or is cancelled.
    async fn run(&self, mode: Mode) -> anyhow::Result<()>;

    /// Cooperative cancellation request. Must be idempotent.
    async fn shutdown(&self);

    fn is_running(&self) -> bool;

    fn set_running(&self, running: bool);

    /// Monotonically non-decreasing count of packets moved through the tunnel.
    fn packet_count(&self) -> u64;
}

/// Builds a fresh engine for each run.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Arc<dyn CoreEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Arc<dyn CoreEngine> + Send + Sync,
{
    fn create(&self) -> Arc<dyn CoreEngine> {
        self()
    }
}
