pub mod config;
pub mod console;
pub mod controller;
pub mod core;
pub mod engine;
pub mod error;
pub mod settings;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::console::{Console, ConsolePrompter};
use crate::controller::{Controller, ControllerEvent, ControllerOptions};
use crate::core::LogBridge;
use crate::engine::demo::{DemoEngine, DemoScript};
use crate::engine::{AuthKind, CoreEngine, Mode};
use crate::settings::ConfigStore;

/// Control surface for the TeleVK tunnel.
#[derive(Debug, Parser)]
#[command(name = "televk", version, about)]
pub struct Cli {
    /// Settings file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Initial mode (client or server)
    #[arg(long, default_value = "client")]
    pub mode: Mode,

    /// Print controller events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Credential challenge the demo engine issues before traffic (repeatable)
    #[arg(long = "demo-challenge", value_parser = parse_challenge)]
    pub demo_challenges: Vec<AuthKind>,

    /// Demo engine tick in milliseconds
    #[arg(long, default_value_t = 200)]
    pub demo_tick_ms: u64,

    /// Let the demo engine finish on its own after this many seconds
    #[arg(long)]
    pub demo_run_secs: Option<u64>,

    /// Make the demo engine fail with this message
    #[arg(long)]
    pub demo_fail: Option<String>,
}

impl Cli {
    pub fn demo_script(&self) -> DemoScript {
        DemoScript {
            challenges: self
                .demo_challenges
                .iter()
                .map(|&kind| {
                    let payload = (kind == AuthKind::Code).then(|| "2FA".to_string());
                    (kind, payload)
                })
                .collect(),
            tick: Duration::from_millis(self.demo_tick_ms.max(1)),
            run_for: self.demo_run_secs.map(Duration::from_secs),
            fail_with: self.demo_fail.clone(),
            ..DemoScript::default()
        }
    }
}

fn parse_challenge(value: &str) -> Result<AuthKind, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "phone" => Ok(AuthKind::Phone),
        "code" => Ok(AuthKind::Code),
        "password" | "pass" => Ok(AuthKind::Password),
        other => Err(format!("unknown challenge {other:?} (phone, code or password)")),
    }
}

pub fn run() -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in TeleVK: {info}");
        default_hook(info);
    }));

    let log_bridge = LogBridge::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "televk=info,televk_lib=info".into()),
                ),
        )
        .with(log_bridge.layer().with_filter(LevelFilter::INFO))
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("televk-ui")
        .build()
        .context("failed to build the interactive runtime")?;
    runtime.block_on(serve(cli, log_bridge))
}

async fn serve(cli: Cli, log_bridge: LogBridge) -> anyhow::Result<()> {
    let store = ConfigStore::new(&cli.config);
    let loaded = store.load();

    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    if let Some(warning) = &loaded.warning {
        let _ = updates_tx.send(ControllerEvent::Fault {
            kind: "Config",
            message: format!("Settings file unusable, using defaults: {warning}"),
        });
    }

    let script = cli.demo_script();
    let engines = move || -> Arc<dyn CoreEngine> { Arc::new(DemoEngine::new(script.clone())) };
    let prompter = Arc::new(ConsolePrompter::new());

    let mut controller = Controller::new(
        Arc::new(loaded.config),
        Arc::new(engines),
        prompter.clone(),
        log_bridge,
        ControllerOptions::default(),
        updates_tx,
    );
    controller.set_mode(cli.mode)?;
    tracing::info!("TeleVK ready ({} mode, settings {})", cli.mode, store.path().display());

    Console::new(controller, prompter, store, cli.json)
        .run(updates_rx)
        .await
}
