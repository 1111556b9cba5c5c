//! Line-oriented front end.
//!
//! Reads commands from stdin, drives the [`Controller`] event loop and prints
//! controller events either as text or as JSON lines. While a credential
//! prompt is open the next input line answers it instead of being parsed as a
//! command.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::controller::{status_label, AuthPrompter, Controller, ControllerEvent};
use crate::core::telemetry::{format_speed, format_volume};
use crate::engine::{AuthKind, Mode};
use crate::settings::form::{save_settings, SettingsForm, FORM_FIELDS};
use crate::settings::ConfigStore;

/// Typing this at a prompt cancels it, like an empty line.
pub const CANCEL_INPUT: &str = "!cancel";

/// Routes the next input line to the open credential prompt.
#[derive(Default)]
pub struct ConsolePrompter {
    waiting: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl ConsolePrompter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `line` to the open prompt. Returns `false` if no prompt is open.
    pub fn offer(&self, line: &str) -> bool {
        let waiting = self
            .waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match waiting {
            Some(tx) => {
                let _ = tx.send(parse_answer(line));
                true
            }
            None => false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

#[async_trait]
impl AuthPrompter for ConsolePrompter {
    async fn prompt(&self, kind: AuthKind, payload: Option<String>) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
            // Replacing an older sender cancels that prompt.
            *waiting = Some(tx);
        }
        println!("{}", prompt_text(kind, payload.as_deref()));
        rx.await.ok().flatten()
    }

    fn cancel_pending(&self) {
        let waiting = self
            .waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = waiting {
            let _ = tx.send(None);
        }
    }
}

/// Empty input or [`CANCEL_INPUT`] means no answer.
pub fn parse_answer(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line == CANCEL_INPUT {
        None
    } else {
        Some(line.to_string())
    }
}

fn prompt_text(kind: AuthKind, payload: Option<&str>) -> String {
    let label = match kind {
        AuthKind::Phone => "Phone number (international format)",
        AuthKind::Code => "Login code",
        AuthKind::Password => "Two-step verification password",
    };
    match payload {
        Some(hint) => format!("{label} [{hint}] (empty line cancels):"),
        None => format!("{label} (empty line cancels):"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Toggle,
    Start,
    Stop,
    /// Switch to the given mode, or to the other one.
    Mode(Option<Mode>),
    Status,
    Set { field: String, value: String },
    Show,
    Save,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Command::Empty;
    };
    match head.to_ascii_lowercase().as_str() {
        "toggle" | "t" => Command::Toggle,
        "start" => Command::Start,
        "stop" => Command::Stop,
        "mode" => match parts.next() {
            None => Command::Mode(None),
            Some(arg) => match arg.parse() {
                Ok(mode) => Command::Mode(Some(mode)),
                Err(e) => Command::Invalid(e),
            },
        },
        "status" => Command::Status,
        "set" => {
            let Some(field) = parts.next() else {
                return Command::Invalid("usage: set <field> <value>".into());
            };
            let value = parts.collect::<Vec<_>>().join(" ");
            Command::Set {
                field: field.to_string(),
                value,
            }
        }
        "show" => Command::Show,
        "save" => Command::Save,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Invalid(format!("unknown command {other:?}, try `help`")),
    }
}

const HELP: &str = "\
Commands:
  toggle | t            start or stop the tunnel
  start / stop          start or stop explicitly
  mode [client|server]  switch mode (only while stopped)
  status                show tunnel status and telemetry
  set <field> <value>   edit a setting (see `show` for fields)
  show                  show the settings being edited
  save                  validate and persist edited settings
  help                  this text
  quit                  stop the tunnel and exit";

/// Console session: the controller plus the settings being edited.
pub struct Console {
    controller: Controller,
    prompter: Arc<ConsolePrompter>,
    store: ConfigStore,
    form: SettingsForm,
    json: bool,
}

impl Console {
    pub fn new(
        controller: Controller,
        prompter: Arc<ConsolePrompter>,
        store: ConfigStore,
        json: bool,
    ) -> Self {
        let form = SettingsForm::from_config(controller.config());
        Self {
            controller,
            prompter,
            store,
            form,
            json,
        }
    }

    /// Run until `quit` or end of input, then shut the tunnel down.
    pub async fn run(
        mut self,
        mut updates: mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        if !self.json {
            println!("{HELP}");
        }

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::info!("End of input, shutting down");
                        break;
                    };
                    if self.prompter.offer(&line) {
                        continue;
                    }
                    if !self.execute(parse_command(&line)) {
                        break;
                    }
                }
                signal = self.controller.next_signal() => {
                    self.controller.handle_signal(signal);
                }
                Some(event) = updates.recv() => {
                    self.render(&event);
                }
            }
        }

        let result = self.controller.shutdown().await;
        while let Ok(event) = updates.try_recv() {
            self.render(&event);
        }
        result.map_err(Into::into)
    }

    /// Apply one command. Returns `false` when the session should end.
    fn execute(&mut self, command: Command) -> bool {
        let outcome = match command {
            Command::Toggle => self.controller.toggle(),
            Command::Start => self.controller.start(),
            Command::Stop => {
                self.controller.stop();
                Ok(())
            }
            Command::Mode(Some(mode)) => self.controller.set_mode(mode),
            Command::Mode(None) => self.controller.switch_mode(),
            Command::Status => {
                self.print_status();
                Ok(())
            }
            Command::Set { field, value } => self
                .form
                .set_field(&field, &value)
                .map_err(Into::into),
            Command::Show => {
                self.print_form();
                Ok(())
            }
            Command::Save => {
                match save_settings(&self.store, self.controller.config(), &self.form) {
                    Ok(updated) => {
                        self.controller.update_config(updated);
                        println!("Settings saved to {}", self.store.path().display());
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => return false,
            Command::Empty => Ok(()),
            Command::Invalid(message) => {
                println!("{message}");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            tracing::warn!("Command failed: {e}");
            self.render(&ControllerEvent::Fault {
                kind: e.kind(),
                message: e.to_string(),
            });
        }
        true
    }

    fn render(&self, event: &ControllerEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to encode event: {e}"),
            }
            return;
        }
        if let Some(text) = render_text(event) {
            println!("{text}");
        }
    }

    fn print_status(&self) {
        let dash = self.controller.dashboard();
        println!(
            "{} | mode {} | local {}",
            status_label(dash.connected, dash.worker_state),
            dash.mode,
            dash.local_ip
        );
        if let Some(t) = &dash.telemetry {
            println!(
                "speed {} | total {} | latency {} ms | uptime {}",
                format_speed(t.speed_kbs),
                format_volume(t.total_mb),
                t.latency_ms,
                t.uptime
            );
        }
        if let Some(kind) = dash.pending_auth {
            println!("waiting for {kind}");
        }
    }

    fn print_form(&self) {
        let f = &self.form;
        let values = [
            f.transport.as_str().to_string(),
            f.tap_interface_name.clone(),
            mask(&f.encryption_key),
            if f.compression_enabled { "on" } else { "off" }.to_string(),
            f.api_id.clone(),
            f.api_hash.clone(),
            mask(&f.bot_token),
            f.chat_id.clone(),
            mask(&f.vk_token),
            f.vk_login.clone(),
            f.vk_peer_id.clone(),
            f.vk_app_id.clone(),
        ];
        for (name, value) in FORM_FIELDS.iter().zip(values) {
            println!("  {name:<12} {value}");
        }
    }
}

/// Hide secrets except for their length.
fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        format!("<{} chars>", secret.chars().count())
    }
}

/// Human-readable line for an event, or `None` for events not shown as text.
pub fn render_text(event: &ControllerEvent) -> Option<String> {
    match event {
        ControllerEvent::Log(line) => Some(format!(
            "[{}] {:<7} {}",
            line.time,
            line.severity.as_str().to_uppercase(),
            line.message
        )),
        ControllerEvent::Status { connected } => Some(format!(
            "STATUS: {}",
            if *connected { "ONLINE" } else { "OFFLINE" }
        )),
        // Telemetry is shown on demand by `status`.
        ControllerEvent::Telemetry(_) => None,
        ControllerEvent::AuthPrompt { kind, .. } => Some(format!("Authorization needed: {kind}")),
        ControllerEvent::ModeChanged { mode, local_ip } => {
            Some(format!("Mode: {} (local {local_ip})", mode.as_str().to_uppercase()))
        }
        ControllerEvent::Fault { kind, message } => Some(format!("ERROR [{kind}]: {message}")),
    }
}
