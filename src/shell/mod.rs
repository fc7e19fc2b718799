//! Remote shell automation for the Cisco VOS administrative CLI.
//!
//! One [`RemoteShellAutomaton::run`] call drives one command to completion over
//! an interactive session:
//!
//! `Connecting -> ShellOpen -> AwaitingInitialPrompt -> CommandSent -> Streaming -> {Succeeded | Failed | TimedOut}`
//!
//! Every event goes through [`Interaction::apply`], which is a no-op once a
//! terminal state is reached, so a late chunk, timer, or close after
//! resolution cannot resolve the call a second time. The transport is closed
//! from a single place after the state machine settles.

use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;

use crate::deadline;

pub mod matcher;
mod ssh;
pub mod transport;
pub mod vos;

pub use matcher::{CommandKind, PROMPT, Verdict};
pub use ssh::SshConnector;
pub use transport::{ShellConnector, ShellError, ShellTransport, TransportEvent};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(45);
/// Captured output is capped; bytes past the cap are dropped.
pub const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub text: String,
    pub kind: CommandKind,
    pub timeout: Duration,
}

impl ShellCommand {
    pub fn service_restart(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::ServiceRestart,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn generic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Generic,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn probe() -> Self {
        Self {
            text: String::new(),
            kind: CommandKind::ProbeOnly,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomatonState {
    Connecting,
    ShellOpen,
    AwaitingInitialPrompt,
    CommandSent,
    Streaming,
    Succeeded,
    Failed,
    TimedOut,
}

impl AutomatonState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AutomatonState::Succeeded | AutomatonState::Failed | AutomatonState::TimedOut
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// The per-operation deadline.
    Overall,
    /// No completion within the remaining budget after the command was sent.
    NoResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ShellStatus {
    Succeeded,
    Failed(String),
    TimedOut(TimeoutKind),
}

/// Result of one automaton run. Output captured so far is always included.
#[derive(Debug, Clone, Serialize)]
pub struct ShellOutcome {
    pub status: ShellStatus,
    pub output: String,
    pub final_state: AutomatonState,
    pub elapsed: Duration,
}

impl ShellOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ShellStatus::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    ShellOpened,
    CommandSent,
    Chunk(String),
    TransportClosed,
    TransportError(String),
    DeadlineElapsed,
    ResponseTimerElapsed,
}

/// State of one command interaction. The running buffer is append-only.
#[derive(Debug)]
pub struct Interaction {
    state: AutomatonState,
    status: Option<ShellStatus>,
    kind: CommandKind,
    command: String,
    buffer: String,
    truncated: bool,
}

impl Interaction {
    pub fn new(command: &ShellCommand) -> Self {
        Self {
            state: AutomatonState::Connecting,
            status: None,
            kind: command.kind,
            command: command.text.clone(),
            buffer: String::new(),
            truncated: false,
        }
    }

    pub fn state(&self) -> AutomatonState {
        self.state
    }

    pub fn output(&self) -> &str {
        &self.buffer
    }

    /// Applies one event. Returns the status when this event resolved the
    /// interaction; later events are ignored and return `None`.
    pub fn apply(&mut self, event: Event) -> Option<ShellStatus> {
        if self.state.is_terminal() {
            debug!("[shell] ignoring {:?} after resolution", event_name(&event));
            return None;
        }

        match event {
            Event::Connected => {
                self.state = AutomatonState::ShellOpen;
                None
            }
            Event::ShellOpened => {
                self.state = AutomatonState::AwaitingInitialPrompt;
                None
            }
            Event::CommandSent => {
                self.state = AutomatonState::CommandSent;
                None
            }
            Event::Chunk(chunk) => self.on_chunk(&chunk),
            Event::TransportClosed => self.resolve(
                AutomatonState::Failed,
                ShellStatus::Failed("connection closed before completion".to_string()),
            ),
            Event::TransportError(reason) => {
                self.resolve(AutomatonState::Failed, ShellStatus::Failed(reason))
            }
            Event::DeadlineElapsed => self.resolve(
                AutomatonState::TimedOut,
                ShellStatus::TimedOut(TimeoutKind::Overall),
            ),
            Event::ResponseTimerElapsed => self.resolve(
                AutomatonState::TimedOut,
                ShellStatus::TimedOut(TimeoutKind::NoResponse),
            ),
        }
    }

    fn on_chunk(&mut self, chunk: &str) -> Option<ShellStatus> {
        self.append(chunk);

        let evaluate = match self.state {
            AutomatonState::CommandSent | AutomatonState::Streaming => {
                self.state = AutomatonState::Streaming;
                true
            }
            AutomatonState::AwaitingInitialPrompt => self.kind == CommandKind::ProbeOnly,
            _ => false,
        };
        if !evaluate {
            return None;
        }

        if matcher::reports_starting(chunk) {
            debug!("[shell] service reports [STARTING]");
        }
        match self.kind.evaluate(chunk, &self.buffer, &self.command) {
            Verdict::Continue => None,
            Verdict::Succeeded => self.resolve(AutomatonState::Succeeded, ShellStatus::Succeeded),
            Verdict::Failed(reason) => {
                self.resolve(AutomatonState::Failed, ShellStatus::Failed(reason))
            }
        }
    }

    /// Appends as much of `chunk` as fits under the cap.
    fn append(&mut self, chunk: &str) {
        let room = MAX_OUTPUT_BYTES.saturating_sub(self.buffer.len());
        let mut take = chunk.len().min(room);
        while !chunk.is_char_boundary(take) {
            take -= 1;
        }
        if take < chunk.len() && !self.truncated {
            warn!("[shell] output exceeded {} bytes; dropping the rest", MAX_OUTPUT_BYTES);
            self.truncated = true;
        }
        self.buffer.push_str(&chunk[..take]);
    }

    fn resolve(&mut self, state: AutomatonState, status: ShellStatus) -> Option<ShellStatus> {
        self.state = state;
        self.status = Some(status.clone());
        Some(status)
    }

    fn into_outcome(self, elapsed: Duration) -> ShellOutcome {
        let status = self
            .status
            .unwrap_or_else(|| ShellStatus::Failed(format!("stopped in state {:?}", self.state)));
        ShellOutcome {
            status,
            output: self.buffer,
            final_state: self.state,
            elapsed,
        }
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Connected => "connected",
        Event::ShellOpened => "shell opened",
        Event::CommandSent => "command sent",
        Event::Chunk(_) => "chunk",
        Event::TransportClosed => "transport closed",
        Event::TransportError(_) => "transport error",
        Event::DeadlineElapsed => "deadline",
        Event::ResponseTimerElapsed => "response timer",
    }
}

#[derive(Debug, Clone)]
pub struct AutomatonSettings {
    /// Wait after the shell opens before nudging the CLI with a newline.
    pub grace_period: Duration,
    /// Kept back from the remaining budget when arming the response timer.
    pub response_buffer: Duration,
}

impl Default for AutomatonSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            response_buffer: Duration::from_secs(2),
        }
    }
}

/// Observer notified with every received chunk, in arrival order.
pub type ChunkObserver<'a> = &'a mut (dyn FnMut(&str) + Send);

pub struct RemoteShellAutomaton {
    connector: Arc<dyn ShellConnector>,
    settings: AutomatonSettings,
}

impl RemoteShellAutomaton {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(SshConnector::new()), AutomatonSettings::default())
    }

    pub fn with_connector(connector: Arc<dyn ShellConnector>, settings: AutomatonSettings) -> Self {
        Self { connector, settings }
    }

    /// Runs `command` on `target`. Never returns an error: failures and
    /// timeouts come back as a [`ShellOutcome`] carrying the partial output.
    pub async fn run(
        &self,
        target: &SshTarget,
        command: &ShellCommand,
        mut observer: Option<ChunkObserver<'_>>,
    ) -> ShellOutcome {
        let started = Instant::now();
        let deadline = started + command.timeout;
        let mut interaction = Interaction::new(command);
        info!(
            "[shell] {}@{}:{} running {:?} ({:?}, budget {}s)",
            target.username,
            target.host,
            target.port,
            command.text,
            command.kind,
            command.timeout.as_secs()
        );

        let connected = deadline::race("ssh connect", command.timeout, self.connector.connect(target)).await;
        let mut transport = match connected {
            Ok(Ok(transport)) => transport,
            Ok(Err(err)) => {
                warn!("[shell] connect to {} failed: {}", target.host, err);
                interaction.apply(Event::TransportError(err.to_string()));
                return finish(interaction, started);
            }
            Err(_) => {
                warn!("[shell] connect to {} timed out", target.host);
                interaction.apply(Event::DeadlineElapsed);
                return finish(interaction, started);
            }
        };
        interaction.apply(Event::Connected);

        self.drive(transport.as_mut(), &mut interaction, command, deadline, &mut observer)
            .await;
        transport.close().await;

        let outcome = finish(interaction, started);
        info!(
            "[shell] {} finished as {:?} after {}ms ({} bytes captured)",
            target.host,
            outcome.status,
            outcome.elapsed.as_millis(),
            outcome.output.len()
        );
        outcome
    }

    async fn drive(
        &self,
        transport: &mut dyn ShellTransport,
        interaction: &mut Interaction,
        command: &ShellCommand,
        deadline: Instant,
        observer: &mut Option<ChunkObserver<'_>>,
    ) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match deadline::race("open shell", remaining, transport.open_shell()).await {
            Ok(Ok(())) => {
                interaction.apply(Event::ShellOpened);
            }
            Ok(Err(err)) => {
                interaction.apply(Event::TransportError(err.to_string()));
                return;
            }
            Err(_) => {
                interaction.apply(Event::DeadlineElapsed);
                return;
            }
        }

        let nudge_at = Instant::now() + self.settings.grace_period;
        let mut response_deadline: Option<Instant> = None;
        let mut stdout = Utf8Decoder::default();
        let mut stderr = Utf8Decoder::default();

        while !interaction.state().is_terminal() {
            let awaiting = interaction.state() == AutomatonState::AwaitingInitialPrompt;
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    interaction.apply(Event::DeadlineElapsed);
                }
                _ = sleep_until_opt(response_deadline) => {
                    interaction.apply(Event::ResponseTimerElapsed);
                }
                _ = tokio::time::sleep_until(nudge_at), if awaiting => {
                    if let Err(err) = self.send_command(transport, command).await {
                        interaction.apply(Event::TransportError(err.to_string()));
                        continue;
                    }
                    interaction.apply(Event::CommandSent);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    response_deadline =
                        Some(Instant::now() + remaining.saturating_sub(self.settings.response_buffer));
                }
                event = transport.next_event() => match event {
                    TransportEvent::Data(bytes) => {
                        deliver(interaction, observer, stdout.decode(&bytes));
                    }
                    TransportEvent::ErrorData(bytes) => {
                        deliver(interaction, observer, stderr.decode(&bytes));
                    }
                    TransportEvent::Closed => {
                        deliver(interaction, observer, stdout.flush());
                        deliver(interaction, observer, stderr.flush());
                        interaction.apply(Event::TransportClosed);
                    }
                    TransportEvent::Error(reason) => {
                        interaction.apply(Event::TransportError(reason));
                    }
                },
            }
        }
    }

    async fn send_command(
        &self,
        transport: &mut dyn ShellTransport,
        command: &ShellCommand,
    ) -> Result<(), ShellError> {
        transport.send(b"\n").await?;
        if command.kind.sends_command() {
            debug!("[shell] sending {:?}", command.text);
            transport.send(format!("{}\n", command.text).as_bytes()).await?;
        }
        Ok(())
    }
}

impl Default for RemoteShellAutomaton {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(interaction: &mut Interaction, observer: &mut Option<ChunkObserver<'_>>, chunk: String) {
    if chunk.is_empty() {
        return;
    }
    if let Some(observer) = observer.as_mut() {
        observer(&chunk);
    }
    interaction.apply(Event::Chunk(chunk));
}

/// Decodes one output stream, holding back a character split across reads.
/// Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        // Incomplete sequence at the end: wait for the next read.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        text
    }

    fn flush(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

fn finish(interaction: Interaction, started: Instant) -> ShellOutcome {
    interaction.into_outcome(started.elapsed())
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
