use async_trait::async_trait;
use thiserror::Error;

use super::SshTarget;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication rejected for user {0}")]
    Authentication(String),
    #[error("shell channel error: {0}")]
    Channel(String),
    #[error("no interactive shell is open")]
    NoShell,
}

/// One event read from an open shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Data(Vec<u8>),
    /// Bytes from the extended (stderr) stream.
    ErrorData(Vec<u8>),
    Closed,
    Error(String),
}

/// Opens authenticated sessions to a target.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn ShellTransport>, ShellError>;
}

/// An authenticated session that can host one interactive shell.
#[async_trait]
pub trait ShellTransport: Send {
    async fn open_shell(&mut self) -> Result<(), ShellError>;

    async fn send(&mut self, data: &[u8]) -> Result<(), ShellError>;

    /// Waits for the next event. Must be cancel safe: the automaton drops
    /// this future whenever a timer fires first.
    async fn next_event(&mut self) -> TransportEvent;

    /// Closes the shell and the session. Called exactly once per session.
    async fn close(&mut self);
}
