use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::debug;
use russh::{ChannelMsg, Disconnect, client};
use russh_keys::key;

use super::{
    SshTarget,
    transport::{ShellConnector, ShellError, ShellTransport, TransportEvent},
};

const TERMINAL: &str = "vt100";
const TERMINAL_COLUMNS: u32 = 200;
const TERMINAL_ROWS: u32 = 48;

/// VOS appliances present self-generated host keys; they are accepted as-is.
struct AcceptHostKey;

#[async_trait]
impl client::Handler for AcceptHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Password-authenticated SSH sessions via `russh`.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn ShellTransport>, ShellError> {
        debug!("[shell] connecting to {}:{}", target.host, target.port);
        let mut handle = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            AcceptHostKey,
        )
        .await
        .map_err(|e| ShellError::Transport(e.to_string()))?;

        let authenticated = handle
            .authenticate_password(target.username.clone(), target.password.as_str())
            .await
            .map_err(|e| ShellError::Transport(e.to_string()))?;
        if !authenticated {
            if let Err(err) = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await
            {
                debug!("[shell] disconnect after failed authentication: {}", err);
            }
            return Err(ShellError::Authentication(target.username.clone()));
        }

        Ok(Box::new(SshTransport {
            handle,
            channel: None,
        }))
    }
}

struct SshTransport {
    handle: client::Handle<AcceptHostKey>,
    channel: Option<russh::Channel<client::Msg>>,
}

#[async_trait]
impl ShellTransport for SshTransport {
    async fn open_shell(&mut self) -> Result<(), ShellError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ShellError::Channel(e.to_string()))?;
        channel
            .request_pty(false, TERMINAL, TERMINAL_COLUMNS, TERMINAL_ROWS, 0, 0, &[])
            .await
            .map_err(|e| ShellError::Channel(e.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| ShellError::Channel(e.to_string()))?;
        self.channel = Some(channel);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ShellError> {
        let channel = self.channel.as_ref().ok_or(ShellError::NoShell)?;
        channel
            .data(data)
            .await
            .map_err(|e| ShellError::Channel(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(channel) = self.channel.as_mut() else {
            return TransportEvent::Closed;
        };
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => return TransportEvent::Data(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return TransportEvent::ErrorData(data.to_vec());
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return TransportEvent::Closed;
                }
                Some(other) => debug!("[shell] ignoring channel message {:?}", other),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.eof().await {
                debug!("[shell] eof on close failed: {}", err);
            }
            if let Err(err) = channel.close().await {
                debug!("[shell] channel close failed: {}", err);
            }
        }
        if let Err(err) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("[shell] disconnect failed: {}", err);
        }
    }
}
