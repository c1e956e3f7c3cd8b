// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! russh implementation of the session transport.
//!
//! Connections authenticate with a password only. Host keys are checked
//! according to the [`HostKeyPolicy`] carried in the options.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Config, Handle, Handler, Msg};
use russh::{Channel, ChannelMsg, Disconnect};

use super::error::TransportError;
use super::terminal_modes::TerminalProfile;
use super::transport::{ChannelEvent, SessionChannel, SessionConnection, SessionTransport};
use crate::ami::{HostKeyPolicy, NativeDebugOptions};

/// Dials SSH servers with russh.
#[derive(Clone)]
pub struct SshClientTransport {
    config: Arc<Config>,
}

impl SshClientTransport {
    /// Transport with a non-default [`russh::client::Config`].
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshClientTransport {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl Debug for SshClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClientTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionTransport for SshClientTransport {
    type Connection = SshConnection;

    async fn connect(&self, options: &NativeDebugOptions) -> Result<SshConnection, TransportError> {
        let port: u16 = options
            .port
            .trim()
            .parse()
            .map_err(|_| TransportError::InvalidPort(options.port.clone()))?;

        if options.host_key == HostKeyPolicy::Ignore {
            tracing::warn!(
                target_host = %options.target(),
                "Host key verification disabled for this session"
            );
        }

        let handler = ClientHandler::new(options.address.clone(), port, options.host_key.clone());
        let mut handle =
            russh::client::connect(self.config.clone(), (options.address.as_str(), port), handler)
                .await?;

        let auth = handle
            .authenticate_password(options.username.as_str(), options.password.as_str())
            .await?;
        if !auth.success() {
            return Err(TransportError::AuthenticationRejected {
                user: options.username.clone(),
            });
        }

        tracing::debug!(target_host = %options.target(), "SSH connection authenticated");
        Ok(SshConnection { handle })
    }
}

/// An authenticated russh connection.
pub struct SshConnection {
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl SessionConnection for SshConnection {
    type Channel = SshChannel;

    async fn open_session(&mut self) -> Result<SshChannel, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        Ok(SshChannel {
            channel,
            backlog: VecDeque::new(),
        })
    }

    async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!("Disconnect after session end failed: {e}");
        }
    }
}

/// A russh session channel.
pub struct SshChannel {
    channel: Channel<Msg>,
    /// Messages that arrived while waiting for a request reply.
    backlog: VecDeque<ChannelMsg>,
}

impl SshChannel {
    /// Wait for the answer to a `want_reply` request.
    async fn await_reply(&mut self, request: &'static str) -> Result<(), TransportError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => return Err(TransportError::RequestRejected(request)),
                Some(ChannelMsg::Close) | None => {
                    return Err(TransportError::ChannelClosed(request))
                }
                Some(other) => self.backlog.push_back(other),
            }
        }
    }
}

#[async_trait]
impl SessionChannel for SshChannel {
    async fn request_pty(&mut self, terminal: &TerminalProfile) -> Result<(), TransportError> {
        let modes = terminal.modes();
        self.channel
            .request_pty(
                true,
                terminal.term,
                terminal.cols,
                terminal.rows,
                0, // pixel width (0 means undefined)
                0, // pixel height (0 means undefined)
                &modes,
            )
            .await?;
        self.await_reply("pty-req").await
    }

    async fn request_shell(&mut self) -> Result<(), TransportError> {
        self.channel.request_shell(true).await?;
        self.await_reply("shell").await
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.channel.data(data).await?;
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<(), TransportError> {
        self.channel.eof().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let msg = match self.backlog.pop_front() {
                Some(msg) => msg,
                None => self.channel.wait().await?,
            };
            if let Some(event) = translate(msg) {
                return Some(event);
            }
        }
    }

    async fn close(self) {
        // Fails harmlessly when the server already closed the channel.
        if let Err(e) = self.channel.close().await {
            tracing::trace!("Closing session channel: {e}");
        }
    }
}

fn translate(msg: ChannelMsg) -> Option<ChannelEvent> {
    match msg {
        ChannelMsg::Data { data } => Some(ChannelEvent::Stdout(data.to_vec())),
        ChannelMsg::ExtendedData { data, ext: 1 } => Some(ChannelEvent::Stderr(data.to_vec())),
        ChannelMsg::ExitStatus { exit_status } => Some(ChannelEvent::ExitStatus(exit_status)),
        ChannelMsg::ExitSignal { signal_name, .. } => {
            Some(ChannelEvent::ExitSignal(format!("{signal_name:?}")))
        }
        ChannelMsg::Eof => Some(ChannelEvent::Eof),
        ChannelMsg::Close => Some(ChannelEvent::Closed),
        _ => None,
    }
}

/// SSH client handler for managing server key verification.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    port: u16,
    host_key: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(hostname: String, port: u16, host_key: HostKeyPolicy) -> Self {
        Self {
            hostname,
            port,
            host_key,
        }
    }
}

impl Handler for ClientHandler {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = match &self.host_key {
            HostKeyPolicy::Ignore => true,
            HostKeyPolicy::PublicKey { key } => {
                // Accept both bare base64 and `type base64 [comment]` lines.
                let encoded = key.split_whitespace().nth(1).unwrap_or(key.trim());
                let pk = russh::keys::parse_public_key_base64(encoded)
                    .map_err(|_| TransportError::HostKeyRejected)?;
                pk == *server_public_key
            }
            HostKeyPolicy::KnownHostsFile { path } => russh::keys::check_known_hosts_path(
                &self.hostname,
                self.port,
                server_public_key,
                path,
            )
            .map_err(|_| TransportError::HostKeyRejected)?,
            HostKeyPolicy::KnownHosts => {
                russh::keys::check_known_hosts(&self.hostname, self.port, server_public_key)
                    .map_err(|_| TransportError::HostKeyRejected)?
            }
        };

        if accepted {
            Ok(true)
        } else {
            Err(TransportError::HostKeyRejected)
        }
    }
}
