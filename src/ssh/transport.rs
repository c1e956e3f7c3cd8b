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

//! Seams between the session bridge and the SSH implementation.
//!
//! The bridge drives a connection through these traits only, so the
//! acquisition and release order can be exercised without a network. The
//! production implementation lives in [`super::client`].
//!
//! Release is explicit and consumes the value, so a connection or channel can
//! be closed at most once. If the owning future is dropped or unwinds, the
//! values are dropped in reverse declaration order, channel before connection.

use async_trait::async_trait;

use super::error::TransportError;
use super::terminal_modes::TerminalProfile;
use crate::ami::NativeDebugOptions;

/// Something arriving on a session channel after the shell has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes from the remote standard output.
    Stdout(Vec<u8>),
    /// Bytes from the remote standard error.
    Stderr(Vec<u8>),
    /// The remote process reported its exit code.
    ExitStatus(u32),
    /// The remote process was killed by a signal.
    ExitSignal(String),
    /// The remote side will send no more data.
    Eof,
    /// The channel has been closed by the remote side.
    Closed,
}

/// Dials remote hosts.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    type Connection: SessionConnection;

    /// Connect and authenticate with the password in `options`.
    async fn connect(&self, options: &NativeDebugOptions)
        -> Result<Self::Connection, TransportError>;
}

/// An authenticated connection.
#[async_trait]
pub trait SessionConnection: Send {
    type Channel: SessionChannel;

    /// Open one session channel.
    async fn open_session(&mut self) -> Result<Self::Channel, TransportError>;

    /// Disconnect. Errors are logged by the implementation; there is nothing
    /// left for the caller to do with them.
    async fn close(self);
}

/// A session channel on a [`SessionConnection`].
#[async_trait]
pub trait SessionChannel: Send {
    /// Request a pseudo-terminal and wait for the server's answer.
    async fn request_pty(&mut self, terminal: &TerminalProfile) -> Result<(), TransportError>;

    /// Start the login shell and wait for the server's answer.
    async fn request_shell(&mut self) -> Result<(), TransportError>;

    /// Forward bytes to the remote standard input.
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Signal end of input.
    async fn send_eof(&mut self) -> Result<(), TransportError>;

    /// Next event from the remote side; `None` once the channel is gone.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Close the channel.
    async fn close(self);
}
