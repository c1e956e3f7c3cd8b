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

//! Errors raised by SSH transports while a session is being set up or pumped.

use std::io;

/// Failure reported by a [`SessionTransport`](super::transport::SessionTransport)
/// or one of its connections and channels.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The port in the connection options is not a valid TCP port.
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    /// The host could not be resolved or reached.
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    /// Error reported by the SSH protocol implementation.
    #[error("ssh protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// The server refused the supplied credentials.
    #[error("authentication rejected for user {user}")]
    AuthenticationRejected { user: String },

    /// The server host key did not satisfy the configured policy.
    #[error("server host key verification failed")]
    HostKeyRejected,

    /// A channel request (`pty-req`, `shell`, ...) was answered with a failure.
    #[error("server rejected {0} request")]
    RequestRejected(&'static str),

    /// The channel went away while a reply was still outstanding.
    #[error("channel closed before the {0} request was answered")]
    ChannelClosed(&'static str),
}
