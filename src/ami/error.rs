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

//! Error taxonomy shared by every AMI backend.
//!
//! Remote command failures carry the step that failed so callers can tell a
//! dial problem from a rejected PTY request. A session that merely ended is
//! not an error and never reaches this type; see
//! [`crate::ssh::termination`].

use std::fmt;

use crate::ssh::TransportError;

/// Boxed error used where the underlying cause is backend specific.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for AMI operations.
pub type Result<T, E = AmiError> = std::result::Result<T, E>;

/// Setup step of a remote command session that can fail after the
/// connection has been established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    /// Opening the session channel on the connection.
    SessionOpen,
    /// Requesting the pseudo-terminal.
    PtyRequest,
    /// Starting the remote shell.
    ShellStart,
}

impl fmt::Display for SessionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStep::SessionOpen => "session-open",
            SessionStep::PtyRequest => "pty-request",
            SessionStep::ShellStart => "shell-start",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Ami`](super::Ami) operations.
///
/// No variant is ever retried by this crate; retry policy belongs to the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum AmiError {
    /// Dialing or authenticating against the remote host failed. Nothing was
    /// acquired, so nothing had to be released.
    #[error("failed to connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: TransportError,
    },

    /// A session setup step failed after the connection was up. Everything
    /// acquired before the step has been released by the time this is seen.
    #[error("remote session failed at {step}: {source}")]
    Session {
        step: SessionStep,
        #[source]
        source: TransportError,
    },

    /// Node or application status could not be collected.
    #[error("failed to collect {what}: {source}")]
    Collection {
        what: &'static str,
        #[source]
        source: BoxError,
    },

    /// Desired state could not be recorded or removed.
    #[error("failed to apply {namespace}/{name}: {source}")]
    Apply {
        namespace: String,
        name: String,
        #[source]
        source: BoxError,
    },

    /// The named object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Node labels could not be updated.
    #[error("failed to update labels of node {node}: {source}")]
    Update {
        node: String,
        #[source]
        source: BoxError,
    },

    /// The request names a backend or parameters this process cannot serve.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl AmiError {
    pub(crate) fn collection(what: &'static str, source: impl Into<BoxError>) -> Self {
        AmiError::Collection {
            what,
            source: source.into(),
        }
    }

    pub(crate) fn apply(namespace: &str, name: &str, source: impl Into<BoxError>) -> Self {
        AmiError::Apply {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn update(node: &str, source: impl Into<BoxError>) -> Self {
        AmiError::Update {
            node: node.to_string(),
            source: source.into(),
        }
    }

    /// Whether this error reports an absent object rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AmiError::NotFound { .. })
    }
}
