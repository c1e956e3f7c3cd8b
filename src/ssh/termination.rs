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

//! How an interactive session ended, and what the bridge does about it.
//!
//! Users leave a debug shell by typing `exit`, closing their terminal or
//! dropping the connection. The transport reports most of these as abnormal
//! completions (non-zero status, missing exit status, broken stream). None of
//! them is a failure of the bridge, so they are logged and swallowed here
//! instead of being returned to the caller.

use std::fmt;

use super::error::TransportError;

/// Completion status of a shell that was successfully started.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The remote shell exited with this status.
    Exited(u32),
    /// The remote shell was killed by a signal.
    Signaled(String),
    /// The channel closed without an exit status.
    ExitStatusMissing,
    /// The caller cancelled the session.
    Cancelled,
    /// Forwarding between the pipe and the channel broke.
    Broken(TransportError),
}

impl SessionOutcome {
    /// A shell that exited with status zero.
    pub fn is_clean(&self) -> bool {
        matches!(self, SessionOutcome::Exited(0) | SessionOutcome::Cancelled)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Exited(code) => write!(f, "exited with status {code}"),
            SessionOutcome::Signaled(signal) => write!(f, "killed by signal {signal}"),
            SessionOutcome::ExitStatusMissing => f.write_str("closed without exit status"),
            SessionOutcome::Cancelled => f.write_str("cancelled"),
            SessionOutcome::Broken(err) => write!(f, "stream broken: {err}"),
        }
    }
}

/// Normal termination is not failure: log the outcome of a started shell
/// and discard it.
pub fn absorb_normal_termination(target: &str, outcome: SessionOutcome) {
    if outcome.is_clean() {
        tracing::info!(target_host = %target, outcome = %outcome, "Remote session ended");
    } else {
        tracing::warn!(
            target_host = %target,
            outcome = %outcome,
            "Remote session logged out with exception"
        );
    }
}
