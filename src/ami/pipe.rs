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

//! Caller-owned stream pair carrying an interactive session.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// Readable end of a [`Pipe`]: keystrokes headed for the remote shell.
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of a [`Pipe`]: terminal output coming back from the shell.
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The two stream ends of an interactive session.
///
/// A pipe is lent to [`Ami::remote_command`](super::Ami::remote_command) by
/// mutable reference. Backends read and write it but never shut it down;
/// closing either end is up to whoever created it.
pub struct Pipe {
    /// Bytes read here are forwarded to the remote standard input.
    pub input: PipeReader,
    /// Remote standard output and standard error are both written here.
    pub output: PipeWriter,
}

impl Pipe {
    pub fn new(
        input: impl AsyncRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    /// Pipe bound to this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe").finish_non_exhaustive()
    }
}
