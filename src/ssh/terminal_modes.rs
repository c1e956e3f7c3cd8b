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

//! Terminal negotiated for native debug sessions.
//!
//! The values are fixed for the life of a session; there is no window-change
//! support.

use russh::Pty;

/// Parameters of a pseudo-terminal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalProfile {
    /// `TERM` value announced to the server.
    pub term: &'static str,
    /// Height in character rows.
    pub rows: u32,
    /// Width in character columns.
    pub cols: u32,
    /// Input and output line speed in baud.
    pub line_speed: u32,
    /// Whether the remote terminal echoes input.
    pub echo: bool,
}

/// Terminal used by every native debug shell: xterm, 80 rows by 160
/// columns, 14.4k baud, echo on.
pub const NATIVE_TERMINAL: TerminalProfile = TerminalProfile {
    term: "xterm",
    rows: 80,
    cols: 160,
    line_speed: 14400,
    echo: true,
};

impl TerminalProfile {
    /// Encoded terminal modes for the `pty-req` message.
    pub fn modes(&self) -> Vec<(Pty, u32)> {
        vec![
            (Pty::ECHO, u32::from(self.echo)),
            (Pty::TTY_OP_ISPEED, self.line_speed),
            (Pty::TTY_OP_OSPEED, self.line_speed),
        ]
    }
}

impl Default for TerminalProfile {
    fn default() -> Self {
        NATIVE_TERMINAL
    }
}
