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

//! Native remote command support: an interactive shell over SSH.

pub mod bridge;
pub mod client;
pub mod error;
pub mod terminal_modes;
pub mod termination;
pub mod transport;

pub use bridge::{NativeSessionBridge, SessionState};
pub use client::SshClientTransport;
pub use error::TransportError;
pub use terminal_modes::{TerminalProfile, NATIVE_TERMINAL};
pub use termination::SessionOutcome;
pub use transport::{ChannelEvent, SessionChannel, SessionConnection, SessionTransport};
