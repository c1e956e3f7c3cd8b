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

//! Abstract model interface (AMI) between workload management logic and the
//! backends that run workloads.
//!
//! [`Ami`] is the capability contract. [`native::NativeAmi`] implements it
//! for a single host and serves remote commands through
//! [`ssh::NativeSessionBridge`], an interactive SSH shell bridged to a
//! caller-supplied [`Pipe`].

pub mod ami;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod native;
pub mod ssh;
pub mod terminal;
pub mod utils;

pub use crate::ami::{
    Ami, AmiError, AppStats, AppStatus, Application, BackendKind, CommandOptions, Configuration,
    HostKeyPolicy, KubeDebugOptions, LogStream, NativeDebugOptions, NodeInfo, NodeStats, Pipe,
    Secret, Service, ServiceStats, SessionStep,
};
pub use config::AmiConfig;
pub use dispatch::{BackendDispatcher, RemoteCommander};
pub use native::NativeAmi;
pub use ssh::{NativeSessionBridge, SshClientTransport};
