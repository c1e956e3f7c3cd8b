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

//! The abstract model interface every workload backend implements.
//!
//! Callers such as reconciliation loops, stats collectors and debug tooling
//! program against [`Ami`] only. Switching backends must not change what they
//! observe:
//!
//! - every call completes (or fails) before it returns; `remote_command`
//!   stays pending for the whole interactive session,
//! - collection calls return everything or an error, never a partial result,
//! - `apply_app` converges: applying the same application again succeeds and leaves
//!   the same state,
//! - `update_node_labels` merges the supplied keys into the existing labels,
//! - `delete_app` on an absent application returns [`AmiError::NotFound`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

pub mod error;
pub mod options;
pub mod pipe;
pub mod types;

pub use error::{AmiError, BoxError, Result, SessionStep};
pub use options::{BackendKind, CommandOptions, HostKeyPolicy, KubeDebugOptions, NativeDebugOptions};
pub use pipe::Pipe;
pub use types::{
    AppStats, AppStatus, Application, Configuration, LogStream, NodeInfo, NodeStats, Secret,
    Service, ServiceStats,
};

/// Capability contract of a workload backend.
#[async_trait]
pub trait Ami: Send + Sync {
    /// Name of the coordinating node. Single-node backends return their own
    /// fixed identity.
    fn master_node_name(&self) -> String;

    /// Identity, version and capacity of the node.
    async fn collect_node_info(&self) -> Result<NodeInfo>;

    /// Current resource utilisation of the node.
    async fn collect_node_stats(&self) -> Result<NodeStats>;

    /// Record and apply the desired state of `app` in `namespace`.
    async fn apply_app(
        &self,
        namespace: &str,
        app: &Application,
        configs: &HashMap<String, Configuration>,
        secrets: &HashMap<String, Secret>,
    ) -> Result<()>;

    /// Remove an application.
    async fn delete_app(&self, namespace: &str, name: &str) -> Result<()>;

    /// Status of every application in `namespace`, ordered by name.
    async fn stats_apps(&self, namespace: &str) -> Result<Vec<AppStats>>;

    /// Open the log of `service`. `tail_lines` keeps only the last lines,
    /// `since_seconds` restricts output to the recent window.
    async fn fetch_log(
        &self,
        namespace: &str,
        service: &str,
        tail_lines: Option<u64>,
        since_seconds: Option<u64>,
    ) -> Result<LogStream>;

    /// Run an interactive remote shell over `pipe` until the session ends.
    ///
    /// A session that ends, even abnormally, is `Ok(())`. Only failures to
    /// set the session up are returned.
    async fn remote_command(&self, options: &CommandOptions, pipe: &mut Pipe) -> Result<()>;

    /// Merge `labels` into the labels of `node`.
    async fn update_node_labels(&self, node: &str, labels: &BTreeMap<String, String>)
        -> Result<()>;
}
