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

//! Native reference backend.
//!
//! Serves the AMI for a single host: node facts from procfs, desired state as
//! JSON records under a state directory, service logs from plain files, and
//! remote commands through the SSH session bridge.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::ami::{
    Ami, AmiError, AppStats, Application, CommandOptions, Configuration, LogStream, NodeInfo,
    NodeStats, Pipe, Result, Secret,
};
use crate::config::NativeConfig;
use crate::dispatch::BackendDispatcher;

pub mod logs;
pub mod node;
pub mod state;

pub use state::{AppRecord, StateStore};

/// Single node backend.
#[derive(Debug)]
pub struct NativeAmi {
    node_name: String,
    proc_root: PathBuf,
    store: StateStore,
    log_dir: PathBuf,
    dispatcher: BackendDispatcher,
}

impl NativeAmi {
    pub fn new(config: &NativeConfig) -> Self {
        Self::with_proc_root(config, node::PROC_ROOT)
    }

    /// Backend reading node facts, the hostname and service liveness from
    /// the procfs mounted at `proc_root`.
    pub fn with_proc_root(config: &NativeConfig, proc_root: impl Into<PathBuf>) -> Self {
        let proc_root = proc_root.into();
        let node_name = config
            .node_name
            .clone()
            .or_else(|| node::hostname(&proc_root))
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            node_name,
            store: StateStore::new(&config.state_dir, &proc_root),
            proc_root,
            log_dir: config.log_dir.clone(),
            dispatcher: BackendDispatcher::with_native(),
        }
    }

    /// Replace the remote command dispatch table.
    pub fn with_dispatcher(mut self, dispatcher: BackendDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    fn log_path(&self, namespace: &str, service: &str) -> PathBuf {
        self.log_dir.join(namespace).join(format!("{service}.log"))
    }
}

/// Namespaces and names become path segments.
fn check_segment(what: &str, value: &str) -> std::result::Result<(), io::Error> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid {what} {value:?}"),
        ));
    }
    Ok(())
}

#[async_trait]
impl Ami for NativeAmi {
    fn master_node_name(&self) -> String {
        self.node_name.clone()
    }

    async fn collect_node_info(&self) -> Result<NodeInfo> {
        let labels = self
            .store
            .load_labels()
            .await
            .map_err(|e| AmiError::collection("node info", e))?;
        node::collect_info(&self.proc_root, &self.node_name, labels)
            .await
            .map_err(|e| AmiError::collection("node info", e))
    }

    async fn collect_node_stats(&self) -> Result<NodeStats> {
        node::collect_stats(&self.proc_root)
            .await
            .map_err(|e| AmiError::collection("node stats", e))
    }

    async fn apply_app(
        &self,
        namespace: &str,
        app: &Application,
        configs: &HashMap<String, Configuration>,
        secrets: &HashMap<String, Secret>,
    ) -> Result<()> {
        check_segment("namespace", namespace)
            .and_then(|_| check_segment("application name", &app.name))
            .map_err(|e| AmiError::apply(namespace, &app.name, e))?;

        let record = AppRecord::new(app, configs, secrets);
        self.store
            .save_app(namespace, &record)
            .await
            .map_err(|e| AmiError::apply(namespace, &app.name, e))?;
        info!(namespace, app = %app.name, version = %app.version, "Applied application");
        Ok(())
    }

    async fn delete_app(&self, namespace: &str, name: &str) -> Result<()> {
        check_segment("namespace", namespace)
            .and_then(|_| check_segment("application name", name))
            .map_err(|e| AmiError::apply(namespace, name, e))?;

        let removed = self
            .store
            .remove_app(namespace, name)
            .await
            .map_err(|e| AmiError::apply(namespace, name, e))?;
        if !removed {
            return Err(AmiError::NotFound {
                kind: "application",
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        info!(namespace, app = name, "Deleted application");
        Ok(())
    }

    async fn stats_apps(&self, namespace: &str) -> Result<Vec<AppStats>> {
        check_segment("namespace", namespace)
            .map_err(|e| AmiError::collection("application stats", e))?;

        let records = self
            .store
            .list_apps(namespace)
            .await
            .map_err(|e| AmiError::collection("application stats", e))?;

        let mut stats = Vec::with_capacity(records.len());
        for record in records {
            let mut services = Vec::with_capacity(record.app.services.len());
            for service in &record.app.services {
                let svc = self
                    .store
                    .service_stats(namespace, &service.name)
                    .await
                    .map_err(|e| AmiError::collection("application stats", e))?;
                services.push(svc);
            }
            stats.push(AppStats::from_services(
                &record.app.name,
                &record.app.version,
                services,
            ));
        }
        debug!(namespace, count = stats.len(), "Collected application stats");
        Ok(stats)
    }

    async fn fetch_log(
        &self,
        namespace: &str,
        service: &str,
        tail_lines: Option<u64>,
        since_seconds: Option<u64>,
    ) -> Result<LogStream> {
        let not_found = || AmiError::NotFound {
            kind: "log",
            namespace: namespace.to_string(),
            name: service.to_string(),
        };
        if check_segment("namespace", namespace).is_err()
            || check_segment("service", service).is_err()
        {
            return Err(not_found());
        }

        let path = self.log_path(namespace, service);
        match logs::open_log(&path, tail_lines, since_seconds).await {
            Ok(stream) => Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(AmiError::collection("service log", e)),
        }
    }

    async fn remote_command(&self, options: &CommandOptions, pipe: &mut Pipe) -> Result<()> {
        self.dispatcher.dispatch(options, pipe).await
    }

    async fn update_node_labels(
        &self,
        node: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        if node != self.node_name {
            return Err(AmiError::update(
                node,
                format!("unknown node, this backend serves {}", self.node_name),
            ));
        }
        let merged = self
            .store
            .merge_labels(labels)
            .await
            .map_err(|e| AmiError::update(node, e))?;
        info!(node, labels = merged.len(), "Updated node labels");
        Ok(())
    }
}

