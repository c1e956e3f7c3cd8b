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

//! Payloads exchanged through the AMI.
//!
//! The core only fixes the fields every backend needs to route and report on
//! an object. Anything else a backend cares about travels in the flattened
//! `extra` maps untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncRead;

/// Node identity, version and capacity fields, keyed by field name.
pub type NodeInfo = BTreeMap<String, Value>;

/// Current resource utilisation fields, keyed by field name.
pub type NodeStats = BTreeMap<String, Value>;

/// Lazily read log bytes. Dropping the stream closes the underlying source.
pub type LogStream = Box<dyn AsyncRead + Send + Unpin>;

/// Desired state of one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One service of an [`Application`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Named configuration referenced by applications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Named secret referenced by applications.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Coarse lifecycle status of an application or service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStatus {
    #[default]
    Pending,
    Running,
    Failed,
    Unknown,
}

/// Status record of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub name: String,
    pub status: AppStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Status record of one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppStats {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub status: AppStatus,
    #[serde(default)]
    pub services: Vec<ServiceStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppStats {
    /// Aggregate per-service records into an application status: any failed
    /// service fails the app, all running means running, otherwise pending.
    pub fn from_services(name: &str, version: &str, services: Vec<ServiceStats>) -> Self {
        let status = if services.iter().any(|s| s.status == AppStatus::Failed) {
            AppStatus::Failed
        } else if !services.is_empty() && services.iter().all(|s| s.status == AppStatus::Running)
        {
            AppStatus::Running
        } else {
            AppStatus::Pending
        };
        let cause = services
            .iter()
            .find(|s| s.status == AppStatus::Failed)
            .and_then(|s| s.cause.as_ref().map(|c| format!("{}: {c}", s.name)));
        Self {
            name: name.to_string(),
            version: version.to_string(),
            status,
            services,
            cause,
            extra: Map::new(),
        }
    }
}
