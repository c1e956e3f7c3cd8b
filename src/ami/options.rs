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

//! Backend selection options for remote commands.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::error::AmiError;

/// Kind of runtime a remote command is routed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native process supervisor reachable over SSH.
    #[default]
    Native,
    /// Container orchestrator exec API.
    Kube,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => f.write_str("native"),
            BackendKind::Kube => f.write_str("kube"),
        }
    }
}

/// Options of a single remote command, tagged by backend kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommandOptions {
    Native(NativeDebugOptions),
    Kube(KubeDebugOptions),
}

impl CommandOptions {
    /// Backend kind these options are meant for.
    pub fn kind(&self) -> BackendKind {
        match self {
            CommandOptions::Native(_) => BackendKind::Native,
            CommandOptions::Kube(_) => BackendKind::Kube,
        }
    }

    /// Parse options received as JSON, e.g. from a cloud debug request.
    ///
    /// An unknown `kind` is a configuration error, not a parse panic.
    pub fn from_json(raw: &str) -> Result<Self, AmiError> {
        serde_json::from_str(raw)
            .map_err(|e| AmiError::Configuration(format!("invalid remote command options: {e}")))
    }
}

/// Connection parameters for the native SSH backend.
///
/// Values are not validated beyond a non-empty address; a bad port or bad
/// credentials fail when dialing.
#[derive(Clone, Serialize, Deserialize)]
pub struct NativeDebugOptions {
    pub address: String,
    pub port: String,
    pub username: String,
    pub password: Zeroizing<String>,
    #[serde(default)]
    pub host_key: HostKeyPolicy,
}

impl NativeDebugOptions {
    /// Options with the default (ignoring) host key policy.
    pub fn new(
        address: impl Into<String>,
        port: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            port: port.into(),
            username: username.into(),
            password: Zeroizing::new(password.into()),
            host_key: HostKeyPolicy::default(),
        }
    }

    /// Replace the host key policy.
    pub fn with_host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    /// `host:port` as used in log lines and errors.
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Debug for NativeDebugOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDebugOptions")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host_key", &self.host_key)
            .finish()
    }
}

/// How the native backend treats the server's host key.
///
/// `Ignore` accepts any key, matching the edge agent's historical behaviour.
/// It is kept as the default but every connection using it logs a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    #[default]
    Ignore,
    /// Check against `~/.ssh/known_hosts`.
    KnownHosts,
    /// Check against a specific known_hosts file.
    KnownHostsFile { path: PathBuf },
    /// Accept exactly this base64 encoded public key.
    PublicKey { key: String },
}

/// Target of a container exec session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeDebugOptions {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
}
