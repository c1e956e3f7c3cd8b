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

//! Agent configuration file.
//!
//! ```yaml
//! backend: native
//! native:
//!   node_name: edge-01
//!   state_dir: /var/lib/ami/state
//!   log_dir: /var/lib/ami/log
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::ami::{Ami, BackendKind};
use crate::native::NativeAmi;

/// Top level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiConfig {
    /// Backend serving the AMI in this process.
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub native: NativeConfig,
}

/// Settings of the native backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Node identity; the kernel hostname when unset.
    #[serde(default)]
    pub node_name: Option<String>,
    /// Where desired state and labels are recorded.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Root of the per-namespace service log files.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/ami/state")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/lib/ami/log")
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            node_name: None,
            state_dir: default_state_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl AmiConfig {
    /// Default location: `$XDG_CONFIG_HOME/ami/config.yaml`, falling back to
    /// `~/.config/ami/config.yaml`.
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "ami")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/ami/config.yaml"))
    }

    /// Load configuration from a file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        if !expanded_path.exists() {
            tracing::debug!(
                "Config file not found at {:?}, using defaults",
                expanded_path
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&expanded_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to read configuration file at {}",
                    expanded_path.display()
                )
            })?;

        Self::from_yaml(&content).with_context(|| {
            format!(
                "Failed to parse YAML configuration file at {}",
                expanded_path.display()
            )
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: AmiConfig = serde_yaml::from_str(content)?;
        config.native.state_dir = expand_tilde(&config.native.state_dir);
        config.native.log_dir = expand_tilde(&config.native.log_dir);
        Ok(config)
    }

    /// Instantiate the configured backend.
    pub fn build_backend(&self) -> Result<Arc<dyn Ami>> {
        match self.backend {
            BackendKind::Native => Ok(Arc::new(NativeAmi::new(&self.native))),
            BackendKind::Kube => anyhow::bail!(
                "the kube backend is not available in this build; use `backend: native`"
            ),
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(dirs) = directories::BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_fields_missing() {
        let config = AmiConfig::from_yaml("backend: native\n").unwrap();
        assert_eq!(config.backend, BackendKind::Native);
        assert_eq!(config.native, NativeConfig::default());
    }

    #[test]
    fn test_parse_native_section() {
        let config = AmiConfig::from_yaml(
            r#"
backend: native
native:
  node_name: edge-01
  state_dir: /srv/ami/state
  log_dir: /srv/ami/log
"#,
        )
        .unwrap();
        assert_eq!(config.native.node_name.as_deref(), Some("edge-01"));
        assert_eq!(config.native.state_dir, PathBuf::from("/srv/ami/state"));
        assert_eq!(config.native.log_dir, PathBuf::from("/srv/ami/log"));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(AmiConfig::from_yaml("backend: vm\n").is_err());
    }

    #[test]
    fn test_kube_backend_not_buildable() {
        let config = AmiConfig {
            backend: BackendKind::Kube,
            ..AmiConfig::default()
        };
        assert!(config.build_backend().is_err());
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(
            expand_tilde(Path::new("/etc/ami/config.yaml")),
            PathBuf::from("/etc/ami/config.yaml")
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AmiConfig::load(&dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config, AmiConfig::default());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "native:\n  node_name: gw\n").unwrap();
        let config = AmiConfig::load(&path).await.unwrap();
        assert_eq!(config.native.node_name.as_deref(), Some("gw"));
    }
}
