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

//! Durable desired state of the native backend.
//!
//! Layout under the state directory:
//!
//! ```text
//! apps/<namespace>/<name>.json   application record
//! run/<namespace>/<service>.pid  pid of a running service, written by the supervisor
//! labels.json                    node labels
//! ```
//!
//! Records are replaced through a uniquely named temporary file in the same
//! directory, so concurrent writers never see each other's partial output.
//! Record and label files are created owner-only since records carry secrets.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::ami::{AppStatus, Application, Configuration, Secret, ServiceStats};

/// Everything recorded for one applied application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub app: Application,
    #[serde(default)]
    pub configs: BTreeMap<String, Configuration>,
    #[serde(default)]
    pub secrets: BTreeMap<String, Secret>,
}

impl AppRecord {
    pub fn new(
        app: &Application,
        configs: &HashMap<String, Configuration>,
        secrets: &HashMap<String, Secret>,
    ) -> Self {
        Self {
            app: app.clone(),
            configs: configs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            secrets: secrets.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// File-backed store of application records and node labels.
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    proc_root: PathBuf,
    labels_lock: Mutex<()>,
}

impl StateStore {
    /// Store under `root`. Service liveness is checked against the process
    /// directories under `proc_root`.
    pub fn new(root: impl Into<PathBuf>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            proc_root: proc_root.into(),
            labels_lock: Mutex::new(()),
        }
    }

    fn app_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join("apps")
            .join(namespace)
            .join(format!("{name}.json"))
    }

    fn pid_path(&self, namespace: &str, service: &str) -> PathBuf {
        self.root
            .join("run")
            .join(namespace)
            .join(format!("{service}.pid"))
    }

    fn labels_path(&self) -> PathBuf {
        self.root.join("labels.json")
    }

    /// Record `record`. Writing an identical record again leaves the same file.
    pub async fn save_app(&self, namespace: &str, record: &AppRecord) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.app_path(namespace, &record.app.name), bytes).await
    }

    /// Remove a record. `Ok(false)` when there was nothing to remove.
    pub async fn remove_app(&self, namespace: &str, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.app_path(namespace, name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// All records of `namespace`, sorted by application name.
    pub async fn list_apps(&self, namespace: &str) -> io::Result<Vec<AppRecord>> {
        let dir = self.root.join("apps").join(namespace);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            let record: AppRecord = serde_json::from_slice(&bytes).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", path.display()))
            })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.app.name.cmp(&b.app.name));
        Ok(records)
    }

    /// Status of a service from its pid file.
    pub async fn service_stats(&self, namespace: &str, service: &str) -> io::Result<ServiceStats> {
        let (status, cause) = match fs::read_to_string(self.pid_path(namespace, service)).await {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) if self.process_alive(pid).await => (AppStatus::Running, None),
                Ok(pid) => (AppStatus::Failed, Some(format!("process {pid} is not running"))),
                Err(_) => (AppStatus::Unknown, Some("unreadable pid file".to_string())),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (AppStatus::Pending, None),
            Err(e) => return Err(e),
        };
        Ok(ServiceStats {
            name: service.to_string(),
            status,
            cause,
        })
    }

    pub async fn load_labels(&self) -> io::Result<BTreeMap<String, String>> {
        match fs::read(self.labels_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Merge `labels` into the stored labels and return the result. Keys not
    /// mentioned in `labels` keep their values.
    pub async fn merge_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> io::Result<BTreeMap<String, String>> {
        let _guard = self.labels_lock.lock().await;
        let mut merged = self.load_labels().await?;
        merged.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        let bytes = serde_json::to_vec_pretty(&merged)?;
        write_atomic(&self.labels_path(), bytes).await?;
        Ok(merged)
    }

    async fn process_alive(&self, pid: u32) -> bool {
        fs::metadata(self.proc_root.join(pid.to_string()))
            .await
            .is_ok()
    }
}

/// Write `bytes` to a fresh temporary file next to `path` and rename it over
/// the target. The temporary file is created with mode 0600 and removed if
/// anything fails before the rename.
async fn write_atomic(path: &Path, bytes: Vec<u8>) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".ami-")
            .suffix(".tmp")
            .tempfile_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str) -> Application {
        Application {
            name: name.to_string(),
            version: "1".to_string(),
            ..Application::default()
        }
    }

    #[tokio::test]
    async fn test_save_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "/proc");
        let empty = HashMap::new();

        for name in ["zeta", "alpha"] {
            store
                .save_app("default", &AppRecord::new(&app(name), &empty, &HashMap::new()))
                .await
                .unwrap();
        }

        let names: Vec<_> = store
            .list_apps("default")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.app.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert!(store.remove_app("default", "alpha").await.unwrap());
        assert!(!store.remove_app("default", "alpha").await.unwrap());
        assert!(store.list_apps("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identical_save_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "/proc");
        let mut configs = HashMap::new();
        for key in ["b", "a", "c"] {
            configs.insert(
                key.to_string(),
                Configuration {
                    name: key.to_string(),
                    ..Configuration::default()
                },
            );
        }
        let record = AppRecord::new(&app("web"), &configs, &HashMap::new());

        store.save_app("default", &record).await.unwrap();
        let first = std::fs::read(dir.path().join("apps/default/web.json")).unwrap();
        store.save_app("default", &record).await.unwrap();
        let second = std::fs::read(dir.path().join("apps/default/web.json")).unwrap();

        assert_eq!(first, second);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("apps/default"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("web.json")]);
    }

    #[tokio::test]
    async fn test_merge_labels_keeps_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "/proc");

        let first = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let second = BTreeMap::from([("b".to_string(), "2".to_string())]);
        store.merge_labels(&first).await.unwrap();
        let merged = store.merge_labels(&second).await.unwrap();

        assert_eq!(merged.get("a").map(String::as_str), Some("1"));
        assert_eq!(merged.get("b").map(String::as_str), Some("2"));
        assert_eq!(store.load_labels().await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_service_stats_from_pid_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "/proc");
        let run = dir.path().join("run/default");
        std::fs::create_dir_all(&run).unwrap();
        std::fs::write(run.join("garbled.pid"), "not-a-pid").unwrap();

        let pending = store.service_stats("default", "absent").await.unwrap();
        assert_eq!(pending.status, AppStatus::Pending);

        let unknown = store.service_stats("default", "garbled").await.unwrap();
        assert_eq!(unknown.status, AppStatus::Unknown);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_service_liveness_on_linux() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "/proc");
        let run = dir.path().join("run/default");
        std::fs::create_dir_all(&run).unwrap();
        std::fs::write(run.join("self.pid"), std::process::id().to_string()).unwrap();
        std::fs::write(run.join("gone.pid"), "4294967295").unwrap();

        let alive = store.service_stats("default", "self").await.unwrap();
        assert_eq!(alive.status, AppStatus::Running);

        let gone = store.service_stats("default", "gone").await.unwrap();
        assert_eq!(gone.status, AppStatus::Failed);
        assert!(gone.cause.unwrap().contains("4294967295"));
    }

    #[tokio::test]
    async fn test_service_liveness_uses_proc_root() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        std::fs::create_dir_all(proc_root.join("4242")).unwrap();
        let store = StateStore::new(dir.path().join("state"), &proc_root);
        let run = dir.path().join("state/run/default");
        std::fs::create_dir_all(&run).unwrap();
        std::fs::write(run.join("alive.pid"), "4242\n").unwrap();
        std::fs::write(run.join("dead.pid"), "4243").unwrap();

        let alive = store.service_stats("default", "alive").await.unwrap();
        assert_eq!(alive.status, AppStatus::Running);

        let dead = store.service_stats("default", "dead").await.unwrap();
        assert_eq!(dead.status, AppStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(StateStore::new(dir.path(), "/proc"));
        let record = AppRecord::new(&app("web"), &HashMap::new(), &HashMap::new());

        for _ in 0..10 {
            let mut tasks = Vec::new();
            for _ in 0..16 {
                let store = store.clone();
                let record = record.clone();
                tasks.push(tokio::spawn(async move {
                    store.save_app("default", &record).await
                }));
            }
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        }

        let records = store.list_apps("default").await.unwrap();
        assert_eq!(records, vec![record]);
        assert_eq!(std::fs::read_dir(dir.path().join("apps/default")).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_records_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), "/proc");
        store
            .save_app("default", &AppRecord::new(&app("web"), &HashMap::new(), &HashMap::new()))
            .await
            .unwrap();
        store
            .merge_labels(&BTreeMap::from([("a".to_string(), "1".to_string())]))
            .await
            .unwrap();

        for file in ["apps/default/web.json", "labels.json"] {
            let mode = std::fs::metadata(dir.path().join(file))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "{file}");
        }
    }
}
