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

//! Node facts read from procfs.
//!
//! Parsing is kept apart from reading so the parsers can be tested against
//! captured file contents.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde_json::{json, Value};
use tokio::fs;

use crate::ami::{NodeInfo, NodeStats};

pub const PROC_ROOT: &str = "/proc";

/// Load averages as found in `/proc/loadavg`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Memory figures in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memory {
    pub total: u64,
    pub available: u64,
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Parse `/proc/meminfo`. Values are reported in kB.
pub fn parse_meminfo(content: &str) -> io::Result<Memory> {
    let mut fields = BTreeMap::new();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(value) = rest.split_whitespace().next() else {
            continue;
        };
        if let Ok(kb) = value.parse::<u64>() {
            fields.insert(key.trim(), kb * 1024);
        }
    }

    let total = *fields
        .get("MemTotal")
        .ok_or_else(|| invalid("MemTotal missing from meminfo"))?;
    // Kernels before 3.14 have no MemAvailable.
    let available = match fields.get("MemAvailable") {
        Some(v) => *v,
        None => ["MemFree", "Buffers", "Cached"]
            .iter()
            .map(|k| fields.get(k).copied().unwrap_or(0))
            .sum(),
    };
    Ok(Memory { total, available })
}

/// Parse `/proc/loadavg`.
pub fn parse_loadavg(content: &str) -> io::Result<LoadAverage> {
    let mut parts = content.split_whitespace().map(str::parse::<f64>);
    let mut next = || -> io::Result<f64> {
        parts
            .next()
            .ok_or_else(|| invalid("loadavg is truncated"))?
            .map_err(|e| invalid(format!("loadavg: {e}")))
    };
    Ok(LoadAverage {
        one: next()?,
        five: next()?,
        fifteen: next()?,
    })
}

async fn read_trimmed(path: impl AsRef<Path>) -> io::Result<String> {
    Ok(fs::read_to_string(path).await?.trim().to_string())
}

/// Hostname of this machine, if procfs exposes it.
///
/// Synchronous because the backend resolves its identity once, while being
/// constructed; the read is a single small procfs file.
pub fn hostname(proc_root: &Path) -> Option<String> {
    std::fs::read_to_string(proc_root.join("sys/kernel/hostname"))
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Identity and capacity of the node.
pub async fn collect_info(
    proc_root: &Path,
    node_name: &str,
    labels: BTreeMap<String, String>,
) -> io::Result<NodeInfo> {
    let kernel = read_trimmed(proc_root.join("sys/kernel/osrelease")).await?;
    let meminfo = fs::read_to_string(proc_root.join("meminfo")).await?;
    let memory = parse_meminfo(&meminfo)?;
    let cpus = std::thread::available_parallelism().map(|n| n.get())?;

    let mut info = NodeInfo::new();
    info.insert("hostname".into(), json!(node_name));
    info.insert("os".into(), json!(std::env::consts::OS));
    info.insert("arch".into(), json!(std::env::consts::ARCH));
    info.insert("kernel".into(), json!(kernel));
    info.insert("cpus".into(), json!(cpus));
    info.insert("memory".into(), json!(memory.total));
    info.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
    info.insert(
        "labels".into(),
        Value::Object(labels.into_iter().map(|(k, v)| (k, Value::String(v))).collect()),
    );
    Ok(info)
}

/// Current utilisation of the node.
pub async fn collect_stats(proc_root: &Path) -> io::Result<NodeStats> {
    let meminfo = fs::read_to_string(proc_root.join("meminfo")).await?;
    let loadavg = fs::read_to_string(proc_root.join("loadavg")).await?;
    let memory = parse_meminfo(&meminfo)?;
    let load = parse_loadavg(&loadavg)?;
    let cpus = std::thread::available_parallelism().map(|n| n.get())?;
    let used = memory.total.saturating_sub(memory.available);
    let usage = if memory.total == 0 {
        0.0
    } else {
        used as f64 / memory.total as f64
    };

    let mut stats = NodeStats::new();
    stats.insert("cpus".into(), json!(cpus));
    stats.insert("memory_total".into(), json!(memory.total));
    stats.insert("memory_available".into(), json!(memory.available));
    stats.insert("memory_used".into(), json!(used));
    stats.insert("memory_usage".into(), json!(usage));
    stats.insert("load1".into(), json!(load.one));
    stats.insert("load5".into(), json!(load.five));
    stats.insert("load15".into(), json!(load.fifteen));
    Ok(stats)
}
