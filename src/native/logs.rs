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

//! Service log access for the native backend.
//!
//! The supervisor writes one entry per line, prefixed with an RFC 3339
//! timestamp and a space:
//!
//! ```text
//! 2025-06-01T12:00:00Z listening on :8080
//! 2025-06-01T12:00:01.250+02:00 ready
//! ```
//!
//! A line without a timestamp continues the entry above it, as multi-line
//! stack traces do. The `since` window is applied per entry using these
//! timestamps.

use std::io::{self, Cursor};
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::fs::{self, File};

use crate::ami::LogStream;

/// Keep the last `n` lines of `content`. A trailing newline does not count
/// as an extra empty line.
pub fn tail_lines(content: &[u8], n: u64) -> &[u8] {
    if n == 0 {
        return &content[content.len()..];
    }
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    let mut seen = 0;
    for (i, byte) in body.iter().enumerate().rev() {
        if *byte == b'\n' {
            seen += 1;
            if seen == n {
                return &content[i + 1..];
            }
        }
    }
    content
}

/// Timestamp prefix of a log line, if it has one.
pub fn line_timestamp(line: &[u8]) -> Option<DateTime<Utc>> {
    let end = line
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let token = std::str::from_utf8(&line[..end]).ok()?;
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Keep the entries of `content` written at or after `cutoff`.
///
/// Unstamped lines follow the verdict of the entry they continue. Unstamped
/// lines before the first timestamp cannot be dated and are kept.
pub fn lines_since(content: &[u8], cutoff: DateTime<Utc>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut keep = true;
    for line in content.split_inclusive(|b| *b == b'\n') {
        if let Some(ts) = line_timestamp(line) {
            keep = ts >= cutoff;
        }
        if keep {
            out.extend_from_slice(line);
        }
    }
    out
}

/// Start of a window reaching `seconds` back from now.
fn window_start(seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Open the log at `path`.
///
/// Without filters the file is streamed lazily. With `since` only entries
/// stamped inside the window are returned, and a file last written before
/// the window yields an empty stream without being read. `tail` is applied
/// after `since`.
pub async fn open_log(
    path: &Path,
    tail: Option<u64>,
    since: Option<u64>,
) -> io::Result<LogStream> {
    let metadata = fs::metadata(path).await?;

    let content = match since {
        Some(seconds) => {
            let cutoff = window_start(seconds);
            if DateTime::<Utc>::from(metadata.modified()?) < cutoff {
                return Ok(Box::new(Cursor::new(Vec::new())));
            }
            lines_since(&fs::read(path).await?, cutoff)
        }
        None if tail.is_some() => fs::read(path).await?,
        None => return Ok(Box::new(File::open(path).await?)),
    };

    let content = match tail {
        Some(n) => tail_lines(&content, n).to_vec(),
        None => content,
    };
    Ok(Box::new(Cursor::new(content)))
}
