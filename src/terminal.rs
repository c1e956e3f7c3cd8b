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

//! Local terminal handling for interactive remote shells.
//!
//! The remote side runs a full pseudo-terminal, so the local terminal has to
//! pass keystrokes through unprocessed while a session is attached.

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use once_cell::sync::Lazy;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};

static TERMINAL_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

fn lock_terminal() -> MutexGuard<'static, ()> {
    TERMINAL_MUTEX
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// RAII guard holding the local terminal in raw mode.
///
/// Raw mode is process wide; only the guard that enabled it disables it.
#[derive(Debug)]
pub struct RawModeGuard {
    owns_raw_mode: bool,
}

impl RawModeGuard {
    /// Enter raw mode.
    pub fn enter() -> Result<Self> {
        let _guard = lock_terminal();
        if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            return Ok(Self {
                owns_raw_mode: false,
            });
        }
        enable_raw_mode().with_context(|| "Failed to enable raw mode")?;
        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        Ok(Self {
            owns_raw_mode: true,
        })
    }

    /// Enter raw mode only when stdin is an interactive terminal.
    pub fn enter_if_tty() -> Result<Option<Self>> {
        if atty::is(atty::Stream::Stdin) {
            Self::enter().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.owns_raw_mode {
            return;
        }
        let _guard = lock_terminal();
        if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
            if let Err(e) = disable_raw_mode() {
                eprintln!("Warning: Failed to disable raw mode during cleanup: {e}");
            } else {
                RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
            }
        }
    }
}

/// Restore cooked mode regardless of which guard holds it. Used on paths that
/// exit the process without unwinding.
pub fn force_terminal_cleanup() {
    let _guard = lock_terminal();
    if RAW_MODE_ACTIVE.load(Ordering::SeqCst) {
        let _ = disable_raw_mode();
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
    }
}
