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

//! Routes remote commands to the backend named in their options.
//!
//! The table is explicit: a backend kind is served only if a
//! [`RemoteCommander`] was registered for it. Anything else is rejected with
//! [`AmiError::Configuration`] before a connection is attempted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::ami::{AmiError, BackendKind, CommandOptions, Pipe, Result};
use crate::ssh::{NativeSessionBridge, SessionTransport};

/// A backend able to run interactive remote commands.
#[async_trait]
pub trait RemoteCommander: Send + Sync {
    async fn remote_command(&self, options: &CommandOptions, pipe: &mut Pipe) -> Result<()>;
}

#[async_trait]
impl<T> RemoteCommander for NativeSessionBridge<T>
where
    T: SessionTransport + 'static,
{
    async fn remote_command(&self, options: &CommandOptions, pipe: &mut Pipe) -> Result<()> {
        match options {
            CommandOptions::Native(native) => self.run(native, pipe).await,
            other => Err(AmiError::Configuration(format!(
                "native session bridge cannot serve {} options",
                other.kind()
            ))),
        }
    }
}

/// Dispatch table from backend kind to remote command implementation.
#[derive(Clone, Default)]
pub struct BackendDispatcher {
    commanders: HashMap<BackendKind, Arc<dyn RemoteCommander>>,
}

impl BackendDispatcher {
    /// An empty table; every request is rejected until backends are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table serving native options with the russh session bridge.
    pub fn with_native() -> Self {
        Self::new().register(BackendKind::Native, Arc::new(NativeSessionBridge::new()))
    }

    /// Serve `kind` with `commander`, replacing any previous entry.
    pub fn register(mut self, kind: BackendKind, commander: Arc<dyn RemoteCommander>) -> Self {
        self.commanders.insert(kind, commander);
        self
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        self.commanders.contains_key(&kind)
    }

    /// Run the remote command on the backend selected by `options`.
    pub async fn dispatch(&self, options: &CommandOptions, pipe: &mut Pipe) -> Result<()> {
        if let CommandOptions::Native(native) = options {
            if native.address.trim().is_empty() {
                return Err(AmiError::Configuration(
                    "native remote command requires a host address".to_string(),
                ));
            }
        }

        let kind = options.kind();
        let commander = self.commanders.get(&kind).ok_or_else(|| {
            AmiError::Configuration(format!("no backend registered for {kind} remote commands"))
        })?;

        tracing::debug!(backend = %kind, "Dispatching remote command");
        commander.remote_command(options, pipe).await
    }
}

impl fmt::Debug for BackendDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.commanders.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("BackendDispatcher")
            .field("backends", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ami::{KubeDebugOptions, NativeDebugOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCommander {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteCommander for CountingCommander {
        async fn remote_command(&self, _options: &CommandOptions, _pipe: &mut Pipe) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn kube_options() -> CommandOptions {
        CommandOptions::Kube(KubeDebugOptions {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            container: None,
            command: vec!["sh".to_string()],
        })
    }

    fn pipe() -> Pipe {
        Pipe::new(tokio::io::empty(), tokio::io::sink())
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_rejected() {
        let native = Arc::new(CountingCommander::default());
        let dispatcher = BackendDispatcher::new().register(BackendKind::Native, native.clone());

        let err = dispatcher
            .dispatch(&kube_options(), &mut pipe())
            .await
            .unwrap_err();

        assert!(matches!(err, AmiError::Configuration(_)), "{err:?}");
        assert_eq!(native.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let native = Arc::new(CountingCommander::default());
        let kube = Arc::new(CountingCommander::default());
        let dispatcher = BackendDispatcher::new()
            .register(BackendKind::Native, native.clone())
            .register(BackendKind::Kube, kube.clone());

        dispatcher
            .dispatch(&kube_options(), &mut pipe())
            .await
            .unwrap();
        dispatcher
            .dispatch(
                &CommandOptions::Native(NativeDebugOptions::new("10.0.0.2", "22", "u", "p")),
                &mut pipe(),
            )
            .await
            .unwrap();

        assert_eq!(kube.calls.load(Ordering::SeqCst), 1);
        assert_eq!(native.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_native_address_fails_fast() {
        let native = Arc::new(CountingCommander::default());
        let dispatcher = BackendDispatcher::new().register(BackendKind::Native, native.clone());

        let err = dispatcher
            .dispatch(
                &CommandOptions::Native(NativeDebugOptions::new("  ", "22", "u", "p")),
                &mut pipe(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AmiError::Configuration(_)));
        assert_eq!(native.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_native_bridge_refuses_kube_options() {
        let bridge = NativeSessionBridge::new();
        let err = bridge
            .remote_command(&kube_options(), &mut pipe())
            .await
            .unwrap_err();
        assert!(matches!(err, AmiError::Configuration(_)));
    }

    #[test]
    fn test_with_native_supports_only_native() {
        let dispatcher = BackendDispatcher::with_native();
        assert!(dispatcher.supports(BackendKind::Native));
        assert!(!dispatcher.supports(BackendKind::Kube));
    }
}
