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

//! Interactive remote shell over SSH for the native backend.
//!
//! One call walks a strictly linear state machine:
//!
//! ```text
//! Unconnected -> Connected -> SessionOpen -> PtyAllocated -> ShellRunning -> Terminated
//! ```
//!
//! Whatever was acquired is released in reverse order before the call
//! returns: the channel first, then the connection. There are no retries and
//! no reconnects.

use std::fmt;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::client::SshClientTransport;
use super::error::TransportError;
use super::terminal_modes::{TerminalProfile, NATIVE_TERMINAL};
use super::termination::{absorb_normal_termination, SessionOutcome};
use super::transport::{ChannelEvent, SessionChannel, SessionConnection, SessionTransport};
use crate::ami::{AmiError, NativeDebugOptions, Pipe, Result, SessionStep};

/// Read size for forwarding pipe input (4KB matches typical SSH packet sizes).
const SSH_IO_BUFFER_SIZE: usize = 4096;

/// Position of a session in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Unconnected,
    Connected,
    SessionOpen,
    PtyAllocated,
    ShellRunning,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks and logs the forward-only progress of one session.
struct Progress<'a> {
    target: &'a str,
    state: SessionState,
}

impl<'a> Progress<'a> {
    fn new(target: &'a str) -> Self {
        Self {
            target,
            state: SessionState::Unconnected,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "{} -> {next} goes backwards", self.state);
        tracing::debug!(
            target_host = %self.target,
            from = %self.state,
            to = %next,
            "Session state"
        );
        self.state = next;
    }
}

/// Remote command implementation of the native backend.
///
/// Generic over the transport so the state machine can run against test
/// doubles; [`NativeSessionBridge::new`] uses russh.
#[derive(Debug)]
pub struct NativeSessionBridge<T = SshClientTransport> {
    transport: T,
    terminal: TerminalProfile,
}

impl NativeSessionBridge<SshClientTransport> {
    pub fn new() -> Self {
        Self::with_transport(SshClientTransport::default())
    }
}

impl Default for NativeSessionBridge<SshClientTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SessionTransport> NativeSessionBridge<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            terminal: NATIVE_TERMINAL,
        }
    }

    /// Run an interactive shell on the host in `options` until it ends.
    ///
    /// Returns an error only if the session could not be set up. How the
    /// shell ended is logged, never returned.
    pub async fn run(&self, options: &NativeDebugOptions, pipe: &mut Pipe) -> Result<()> {
        self.run_until_cancelled(options, pipe, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but also ends the session when `cancel`
    /// fires. Cancellation releases the session like a normal end.
    pub async fn run_until_cancelled(
        &self,
        options: &NativeDebugOptions,
        pipe: &mut Pipe,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = options.target();
        let mut progress = Progress::new(&target);

        tracing::info!(
            target_host = %target,
            user = %options.username,
            "Opening remote debug session"
        );
        let mut connection = self
            .transport
            .connect(options)
            .await
            .map_err(|source| AmiError::Connection {
                target: target.clone(),
                source,
            })?;
        progress.advance(SessionState::Connected);

        let result = self
            .run_on_connection(&mut connection, &mut progress, pipe, cancel)
            .await;

        connection.close().await;
        tracing::debug!(target_host = %target, "Connection released");
        result
    }

    async fn run_on_connection(
        &self,
        connection: &mut T::Connection,
        progress: &mut Progress<'_>,
        pipe: &mut Pipe,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut channel = connection
            .open_session()
            .await
            .map_err(|source| session_error(SessionStep::SessionOpen, source))?;
        progress.advance(SessionState::SessionOpen);

        let result = self
            .run_on_channel(&mut channel, progress, pipe, cancel)
            .await;

        channel.close().await;
        tracing::debug!(target_host = %progress.target, "Session channel released");
        result
    }

    async fn run_on_channel(
        &self,
        channel: &mut <T::Connection as SessionConnection>::Channel,
        progress: &mut Progress<'_>,
        pipe: &mut Pipe,
        cancel: &CancellationToken,
    ) -> Result<()> {
        channel
            .request_pty(&self.terminal)
            .await
            .map_err(|source| session_error(SessionStep::PtyRequest, source))?;
        progress.advance(SessionState::PtyAllocated);

        channel
            .request_shell()
            .await
            .map_err(|source| session_error(SessionStep::ShellStart, source))?;
        progress.advance(SessionState::ShellRunning);

        let outcome = forward(channel, pipe, cancel).await;
        progress.advance(SessionState::Terminated);

        absorb_normal_termination(progress.target, outcome);
        Ok(())
    }
}

fn session_error(step: SessionStep, source: TransportError) -> AmiError {
    AmiError::Session { step, source }
}

/// Shuttle bytes between the pipe and the channel until the remote side
/// closes, the caller cancels, or forwarding breaks.
///
/// Remote stdout and stderr both go to the pipe output, flushed per chunk.
/// End of pipe input is passed on as EOF but does not end the session.
async fn forward<C: SessionChannel>(
    channel: &mut C,
    pipe: &mut Pipe,
    cancel: &CancellationToken,
) -> SessionOutcome {
    let mut buf = vec![0u8; SSH_IO_BUFFER_SIZE];
    let mut input_open = true;
    let mut exit: Option<SessionOutcome> = None;

    loop {
        tokio::select! {
            event = channel.next_event() => match event {
                Some(ChannelEvent::Stdout(data)) | Some(ChannelEvent::Stderr(data)) => {
                    if let Err(e) = write_output(&mut pipe.output, &data).await {
                        return SessionOutcome::Broken(e.into());
                    }
                }
                Some(ChannelEvent::ExitStatus(code)) => exit = Some(SessionOutcome::Exited(code)),
                Some(ChannelEvent::ExitSignal(signal)) => {
                    exit = Some(SessionOutcome::Signaled(signal))
                }
                Some(ChannelEvent::Eof) => tracing::trace!("Remote sent EOF"),
                Some(ChannelEvent::Closed) | None => break,
            },

            read = pipe.input.read(&mut buf), if input_open => match read {
                Ok(0) => {
                    input_open = false;
                    if let Err(e) = channel.send_eof().await {
                        return SessionOutcome::Broken(e);
                    }
                }
                Ok(n) => {
                    if let Err(e) = channel.send(&buf[..n]).await {
                        return SessionOutcome::Broken(e);
                    }
                }
                Err(e) => return SessionOutcome::Broken(e.into()),
            },

            _ = cancel.cancelled() => return SessionOutcome::Cancelled,
        }
    }

    exit.unwrap_or(SessionOutcome::ExitStatusMissing)
}

async fn write_output<W>(output: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    output.write_all(data).await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum FailAt {
        Nowhere,
        Connect,
        OpenSession,
        Pty,
        Shell,
        Send,
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeTransport {
        log: Log,
        fail_at: FailAt,
        script: Vec<ChannelEvent>,
        close_after_eof: bool,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl FakeTransport {
        fn new(script: Vec<ChannelEvent>) -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                fail_at: FailAt::Nowhere,
                script,
                close_after_eof: false,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing_at(mut self, fail_at: FailAt) -> Self {
            self.fail_at = fail_at;
            self
        }

        fn closing_after_eof(mut self) -> Self {
            self.close_after_eof = true;
            self
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    struct FakeConnection {
        log: Log,
        fail_at: FailAt,
        script: Vec<ChannelEvent>,
        close_after_eof: bool,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    struct FakeChannel {
        log: Log,
        fail_at: FailAt,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
        events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        close_after_eof: bool,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    fn rejected() -> TransportError {
        TransportError::RequestRejected("test")
    }

    #[async_trait]
    impl SessionTransport for FakeTransport {
        type Connection = FakeConnection;

        async fn connect(
            &self,
            _options: &NativeDebugOptions,
        ) -> Result<FakeConnection, TransportError> {
            self.log.lock().unwrap().push("connect".to_string());
            if self.fail_at == FailAt::Connect {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            Ok(FakeConnection {
                log: self.log.clone(),
                fail_at: self.fail_at,
                script: self.script.clone(),
                close_after_eof: self.close_after_eof,
                sent: self.sent.clone(),
            })
        }
    }

    #[async_trait]
    impl SessionConnection for FakeConnection {
        type Channel = FakeChannel;

        async fn open_session(&mut self) -> Result<FakeChannel, TransportError> {
            self.log.lock().unwrap().push("open_session".to_string());
            if self.fail_at == FailAt::OpenSession {
                return Err(rejected());
            }
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            for event in self.script.drain(..) {
                events_tx.send(event).unwrap();
            }
            Ok(FakeChannel {
                log: self.log.clone(),
                fail_at: self.fail_at,
                events_tx,
                events_rx,
                close_after_eof: self.close_after_eof,
                sent: self.sent.clone(),
            })
        }

        async fn close(self) {
            self.log.lock().unwrap().push("close_connection".to_string());
        }
    }

    #[async_trait]
    impl SessionChannel for FakeChannel {
        async fn request_pty(&mut self, terminal: &TerminalProfile) -> Result<(), TransportError> {
            self.log.lock().unwrap().push(format!(
                "pty {} {}x{} {}",
                terminal.term, terminal.rows, terminal.cols, terminal.line_speed
            ));
            if self.fail_at == FailAt::Pty {
                return Err(rejected());
            }
            Ok(())
        }

        async fn request_shell(&mut self) -> Result<(), TransportError> {
            self.log.lock().unwrap().push("shell".to_string());
            if self.fail_at == FailAt::Shell {
                return Err(rejected());
            }
            Ok(())
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if self.fail_at == FailAt::Send {
                return Err(TransportError::ChannelClosed("data"));
            }
            self.sent.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn send_eof(&mut self) -> Result<(), TransportError> {
            self.log.lock().unwrap().push("eof".to_string());
            if self.close_after_eof {
                let _ = self.events_tx.send(ChannelEvent::ExitStatus(0));
                let _ = self.events_tx.send(ChannelEvent::Closed);
            }
            Ok(())
        }

        async fn next_event(&mut self) -> Option<ChannelEvent> {
            self.events_rx.recv().await
        }

        async fn close(self) {
            self.log.lock().unwrap().push("close_channel".to_string());
        }
    }

    fn options() -> NativeDebugOptions {
        NativeDebugOptions::new("127.0.0.1", "22", "u", "p")
    }

    /// A pipe whose input never yields data and whose output can be read
    /// back after the session.
    fn idle_pipe() -> (Pipe, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (keys_tx, keys_rx) = tokio::io::duplex(1024);
        let (out_tx, out_rx) = tokio::io::duplex(64 * 1024);
        (Pipe::new(keys_rx, out_tx), keys_tx, out_rx)
    }

    async fn drain(pipe: Pipe, mut out_rx: tokio::io::DuplexStream) -> Vec<u8> {
        drop(pipe);
        let mut output = Vec::new();
        out_rx.read_to_end(&mut output).await.unwrap();
        output
    }

    const SETUP: [&str; 4] = ["connect", "open_session", "pty xterm 80x160 14400", "shell"];

    fn expected(tail: &[&str]) -> Vec<String> {
        SETUP.iter().chain(tail).map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_releases_channel_then_connection_on_success() {
        let transport = FakeTransport::new(vec![
            ChannelEvent::Stdout(b"hello\n".to_vec()),
            ChannelEvent::ExitStatus(0),
            ChannelEvent::Eof,
            ChannelEvent::Closed,
        ]);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, out_rx) = idle_pipe();

        bridge.run(&options(), &mut pipe).await.unwrap();

        assert_eq!(
            bridge.transport.log(),
            expected(&["close_channel", "close_connection"])
        );
        assert_eq!(drain(pipe, out_rx).await, b"hello\n");
    }

    #[tokio::test]
    async fn test_abnormal_end_is_not_an_error() {
        for ending in [
            ChannelEvent::ExitStatus(127),
            ChannelEvent::ExitSignal("KILL".to_string()),
            ChannelEvent::Eof,
        ] {
            let transport = FakeTransport::new(vec![ending, ChannelEvent::Closed]);
            let bridge = NativeSessionBridge::with_transport(transport);
            let (mut pipe, _keys, _out) = idle_pipe();

            bridge.run(&options(), &mut pipe).await.unwrap();

            assert_eq!(
                bridge.transport.log(),
                expected(&["close_channel", "close_connection"])
            );
        }
    }

    #[tokio::test]
    async fn test_connect_failure_acquires_nothing() {
        let transport = FakeTransport::new(vec![]).failing_at(FailAt::Connect);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, _out) = idle_pipe();

        let err = bridge.run(&options(), &mut pipe).await.unwrap_err();

        match err {
            AmiError::Connection { target, .. } => assert_eq!(target, "127.0.0.1:22"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(bridge.transport.log(), vec!["connect".to_string()]);
    }

    #[tokio::test]
    async fn test_session_open_failure_closes_connection() {
        let transport = FakeTransport::new(vec![]).failing_at(FailAt::OpenSession);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, _out) = idle_pipe();

        let err = bridge.run(&options(), &mut pipe).await.unwrap_err();

        assert!(matches!(
            err,
            AmiError::Session {
                step: SessionStep::SessionOpen,
                ..
            }
        ));
        assert_eq!(
            bridge.transport.log(),
            vec!["connect", "open_session", "close_connection"]
        );
    }

    #[tokio::test]
    async fn test_pty_failure_releases_in_reverse_order() {
        let transport = FakeTransport::new(vec![]).failing_at(FailAt::Pty);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, _out) = idle_pipe();

        let err = bridge.run(&options(), &mut pipe).await.unwrap_err();

        assert!(matches!(
            err,
            AmiError::Session {
                step: SessionStep::PtyRequest,
                ..
            }
        ));
        assert_eq!(
            bridge.transport.log(),
            vec![
                "connect",
                "open_session",
                "pty xterm 80x160 14400",
                "close_channel",
                "close_connection"
            ]
        );
    }

    #[tokio::test]
    async fn test_shell_failure_releases_in_reverse_order() {
        let transport = FakeTransport::new(vec![]).failing_at(FailAt::Shell);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, _out) = idle_pipe();

        let err = bridge.run(&options(), &mut pipe).await.unwrap_err();

        assert!(matches!(
            err,
            AmiError::Session {
                step: SessionStep::ShellStart,
                ..
            }
        ));
        assert_eq!(
            bridge.transport.log(),
            expected(&["close_channel", "close_connection"])
        );
    }

    #[tokio::test]
    async fn test_input_reaches_channel_in_order() {
        let transport = FakeTransport::new(vec![]).closing_after_eof();
        let sent = transport.sent.clone();
        let bridge = NativeSessionBridge::with_transport(transport);
        let (keys_tx, keys_rx) = tokio::io::duplex(16);
        let (out_tx, _out_rx) = tokio::io::duplex(1024);
        let mut pipe = Pipe::new(keys_rx, out_tx);

        let typist = tokio::spawn(async move {
            let mut keys_tx = keys_tx;
            for chunk in [&b"ec"[..], b"ho 1\n", b"echo 2\n", b"exit\n"] {
                keys_tx.write_all(chunk).await.unwrap();
            }
        });

        bridge.run(&options(), &mut pipe).await.unwrap();
        typist.await.unwrap();

        assert_eq!(sent.lock().unwrap().as_slice(), b"echo 1\necho 2\nexit\n");
        assert_eq!(
            bridge.transport.log(),
            expected(&["eof", "close_channel", "close_connection"])
        );
    }

    #[tokio::test]
    async fn test_output_written_in_order() {
        let transport = FakeTransport::new(vec![
            ChannelEvent::Stdout(b"one ".to_vec()),
            ChannelEvent::Stderr(b"two ".to_vec()),
            ChannelEvent::Stdout(b"three".to_vec()),
            ChannelEvent::ExitStatus(0),
            ChannelEvent::Closed,
        ]);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, out_rx) = idle_pipe();

        bridge.run(&options(), &mut pipe).await.unwrap();

        assert_eq!(drain(pipe, out_rx).await, b"one two three");
    }

    #[tokio::test]
    async fn test_forwarding_failure_is_absorbed() {
        let transport = FakeTransport::new(vec![]).failing_at(FailAt::Send);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut keys_tx, keys_rx) = tokio::io::duplex(16);
        let (out_tx, _out_rx) = tokio::io::duplex(1024);
        let mut pipe = Pipe::new(keys_rx, out_tx);
        keys_tx.write_all(b"ls\n").await.unwrap();

        bridge.run(&options(), &mut pipe).await.unwrap();

        assert_eq!(
            bridge.transport.log(),
            expected(&["close_channel", "close_connection"])
        );
    }

    #[tokio::test]
    async fn test_cancellation_releases_session() {
        let transport = FakeTransport::new(vec![ChannelEvent::Stdout(b"$ ".to_vec())]);
        let bridge = NativeSessionBridge::with_transport(transport);
        let (mut pipe, _keys, _out) = idle_pipe();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        bridge
            .run_until_cancelled(&options(), &mut pipe, &cancel)
            .await
            .unwrap();

        assert_eq!(
            bridge.transport.log(),
            expected(&["close_channel", "close_connection"])
        );
    }

    #[test]
    fn test_session_states_are_ordered() {
        assert!(SessionState::Unconnected < SessionState::Connected);
        assert!(SessionState::PtyAllocated < SessionState::ShellRunning);
        assert!(SessionState::ShellRunning < SessionState::Terminated);
    }
}
