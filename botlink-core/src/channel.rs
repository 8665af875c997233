//! Persistent TCP control channel to the robot.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Connected
//!       ▲               │              │ write error
//!       │               ▼              ▼
//!       └────────────────────────── Failing
//! ```
//!
//! Commands are UTF-8 lines terminated by `\n`. Nothing is ever read
//! back from the robot. Writes are serialized through an async mutex so
//! lines sent concurrently (UI and repeat timer) never interleave, and a
//! failed write tears the connection down instead of leaving it in a
//! half-written state.
//!
//! Only the connect step has a deadline. Once connected, writes block
//! until they complete, fail, or [`CommandChannel::disconnect`] cancels
//! them.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, SendError};
use crate::repeat::CommandSink;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── ConnectionState ──────────────────────────────────────────────

/// Connection phase of a [`CommandChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,

    /// TCP connect in flight.
    Connecting,

    /// Ready for commands.
    Connected {
        /// When the connection entered the `Connected` state.
        since: Instant,
    },

    /// A write failed; the socket is being closed.
    Failing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Failing => write!(f, "Failing"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// `true` while a connection exists or is being opened.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected { .. })
    }

    /// How long the channel has been connected, if it is.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }
}

// ── CommandStats ─────────────────────────────────────────────────

/// Append-only counters for every command attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// Every attempted command, successful or not.
    pub total_sent: u64,
    pub total_failed: u64,
    pub last_command: Option<String>,
    pub last_command_time: Option<SystemTime>,
}

impl CommandStats {
    fn record(&mut self, command: &str, success: bool) {
        self.total_sent += 1;
        if !success {
            self.total_failed += 1;
        }
        self.last_command = Some(command.trim_end_matches('\n').to_string());
        self.last_command_time = Some(SystemTime::now());
    }
}

/// State and counters at one instant.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub stats: CommandStats,
}

/// Serializable status for the HTTP front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub state: String,
    pub last_command: Option<String>,
    /// Unix milliseconds.
    pub last_command_time: Option<u64>,
    pub total_commands: u64,
    pub failed_commands: u64,
    /// Unix milliseconds at snapshot time.
    pub current_time: u64,
}

impl From<&ChannelStatus> for StatusSnapshot {
    fn from(status: &ChannelStatus) -> Self {
        Self {
            connected: status.state.is_connected(),
            state: status.state.to_string(),
            last_command: status.stats.last_command.clone(),
            last_command_time: status.stats.last_command_time.map(unix_millis),
            total_commands: status.stats.total_sent,
            failed_commands: status.stats.total_failed,
            current_time: unix_millis(SystemTime::now()),
        }
    }
}

// ── CommandChannel ───────────────────────────────────────────────

/// Settings for [`CommandChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline for the TCP handshake.
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct Core {
    state: ConnectionState,
    stats: CommandStats,
    /// Bumped on every connect attempt and disconnect, so work started
    /// under an older connection can tell it has been superseded.
    generation: u64,
    /// Cancels writes blocked on the current connection.
    cancel: Option<CancellationToken>,
    peer: Option<SocketAddr>,
}

#[derive(Debug)]
struct Inner {
    config: ChannelConfig,
    core: Mutex<Core>,
    writer: tokio::sync::Mutex<Option<TcpStream>>,
}

/// Handle to the robot control connection. Cheap to clone; clones share
/// one connection.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl CommandChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                core: Mutex::new(Core::default()),
                writer: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Open the control connection.
    ///
    /// Succeeds immediately without opening anything if the channel is
    /// already connected or connecting.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectError> {
        let generation = {
            let mut core = lock(&self.inner.core);
            if core.state.is_busy() {
                debug!("connect ignored: channel is {}", core.state);
                return Ok(());
            }
            core.state = ConnectionState::Connecting;
            core.generation += 1;
            core.generation
        };

        info!("connecting to robot at {host}:{port}");
        let opened = self.open(host, port).await;

        match opened {
            Ok(stream) => {
                let mut writer = self.inner.writer.lock().await;
                let mut core = lock(&self.inner.core);
                if core.generation != generation {
                    core.stats.record("connect", false);
                    warn!("connect to {host}:{port} aborted by disconnect");
                    return Err(ConnectError::Aborted);
                }
                let peer = stream.peer_addr().ok();
                *writer = Some(stream);
                core.state = ConnectionState::Connected {
                    since: Instant::now(),
                };
                core.cancel = Some(CancellationToken::new());
                core.peer = peer;
                core.stats.record("connect", true);
                info!("connected to robot at {host}:{port}");
                Ok(())
            }
            Err(e) => {
                let mut core = lock(&self.inner.core);
                if core.generation == generation {
                    core.state = ConnectionState::Disconnected;
                }
                core.stats.record("connect", false);
                warn!(kind = %e.kind(), "connection failed: {e}");
                Err(e)
            }
        }
    }

    /// Close the connection. A no-op when already disconnected.
    ///
    /// A write blocked on the socket is cancelled and fails.
    pub async fn disconnect(&self) {
        let cancel = {
            let mut core = lock(&self.inner.core);
            if core.state.is_disconnected() {
                debug!("disconnect ignored: already disconnected");
                return;
            }
            core.generation += 1;
            core.state = ConnectionState::Disconnected;
            core.peer = None;
            core.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let stream = self.inner.writer.lock().await.take();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.shutdown().await {
                debug!("error while closing control socket: {e}");
            }
        }
        info!("disconnected from robot");
    }

    /// Write one command line.
    ///
    /// Appends `\n` when missing. Every call is counted in
    /// [`CommandStats`]; a failed write closes the connection.
    pub async fn send(&self, command: &str) -> Result<(), SendError> {
        let (generation, cancel) = {
            let mut core = lock(&self.inner.core);
            if !core.state.is_connected() {
                core.stats.record(command, false);
                warn!("no connection to robot; dropping command {:?}", command.trim());
                return Err(SendError::NotConnected);
            }
            if command.trim().is_empty() {
                core.stats.record(command, false);
                warn!("refusing to send empty command");
                return Err(SendError::EmptyCommand);
            }
            (core.generation, core.cancel.clone().unwrap_or_default())
        };

        let line = if command.ends_with('\n') {
            command.to_string()
        } else {
            format!("{command}\n")
        };

        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            lock(&self.inner.core).stats.record(command, false);
            return Err(SendError::NotConnected);
        };

        let result = tokio::select! {
            r = async {
                stream.write_all(line.as_bytes()).await?;
                stream.flush().await
            } => r,
            _ = cancel.cancelled() => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "disconnected while sending",
            )),
        };

        match result {
            Ok(()) => {
                lock(&self.inner.core).stats.record(command, true);
                debug!("command sent: {}", command.trim());
                Ok(())
            }
            Err(e) => {
                let superseded = {
                    let mut core = lock(&self.inner.core);
                    core.stats.record(command, false);
                    let superseded = core.generation != generation;
                    if !superseded {
                        core.state = ConnectionState::Failing;
                    }
                    superseded
                };
                warn!("failed to send command {:?}: {e}", command.trim());

                if let Some(mut stream) = writer.take() {
                    let _ = stream.shutdown().await;
                }
                drop(writer);

                if !superseded {
                    let mut core = lock(&self.inner.core);
                    if core.generation == generation {
                        core.generation += 1;
                        core.state = ConnectionState::Disconnected;
                        core.cancel = None;
                        core.peer = None;
                        info!("control socket closed after send error");
                    }
                }
                Err(e.into())
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.core).state.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.core).state.is_connected()
    }

    /// Address of the connected robot.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.core).peer
    }

    pub fn status(&self) -> ChannelStatus {
        let core = lock(&self.inner.core);
        ChannelStatus {
            state: core.state.clone(),
            stats: core.stats.clone(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::from(&self.status())
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
        let invalid = |reason: &str| ConnectError::InvalidAddress {
            addr: format!("{host}:{port}"),
            reason: reason.to_string(),
        };

        if host.trim().is_empty() {
            return Err(invalid("empty host"));
        }
        if port == 0 {
            return Err(invalid("port must be between 1 and 65535"));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        let timeout = self.inner.config.connect_timeout;
        let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))?
            .map_err(|e| invalid(&e.to_string()))?;
        addrs.next().ok_or_else(|| invalid("host resolved to no addresses"))
    }

    async fn open(&self, host: &str, port: u16) -> Result<TcpStream, ConnectError> {
        let addr = self.resolve(host, port).await?;
        let timeout = self.inner.config.connect_timeout;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| ConnectError::io(addr.to_string(), e))?;
        socket
            .set_keepalive(true)
            .map_err(|e| ConnectError::io(addr.to_string(), e))?;

        let stream = tokio::time::timeout(timeout, socket.connect(addr))
            .await
            .map_err(|_| ConnectError::Timeout(timeout))?
            .map_err(|e| ConnectError::io(addr.to_string(), e))?;

        stream
            .set_nodelay(true)
            .map_err(|e| ConnectError::io(addr.to_string(), e))?;
        // Fails if the handshake did not really complete.
        stream
            .peer_addr()
            .map_err(|e| ConnectError::io(addr.to_string(), e))?;

        Ok(stream)
    }
}

#[async_trait]
impl CommandSink for CommandChannel {
    async fn send_command(&self, command: &str) -> Result<(), SendError> {
        self.send(command).await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectErrorKind;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_while_disconnected_counts_failure() {
        let ch = CommandChannel::default();
        let err = ch.send("forward").await.unwrap_err();
        assert!(matches!(err, SendError::NotConnected));

        let status = ch.status();
        assert_eq!(status.stats.total_sent, 1);
        assert_eq!(status.stats.total_failed, 1);
        assert_eq!(status.stats.last_command.as_deref(), Some("forward"));
        assert!(status.state.is_disconnected());
    }

    #[tokio::test]
    async fn invalid_addresses_rejected_without_socket() {
        let ch = CommandChannel::default();
        let err = ch.connect("", 8082).await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::InvalidAddress);

        let err = ch.connect("127.0.0.1", 0).await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::InvalidAddress);

        assert!(ch.state().is_disconnected());
        assert_eq!(ch.status().stats.total_failed, 2);
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        // Grab a free port, then close it again.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let ch = CommandChannel::default();
        let err = ch.connect("127.0.0.1", port).await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::Refused);
        assert!(ch.state().is_disconnected());
        assert_eq!(ch.status().stats.last_command.as_deref(), Some("connect"));
    }

    #[tokio::test]
    async fn send_appends_terminator_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let ch = CommandChannel::default();
        ch.connect("127.0.0.1", port).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(ch.is_connected());
        assert!(ch.peer_addr().is_some());

        ch.send("forward").await.unwrap();
        ch.send("stop\n").await.unwrap();
        ch.disconnect().await;

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"forward\nstop\n");

        let stats = ch.status().stats;
        assert_eq!(stats.total_sent, 3); // connect + two commands
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.last_command.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn empty_command_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ch = CommandChannel::default();
        ch.connect("127.0.0.1", port).await.unwrap();

        let err = ch.send("   ").await.unwrap_err();
        assert!(matches!(err, SendError::EmptyCommand));
        assert!(ch.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ch = CommandChannel::default();

        ch.disconnect().await;
        ch.connect("127.0.0.1", port).await.unwrap();
        ch.disconnect().await;
        ch.disconnect().await;

        assert!(ch.state().is_disconnected());
        assert!(matches!(
            ch.send("left").await,
            Err(SendError::NotConnected)
        ));
    }

    #[test]
    fn snapshot_reflects_stats() {
        let status = ChannelStatus {
            state: ConnectionState::Connected {
                since: Instant::now(),
            },
            stats: CommandStats {
                total_sent: 4,
                total_failed: 1,
                last_command: Some("sit_down".into()),
                last_command_time: Some(UNIX_EPOCH + Duration::from_millis(1500)),
            },
        };
        let snap = StatusSnapshot::from(&status);
        assert!(snap.connected);
        assert_eq!(snap.state, "Connected");
        assert_eq!(snap.total_commands, 4);
        assert_eq!(snap.failed_commands, 1);
        assert_eq!(snap.last_command_time, Some(1500));

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["last_command"], "sit_down");
        assert_eq!(json["total_commands"], 4);
    }

    #[test]
    fn state_display_and_predicates() {
        assert_eq!(ConnectionState::Failing.to_string(), "Failing");
        assert!(ConnectionState::Connecting.is_busy());
        assert!(!ConnectionState::Failing.is_busy());
        assert!(ConnectionState::default().is_disconnected());
        assert!(ConnectionState::Disconnected.connected_duration().is_none());
    }
}
