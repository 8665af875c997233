//! Upstream MJPEG session: HTTP source → extractor → broadcaster.
//!
//! ```text
//!            start()                 200 OK
//!   Idle ───────────► Connecting ───────────► Streaming
//!    ▲                   │  ▲                    │
//!    │ stop()            │  │ reconnect delay    │ read error / EOF /
//!    │                   ▼  │                    │ buffer overflow
//! Stopping ◄──────────  Failed ◄─────────────────┘
//! ```
//!
//! The read loop runs in its own Tokio task. [`SessionHandle::stop`]
//! cancels it through a `CancellationToken`; the task drops the HTTP
//! response (closing the connection) and the handle waits for it to
//! finish before returning.

use std::time::Duration;

use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::FrameBroadcaster;
use crate::error::StreamError;
use crate::extractor::FrameExtractor;

// ── Configuration ────────────────────────────────────────────────

/// Tuning knobs for [`StreamSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for connecting and receiving response headers.
    pub connect_timeout: Duration,
    /// Size of each read from the response body.
    pub chunk_size: usize,
    /// Maximum bytes buffered without a complete frame.
    pub max_pending: usize,
    /// Delay before reconnecting after a failure. `None` disables retry.
    pub reconnect_delay: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            chunk_size: 1024,
            max_pending: 10 * 1024 * 1024, // 10 MiB
            reconnect_delay: None,
        }
    }
}

// ── State / stats ────────────────────────────────────────────────

/// Lifecycle phase of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Failed { reason: String },
}

impl SessionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// `true` once the read task has nothing left to do.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed { .. })
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed { reason } => write!(f, "Failed ({reason})"),
        }
    }
}

/// Counters exposed while the session runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_published: u64,
    /// Frames dropped because they failed validation.
    pub frames_skipped: u64,
    pub bytes_read: u64,
    /// Reconnect attempts after a failure.
    pub restarts: u64,
}

// ── StreamSession ────────────────────────────────────────────────

/// Factory for upstream sessions feeding one broadcaster.
#[derive(Debug, Clone)]
pub struct StreamSession {
    client: reqwest::Client,
    broadcaster: FrameBroadcaster,
    config: SessionConfig,
}

impl StreamSession {
    pub fn new(broadcaster: FrameBroadcaster, config: SessionConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            broadcaster,
            config,
        })
    }

    pub fn broadcaster(&self) -> &FrameBroadcaster {
        &self.broadcaster
    }

    /// Spawn the read loop for `url` and return its handle.
    pub fn start(&self, url: impl Into<String>) -> SessionHandle {
        let url = url.into();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let (stats_tx, stats_rx) = watch::channel(SessionStats::default());

        let runner = Runner {
            client: self.client.clone(),
            url,
            config: self.config.clone(),
            pipeline: Pipeline {
                extractor: FrameExtractor::new(),
                broadcaster: self.broadcaster.clone(),
                max_pending: self.config.max_pending,
                chunk_size: self.config.chunk_size.max(1),
                stats_tx,
            },
            state_tx,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(runner.run());

        SessionHandle {
            cancel,
            task: Mutex::new(Some(task)),
            state_rx,
            stats_rx,
        }
    }

    /// Stop a running session. Same as [`SessionHandle::stop`].
    pub async fn stop(&self, handle: &SessionHandle) {
        handle.stop().await;
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// Control handle for one running session.
///
/// Dropping the handle cancels the session without waiting for it.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    state_rx: watch::Receiver<SessionState>,
    stats_rx: watch::Receiver<SessionStats>,
}

impl SessionHandle {
    /// Cancel the read loop and wait until the connection is released.
    ///
    /// Idempotent and safe to call from any task.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("stream task ended abnormally: {e}");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats_rx.borrow().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Runner (task side) ───────────────────────────────────────────

struct Runner {
    client: reqwest::Client,
    url: String,
    config: SessionConfig,
    pipeline: Pipeline,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl Runner {
    fn set_state(&self, state: SessionState) {
        debug!(url = %self.url, "stream session → {state}");
        self.state_tx.send_replace(state);
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.stream_once() => Some(result),
            };

            // The response (and its connection) is gone by now; so is any
            // partially assembled frame.
            self.pipeline.extractor.clear();

            let err = match outcome {
                None => break,
                Some(Ok(())) => StreamError::UpstreamClosed,
                Some(Err(e)) => e,
            };

            error!(url = %self.url, "video stream error: {err}");
            self.set_state(SessionState::Failed {
                reason: err.to_string(),
            });

            let Some(delay) = self.config.reconnect_delay else {
                return;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.pipeline
                .stats_tx
                .send_modify(|s| s.restarts += 1);
            info!(url = %self.url, "reconnecting video stream");
            self.set_state(SessionState::Connecting);
        }

        self.set_state(SessionState::Stopping);
        self.set_state(SessionState::Idle);
        info!(url = %self.url, "video stream stopped");
    }

    /// One connection attempt. `Ok` means the upstream closed the body.
    async fn stream_once(&mut self) -> Result<(), StreamError> {
        info!(url = %self.url, "opening video stream");

        let response = tokio::time::timeout(
            self.config.connect_timeout,
            self.client.get(&self.url).send(),
        )
        .await
        .map_err(|_| StreamError::ConnectTimeout(self.config.connect_timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }

        self.set_state(SessionState::Streaming);
        info!(url = %self.url, "video stream connected");

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(body);
        tokio::pin!(reader);
        self.pipeline.pump(reader).await
    }
}

// ── Pipeline ─────────────────────────────────────────────────────

/// Read loop body, independent of where the bytes come from.
struct Pipeline {
    extractor: FrameExtractor,
    broadcaster: FrameBroadcaster,
    max_pending: usize,
    chunk_size: usize,
    stats_tx: watch::Sender<SessionStats>,
}

impl Pipeline {
    /// Read fixed-size chunks until EOF, publishing every valid frame.
    async fn pump<R>(&mut self, mut reader: R) -> Result<(), StreamError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            let mut published = 0u64;
            let mut skipped = 0u64;
            for frame in self.extractor.feed(&buf[..n]) {
                if !frame.is_well_formed() {
                    warn!(
                        "{}; skipping {} bytes",
                        StreamError::Decode {
                            sequence: frame.sequence()
                        },
                        frame.len()
                    );
                    skipped += 1;
                    continue;
                }
                self.broadcaster.publish(frame);
                published += 1;
            }

            self.stats_tx.send_modify(|s| {
                s.bytes_read += n as u64;
                s.frames_published += published;
                s.frames_skipped += skipped;
            });

            let pending = self.extractor.pending();
            if pending > self.max_pending {
                self.extractor.clear();
                return Err(StreamError::BufferOverflow {
                    size: pending,
                    max: self.max_pending,
                });
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(broadcaster: FrameBroadcaster, max_pending: usize) -> Pipeline {
        let (stats_tx, _) = watch::channel(SessionStats::default());
        Pipeline {
            extractor: FrameExtractor::new(),
            broadcaster,
            max_pending,
            chunk_size: 1024,
            stats_tx,
        }
    }

    #[tokio::test]
    async fn pump_publishes_valid_frames_and_skips_corrupt() {
        let broadcaster = FrameBroadcaster::new();
        let mut sub = broadcaster.subscribe();
        let mut p = pipeline(broadcaster.clone(), 1024);
        let stats = p.stats_tx.subscribe();

        let reader = tokio_test::io::Builder::new()
            .read(b"\xff\xd8\xff\xe0one\xff")
            .read(b"\xd9\xff\xd8corrupt\xff\xd9")
            .read(b"\xff\xd8\xff\xdbtwo\xff\xd9")
            .build();

        p.pump(reader).await.unwrap();

        let s = stats.borrow().clone();
        assert_eq!(s.frames_published, 2);
        assert_eq!(s.frames_skipped, 1);
        assert_eq!(broadcaster.published(), 2);

        let latest = sub.try_recv().unwrap();
        assert_eq!(latest.data().as_ref(), b"\xff\xd8\xff\xdbtwo\xff\xd9");
        assert_eq!(latest.sequence(), 2);
    }

    #[tokio::test]
    async fn pump_aborts_on_oversized_unmatched_buffer() {
        let mut p = pipeline(FrameBroadcaster::new(), 64);
        let reader = tokio_test::io::Builder::new()
            .read(b"\xff\xd8\xff\xe0")
            .read(&[0x42; 100])
            .build();

        let err = p.pump(reader).await.unwrap_err();
        assert!(matches!(err, StreamError::BufferOverflow { size: 104, max: 64 }));
        assert_eq!(p.extractor.pending(), 0);
    }

    #[tokio::test]
    async fn pump_surfaces_read_errors() {
        let mut p = pipeline(FrameBroadcaster::new(), 1024);
        let reader = tokio_test::io::Builder::new()
            .read(b"\xff\xd8")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();

        let err = p.pump(reader).await.unwrap_err();
        assert!(matches!(err, StreamError::Io(_)));
    }

    #[test]
    fn default_config_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.max_pending, 10 * 1024 * 1024);
        assert!(cfg.reconnect_delay.is_none());
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "Streaming");
        let failed = SessionState::Failed {
            reason: "boom".into(),
        };
        assert!(failed.is_failed());
        assert!(failed.is_terminal());
        assert_eq!(failed.to_string(), "Failed (boom)");
    }
}
