//! Held-button command repetition.
//!
//! A directional button on the front-end produces two edges: press and
//! release. [`RepeatDriver`] turns them into a command stream:
//!
//! ```text
//!  press(C)           ──► send C, then C every interval
//!  press(D) while C   ──► stop repeating C, send "stop", then as press(D)
//!  release            ──► stop repeating, send "stop"
//!  input lost (drop)  ──► same as release
//! ```
//!
//! The trailing `stop` is unconditional: the robot must never keep
//! moving after the button that started it is gone. [`RepeatDriver::release`]
//! returns only after the driver has handled the release, so a caller
//! may close the sink right after it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::error::{BotlinkError, SendError};

/// Default resend cadence while a button is held.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(100);

// ── CommandSink ──────────────────────────────────────────────────

/// Anything that can deliver a command line to the robot.
#[async_trait]
pub trait CommandSink: Send + Sync + 'static {
    async fn send_command(&self, command: &str) -> Result<(), SendError>;
}

// ── Events / state ───────────────────────────────────────────────

/// Edge-triggered input delivered to the driver.
#[derive(Debug)]
enum InputEvent {
    Press(String),
    /// Answered once the release is handled, trailing `stop` included.
    Release(oneshot::Sender<()>),
}

/// Whether a command is currently being repeated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RepeatState {
    #[default]
    Idle,
    Repeating { command: String },
}

impl RepeatState {
    pub fn active_command(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Repeating { command } => Some(command),
        }
    }
}

// ── RepeatDriver ─────────────────────────────────────────────────

/// Owns the repeat task. Dropping the driver counts as losing input: the
/// task sends `stop` if it was repeating and exits.
#[derive(Debug)]
pub struct RepeatDriver {
    tx: mpsc::Sender<InputEvent>,
    state_rx: watch::Receiver<RepeatState>,
    task: JoinHandle<()>,
}

impl RepeatDriver {
    /// Spawn a driver resending at [`DEFAULT_REPEAT_INTERVAL`].
    pub fn spawn<S: CommandSink>(sink: Arc<S>) -> Self {
        Self::with_interval(sink, DEFAULT_REPEAT_INTERVAL)
    }

    pub fn with_interval<S: CommandSink>(sink: Arc<S>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(RepeatState::Idle);
        let task = tokio::spawn(
            Actor {
                sink,
                interval,
                state_tx,
            }
            .run(rx),
        );
        Self { tx, state_rx, task }
    }

    /// Button went down.
    pub async fn press(&self, command: impl Into<String>) -> Result<(), BotlinkError> {
        self.tx.send(InputEvent::Press(command.into())).await?;
        Ok(())
    }

    /// Button went up. Resolves after the trailing `stop` (if one was
    /// due) has been handed to the sink.
    ///
    /// Input is handled in order, so a press queued just before this call
    /// is always stopped by it.
    pub async fn release(&self) -> Result<(), BotlinkError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx.send(InputEvent::Release(done_tx)).await?;
        done_rx.await.map_err(|_| BotlinkError::ChannelClosed)
    }

    pub fn state(&self) -> RepeatState {
        self.state_rx.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<RepeatState> {
        self.state_rx.clone()
    }

    /// Close the input and wait for the task to finish (including the
    /// final `stop`, if one is due).
    pub async fn shutdown(self) {
        let Self { tx, task, .. } = self;
        drop(tx);
        if let Err(e) = task.await {
            error!("repeat task ended abnormally: {e}");
        }
    }
}

// ── Actor ────────────────────────────────────────────────────────

struct Actor<S: ?Sized> {
    sink: Arc<S>,
    interval: Duration,
    state_tx: watch::Sender<RepeatState>,
}

impl<S: CommandSink + ?Sized> Actor<S> {
    async fn run(self, mut rx: mpsc::Receiver<InputEvent>) {
        let mut active: Option<(String, Interval)> = None;

        loop {
            let event = match &mut active {
                Some((command, ticker)) => tokio::select! {
                    event = rx.recv() => event,
                    _ = ticker.tick() => {
                        self.deliver(command).await;
                        continue;
                    }
                },
                None => rx.recv().await,
            };

            match event {
                Some(InputEvent::Press(command)) => {
                    if let Some((previous, _)) = active.take() {
                        debug!("switching held command {previous} → {command}");
                        self.halt().await;
                    }
                    info!("holding command {command}");
                    self.deliver(&command).await;

                    let mut ticker =
                        tokio::time::interval_at(Instant::now() + self.interval, self.interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.state_tx.send_replace(RepeatState::Repeating {
                        command: command.clone(),
                    });
                    active = Some((command, ticker));
                }
                Some(InputEvent::Release(done)) => {
                    match active.take() {
                        Some((command, _)) => {
                            info!("released command {command}");
                            self.halt().await;
                            self.state_tx.send_replace(RepeatState::Idle);
                        }
                        None => debug!("release while idle ignored"),
                    }
                    let _ = done.send(());
                }
                None => {
                    if let Some((command, _)) = active.take() {
                        warn!("input lost while holding {command}; stopping robot");
                        self.halt().await;
                    }
                    self.state_tx.send_replace(RepeatState::Idle);
                    break;
                }
            }
        }
    }

    async fn deliver(&self, command: &str) {
        if let Err(e) = self.sink.send_command(command).await {
            warn!("repeat send of {command} failed: {e}");
        }
    }

    /// The terminal `stop` after a held command ends.
    async fn halt(&self) {
        self.deliver(Command::Stop.as_str()).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandSink for Recorder {
        async fn send_command(&self, command: &str) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    struct Disconnected;

    #[async_trait]
    impl CommandSink for Disconnected {
        async fn send_command(&self, _command: &str) -> Result<(), SendError> {
            Err(SendError::NotConnected)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn press_then_release_ends_with_single_stop() {
        let sink = Arc::new(Recorder::default());
        let driver = RepeatDriver::spawn(Arc::clone(&sink));

        driver.press("forward").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        driver.release().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        driver.shutdown().await;

        let log = sink.log();
        let (last, forwards) = log.split_last().unwrap();
        assert_eq!(last, "stop");
        assert!(forwards.len() >= 2, "expected repeats, got {log:?}");
        assert!(forwards.iter().all(|c| c == "forward"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeats_at_interval() {
        let sink = Arc::new(Recorder::default());
        let driver = RepeatDriver::spawn(Arc::clone(&sink));

        driver.press("turn_left").await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        // Immediate send plus ticks at 100, 200 and 300 ms.
        assert_eq!(sink.log().len(), 4);
        assert_eq!(driver.state().active_command(), Some("turn_left"));
        driver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_press_stops_previous_command_first() {
        let sink = Arc::new(Recorder::default());
        let driver = RepeatDriver::spawn(Arc::clone(&sink));

        driver.press("forward").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.press("left").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.release().await.unwrap();
        driver.shutdown().await;

        assert_eq!(sink.log(), vec!["forward", "stop", "left", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_input_sends_stop() {
        let sink = Arc::new(Recorder::default());
        let driver = RepeatDriver::spawn(Arc::clone(&sink));

        driver.press("backward").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        driver.shutdown().await;

        assert_eq!(sink.log(), vec!["backward", "stop"]);
    }

    #[tokio::test]
    async fn release_returns_after_stop_is_sent() {
        let sink = Arc::new(Recorder::default());
        let driver = RepeatDriver::with_interval(Arc::clone(&sink), Duration::from_secs(60));

        for _ in 0..20 {
            driver.press("forward").await.unwrap();
            driver.release().await.unwrap();
            // No sleep: the stop must already be recorded.
            assert_eq!(sink.log().last().map(String::as_str), Some("stop"));
            assert_eq!(driver.state(), RepeatState::Idle);
        }
        driver.shutdown().await;

        let log = sink.log();
        assert_eq!(log.len(), 40);
        assert!(log.chunks(2).all(|pair| pair == ["forward", "stop"]));
    }

    #[tokio::test]
    async fn release_fails_once_task_is_gone() {
        let sink = Arc::new(Recorder::default());
        let mut driver = RepeatDriver::spawn(Arc::clone(&sink));
        driver.task.abort();
        let _ = (&mut driver.task).await;

        assert!(matches!(
            driver.release().await,
            Err(BotlinkError::ChannelClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn release_while_idle_sends_nothing() {
        let sink = Arc::new(Recorder::default());
        let driver = RepeatDriver::spawn(Arc::clone(&sink));

        driver.release().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(driver.state(), RepeatState::Idle);
        driver.shutdown().await;

        assert!(sink.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_do_not_kill_driver() {
        let driver = RepeatDriver::spawn(Arc::new(Disconnected));
        driver.press("right").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        driver.release().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(driver.state(), RepeatState::Idle);
        driver.shutdown().await;
    }
}
