//! Shared relay state: one broadcaster, one upstream session, one control
//! channel and the held-button driver, wired together from [`RelayConfig`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use botlink_core::{
    BotlinkError, Command, CommandChannel, FrameBroadcaster, RepeatDriver, Request, SendError,
    SessionHandle, StatusSnapshot, StreamError, StreamSession, Subscriber,
};

use crate::config::RelayConfig;

const NOT_CONNECTED: &str = "Not connected to robot";

// ── Wire types ───────────────────────────────────────────────────

/// Button edge attached to a command request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    Press,
    Release,
}

/// Body of `POST /api/command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub button_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub action: Option<ButtonAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Reply to every command request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status_info: StatusSnapshot,
}

// ── Relay ────────────────────────────────────────────────────────

struct Relay {
    config: RelayConfig,
    session: StreamSession,
    video: Mutex<Option<SessionHandle>>,
    channel: Arc<CommandChannel>,
    driver: Mutex<Option<RepeatDriver>>,
}

/// Cheaply cloneable handle passed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
}

impl AppState {
    /// Build every component. The upstream video is not opened until
    /// [`start_video`](Self::start_video).
    pub fn new(config: RelayConfig) -> Result<Self, StreamError> {
        let session = StreamSession::new(FrameBroadcaster::new(), config.session_config())?;
        let channel = Arc::new(CommandChannel::new(config.channel_config()));
        let driver = RepeatDriver::with_interval(Arc::clone(&channel), config.repeat_interval());

        Ok(Self {
            relay: Arc::new(Relay {
                config,
                session,
                video: Mutex::new(None),
                channel,
                driver: Mutex::new(Some(driver)),
            }),
        })
    }

    pub fn broadcaster(&self) -> &FrameBroadcaster {
        self.relay.session.broadcaster()
    }

    /// Attach a new viewer to the relayed feed.
    pub fn subscribe(&self) -> Subscriber {
        self.broadcaster().subscribe()
    }

    /// Open the upstream video feed. A no-op if it is already running.
    pub async fn start_video(&self) {
        let mut video = self.relay.video.lock().await;
        if video.is_none() {
            let url = &self.relay.config.network.video_url;
            info!("relaying video from {url}");
            *video = Some(self.relay.session.start(url.as_str()));
        }
    }

    pub async fn connect_robot(&self) -> Result<(), BotlinkError> {
        let net = &self.relay.config.network;
        self.relay
            .channel
            .connect(&net.robot_host, net.robot_port)
            .await?;
        Ok(())
    }

    pub fn status(&self) -> StatusSnapshot {
        self.relay.channel.snapshot()
    }

    /// Dispatch one `POST /api/command` request.
    pub async fn handle_command(&self, req: CommandRequest) -> CommandResponse {
        info!(
            command = %req.command,
            button = req.button_id.as_deref().unwrap_or("-"),
            action = ?req.action,
            "command request"
        );

        let result = match Request::parse(&req.command) {
            Request::Connect => self.connect_robot().await.map(|()| None),
            Request::Disconnect => {
                // Stop any held motion while the socket is still open.
                self.release().await;
                self.relay.channel.disconnect().await;
                Ok(None)
            }
            Request::Forward(command) => match req.action {
                Some(ButtonAction::Press) => self.press(command).await,
                Some(ButtonAction::Release) => {
                    self.release().await;
                    Ok(Some("Command released".to_string()))
                }
                None => self.send_once(&command).await,
            },
        };

        let (status, message) = match result {
            Ok(message) => (ResponseStatus::Success, message),
            Err(e) => {
                warn!("command {:?} failed: {e}", req.command);
                (ResponseStatus::Error, Some(error_message(&e)))
            }
        };

        CommandResponse {
            status,
            message,
            status_info: self.status(),
        }
    }

    async fn send_once(&self, command: &str) -> Result<Option<String>, BotlinkError> {
        self.relay.channel.send(command).await?;
        Ok(Some("Command sent".to_string()))
    }

    /// Hold a movement command. Anything else is sent once: only motion
    /// is repeated and stopped.
    async fn press(&self, command: String) -> Result<Option<String>, BotlinkError> {
        let continuous = command.parse::<Command>().is_ok_and(Command::is_continuous);
        if !continuous {
            return self.send_once(&command).await;
        }
        if !self.relay.channel.is_connected() {
            return Err(SendError::NotConnected.into());
        }
        let driver = self.relay.driver.lock().await;
        let Some(driver) = driver.as_ref() else {
            return Err(BotlinkError::ChannelClosed);
        };
        driver.press(command).await?;
        Ok(Some("Command held".to_string()))
    }

    /// Returns once any trailing `stop` has been written.
    async fn release(&self) {
        let driver = self.relay.driver.lock().await;
        let Some(driver) = driver.as_ref() else {
            return;
        };
        let timeout = self.relay.config.connect_timeout();
        match tokio::time::timeout(timeout, driver.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("release not delivered: {e}"),
            Err(_) => warn!("timed out waiting for held command to stop"),
        }
    }

    /// Stop held motion, end all viewer streams, stop the upstream session
    /// and close the control socket.
    pub async fn shutdown(&self) {
        info!("shutting down relay");
        let driver = self.relay.driver.lock().await.take();
        if let Some(driver) = driver {
            driver.shutdown().await;
        }

        self.broadcaster().close();

        let video = self.relay.video.lock().await.take();
        if let Some(video) = video {
            video.stop().await;
        }

        self.relay.channel.disconnect().await;
        info!("relay stopped");
    }
}

fn error_message(err: &BotlinkError) -> String {
    match err {
        BotlinkError::Send(SendError::NotConnected) => NOT_CONNECTED.to_string(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────
