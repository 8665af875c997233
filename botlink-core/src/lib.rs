//! # botlink-core
//!
//! Core library for the robot relay: one upstream MJPEG camera feed fanned
//! out to any number of viewers, plus a line-oriented TCP control channel.
//!
//! ```text
//!  camera ──HTTP──► StreamSession ──► FrameExtractor ──► FrameBroadcaster ──► Subscribers
//!
//!  buttons ──► RepeatDriver ──► CommandChannel ──TCP──► robot
//! ```
//!
//! This crate contains:
//! - **Frames**: `Frame`, `FrameExtractor` (SOI/EOI scanning)
//! - **Fan-out**: `FrameBroadcaster` with latest-frame-wins subscribers
//! - **Session**: `StreamSession` owning the upstream HTTP read loop
//! - **Output**: `MjpegPartEncoder` for `multipart/x-mixed-replace` bodies
//! - **Control**: `CommandChannel`, `RepeatDriver`, `Command`
//! - **Error**: `thiserror`-based error enums per component

pub mod broadcast;
pub mod channel;
pub mod command;
pub mod error;
pub mod extractor;
pub mod frame;
pub mod multipart;
pub mod repeat;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────

pub use broadcast::{FrameBroadcaster, Subscriber, SubscriberId};
pub use channel::{
    ChannelConfig, ChannelStatus, CommandChannel, CommandStats, ConnectionState, StatusSnapshot,
};
pub use command::{Command, Request, UnknownCommand};
pub use error::{
    BotlinkError, ConnectError, ConnectErrorKind, SendError, SendErrorKind, StreamError,
};
pub use extractor::FrameExtractor;
pub use frame::Frame;
pub use multipart::{MjpegPartEncoder, encode_part};
pub use repeat::{CommandSink, RepeatDriver, RepeatState};
pub use session::{SessionConfig, SessionHandle, SessionState, SessionStats, StreamSession};
