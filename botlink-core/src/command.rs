//! Robot command vocabulary.
//!
//! The control socket treats commands as opaque text lines; this module
//! only names the ones the front-ends know about and separates the
//! lifecycle pseudo-commands (`connect`, `disconnect`), which the
//! [`CommandChannel`](crate::CommandChannel) handles itself, from commands
//! that go out on the wire.

use std::fmt;
use std::str::FromStr;

// ── Command ──────────────────────────────────────────────────────

/// Commands understood by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── Posture ──────────────────────────────────────────────────
    StandUp,
    SitDown,
    /// Halt all motion. Always sent when a held command is released.
    Stop,

    // ── Motion (held-button) ─────────────────────────────────────
    Forward,
    Backward,
    Left,
    Right,
    TurnLeft,
    TurnRight,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::StandUp,
        Command::SitDown,
        Command::Stop,
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::TurnLeft,
        Command::TurnRight,
    ];

    /// Wire spelling, without the line terminator.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::StandUp => "stand_up",
            Command::SitDown => "sit_down",
            Command::Stop => "stop",
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::Left => "left",
            Command::Right => "right",
            Command::TurnLeft => "turn_left",
            Command::TurnRight => "turn_right",
        }
    }

    /// Directional commands are repeated while their button is held.
    pub fn is_continuous(self) -> bool {
        matches!(
            self,
            Command::Forward
                | Command::Backward
                | Command::Left
                | Command::Right
                | Command::TurnLeft
                | Command::TurnRight
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not part of the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

// ── Request ──────────────────────────────────────────────────────

/// An incoming command string, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect,
    Disconnect,
    /// Anything else is forwarded verbatim; unknown strings included.
    Forward(String),
}

impl Request {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "connect" => Request::Connect,
            "disconnect" => Request::Disconnect,
            other => Request::Forward(other.to_string()),
        }
    }
}
