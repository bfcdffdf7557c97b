//! Commands and responses carried inside frames.

use std::fmt;

/// Highest volume step the amplifier accepts.
pub const MAX_VOLUME: u8 = 80;

/// A command; `None` asks for the current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Power(Option<bool>),
    Volume(Option<u8>),
    Mute(Option<bool>),
    Source(Option<String>),
}

impl Command {
    /// Sent after every (re)connect to learn the full state.
    pub const QUERIES: [Command; 4] = [
        Command::Power(None),
        Command::Volume(None),
        Command::Mute(None),
        Command::Source(None),
    ];
}

fn on_off(value: bool) -> &'static str {
    if value { "ON" } else { "OFF" }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Power(None) => f.write_str("POWER ?"),
            Self::Power(Some(on)) => write!(f, "POWER {}", on_off(*on)),
            Self::Volume(None) => f.write_str("VOL ?"),
            Self::Volume(Some(volume)) => write!(f, "VOL {}", (*volume).min(MAX_VOLUME)),
            Self::Mute(None) => f.write_str("MUTE ?"),
            Self::Mute(Some(muted)) => write!(f, "MUTE {}", on_off(*muted)),
            Self::Source(None) => f.write_str("SI ?"),
            Self::Source(Some(source)) => write!(f, "SI {source}"),
        }
    }
}

/// State reported by the amplifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Power(bool),
    Volume(u8),
    Mute(bool),
    Source(String),
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value {
        "ON" => Some(true),
        "OFF" => Some(false),
        _ => None,
    }
}

impl Response {
    /// `None` for frames that are not a known state report.
    #[must_use]
    pub fn parse(frame: &str) -> Option<Self> {
        let (keyword, value) = frame.trim().split_once(' ')?;
        let value = value.trim();
        match keyword {
            "POWER" => parse_on_off(value).map(Self::Power),
            "VOL" => value
                .parse::<u8>()
                .ok()
                .filter(|volume| *volume <= MAX_VOLUME)
                .map(Self::Volume),
            "MUTE" => parse_on_off(value).map(Self::Mute),
            "SI" if !value.is_empty() && value != "?" => Some(Self::Source(value.to_string())),
            _ => None,
        }
    }
}
