//! Playback control of a pipe source through its own player API.
//!
//! While a pipe plays, OwnTone only reads the pipe, so transport commands
//! have to reach the program writing into it. `librespot-java` exposes
//! `POST /player/{command}`.

use crate::error::OwnToneError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeCommand {
    Play,
    Pause,
    Next,
    Previous,
}

impl PipeCommand {
    fn path(self) -> &'static str {
        match self {
            Self::Play => "resume",
            Self::Pause => "pause",
            Self::Next => "next",
            Self::Previous => "prev",
        }
    }
}

/// librespot-java API client.
#[derive(Debug, Clone)]
pub struct LibrespotJava {
    http: reqwest::Client,
    base_url: String,
}

impl LibrespotJava {
    #[must_use]
    pub fn new(http: reqwest::Client, host: &str, port: u16) -> Self {
        Self {
            http,
            base_url: format!("http://{host}:{port}"),
        }
    }

    /// # Errors
    ///
    /// Any transport error or a non-success status.
    pub async fn send(&self, command: PipeCommand) -> Result<(), OwnToneError> {
        let path = format!("player/{}", command.path());
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(OwnToneError::Status {
                status: response.status().as_u16(),
                path,
            })
        }
    }
}
