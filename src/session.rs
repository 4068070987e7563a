//! HTTP-backed session collaborator.
//!
//! The engine itself never talks to the network; the one lookup it needs
//! (profile pictures) goes through [`ProfilePictureSource`].  This module
//! provides the implementation for hosts that expose the messaging session's
//! picture lookup over local HTTP, e.g. a sidecar holding the live socket.
//!
//! Responses are expected as `{"url": "https://..."}` with a missing or null
//! `url` meaning the contact has no picture.

use std::time::Duration;

use serde::Deserialize;

use crate::logging;
use crate::mlog;
use crate::store::ProfilePictureSource;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct PictureResponse {
    url: Option<String>,
}

/// Fetches profile-picture URLs from a session endpoint over HTTP.
///
/// Timeouts are deliberately tight: the engine calls this inline while
/// applying a `contacts.update`, and a hung fetch would stall every event
/// behind it.
pub struct HttpProfilePictureSource {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpProfilePictureSource {
    /// `base_url` is the session endpoint root, e.g. `http://127.0.0.1:3020`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }
}

impl ProfilePictureSource for HttpProfilePictureSource {
    fn profile_picture_url(&self, jid: &str) -> Option<String> {
        let url = format!(
            "{}/profile-picture/{jid}",
            self.base_url.trim_end_matches('/')
        );
        match self.agent.get(&url).call() {
            Ok(response) => response
                .into_json::<PictureResponse>()
                .ok()
                .and_then(|picture| picture.url),
            Err(ureq::Error::Status(404, _)) => None,
            Err(err) => {
                mlog!(
                    "session: profile picture fetch for {} failed: {err}",
                    logging::jid(jid)
                );
                None
            }
        }
    }
}
