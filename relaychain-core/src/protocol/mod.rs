//! Wire protocol between relay clients and the server
//!
//! A session is a sequence of length-prefixed frames:
//!
//! ```text
//! client -> identity, username
//! loop {
//!   client -> action
//!   send_message:      client -> receiver, ciphertext   server -> reply text
//!   retrieve_messages:                                  server -> JSON array
//!   anything else:                                      server -> reply text
//! }
//! ```
//!
//! The client ends the session by closing its write half at an action
//! boundary.

mod error;
mod frame;

pub use error::ProtocolError;
pub use frame::{read_field, read_frame, write_frame, LENGTH_PREFIX_LEN};

use crate::config::ProtocolConfig;

/// Hard ceiling on any frame, including server replies
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reply to an accepted `send_message`
pub const SEND_ACK: &str = "Message added to the ledger.";
/// Reply to an unrecognized action token
pub const INVALID_ACTION: &str = "Invalid action requested.";
/// Reply when an action failed on the server side; the session continues
pub const ACTION_FAILED: &str = "An error occurred.";
/// Last frame sent before closing a session over a malformed request
pub const MALFORMED_REQUEST: &str = "Malformed request.";

/// Recognized action tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SendMessage,
    RetrieveMessages,
}

impl Action {
    /// Parse an exact, case-sensitive action token
    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"send_message" => Some(Action::SendMessage),
            b"retrieve_messages" => Some(Action::RetrieveMessages),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SendMessage => "send_message",
            Action::RetrieveMessages => "retrieve_messages",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field inbound limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub identity: usize,
    pub username: usize,
    pub action: usize,
    pub ciphertext: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        FrameLimits::from(&ProtocolConfig::default())
    }
}

impl From<&ProtocolConfig> for FrameLimits {
    fn from(config: &ProtocolConfig) -> Self {
        FrameLimits {
            identity: config.max_identity_len,
            username: config.max_username_len,
            action: config.max_action_len,
            ciphertext: config.max_ciphertext_len,
        }
    }
}
