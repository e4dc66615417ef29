// Message types — the relay messages exchanged between directly linked devices

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag byte of a new-connection announcement
pub const TAG_NEW_CONNECTION: u8 = b'c';
/// Tag byte of a disconnect notice
pub const TAG_DISCONNECTED: u8 = b'd';
/// Tag byte of the guest-ready notice
pub const TAG_GUEST_READY: u8 = b'n';
/// Tag byte of an intermediate score
pub const TAG_INTERMEDIATE_SCORE: u8 = b'i';
/// Tag byte of a final score
pub const TAG_FINAL_SCORE: u8 = b'f';

/// Subject id a device uses when broadcasting its own score.
///
/// A device does not know the endpoint id the transport assigned to it, so
/// receivers attribute a score carrying this subject to the sender.
pub const SELF_SUBJECT: &str = "Broadcast_me";

/// A score update for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorePayload {
    /// Endpoint the score belongs to (or [`SELF_SUBJECT`])
    pub endpoint_id: String,
    pub score: u32,
    /// True once the round is over for that player
    pub is_final: bool,
}

impl ScorePayload {
    pub fn new(endpoint_id: impl Into<String>, score: u32, is_final: bool) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            score,
            is_final,
        }
    }

    /// Whether the sender is reporting its own score
    pub fn is_self_report(&self) -> bool {
        self.endpoint_id == SELF_SUBJECT
    }

    pub fn tag(&self) -> u8 {
        if self.is_final {
            TAG_FINAL_SCORE
        } else {
            TAG_INTERMEDIATE_SCORE
        }
    }
}

/// Relay protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// A host announces an endpoint that joined (or was already joined)
    NewConnection(String),
    /// A host announces that one of its guests went away
    Disconnected(String),
    /// A guest is ready to receive the host's peer list
    GuestReady,
    /// Intermediate or final score
    Score(ScorePayload),
}

impl RelayMessage {
    pub fn tag(&self) -> u8 {
        match self {
            RelayMessage::NewConnection(_) => TAG_NEW_CONNECTION,
            RelayMessage::Disconnected(_) => TAG_DISCONNECTED,
            RelayMessage::GuestReady => TAG_GUEST_READY,
            RelayMessage::Score(score) => score.tag(),
        }
    }
}

impl fmt::Display for RelayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMessage::NewConnection(id) => write!(f, "NewConnection({})", id),
            RelayMessage::Disconnected(id) => write!(f, "Disconnected({})", id),
            RelayMessage::GuestReady => write!(f, "GuestReady"),
            RelayMessage::Score(s) => write!(
                f,
                "{}Score {{ endpoint: {}, score: {} }}",
                if s.is_final { "Final" } else { "Intermediate" },
                s.endpoint_id,
                s.score
            ),
        }
    }
}
