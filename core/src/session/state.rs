//! Session state machine
//!
//! Transitions:
//!
//! | from                          | event            | to              |
//! |-------------------------------|------------------|-----------------|
//! | Idle, Failed, Advertising     | StartAdvertising | Advertising     |
//! | Idle, Failed, Discovering     | StartDiscovery   | Discovering     |
//! | Advertising, Connected(Host)  | PeerConnected    | Connected(Host) |
//! | Discovering, Connected(Guest) | PeerConnected    | Connected(Guest)|
//! | Connected(Host)               | AllPeersLost     | Advertising     |
//! | Connected(Guest)              | AllPeersLost     | Discovering     |
//! | Advertising, Discovering, Connected(_) | TransportFailed | Failed |
//! | any                           | Stop             | Idle            |

use crate::config::ConfigError;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which side of its links the local device is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Advertised and accepted the links
    Host,
    /// Discovered and requested the link
    Guest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Advertising,
    Discovering,
    Connected(Role),
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Advertising => write!(f, "Advertising"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Connected(Role::Host) => write!(f, "Connected (host)"),
            Self::Connected(Role::Guest) => write!(f, "Connected (guest)"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    StartAdvertising,
    StartDiscovery,
    PeerConnected,
    AllPeersLost,
    TransportFailed,
    Stop,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid transition: {event:?} while {from}")]
    InvalidTransition { from: SessionState, event: SessionEvent },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SessionState {
    /// Next state for `event`, or an error if the table has no such edge
    pub fn next(self, event: SessionEvent) -> Result<SessionState, SessionError> {
        use SessionEvent::*;
        use SessionState::*;

        let to = match (self, event) {
            (_, Stop) => Idle,
            (Idle | Failed | Advertising, StartAdvertising) => Advertising,
            (Idle | Failed | Discovering, StartDiscovery) => Discovering,
            (Advertising | Connected(Role::Host), PeerConnected) => Connected(Role::Host),
            (Discovering | Connected(Role::Guest), PeerConnected) => Connected(Role::Guest),
            (Connected(Role::Host), AllPeersLost) => Advertising,
            (Connected(Role::Guest), AllPeersLost) => Discovering,
            (Advertising | Discovering | Connected(_), TransportFailed) => Failed,
            (from, event) => return Err(SessionError::InvalidTransition { from, event }),
        };
        Ok(to)
    }

    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected(_))
    }

    /// Whether the advertising side is (still) active
    pub fn is_advertising(self) -> bool {
        matches!(
            self,
            SessionState::Advertising | SessionState::Connected(Role::Host)
        )
    }

    pub fn is_discovering(self) -> bool {
        matches!(
            self,
            SessionState::Discovering | SessionState::Connected(Role::Guest)
        )
    }
}
