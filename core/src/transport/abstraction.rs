//! Transport abstraction layer for quizmesh
//!
//! Defines the connection service the relay tracker talks to and the events
//! it delivers back. Every call is fire-and-forget: an `Err` only means the
//! request was refused outright, outcomes arrive later as [`TransportEvent`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Outcome of a start-advertising request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertisingStatus {
    Success,
    AlreadyAdvertising,
    NetworkNotConnected,
    Internal,
}

impl AdvertisingStatus {
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            AdvertisingStatus::Success | AdvertisingStatus::AlreadyAdvertising
        )
    }
}

/// Outcome of an outgoing connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Accepted,
    Rejected,
    /// The remote endpoint is not reachable
    EndpointNotConnected,
    Internal,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Accepted => write!(f, "ACCEPTED"),
            ConnectionStatus::Rejected => write!(f, "REJECTED"),
            ConnectionStatus::EndpointNotConnected => write!(f, "ENDPOINT_NOT_CONNECTED"),
            ConnectionStatus::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// An advertiser seen during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDetails {
    pub endpoint_id: String,
    pub name: String,
    pub service_id: String,
}

/// Events from the transport to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// Result of `start_advertising`
    AdvertisingResult {
        status: AdvertisingStatus,
        local_endpoint_name: String,
    },
    /// A discovering device asks to connect to us
    ConnectionRequest {
        endpoint_id: String,
        endpoint_name: String,
        payload: Vec<u8>,
    },
    /// Answer to our `send_connection_request`
    ConnectionResponse {
        endpoint_id: String,
        status: ConnectionStatus,
        payload: Vec<u8>,
    },
    /// Discovery found an advertiser
    EndpointFound(EndpointDetails),
    /// An advertiser found earlier is gone
    EndpointLost { endpoint_id: String },
    /// Payload from a linked endpoint
    MessageReceived {
        endpoint_id: String,
        payload: Vec<u8>,
        reliable: bool,
    },
    /// A linked endpoint went away
    Disconnected { endpoint_id: String },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::AdvertisingResult { status, .. } => {
                write!(f, "AdvertisingResult {{ status: {:?} }}", status)
            }
            TransportEvent::ConnectionRequest { endpoint_id, .. } => {
                write!(f, "ConnectionRequest {{ endpoint: {} }}", endpoint_id)
            }
            TransportEvent::ConnectionResponse {
                endpoint_id,
                status,
                ..
            } => write!(
                f,
                "ConnectionResponse {{ endpoint: {}, status: {} }}",
                endpoint_id, status
            ),
            TransportEvent::EndpointFound(details) => {
                write!(f, "EndpointFound {{ endpoint: {} }}", details.endpoint_id)
            }
            TransportEvent::EndpointLost { endpoint_id } => {
                write!(f, "EndpointLost {{ endpoint: {} }}", endpoint_id)
            }
            TransportEvent::MessageReceived {
                endpoint_id,
                payload,
                reliable,
            } => write!(
                f,
                "MessageReceived {{ endpoint: {}, data_len: {}, reliable: {} }}",
                endpoint_id,
                payload.len(),
                reliable
            ),
            TransportEvent::Disconnected { endpoint_id } => {
                write!(f, "Disconnected {{ endpoint: {} }}", endpoint_id)
            }
        }
    }
}

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Not connected to endpoint: {0}")]
    NotConnected(String),

    #[error("No pending connection request from: {0}")]
    NoPendingRequest(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport stopped")]
    Stopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The connection/discovery/messaging service the session is driven by
///
/// A zero `Duration` means "until `stop` is called".
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionTransport: Send + Sync {
    /// Advertise under `app_identifiers`; answered by `AdvertisingResult`,
    /// followed by a `ConnectionRequest` per discovering peer
    fn start_advertising(
        &self,
        name: &str,
        app_identifiers: &[String],
        duration: Duration,
    ) -> Result<(), TransportError>;

    /// Look for advertisers of `service_id`; answered by `EndpointFound`/`EndpointLost`
    fn start_discovery(&self, service_id: &str, duration: Duration) -> Result<(), TransportError>;

    /// Ask an advertiser to link; answered by `ConnectionResponse`
    fn send_connection_request(
        &self,
        name: &str,
        endpoint_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    fn accept_connection_request(
        &self,
        endpoint_id: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    fn reject_connection_request(&self, endpoint_id: &str) -> Result<(), TransportError>;

    fn send_reliable(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), TransportError>;

    fn send_reliable_to_many(
        &self,
        endpoint_ids: &[String],
        payload: &[u8],
    ) -> Result<(), TransportError>;

    fn send_unreliable(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Stop advertising and discovery and drop every link
    fn stop(&self);
}
