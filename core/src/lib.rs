// quizmesh core — session relay for a nearby multiplayer quiz
//
// One host advertises, guests discover and link to it. The host relays
// who joined, who left and every score, so each device ends up with the
// whole scoreboard while only host<->guest links exist.

pub mod config;
pub mod message;
pub mod session;
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use message::{
    build_score_payload, decode_message, decode_score_payload, encode_message, DecodeError,
    EncodeError, RelayMessage, ScorePayload, SELF_SUBJECT,
};
pub use session::{
    EndpointRecord, Role, RoundTick, SessionError, SessionEvent, SessionNode,
    SessionRelayTracker, SessionState,
};
pub use transport::{
    AdvertisingStatus, ConnectionStatus, ConnectionTransport, EndpointDetails, EventReceiver,
    LocalHub, LocalTransport, TransportError, TransportEvent,
};
