// Session module — relay tracker, session state machine, event dispatch and quiz round

pub mod node;
pub mod round;
pub mod state;
pub mod tracker;

pub use node::SessionNode;
pub use state::{Role, SessionError, SessionEvent, SessionState};
pub use tracker::{EndpointRecord, RoundTick, SessionRelayTracker};
