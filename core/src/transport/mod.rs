// Transport module — connection service abstraction and the in-process hub

pub mod abstraction;
pub mod local;

pub use abstraction::{
    AdvertisingStatus, ConnectionStatus, ConnectionTransport, EndpointDetails, TransportError,
    TransportEvent,
};
pub use local::{EventReceiver, LocalHub, LocalTransport};
