// Message module — relay message types and the tagged wire codec

pub mod codec;
pub mod types;

pub use codec::{
    build_score_payload, decode_message, decode_score_payload, encode_message, DecodeError,
    EncodeError, MAX_ENDPOINT_ID_LEN,
};
pub use types::{RelayMessage, ScorePayload, SELF_SUBJECT};
