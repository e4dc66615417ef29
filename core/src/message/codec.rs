// Message codec — the one-byte-tag wire format used between linked devices
//
// Score layout: <tag><idlen: 2 decimal digits><id bytes><score decimal digits>

use super::types::{
    RelayMessage, ScorePayload, TAG_DISCONNECTED, TAG_FINAL_SCORE, TAG_GUEST_READY,
    TAG_INTERMEDIATE_SCORE, TAG_NEW_CONNECTION,
};
use thiserror::Error;

/// Longest endpoint id that fits the two-digit length field
pub const MAX_ENDPOINT_ID_LEN: usize = 99;

/// Tag plus the two length digits
const SCORE_HEADER_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Endpoint id is empty")]
    EmptyEndpointId,

    #[error("Endpoint id too long: {0} bytes (max 99)")]
    EndpointIdTooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Unknown payload tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Not a score payload: tag {0:#04x}")]
    NotAScore(u8),

    #[error("Truncated payload: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Endpoint id length field is not two decimal digits")]
    InvalidLengthField,

    #[error("Endpoint id is empty")]
    EmptyEndpointId,

    #[error("Endpoint id is not valid UTF-8")]
    InvalidEndpointId,

    #[error("Score digits missing")]
    MissingScore,

    #[error("Score does not fit in 32 bits")]
    ScoreOverflow,

    #[error("Unexpected {0} trailing bytes after score")]
    TrailingBytes(usize),

    #[error("Guest-ready notice carries {0} unexpected bytes")]
    UnexpectedBody(usize),
}

fn check_endpoint_id(endpoint_id: &str) -> Result<(), EncodeError> {
    if endpoint_id.is_empty() {
        return Err(EncodeError::EmptyEndpointId);
    }
    if endpoint_id.len() > MAX_ENDPOINT_ID_LEN {
        return Err(EncodeError::EndpointIdTooLong(endpoint_id.len()));
    }
    Ok(())
}

/// Build a score payload, e.g. `("E1", 7, false)` -> `b"i02E17"`
pub fn build_score_payload(
    score: u32,
    endpoint_id: &str,
    is_final: bool,
) -> Result<Vec<u8>, EncodeError> {
    check_endpoint_id(endpoint_id)?;

    let tag = if is_final {
        TAG_FINAL_SCORE
    } else {
        TAG_INTERMEDIATE_SCORE
    };
    let text = format!("{:02}{}{}", endpoint_id.len(), endpoint_id, score);

    let mut payload = Vec::with_capacity(1 + text.len());
    payload.push(tag);
    payload.extend_from_slice(text.as_bytes());
    Ok(payload)
}

fn decode_length_field(hi: u8, lo: u8) -> Result<usize, DecodeError> {
    if !hi.is_ascii_digit() || !lo.is_ascii_digit() {
        return Err(DecodeError::InvalidLengthField);
    }
    Ok(((hi - b'0') * 10 + (lo - b'0')) as usize)
}

fn decode_score_digits(bytes: &[u8]) -> Result<u32, DecodeError> {
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(DecodeError::MissingScore);
    }
    if digits < bytes.len() {
        return Err(DecodeError::TrailingBytes(bytes.len() - digits));
    }

    bytes.iter().try_fold(0u32, |acc, b| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u32::from(b - b'0')))
            .ok_or(DecodeError::ScoreOverflow)
    })
}

/// Decode a score payload built by [`build_score_payload`]
pub fn decode_score_payload(bytes: &[u8]) -> Result<ScorePayload, DecodeError> {
    let tag = *bytes.first().ok_or(DecodeError::Empty)?;
    let is_final = match tag {
        TAG_INTERMEDIATE_SCORE => false,
        TAG_FINAL_SCORE => true,
        other => return Err(DecodeError::NotAScore(other)),
    };

    if bytes.len() < SCORE_HEADER_LEN {
        return Err(DecodeError::Truncated {
            needed: SCORE_HEADER_LEN,
            actual: bytes.len(),
        });
    }
    let id_len = decode_length_field(bytes[1], bytes[2])?;
    if id_len == 0 {
        return Err(DecodeError::EmptyEndpointId);
    }

    let id_end = SCORE_HEADER_LEN + id_len;
    if bytes.len() < id_end {
        return Err(DecodeError::Truncated {
            needed: id_end,
            actual: bytes.len(),
        });
    }
    let endpoint_id = std::str::from_utf8(&bytes[SCORE_HEADER_LEN..id_end])
        .map_err(|_| DecodeError::InvalidEndpointId)?
        .to_string();
    let score = decode_score_digits(&bytes[id_end..])?;

    Ok(ScorePayload {
        endpoint_id,
        score,
        is_final,
    })
}

fn tagged_id(tag: u8, endpoint_id: &str) -> Result<Vec<u8>, EncodeError> {
    if endpoint_id.is_empty() {
        return Err(EncodeError::EmptyEndpointId);
    }
    let mut payload = Vec::with_capacity(1 + endpoint_id.len());
    payload.push(tag);
    payload.extend_from_slice(endpoint_id.as_bytes());
    Ok(payload)
}

fn decode_id_body(body: &[u8]) -> Result<String, DecodeError> {
    if body.is_empty() {
        return Err(DecodeError::EmptyEndpointId);
    }
    std::str::from_utf8(body)
        .map(str::to_string)
        .map_err(|_| DecodeError::InvalidEndpointId)
}

/// Serialize a relay message to its wire bytes
pub fn encode_message(msg: &RelayMessage) -> Result<Vec<u8>, EncodeError> {
    match msg {
        RelayMessage::NewConnection(id) => tagged_id(TAG_NEW_CONNECTION, id),
        RelayMessage::Disconnected(id) => tagged_id(TAG_DISCONNECTED, id),
        RelayMessage::GuestReady => Ok(vec![TAG_GUEST_READY]),
        RelayMessage::Score(s) => build_score_payload(s.score, &s.endpoint_id, s.is_final),
    }
}

/// Parse wire bytes into a relay message
pub fn decode_message(bytes: &[u8]) -> Result<RelayMessage, DecodeError> {
    let (&tag, body) = bytes.split_first().ok_or(DecodeError::Empty)?;
    match tag {
        TAG_NEW_CONNECTION => Ok(RelayMessage::NewConnection(decode_id_body(body)?)),
        TAG_DISCONNECTED => Ok(RelayMessage::Disconnected(decode_id_body(body)?)),
        TAG_GUEST_READY => {
            if body.is_empty() {
                Ok(RelayMessage::GuestReady)
            } else {
                Err(DecodeError::UnexpectedBody(body.len()))
            }
        }
        TAG_INTERMEDIATE_SCORE | TAG_FINAL_SCORE => {
            Ok(RelayMessage::Score(decode_score_payload(bytes)?))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}
