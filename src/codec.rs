//! Relay wire format
//!
//! A reading travels from the wearable to the companion as the UTF-8 text
//! record `HR:<value>:<captured_at_millis>`. The fields are not escaped;
//! none of them can contain `:` as produced by [`encode`]. The decoder is
//! the only place wire messages are validated.

use thiserror::Error;

use crate::types::heartrate::{now_millis, Reading};

/// Literal tag in the first field of every relay message.
pub const RELAY_TAG: &str = "HR";

const DELIMITER: char = ':';

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("expected 2 or 3 fields, found {0}")]
    FieldCount(usize),

    #[error("unexpected tag {0:?}")]
    BadTag(String),

    #[error("unparseable heart rate value {0:?}")]
    BadValue(String),
}

/// Encode a reading as a relay message.
pub fn encode(reading: &Reading) -> Vec<u8> {
    // `{:?}` keeps the fractional part for whole numbers (72.0, not 72).
    format!(
        "{}{}{:?}{}{}",
        RELAY_TAG, DELIMITER, reading.value, DELIMITER, reading.captured_at_millis
    )
    .into_bytes()
}

/// Decode a relay message, substituting the current time for a missing or
/// unparseable timestamp.
pub fn decode(payload: &[u8]) -> Result<Reading, DecodeError> {
    decode_at(payload, now_millis())
}

/// Decode a relay message using `received_at_millis` as the fallback
/// timestamp.
pub fn decode_at(payload: &[u8], received_at_millis: i64) -> Result<Reading, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let fields: Vec<&str> = text.trim().split(DELIMITER).collect();

    if fields.len() < 2 || fields.len() > 3 {
        return Err(DecodeError::FieldCount(fields.len()));
    }
    if fields[0] != RELAY_TAG {
        return Err(DecodeError::BadTag(fields[0].to_string()));
    }

    let value: f32 = fields[1]
        .trim()
        .parse()
        .map_err(|_| DecodeError::BadValue(fields[1].to_string()))?;
    if !value.is_finite() {
        return Err(DecodeError::BadValue(fields[1].to_string()));
    }

    let captured_at_millis = match fields.get(2) {
        Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|_| {
            log::debug!("Unparseable timestamp {:?}, using receive time", raw);
            received_at_millis
        }),
        None => received_at_millis,
    };

    Ok(Reading {
        value,
        captured_at_millis,
    })
}
