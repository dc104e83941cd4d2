use base64::{engine::general_purpose::STANDARD, Engine as _};

/// The payload was not valid standard base64.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed base64 audio payload: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Decode a standard (padded) base64 string into raw bytes.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(payload.trim())?)
}
