//! Payload compression codec
//!
//! A value is serialized to JSON, compressed as a raw Snappy block and encoded
//! with the URL-safe base64 alphabet without padding. The output is plain ASCII
//! and can be sliced at any character into TXT strings.

use base64::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serialize and compress a value into TXT-safe text
pub fn compress<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    let packed = snap::raw::Encoder::new()
        .compress_vec(&json)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(packed))
}

/// Reverse [`compress`]
///
/// Surrounding whitespace is ignored. Anything else that is not produced by
/// [`compress`] is rejected with [`Error::Decode`].
pub fn decompress<T: DeserializeOwned>(text: &str) -> Result<T> {
    let packed = BASE64_URL_SAFE_NO_PAD
        .decode(text.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?;
    let json = snap::raw::Decoder::new()
        .decompress_vec(&packed)
        .map_err(|e| Error::Decode(format!("invalid snappy block: {}", e)))?;
    serde_json::from_slice(&json).map_err(|e| Error::Decode(format!("invalid payload: {}", e)))
}
