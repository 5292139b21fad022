//! Snapshot encoding.
//!
//! `encode` serializes to compact JSON (no insignificant whitespace),
//! compresses with LZ4 and wraps the bytes in standard base64 so the result
//! is safe for text-only stores. `decode` reverses this and also accepts
//! plain JSON, which is what `encode` emits when compression fails.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::{error, warn};

use crate::{Error, Result};

/// Encode `data` for storage. Never fails.
///
/// Falls back to plain JSON if the compressed form cannot be produced.
#[must_use]
pub fn encode(data: &Value) -> String {
    match try_encode(data) {
        Ok(blob) => blob,
        Err(e) => {
            warn!(error = %e, "compression failed, storing uncompressed");
            data.to_string()
        }
    }
}

/// Decode a blob produced by [`encode`].
///
/// Returns `None` and logs if the blob is neither an encoded snapshot nor
/// plain JSON.
#[must_use]
pub fn decode(blob: &str) -> Option<Value> {
    let compressed = match try_decode(blob) {
        Ok(value) => return Some(value),
        Err(e) => e,
    };
    match serde_json::from_str(blob) {
        Ok(value) => Some(value),
        Err(plain) => {
            error!(compressed = %compressed, plain = %plain, "failed to decode backup");
            None
        }
    }
}

/// Compressed size relative to the compact JSON size.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compression_ratio(data: &Value) -> f64 {
    let plain = data.to_string().len();
    if plain == 0 {
        return 1.0;
    }
    encode(data).len() as f64 / plain as f64
}

fn try_encode(data: &Value) -> Result<String> {
    let text = serde_json::to_string(data).map_err(|e| Error::Encode(e.to_string()))?;
    let packed = lz4_flex::compress_prepend_size(text.as_bytes());
    Ok(STANDARD.encode(packed))
}

fn try_decode(blob: &str) -> Result<Value> {
    let packed = STANDARD
        .decode(blob.trim())
        .map_err(|e| Error::Decode(format!("base64: {e}")))?;
    let bytes = lz4_flex::decompress_size_prepended(&packed)
        .map_err(|e| Error::Decode(format!("lz4: {e}")))?;
    let text = String::from_utf8(bytes).map_err(|e| Error::Decode(format!("utf-8: {e}")))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encoded_form_is_ascii() {
        let blob = encode(&json!({"userId": "alice", "events": [1, 2, 3]}));
        assert!(blob.is_ascii());
        assert!(!blob.contains(char::is_whitespace));
    }

    #[test]
    fn test_round_trip_preserves_string_whitespace() {
        let value = json!({"note": "two  spaces\nand a newline", "n": [1.5, null, true]});
        assert_eq!(decode(&encode(&value)), Some(value));
    }

    #[test]
    fn test_decode_accepts_plain_json() {
        assert_eq!(
            decode(r#"{"userId":"alice"}"#),
            Some(json!({"userId": "alice"}))
        );
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert_eq!(decode("not a backup {"), None);
        assert_eq!(decode(""), None);
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let blob = encode(&json!({"userId": "alice"}));
        assert_eq!(decode(&blob[..blob.len() / 2]), None);
    }

    #[test]
    fn test_repetitive_payload_shrinks() {
        let events: Vec<Value> = (0..200)
            .map(|i| json!({"type": "point_scored", "sessionTime": i}))
            .collect();
        assert!(compression_ratio(&json!({ "events": events })) < 1.0);
    }
}
