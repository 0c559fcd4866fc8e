use base64::{engine::general_purpose, Engine as _};

use crate::error::{EngineError, EngineResult};

/// Submitted source larger than this is rejected before it reaches a worker
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

/// Decode base64 submission source, enforcing the size limit.
pub fn decode_source(encoded: &str) -> EngineResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| EngineError::InvalidSource(format!("code is not valid base64: {}", e)))?;

    if bytes.len() > MAX_SOURCE_CODE_BYTES {
        return Err(EngineError::SourceTooLarge {
            limit: MAX_SOURCE_CODE_BYTES,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

pub fn encode_source(source: &str) -> String {
    general_purpose::STANDARD.encode(source)
}
