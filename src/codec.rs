//! Pluggable payload codec applied when an entry is stored with `compress`

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::CacheError;

/// Reversible text transform applied to the JSON payload of a compressed entry.
///
/// Implementations must be symmetric: `decode(encode(x)) == x`.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    fn encode(&self, plain: &str) -> String;

    fn decode(&self, encoded: &str) -> Result<String, CacheError>;
}

/// Base64 over the UTF-8 JSON text. The default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl Codec for Base64Codec {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn encode(&self, plain: &str) -> String {
        STANDARD.encode(plain.as_bytes())
    }

    fn decode(&self, encoded: &str) -> Result<String, CacheError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CacheError::Codec(format!("{}: {}", self.name(), e)))?;
        String::from_utf8(bytes).map_err(|e| CacheError::Codec(format!("{}: {}", self.name(), e)))
    }
}
