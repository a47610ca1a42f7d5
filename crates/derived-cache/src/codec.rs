//! Value codecs
//!
//! A codec turns cached values into bytes for two purposes: estimating entry
//! size for capacity accounting, and the payload written to the backing
//! store. Managers take it as `Arc<dyn ValueCodec<V>>` so the engine never
//! depends on a concrete payload representation.

use crate::error::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Encoder/decoder for cached values
pub trait ValueCodec<V>: Send + Sync {
    /// Encode a value to bytes
    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`ValueCodec::encode`]
    fn decode(&self, bytes: &[u8]) -> Result<V>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Codec backed by `serde_json`
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for JsonCodec<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<V> ValueCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// Codec for UTF-8 strings, e.g. formatted templates
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl ValueCodec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn name(&self) -> &str {
        "utf8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quote {
        principal: f64,
        months: u32,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Quote>::new();
        let quote = Quote {
            principal: 1200.5,
            months: 12,
        };

        let bytes = codec.encode(&quote).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), quote);
        assert!(codec.decode(b"not json").is_err());
    }

    #[test]
    fn test_json_codec_rejects_non_string_map_keys() {
        let codec = JsonCodec::<HashMap<(u8, u8), u8>>::new();
        let mut map = HashMap::new();
        map.insert((1, 2), 3);

        assert!(matches!(
            codec.encode(&map),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_utf8_codec_rejects_invalid_bytes() {
        let codec = Utf8Codec;
        assert_eq!(codec.decode(b"Total: {amount}").unwrap(), "Total: {amount}");
        assert!(matches!(
            codec.decode(&[0xff, 0xfe]),
            Err(CacheError::Codec(_))
        ));
    }
}
