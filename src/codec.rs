// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Value encoding for stored payloads.
//!
//! A payload is `compress?(codec.encode(value))`. Encoding and decoding run
//! before any backing-store call, so their failures surface as local errors
//! and never reach a circuit breaker.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::compression::{is_compressed, CompressionStats, Compressor, Passthrough};
use crate::config::{CacheEngineConfig, SerializationMode};
use crate::error::CacheError;

/// Serialization format between a JSON value tree and bytes.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

/// Bytes ready for the store.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    /// Size before compression
    pub raw_len: usize,
}

/// Codec plus optional compression, as configured for one engine.
#[derive(Clone)]
pub struct PayloadCodec {
    codec: Arc<dyn Codec>,
    compressor: Arc<dyn Compressor>,
    compress: bool,
    min_compress_bytes: usize,
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCodec")
            .field("codec", &self.codec.name())
            .field("compressor", &self.compressor.name())
            .field("min_compress_bytes", &self.min_compress_bytes)
            .finish()
    }
}

impl PayloadCodec {
    pub fn new(
        codec: Arc<dyn Codec>,
        compressor: Option<Arc<dyn Compressor>>,
        min_compress_bytes: usize,
    ) -> Self {
        Self {
            codec,
            compress: compressor.is_some(),
            compressor: compressor.unwrap_or_else(|| Arc::new(Passthrough)),
            min_compress_bytes,
        }
    }

    pub fn from_config(config: &CacheEngineConfig) -> Result<Self, CacheError> {
        let codec: Arc<dyn Codec> = match config.serialization {
            SerializationMode::Json => Arc::new(JsonCodec),
        };
        Ok(Self::new(codec, compressor_for(config)?, config.compression_min_bytes))
    }

    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.compress
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Encoded, CacheError> {
        let tree = serde_json::to_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.encode_value(&tree)
    }

    pub fn encode_value(&self, value: &Value) -> Result<Encoded, CacheError> {
        let raw = self.codec.encode(value)?;
        let raw_len = raw.len();

        if !self.compress || raw_len < self.min_compress_bytes {
            return Ok(Encoded { bytes: raw, compressed: false, raw_len });
        }

        let bytes = self.compressor.compress(&raw)?;
        let stats = CompressionStats::new(raw_len, bytes.len());
        crate::metrics::record_compression(self.compressor.name(), &stats);
        Ok(Encoded { bytes, compressed: true, raw_len })
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        let tree = self.decode_value(bytes)?;
        serde_json::from_value(tree).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    pub fn decode_value(&self, bytes: &[u8]) -> Result<Value, CacheError> {
        if is_compressed(bytes) {
            let raw = self.compressor.decompress(bytes)?;
            self.codec.decode(&raw)
        } else {
            self.codec.decode(bytes)
        }
    }
}

#[cfg(feature = "compression")]
fn compressor_for(config: &CacheEngineConfig) -> Result<Option<Arc<dyn Compressor>>, CacheError> {
    let zstd: Arc<dyn Compressor> =
        Arc::new(crate::compression::ZstdCompressor::new(config.compression_level));
    Ok(config.compression_enabled.then_some(zstd))
}

#[cfg(not(feature = "compression"))]
fn compressor_for(config: &CacheEngineConfig) -> Result<Option<Arc<dyn Compressor>>, CacheError> {
    if config.compression_enabled {
        return Err(CacheError::Config(
            "compression_enabled requires the `compression` feature".into(),
        ));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }

    fn plain() -> PayloadCodec {
        PayloadCodec::new(Arc::new(JsonCodec), None, 0)
    }

    #[test]
    fn test_json_roundtrip_typed() {
        let codec = plain();
        let user = User { name: "Ada".into(), age: 36 };
        let encoded = codec.encode(&user).unwrap();

        assert!(!encoded.compressed);
        assert_eq!(encoded.bytes, br#"{"name":"Ada","age":36}"#);
        assert_eq!(codec.decode::<User>(&encoded.bytes).unwrap(), user);
    }

    #[test]
    fn test_decode_wrong_shape_is_deserialization_error() {
        let codec = plain();
        let encoded = codec.encode(&json!({"name": "Ada"})).unwrap();
        let err = codec.decode::<User>(&encoded.bytes).unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[test]
    fn test_garbage_bytes_fail_cleanly() {
        let err = plain().decode_value(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[test]
    fn test_unserializable_value() {
        use std::collections::HashMap;
        // JSON object keys must be strings
        let mut map: HashMap<(u8, u8), u8> = HashMap::new();
        map.insert((1, 2), 3);
        let err = plain().encode(&map).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_compression_respects_min_bytes() {
        let codec = PayloadCodec::new(
            Arc::new(JsonCodec),
            Some(Arc::new(crate::compression::ZstdCompressor::default())),
            64,
        );

        let small = codec.encode(&json!({"a": 1})).unwrap();
        assert!(!small.compressed);

        let big_value = json!({"items": vec!["repeat me"; 100]});
        let big = codec.encode(&big_value).unwrap();
        assert!(big.compressed);
        assert!(big.bytes.len() < big.raw_len);
        assert_eq!(codec.decode_value(&big.bytes).unwrap(), big_value);
        assert_eq!(codec.decode_value(&small.bytes).unwrap(), json!({"a": 1}));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_uncompressed_engine_reads_plain_payloads_from_compressing_writer() {
        let writer = PayloadCodec::from_config(&CacheEngineConfig::default()).unwrap();
        let reader = PayloadCodec::from_config(&CacheEngineConfig {
            compression_enabled: false,
            ..Default::default()
        })
        .unwrap();

        let encoded = writer.encode(&json!({"tiny": true})).unwrap();
        assert!(!encoded.compressed);
        assert_eq!(reader.decode_value(&encoded.bytes).unwrap(), json!({"tiny": true}));
    }
}
