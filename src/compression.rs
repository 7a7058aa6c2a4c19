// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transparent payload compression.
//!
//! Uses zstd with magic-bytes detection, so readers decompress only what
//! was actually compressed: small payloads skipped at write time and data
//! written with compression disabled read back unchanged.
//!
//! # Feature Flag
//!
//! [`ZstdCompressor`] requires the `compression` feature (on by default).
//! [`Passthrough`] is always available.

/// Zstd magic bytes (little-endian): 0xFD2FB528
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

/// Check if data is zstd-compressed by checking magic bytes.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// A pluggable payload compressor.
pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;

    /// Decompress `data`, returning it unchanged when it is not compressed.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError>;
}

/// Stores payloads as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Compressor for Passthrough {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if is_compressed(data) {
            return Err(CompressionError::DecompressFailed(
                "payload is zstd-compressed but compression support is disabled".into(),
            ));
        }
        Ok(data.to_vec())
    }
}

/// zstd at a fixed level.
///
/// - Level 1-3: Fast, good for real-time
/// - Level 6: Default, balanced for JSON payloads
/// - Level 19-22: Maximum compression, slow
#[cfg(feature = "compression")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

#[cfg(feature = "compression")]
impl ZstdCompressor {
    #[must_use]
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }
}

#[cfg(feature = "compression")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(feature = "compression")]
impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, self.level)
            .map_err(|e| CompressionError::CompressFailed(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        if is_compressed(data) {
            zstd::decode_all(data)
                .map_err(|e| CompressionError::DecompressFailed(e.to_string()))
        } else {
            Ok(data.to_vec())
        }
    }
}

/// Compression statistics for a single operation.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStats {
    /// Original size in bytes
    pub original_bytes: usize,
    /// Compressed size in bytes
    pub compressed_bytes: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
}

impl CompressionStats {
    #[must_use]
    pub fn new(original_bytes: usize, compressed_bytes: usize) -> Self {
        let ratio = if compressed_bytes > 0 {
            original_bytes as f64 / compressed_bytes as f64
        } else {
            0.0
        };
        Self { original_bytes, compressed_bytes, ratio }
    }

    /// Whether compression actually shrank the payload.
    #[must_use]
    pub fn saved_space(&self) -> bool {
        self.compressed_bytes < self.original_bytes
    }
}
