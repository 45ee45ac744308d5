/*!
Compression adapters for checkpoint files.

Snapshots of particle-heavy systems are large and highly repetitive, so the store
compresses the serialized container before it touches the disk. Gzip is the default;
`NoCompression` keeps files human-readable for debugging.
*/

use crate::config::CompressionKind;
use crate::{CheckpointError, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Compression abstraction for checkpoint bytes
pub trait CompressionAdapter {
    /// Compress the serialized snapshot container
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress bytes previously produced by [`CompressionAdapter::compress`]
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Name recorded in the checkpoint metadata
    fn algorithm_name(&self) -> &str;
}

impl<C: CompressionAdapter + ?Sized> CompressionAdapter for Box<C> {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        (**self).compress(data)
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        (**self).decompress(compressed_data)
    }

    fn algorithm_name(&self) -> &str {
        (**self).algorithm_name()
    }
}

/// Build the compressor selected by a configuration
pub fn compressor_for(kind: CompressionKind, level: u32) -> Box<dyn CompressionAdapter + Send + Sync> {
    match kind {
        CompressionKind::Gzip => Box::new(GzipCompressor::with_level(level)),
        CompressionKind::None => Box::new(NoCompression::new()),
    }
}

/// Gzip compression adapter
///
/// # Example
/// ```rust
/// use checkpoint_core::compression::{CompressionAdapter, GzipCompressor};
///
/// let compressor = GzipCompressor::new();
/// let data = b"particle positions particle positions";
/// let compressed = compressor.compress(data)?;
/// assert_eq!(compressor.decompress(&compressed)?, data);
/// # Ok::<(), checkpoint_core::CheckpointError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Create a gzip compressor with the default level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// Create a gzip compressor with an explicit level (0-9)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }

    pub fn fast() -> Self {
        Self::with_level(1)
    }

    pub fn max() -> Self {
        Self::with_level(9)
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);
        encoder
            .write_all(data)
            .map_err(|e| CheckpointError::compression(format!("Failed to write gzip stream: {e}")))?;
        encoder
            .finish()
            .map_err(|e| CheckpointError::compression(format!("Failed to finish gzip stream: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CheckpointError::compression(format!("Failed to decompress checkpoint: {e}")))?;
        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Pass-through adapter, stores the JSON container as-is
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}
