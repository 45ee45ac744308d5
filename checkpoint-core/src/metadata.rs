/*!
Checkpoint metadata and integrity verification.
*/

use crate::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Current checkpoint container format version
pub const CHECKPOINT_FORMAT_VERSION: u8 = 1;

/// Metadata stored alongside every checkpoint payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckpointMetadata {
    /// Caller-supplied checkpoint identifier
    pub checkpoint_id: String,

    /// Number of saves that preceded this one under the same id
    pub sequence: u64,

    /// When the snapshot was captured
    pub timestamp: DateTime<Utc>,

    /// SHA-256 of the serialized payload
    pub content_hash: String,

    pub format_version: u8,

    /// Unique identifier of this particular snapshot
    pub snapshot_id: String,

    pub description: Option<String>,

    /// Number of registered entries captured
    pub entry_count: usize,

    /// Number of cooperating ranks the context was partitioned over
    pub n_ranks: usize,

    /// Simulation time at capture
    pub sim_time: f64,

    pub uncompressed_size: usize,

    pub compressed_size: Option<usize>,

    pub compression_algorithm: String,
}

impl CheckpointMetadata {
    /// Create metadata for a new snapshot
    ///
    /// # Example
    /// ```rust
    /// use checkpoint_core::CheckpointMetadata;
    ///
    /// let metadata = CheckpointMetadata::new("mycheckpoint", 0);
    /// assert_eq!(metadata.checkpoint_id, "mycheckpoint");
    /// assert_eq!(metadata.sequence, 0);
    /// ```
    pub fn new<S: Into<String>>(checkpoint_id: S, sequence: u64) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            sequence,
            timestamp: Utc::now(),
            content_hash: String::new(),
            format_version: CHECKPOINT_FORMAT_VERSION,
            snapshot_id: Uuid::new_v4().to_string(),
            description: None,
            entry_count: 0,
            n_ranks: 1,
            sim_time: 0.0,
            uncompressed_size: 0,
            compressed_size: None,
            compression_algorithm: "gzip".to_string(),
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Record hash and size of the serialized payload
    pub fn with_content_hash(mut self, payload: &[u8]) -> Self {
        self.content_hash = Self::compute_hash(payload);
        self.uncompressed_size = payload.len();
        self
    }

    pub fn with_compressed_size(mut self, compressed_size: usize) -> Self {
        self.compressed_size = Some(compressed_size);
        self
    }

    pub fn with_compression_algorithm<S: Into<String>>(mut self, algorithm: S) -> Self {
        self.compression_algorithm = algorithm.into();
        self
    }

    /// Record the shape of the captured state
    pub fn with_capture_summary(mut self, entry_count: usize, n_ranks: usize, sim_time: f64) -> Self {
        self.entry_count = entry_count;
        self.n_ranks = n_ranks;
        self.sim_time = sim_time;
        self
    }

    /// Hex-encoded SHA-256 of `data`
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Check `payload` against the stored hash
    ///
    /// A mismatch means the file was altered after it was committed and is
    /// reported as a corrupt snapshot.
    pub fn verify_integrity(&self, payload: &[u8]) -> Result<()> {
        let computed_hash = Self::compute_hash(payload);
        if computed_hash == self.content_hash {
            Ok(())
        } else {
            Err(CheckpointError::corrupt(format!(
                "integrity check failed for '{}': expected hash {}, got {}",
                self.checkpoint_id, self.content_hash, computed_hash
            )))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_id.is_empty() {
            return Err(CheckpointError::validation("checkpoint_id cannot be empty"));
        }
        if self.content_hash.is_empty() {
            return Err(CheckpointError::validation("content_hash cannot be empty"));
        }
        if self.snapshot_id.is_empty() {
            return Err(CheckpointError::validation("snapshot_id cannot be empty"));
        }
        if self.n_ranks == 0 {
            return Err(CheckpointError::validation("n_ranks must be at least 1"));
        }
        Ok(())
    }

    pub fn is_compatible(&self) -> bool {
        self.format_version <= CHECKPOINT_FORMAT_VERSION
    }
}
