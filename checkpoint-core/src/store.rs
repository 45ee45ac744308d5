/*!
Durable checkpoint store.

Each checkpoint id owns exactly one current snapshot at
`<id>/checkpoint.json.gz` below the storage root. A save serializes the
container `{ metadata, payload }`, compresses it and hands the bytes to the
storage adapter, which replaces the previous snapshot atomically.
*/

use crate::compression::CompressionAdapter;
use crate::metadata::CheckpointMetadata;
use crate::representation::SnapshotPayload;
use crate::storage::StorageAdapter;
use crate::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "metrics")]
use crate::observability::{CheckpointMetrics, MetricsTimer, Operation};

/// File name of the current snapshot inside a checkpoint directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json.gz";

/// On-disk container
#[derive(Serialize, Deserialize, Debug)]
struct CheckpointContainer {
    metadata: CheckpointMetadata,
    payload: Value,
}

/// Storage key of the snapshot for `id`
///
/// Ids name a single directory, so they must be non-empty, contain no path
/// separator and not be `.` or `..`.
pub fn key_for(id: &str) -> Result<String> {
    if id.is_empty() {
        return Err(CheckpointError::validation("checkpoint id cannot be empty"));
    }
    if id == "." || id == ".." {
        return Err(CheckpointError::validation(format!(
            "'{id}' is not a valid checkpoint id"
        )));
    }
    if id.contains(['/', '\\']) || id.contains('\0') {
        return Err(CheckpointError::validation(format!(
            "checkpoint id '{id}' must not contain path separators"
        )));
    }
    Ok(format!("{id}/{CHECKPOINT_FILE}"))
}

/// Reads and writes snapshots through a storage and a compression adapter
pub struct CheckpointStore<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    storage: S,
    compressor: C,
    verify_on_load: bool,
}

impl<S, C> CheckpointStore<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    pub fn new(storage: S, compressor: C) -> Self {
        Self {
            storage,
            compressor,
            verify_on_load: true,
        }
    }

    /// Skip the SHA-256 check on load
    ///
    /// Decoding errors are still reported as corrupt snapshots.
    pub fn with_verification(mut self, verify_on_load: bool) -> Self {
        self.verify_on_load = verify_on_load;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Commit `payload` as the current snapshot of `metadata.checkpoint_id`
    ///
    /// The sequence number is one past the sequence of the snapshot being
    /// replaced. On failure the previous snapshot stays untouched.
    #[instrument(skip(self, metadata, payload), fields(checkpoint_id = %metadata.checkpoint_id))]
    pub fn save(
        &self,
        metadata: CheckpointMetadata,
        payload: &SnapshotPayload,
    ) -> Result<CheckpointMetadata> {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(Operation::Save);

        let result = self.save_inner(metadata, payload);

        #[cfg(feature = "metrics")]
        match &result {
            Ok(metadata) => {
                timer.finish();
                if let (Some(metrics), Some(size)) =
                    (CheckpointMetrics::global(), metadata.compressed_size)
                {
                    metrics.record_snapshot_size(size);
                }
            }
            Err(_) => timer.finish_with_error(),
        }

        result
    }

    fn save_inner(
        &self,
        metadata: CheckpointMetadata,
        payload: &SnapshotPayload,
    ) -> Result<CheckpointMetadata> {
        let key = key_for(&metadata.checkpoint_id)?;

        let sequence = match self.metadata(&metadata.checkpoint_id) {
            Ok(previous) => previous.sequence + 1,
            Err(CheckpointError::NotFound(_)) => 0,
            Err(e) => {
                warn!(error = %e, "Previous snapshot unreadable; restarting sequence");
                0
            }
        };

        let payload = serde_json::to_value(payload)?;
        let payload_bytes = serde_json::to_vec(&payload)?;

        let mut metadata = metadata
            .with_content_hash(&payload_bytes)
            .with_compression_algorithm(self.compressor.algorithm_name());
        metadata.sequence = sequence;
        metadata.validate()?;

        let container = CheckpointContainer {
            metadata: metadata.clone(),
            payload,
        };
        let container_bytes = serde_json::to_vec(&container)?;
        let compressed = self.compressor.compress(&container_bytes)?;
        let metadata = metadata.with_compressed_size(compressed.len());

        self.storage.save(&compressed, &key)?;

        info!(
            sequence,
            bytes = compressed.len(),
            entries = metadata.entry_count,
            "Checkpoint saved"
        );
        Ok(metadata)
    }

    /// Load and verify the current snapshot of `id`
    ///
    /// # Errors
    /// * `NotFound` - nothing has been saved under `id`
    /// * `CorruptSnapshot` - the bytes cannot be decompressed or decoded, the
    ///   format version is newer than this build, or the hash does not match
    ///
    /// Load metrics are recorded by [`Checkpoint`](crate::Checkpoint), once
    /// the payload has also been restored.
    #[instrument(skip(self))]
    pub fn load(&self, id: &str) -> Result<(CheckpointMetadata, SnapshotPayload)> {
        self.load_inner(id, self.verify_on_load)
    }

    fn load_container(&self, id: &str) -> Result<CheckpointContainer> {
        let key = key_for(id)?;
        let compressed = self.storage.load(&key)?;

        let bytes = self
            .compressor
            .decompress(&compressed)
            .map_err(|e| CheckpointError::corrupt(format!("cannot decompress '{id}': {e}")))?;
        let container: CheckpointContainer = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::corrupt(format!("cannot decode '{id}': {e}")))?;

        if !container.metadata.is_compatible() {
            return Err(CheckpointError::corrupt(format!(
                "incompatible format version {} (current: {})",
                container.metadata.format_version,
                crate::metadata::CHECKPOINT_FORMAT_VERSION
            )));
        }
        if container.metadata.checkpoint_id != id {
            return Err(CheckpointError::corrupt(format!(
                "snapshot stored under '{id}' belongs to '{}'",
                container.metadata.checkpoint_id
            )));
        }
        Ok(container)
    }

    fn load_inner(&self, id: &str, verify: bool) -> Result<(CheckpointMetadata, SnapshotPayload)> {
        let container = self.load_container(id)?;

        if verify {
            let payload_bytes = serde_json::to_vec(&container.payload)?;
            container.metadata.verify_integrity(&payload_bytes)?;
        }

        let payload: SnapshotPayload = serde_json::from_value(container.payload)
            .map_err(|e| CheckpointError::corrupt(format!("invalid payload in '{id}': {e}")))?;

        debug!(sequence = container.metadata.sequence, "Checkpoint loaded");
        Ok((container.metadata, payload))
    }

    pub fn exists(&self, id: &str) -> bool {
        key_for(id).map(|key| self.storage.exists(&key)).unwrap_or(false)
    }

    /// Delete the current snapshot of `id`
    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let key = key_for(id)?;
        if !self.storage.exists(&key) {
            return Err(CheckpointError::not_found(format!("checkpoint '{id}'")));
        }
        self.storage.delete(&key)?;
        info!("Checkpoint deleted");
        Ok(())
    }

    /// Metadata of the current snapshot, without decoding the payload
    pub fn metadata(&self, id: &str) -> Result<CheckpointMetadata> {
        Ok(self.load_container(id)?.metadata)
    }

    /// Fully decode and hash-check the current snapshot of `id`
    pub fn verify(&self, id: &str) -> Result<CheckpointMetadata> {
        let (metadata, _) = self.load_inner(id, true)?;
        Ok(metadata)
    }

    /// Ids with a current snapshot, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .list("")?
            .into_iter()
            .filter(|id| self.exists(id))
            .collect())
    }
}
