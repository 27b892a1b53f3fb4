// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between the training core and its collaborators:
//
//   ChunkSource    — a sequential, non-seekable stream of chunks
//                    (CsvChunkReader, in-memory sources in tests)
//   ClickPredictor — anything that scores one feature map
//                    (ArtifactPredictor)
//   ModelRegistry  — the external model registry
//                    (FsRegistry, recording fakes in tests)
//   Persistable    — components saved/restored as one file
//                    (ModelArtifact)
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::row::Chunk;

// ─── ChunkSource ──────────────────────────────────────────────────────────────
/// A sequential stream of row chunks. There is no seek: the only
/// way to reach chunk N is to read chunks 0..N.
pub trait ChunkSource {
    /// Next chunk in stream order, or None once the stream is exhausted.
    fn next_chunk(&mut self) -> Result<Option<Chunk>>;

    /// Read and discard up to `n` chunks. Returns how many were skipped,
    /// which is less than `n` only if the stream ran out.
    fn skip_chunks(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            if self.next_chunk()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }
}

// ─── ClickPredictor ───────────────────────────────────────────────────────────
/// Scores a single `{field: value}` request.
pub trait ClickPredictor {
    /// Probability of a click, in [0, 1].
    fn predict_one(&self, features: &serde_json::Map<String, serde_json::Value>) -> Result<f64>;
}

// ─── ModelRegistry ────────────────────────────────────────────────────────────

/// Lifecycle of a registered model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionStatus {
    PendingRegistration,
    Ready,
    FailedRegistration,
}

/// The external registry the promotion gate talks to.
pub trait ModelRegistry {
    /// Create the registered model if it does not exist yet.
    fn ensure_model(&self, name: &str) -> Result<()>;

    /// Register `source` as a new version; returns its version number.
    fn create_version(&self, name: &str, source: &Path, run_id: &str) -> Result<u32>;

    fn version_status(&self, name: &str, version: u32) -> Result<VersionStatus>;

    /// Move a version to a stage label (e.g. "Staging").
    fn transition_stage(&self, name: &str, version: u32, stage: &str) -> Result<()>;
}

// ─── Persistable ──────────────────────────────────────────────────────────────
/// Any component whose state is saved to and restored from one file.
pub trait Persistable: Sized {
    fn save(&self, path: &Path) -> Result<()>;

    fn load(path: &Path) -> Result<Self>;
}
