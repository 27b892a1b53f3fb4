// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the disk on behalf of the other
// layers:
//
//   codec.rs          — atomic writes (temp file + rename);
//                       bincode+gzip and JSON encodings
//
//   checkpoint.rs     — append-only checkpoint directory:
//                       save / load / latest
//
//   artifact.rs       — the trained bundle handed to serving,
//                       with its tagged model shape
//
//   metrics.rs        — metrics.json records and the per-chunk
//                       CSV log
//
//   run_context.rs    — per-run directory, closed on drop
//
//   registry.rs       — file-system ModelRegistry
//
//   prediction_log.rs — append-only CSV of served predictions
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Atomic on-disk encodings
pub mod codec;

/// Training state checkpoints
pub mod checkpoint;

/// Model artifact bundle
pub mod artifact;

/// Run metrics and chunk log
pub mod metrics;

/// Explicit per-run handle
pub mod run_context;

/// File-system model registry
pub mod registry;

/// Served prediction log
pub mod prediction_log;
