// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the raw CSV stream and the sparse matrix
// the models consume.
//
//   train.csv(.gz)
//       │
//       ▼
//   CsvChunkReader    → fixed-size chunks of labelled rows
//       │
//       ▼
//   FeatureTokenizer  → one token set per row
//       │                ("site_id=s1", "cross:site_id=s1|app_id=a1")
//       ▼
//   FeatureHasher     → fixed-width sparse vector per row
//       │
//       ▼
//   ChunkBatcher      → CSR matrix + labels for one chunk
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Streams a (gzip) CSV file as fixed-size labelled chunks
pub mod loader;

/// Turns raw categorical values into base and cross tokens
pub mod tokenizer;

/// Maps token sets into a fixed-width sparse space
pub mod hasher;

/// Sparse vector and CSR matrix types
pub mod sparse;

/// Encodes a whole chunk into a CSR batch
pub mod batcher;
