// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what a CTR
// run IS: labelled rows, cross-pair declarations, ensemble and
// rebalancing choices, run classification, and the error
// taxonomy that decides which failures abort a run.
//
// Rules for this layer:
//   - NO file I/O
//   - NO model math
//   - Only data types, parsing of declarative config values,
//     and the traits other layers implement
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Fatal error taxonomy (configuration, schema, resume, artifact)
pub mod error;

/// Cross pairs, ensemble kinds, rebalancing strategies, run types
pub mod features;

/// One labelled row and a fixed-size chunk of rows
pub mod row;

/// Seams other layers implement (chunk sources, predictors, registry)
pub mod traits;
