// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal per CLI command: a streaming training run, a
// baseline fit, serving predictions, promotion, monitoring,
// or a dataset sanity check.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1); logging only
//   - File access goes through Layer 4 (data) and 6 (infra)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Streaming training run with checkpoints and promotion
pub mod train_use_case;

// Full-batch reference model
pub mod baseline_use_case;

// Scoring a CSV or one JSON request with an artifact
pub mod predict_use_case;

// Metric gate and registry workflow
pub mod promote_use_case;

// Accuracy, drift and alerts over the prediction log
pub mod monitor_use_case;

// Dataset sanity check
pub mod inspect_use_case;
