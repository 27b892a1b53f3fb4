// ============================================================
// Layer 5 — ML / Model Layer
// ============================================================
// All model math lives here. Nothing in this layer reads CSV
// or parses flags.
//
//   model.rs       — SgdClassifier: sparse logistic regression
//                    fitted one chunk at a time (L2 penalty,
//                    "optimal" learning-rate schedule, class
//                    weights, seeded per-chunk shuffling)
//
//   naive_bayes.rs — MultinomialNb: the second half of the
//                    legacy sgd+nb blend artifact
//
//   ensemble.rs    — N seeded SgdClassifier replicas that all
//                    see every chunk; members fit in parallel
//
//   evaluation.rs  — ROC-AUC, PR-AUC (average precision),
//                    log-loss, precision/recall, PSI
//
//   trainer.rs     — the streaming state machine:
//                    INIT → WARMUP → TRAINING → VALIDATING → FINALIZED
//
//   inferencer.rs  — turns a loaded artifact into one predictor
//                    (single / equal pair blend / uniform mean)
//
// Reference: Bottou (2010) Large-Scale Machine Learning with SGD

/// Incremental sparse logistic regression
pub mod model;

/// Multinomial naive Bayes for the legacy blend shape
pub mod naive_bayes;

/// Seeded replicas trained on every chunk
pub mod ensemble;

/// Ranking and calibration metrics
pub mod evaluation;

/// Chunked training loop with checkpoint/resume and validation
pub mod trainer;

/// Artifact-backed click predictor
pub mod inferencer;
