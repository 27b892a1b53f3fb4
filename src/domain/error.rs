// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure class that stops a run before any artifact is
// considered valid. Everything else (undefined metrics, registry
// outages) is reported as a value, never raised.
//
// The rest of the crate propagates with anyhow; these variants
// are what callers and tests `downcast_ref` to when they need to
// know WHICH class of failure happened.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtrError {
    /// Malformed flags or values, detected before any data is read
    #[error("configuration error: {0}")]
    Config(String),

    /// The data stream does not have the shape training needs
    #[error("schema error: {0}")]
    Schema(String),

    /// The checkpoint to resume from is missing or unreadable
    #[error("cannot resume: {0}")]
    Resume(String),

    /// A model artifact is missing required fields or disagrees with itself
    #[error("invalid artifact: {0}")]
    Artifact(String),

    /// Feature width of an input does not match the fitted model
    #[error("feature width mismatch: model expects {expected}, input has {actual}")]
    WidthMismatch { expected: usize, actual: usize },
}

impl CtrError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn resume(msg: impl Into<String>) -> Self {
        Self::Resume(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }
}
