// ============================================================
// Layer 6 — Metrics
// ============================================================
// Two outputs:
//
//   metrics/metrics.json   — one flat record per finished run,
//                            read back by the promotion gate
//   <checkpoint dir>/chunks.csv
//                          — one row per trained chunk, appended
//                            as training goes
//
// Undefined metrics (single-class validation set) are NaN in
// memory and `null` in JSON.
//
// Example chunks.csv:
//   chunk,rows,trained_rows,mean_log_loss,elapsed_seconds
//   1,200000,200000,0.472113,3.412000
//   2,200000,400000,0.431870,6.790000

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::features::RunType;
use crate::infra::codec;

pub const METRICS_FILE_NAME: &str = "metrics.json";
pub const BASELINE_METRICS_FILE_NAME: &str = "metrics_baseline.json";

/// Key the promotion gate compares against its threshold
pub const GATE_METRIC: &str = "val_pr_auc";

/// Serialise NaN as null and read null back as NaN.
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

// ─── RunMetrics ───────────────────────────────────────────────────────────────

/// Final record of a streaming run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    #[serde(with = "nan_as_null")]
    pub val_auc: f64,
    #[serde(with = "nan_as_null")]
    pub val_logloss: f64,
    #[serde(with = "nan_as_null")]
    pub val_pr_auc: f64,

    pub train_rows: u64,
    pub trained_rows: u64,
    pub chunks_trained: u64,
    pub val_rows: u64,
    pub val_rows_used: u64,
    pub val_chunks_used: u64,
    pub elapsed_seconds: f64,

    pub hash_n_features: usize,
    pub chunk_size: usize,
    pub max_train_chunks: u64,
    pub val_rows_config: u64,
    pub val_chunks: u64,
    pub use_feature_cross: bool,
    /// `colA:colB,...`
    pub cross_pairs: String,
    pub rebalancing: String,
    pub ensemble_type: String,
    pub n_estimators: usize,
    pub run_type: RunType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Final record of a baseline (single full-batch model) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMetrics {
    #[serde(with = "nan_as_null")]
    pub val_auc: f64,
    #[serde(with = "nan_as_null")]
    pub val_logloss: f64,
    #[serde(with = "nan_as_null")]
    pub val_pr_auc: f64,
    pub train_rows: u64,
    pub val_rows: u64,
    pub val_rows_config: u64,
    pub elapsed_seconds: f64,
    pub hash_n_features: usize,
    pub use_feature_cross: bool,
    pub cross_pairs: String,
    pub model_shape: String,
}

pub fn write_metrics<T: Serialize>(path: &Path, metrics: &T) -> Result<()> {
    codec::write_json(path, metrics)
        .with_context(|| format!("Cannot write metrics to '{}'", path.display()))?;
    tracing::info!("Metrics saved to '{}'", path.display());
    Ok(())
}

/// Read the gate metric from any metrics file. A missing key reads
/// as 0.0 (never passes a positive gate); `null` reads as NaN.
pub fn read_gate_metric(path: &Path) -> Result<f64> {
    let value: serde_json::Value = codec::read_json(path)?;
    Ok(match value.get(GATE_METRIC) {
        None => {
            tracing::warn!("'{}' has no '{}'; treating it as 0.0", path.display(), GATE_METRIC);
            0.0
        }
        Some(v) => v.as_f64().unwrap_or(f64::NAN),
    })
}

// ─── Per-chunk CSV log ────────────────────────────────────────────────────────

/// One row of the per-chunk training log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetrics {
    /// Chunks trained so far, this one included (starts at 1)
    pub chunk: u64,
    pub rows: usize,
    pub trained_rows: u64,
    /// Mean over members of the pre-update log-loss of this chunk
    pub mean_log_loss: f64,
    pub elapsed_seconds: f64,
}

/// Appends chunk metrics to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet. A resumed
    /// run keeps appending to the same file.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("chunks.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "chunk,rows,trained_rows,mean_log_loss,elapsed_seconds")?;
            tracing::debug!("Created chunk metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &ChunkMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{},{},{:.6},{:.6}",
            m.chunk, m.rows, m.trained_rows, m.mean_log_loss, m.elapsed_seconds,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
