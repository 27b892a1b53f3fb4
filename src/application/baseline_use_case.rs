// ============================================================
// Layer 2 — BaselineUseCase
// ============================================================
// One full-batch model as the reference point for streaming
// runs:
//
//   Step 1: Read the first train_rows + val_rows rows
//   Step 2: Hash both slices in the shared feature space
//   Step 3: Fit one SgdClassifier for `epochs` passes with
//           balanced class weights (and a naive Bayes partner
//           when blending)
//   Step 4: Validate on the held-out slice
//   Step 5: Save the artifact and metrics_baseline.json
//
// The artifact loads through the same predictor as streaming
// runs: shape Single, or Blend with --blend-nb.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;

use crate::data::batcher::ChunkBatcher;
use crate::data::hasher::{FeatureHasher, DEFAULT_N_FEATURES};
use crate::data::loader::CsvChunkReader;
use crate::domain::error::CtrError;
use crate::domain::features::{default_cross_pairs, format_cross_list, CrossPair, EnsembleKind, Rebalancing};
use crate::domain::traits::Persistable;
use crate::infra::artifact::{ArtifactModels, ModelArtifact};
use crate::infra::metrics::{write_metrics, BaselineMetrics, BASELINE_METRICS_FILE_NAME};
use crate::ml::evaluation::ValidationSet;
use crate::ml::inferencer::ArtifactPredictor;
use crate::ml::model::{ClassWeight, SgdClassifier, SgdConfig};
use crate::ml::naive_bayes::MultinomialNb;

pub const BASELINE_ARTIFACT_FILE_NAME: &str = "ctr_baseline_hashing.bin.gz";

#[derive(Debug, Clone)]
pub struct BaselineConfig {
    pub data_path:         PathBuf,
    pub train_rows:        usize,
    pub val_rows:          usize,
    pub hash_n_features:   usize,
    pub use_feature_cross: bool,
    pub cross_pairs:       Vec<CrossPair>,
    pub seed:              u64,
    pub epochs:            usize,
    pub blend_nb:          bool,
    pub model_dir:         PathBuf,
    pub metrics_dir:       PathBuf,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            data_path:         PathBuf::from("data/train.gz"),
            train_rows:        3_000_000,
            val_rows:          300_000,
            hash_n_features:   DEFAULT_N_FEATURES,
            use_feature_cross: true,
            cross_pairs:       default_cross_pairs(),
            seed:              42,
            epochs:            5,
            blend_nb:          false,
            model_dir:         PathBuf::from("models"),
            metrics_dir:       PathBuf::from("metrics"),
        }
    }
}

#[derive(Debug)]
pub struct BaselineReport {
    pub metrics:       BaselineMetrics,
    pub artifact_path: PathBuf,
    pub metrics_path:  PathBuf,
}

pub struct BaselineUseCase {
    config: BaselineConfig,
}

impl BaselineUseCase {
    pub fn new(config: BaselineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<BaselineReport> {
        let cfg = &self.config;
        if cfg.train_rows == 0 {
            return Err(CtrError::config("train_rows must be at least 1").into());
        }
        let hasher = FeatureHasher::new(cfg.hash_n_features)?;
        let started = Instant::now();

        // ── Step 1: Read ──────────────────────────────────────
        let mut reader = CsvChunkReader::open(&cfg.data_path, cfg.train_rows)?;
        let train = reader
            .read_rows(cfg.train_rows)?
            .ok_or_else(|| CtrError::schema("no training rows in data file"))?;
        let val = reader.read_rows(cfg.val_rows)?;
        tracing::info!(
            "Baseline: {} training rows, {} validation rows",
            train.len(),
            val.as_ref().map_or(0, |c| c.len())
        );

        // ── Step 2: Hash ──────────────────────────────────────
        let batcher = ChunkBatcher::new(hasher, cfg.use_feature_cross, cfg.cross_pairs.clone());
        let train = batcher.encode(&train);

        // ── Step 3: Fit ───────────────────────────────────────
        let sgd_config = SgdConfig::new(cfg.seed).with_class_weight(ClassWeight::balanced(&train.labels));
        let mut sgd = SgdClassifier::new(sgd_config);
        let loss = sgd.fit(&train.features, &train.labels, cfg.epochs)?;
        tracing::info!("Baseline fit done, final epoch log-loss {:.5}", loss);

        let models = if cfg.blend_nb {
            let mut nb = MultinomialNb::default();
            nb.partial_fit(&train.features, &train.labels)?;
            ArtifactModels::Blend { sgd, nb }
        } else {
            ArtifactModels::Single(sgd)
        };

        let artifact = ModelArtifact {
            hash_n_features:   cfg.hash_n_features,
            use_feature_cross: cfg.use_feature_cross,
            cross_pairs:       cfg.cross_pairs.clone(),
            ensemble_type:     EnsembleKind::Single,
            n_estimators:      1,
            rebalancing:       Rebalancing::ClassWeightBalanced,
            hasher:            Some(hasher),
            models,
        };

        // ── Step 4: Validate ──────────────────────────────────
        let mut validation = ValidationSet::default();
        match &val {
            Some(val) => {
                let predictor = ArtifactPredictor::from_artifact(artifact.clone())?;
                validation.extend(&val.labels(), &predictor.predict_chunk(val)?);
            }
            None => tracing::warn!("No validation rows left after the training slice"),
        }
        let scores = validation.metrics();

        // ── Step 5: Persist ───────────────────────────────────
        let metrics = BaselineMetrics {
            val_auc:           scores.auc,
            val_logloss:       scores.logloss,
            val_pr_auc:        scores.pr_auc,
            train_rows:        train.len() as u64,
            val_rows:          validation.len() as u64,
            val_rows_config:   cfg.val_rows as u64,
            elapsed_seconds:   started.elapsed().as_secs_f64(),
            hash_n_features:   cfg.hash_n_features,
            use_feature_cross: cfg.use_feature_cross,
            cross_pairs:       format_cross_list(&cfg.cross_pairs),
            model_shape:       artifact.models.shape_name().to_string(),
        };

        let artifact_path = cfg.model_dir.join(BASELINE_ARTIFACT_FILE_NAME);
        artifact.save(&artifact_path)?;

        let metrics_path = cfg.metrics_dir.join(BASELINE_METRICS_FILE_NAME);
        write_metrics(&metrics_path, &metrics)?;

        Ok(BaselineReport { metrics, artifact_path, metrics_path })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use std::path::Path;

    fn write_dataset(path: &Path, rows: usize) {
        let mut csv = String::from("id,click,site_id,app_id,device_type,device_conn_type\n");
        for i in 0..rows {
            let click = (i % 4 == 0) as u8;
            writeln!(csv, "{i},{click},s{},a{},{},{}", i % 4, i % 3, i % 2, i % 5).unwrap();
        }
        std::fs::write(path, csv).unwrap();
    }

    fn config(root: &Path, blend_nb: bool) -> BaselineConfig {
        let data = root.join("train.csv");
        write_dataset(&data, 80);
        BaselineConfig {
            data_path: data,
            train_rows: 60,
            val_rows: 20,
            hash_n_features: 1024,
            blend_nb,
            model_dir: root.join("models"),
            metrics_dir: root.join("metrics"),
            ..BaselineConfig::default()
        }
    }

    #[test]
    fn test_single_baseline_writes_loadable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let report = BaselineUseCase::new(config(dir.path(), false)).execute().unwrap();

        assert_eq!(report.metrics.train_rows, 60);
        assert_eq!(report.metrics.val_rows, 20);
        assert_eq!(report.metrics.model_shape, "single");
        assert!(report.metrics.val_auc.is_finite());
        assert!(report.metrics_path.exists());

        let p = ArtifactPredictor::from_artifact(ModelArtifact::load(&report.artifact_path).unwrap()).unwrap();
        assert_eq!(p.blend().name(), "single");
    }

    #[test]
    fn test_blend_baseline_has_pair_shape() {
        let dir = tempfile::tempdir().unwrap();
        let report = BaselineUseCase::new(config(dir.path(), true)).execute().unwrap();
        assert_eq!(report.metrics.model_shape, "sgd+nb");

        let p = ArtifactPredictor::from_artifact(ModelArtifact::load(&report.artifact_path).unwrap()).unwrap();
        assert_eq!(p.blend().name(), "sgd+nb");
    }

    #[test]
    fn test_short_file_has_no_validation() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BaselineConfig { train_rows: 100, ..config(dir.path(), false) };
        let report = BaselineUseCase::new(cfg).execute().unwrap();
        assert_eq!(report.metrics.train_rows, 80);
        assert_eq!(report.metrics.val_rows, 0);
        assert!(report.metrics.val_pr_auc.is_nan());
    }
}
