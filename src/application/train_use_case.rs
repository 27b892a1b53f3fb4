// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one streaming training run in order:
//
//   Step 1: Validate config, or rebuild it from a checkpoint
//   Step 2: Open the run context        (Layer 6 - infra)
//   Step 3: Open the chunk stream       (Layer 4 - data)
//   Step 4: Run the state machine       (Layer 5 - ml)
//   Step 5: Compute validation metrics  (Layer 5 - ml)
//   Step 6: Save artifact + metrics     (Layer 6 - infra)
//   Step 7: Promotion gate, best effort (Layer 2 - promote)
//
// Config-affecting failures (bad flags, unreadable checkpoint,
// missing label column) stop the run before anything is written.
// A registry failure never does.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::promote_use_case::{PollPolicy, PromotionGate, PromotionOutcome, PromotionRequest};
use crate::data::hasher::{FeatureHasher, DEFAULT_N_FEATURES};
use crate::data::loader::CsvChunkReader;
use crate::domain::error::CtrError;
use crate::domain::features::{
    default_cross_pairs, format_cross_list, CrossPair, EnsembleKind, Rebalancing, RunType,
};
use crate::domain::traits::Persistable;
use crate::infra::{
    artifact::{ModelArtifact, ARTIFACT_FILE_NAME},
    checkpoint::CheckpointManager,
    metrics::{write_metrics, MetricsLogger, RunMetrics, METRICS_FILE_NAME},
    registry::FsRegistry,
    run_context::RunContext,
};
use crate::ml::evaluation::ValidationMetrics;
use crate::ml::trainer::StreamingTrainer;

// ─── Training Configuration ──────────────────────────────────────────────────
// Immutable for the whole run. Stored in every checkpoint and in
// the run's params.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_path:          PathBuf,
    pub chunk_size:         usize,
    pub max_train_chunks:   u64,
    pub val_rows:           u64,
    /// 0 = derive from val_rows / chunk_size
    pub val_chunks:         u64,
    /// 0 = only the end-of-run checkpoint
    pub checkpoint_every:   u64,
    pub seed:               u64,

    // Feature space and ensemble: inherited from the checkpoint on resume
    pub hash_n_features:    usize,
    pub use_feature_cross:  bool,
    pub cross_pairs:        Vec<CrossPair>,
    pub ensemble_type:      EnsembleKind,
    pub n_estimators:       usize,
    pub rebalancing:        Rebalancing,
    pub shuffle:            bool,

    pub metric_gate_pr_auc: f64,
    pub resume_from:        Option<PathBuf>,
    pub register_name:      String,
    pub register_stage:     String,
    /// None disables promotion
    pub registry_dir:       Option<PathBuf>,

    pub model_dir:          PathBuf,
    pub metrics_dir:        PathBuf,
    pub runs_dir:           PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_path:          PathBuf::from("data/train.gz"),
            chunk_size:         200_000,
            max_train_chunks:   25,
            val_rows:           400_000,
            val_chunks:         0,
            checkpoint_every:   5,
            seed:               42,
            hash_n_features:    DEFAULT_N_FEATURES,
            use_feature_cross:  true,
            cross_pairs:        default_cross_pairs(),
            ensemble_type:      EnsembleKind::BaggingSgd,
            n_estimators:       5,
            rebalancing:        Rebalancing::ClassWeightBalanced,
            shuffle:            true,
            metric_gate_pr_auc: 0.20,
            resume_from:        None,
            register_name:      "avazu_ctr".to_string(),
            register_stage:     "Staging".to_string(),
            registry_dir:       Some(PathBuf::from("registry")),
            model_dir:          PathBuf::from("models"),
            metrics_dir:        PathBuf::from("metrics"),
            runs_dir:           PathBuf::from("runs"),
        }
    }
}

impl TrainConfig {
    /// Reject values that would fail later, before any data is read.
    pub fn validate(&self) -> Result<(), CtrError> {
        if self.chunk_size == 0 {
            return Err(CtrError::config("chunk_size must be at least 1"));
        }
        if self.max_train_chunks == 0 {
            return Err(CtrError::config("max_train_chunks must be at least 1"));
        }
        if self.ensemble_type.member_count(self.n_estimators) == 0 {
            return Err(CtrError::config("n_estimators must be at least 1"));
        }
        if !self.metric_gate_pr_auc.is_finite() {
            return Err(CtrError::config("metric_gate_pr_auc must be a finite number"));
        }
        FeatureHasher::new(self.hash_n_features)?;
        Ok(())
    }

    /// New config for a resumed run: feature/ensemble fields from the
    /// checkpoint, everything run-specific from `fresh`.
    pub fn resumed_from(fresh: TrainConfig, checkpoint: &TrainConfig) -> TrainConfig {
        let inherited = |field: &str, from_ckpt: String, requested: String| {
            if from_ckpt != requested {
                tracing::warn!(
                    "Resume: using checkpoint {}={} (requested {})",
                    field,
                    from_ckpt,
                    requested
                );
            }
        };
        inherited("hash_n_features", checkpoint.hash_n_features.to_string(), fresh.hash_n_features.to_string());
        inherited("use_feature_cross", checkpoint.use_feature_cross.to_string(), fresh.use_feature_cross.to_string());
        inherited("cross_pairs", format_cross_list(&checkpoint.cross_pairs), format_cross_list(&fresh.cross_pairs));
        inherited("ensemble_type", checkpoint.ensemble_type.to_string(), fresh.ensemble_type.to_string());
        inherited("n_estimators", checkpoint.n_estimators.to_string(), fresh.n_estimators.to_string());
        inherited("rebalancing", checkpoint.rebalancing.to_string(), fresh.rebalancing.to_string());

        TrainConfig {
            hash_n_features:   checkpoint.hash_n_features,
            use_feature_cross: checkpoint.use_feature_cross,
            cross_pairs:       checkpoint.cross_pairs.clone(),
            ensemble_type:     checkpoint.ensemble_type,
            n_estimators:      checkpoint.n_estimators,
            rebalancing:       checkpoint.rebalancing,
            shuffle:           checkpoint.shuffle,
            seed:              checkpoint.seed,
            ..fresh
        }
    }

    /// True if `other` describes the same hashed feature space and ensemble.
    pub fn same_feature_space(&self, other: &TrainConfig) -> bool {
        self.hash_n_features == other.hash_n_features
            && self.use_feature_cross == other.use_feature_cross
            && self.cross_pairs == other.cross_pairs
            && self.ensemble_type == other.ensemble_type
            && self.n_estimators == other.n_estimators
            && self.rebalancing == other.rebalancing
    }

    /// `val_chunks` if set, else ceil(val_rows / chunk_size), at least 1.
    pub fn effective_val_chunks(&self) -> u64 {
        if self.val_chunks > 0 {
            return self.val_chunks;
        }
        self.val_rows.div_ceil(self.chunk_size.max(1) as u64).max(1)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.model_dir.join("checkpoints")
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.model_dir.join(ARTIFACT_FILE_NAME)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.metrics_dir.join(METRICS_FILE_NAME)
    }
}

// ─── TrainReport ──────────────────────────────────────────────────────────────

/// What the CLI prints after a run.
#[derive(Debug)]
pub struct TrainReport {
    pub run_id:          String,
    pub metrics:         RunMetrics,
    pub artifact_path:   PathBuf,
    pub metrics_path:    PathBuf,
    pub last_checkpoint: Option<PathBuf>,
    /// None when no registry is configured
    pub promotion:       Option<PromotionOutcome>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainReport> {
        // ── Step 1: Effective config ──────────────────────────────────────────
        self.config.validate()?;
        let (cfg, resume) = match &self.config.resume_from {
            Some(path) => {
                let state = CheckpointManager::load(path)?;
                let cfg = TrainConfig::resumed_from(self.config.clone(), &state.config);
                // Inherited fields come from the checkpoint, not the flags
                cfg.validate()?;
                (cfg, Some(state))
            }
            None => (self.config.clone(), None),
        };

        // ── Step 2: Run context ───────────────────────────────────────────────
        let run = RunContext::start(&cfg.runs_dir, "ctr_streaming")?;
        run.log_params(&cfg)?;

        // ── Step 3: Chunk stream ──────────────────────────────────────────────
        tracing::info!(
            "Streaming '{}' in chunks of {} rows",
            cfg.data_path.display(),
            cfg.chunk_size
        );
        let mut source = CsvChunkReader::open(&cfg.data_path, cfg.chunk_size)?;

        // ── Step 4: Train + validate ──────────────────────────────────────────
        let checkpoints = CheckpointManager::for_run(&cfg.checkpoint_dir(), run.run_id())?;
        let chunk_log = MetricsLogger::new(checkpoints.dir())?;
        let started = Instant::now();

        let outcome = StreamingTrainer::new(&checkpoints)
            .with_progress_log(&chunk_log)
            .run(&cfg, resume, &mut source)?;
        let elapsed = started.elapsed().as_secs_f64();

        // ── Step 5: Metrics ───────────────────────────────────────────────────
        let val = outcome.validation.metrics();
        let state = &outcome.state;
        let run_type = RunType::classify(state.trained_rows, state.chunks_trained);

        let metrics = build_run_metrics(
            &cfg,
            &val,
            state.trained_rows,
            state.chunks_trained,
            outcome.validation.len() as u64,
            outcome.val_chunks_used,
            state.ensemble.len(),
            elapsed,
            run_type,
            run.run_id(),
        );

        // ── Step 6: Persist ───────────────────────────────────────────────────
        let artifact_path = cfg.artifact_path();
        ModelArtifact::from_state(state).save(&artifact_path)?;

        let metrics_path = cfg.metrics_path();
        write_metrics(&metrics_path, &metrics)?;
        run.log_metrics(&metrics)?;
        run.write_last_run_id(&cfg.model_dir)?;

        // ── Step 7: Promotion ─────────────────────────────────────────────────
        let promotion = cfg.registry_dir.as_deref().map(|dir| {
            promote_best_effort(&cfg, dir, val.pr_auc, &artifact_path, run.run_id())
        });
        if let Some(p) = &promotion {
            tracing::info!("Promotion: {}", p);
        }

        let report = TrainReport {
            run_id: run.run_id().to_string(),
            metrics,
            artifact_path,
            metrics_path,
            last_checkpoint: outcome.last_checkpoint,
            promotion,
        };
        run.finish()?;
        Ok(report)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_run_metrics(
    cfg: &TrainConfig,
    val: &ValidationMetrics,
    trained_rows: u64,
    chunks_trained: u64,
    val_rows_used: u64,
    val_chunks_used: u64,
    members: usize,
    elapsed: f64,
    run_type: RunType,
    run_id: &str,
) -> RunMetrics {
    RunMetrics {
        val_auc:           val.auc,
        val_logloss:       val.logloss,
        val_pr_auc:        val.pr_auc,
        train_rows:        trained_rows,
        trained_rows,
        chunks_trained,
        val_rows:          val_rows_used,
        val_rows_used,
        val_chunks_used,
        elapsed_seconds:   elapsed,
        hash_n_features:   cfg.hash_n_features,
        chunk_size:        cfg.chunk_size,
        max_train_chunks:  cfg.max_train_chunks,
        val_rows_config:   cfg.val_rows,
        val_chunks:        cfg.effective_val_chunks(),
        use_feature_cross: cfg.use_feature_cross,
        cross_pairs:       format_cross_list(&cfg.cross_pairs),
        rebalancing:       cfg.rebalancing.to_string(),
        ensemble_type:     cfg.ensemble_type.to_string(),
        n_estimators:      members,
        run_type,
        run_id:            Some(run_id.to_string()),
    }
}

/// Registry problems become an outcome, never an error.
fn promote_best_effort(
    cfg: &TrainConfig,
    registry_dir: &Path,
    pr_auc: f64,
    artifact: &Path,
    run_id: &str,
) -> PromotionOutcome {
    let gate = PromotionGate::new(cfg.metric_gate_pr_auc, PollPolicy::default());
    if !gate.passes(pr_auc) {
        return gate.not_met(pr_auc);
    }

    match FsRegistry::open(registry_dir).context("Cannot open model registry") {
        Ok(registry) => gate.evaluate(
            &registry,
            pr_auc,
            &PromotionRequest {
                model_name: &cfg.register_name,
                stage: &cfg.register_stage,
                artifact,
                run_id,
            },
        ),
        Err(e) => PromotionOutcome::RegistryUnavailable { reason: format!("{e:#}") },
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::codec;
    use crate::infra::run_context::read_status;
    use std::fmt::Write as _;

    /// 100 rows, every 10th a click.
    fn write_dataset(path: &Path) {
        let mut csv = String::from("id,click,hour,site_id,site_domain,app_id,app_domain,device_type,device_conn_type\n");
        for i in 0..100 {
            let click = (i % 10 == 0) as u8;
            writeln!(
                csv,
                "{i},{click},14102100,s{},d{},a{},ad{},{},{}",
                i % 7,
                i % 5,
                i % 3,
                i % 4,
                i % 2,
                i % 3
            )
            .unwrap();
        }
        std::fs::write(path, csv).unwrap();
    }

    fn smoke_config(root: &Path) -> TrainConfig {
        let data = root.join("train.csv");
        write_dataset(&data);
        TrainConfig {
            data_path: data,
            chunk_size: 30,
            max_train_chunks: 2,
            val_rows: 30,
            val_chunks: 1,
            hash_n_features: 1024,
            registry_dir: None,
            model_dir: root.join("models"),
            metrics_dir: root.join("metrics"),
            runs_dir: root.join("runs"),
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_end_to_end_smoke_run() {
        let dir = tempfile::tempdir().unwrap();
        let report = TrainUseCase::new(smoke_config(dir.path())).execute().unwrap();

        assert!(report.metrics_path.exists());
        assert!(report.artifact_path.exists());
        assert!(report.promotion.is_none());

        let raw: serde_json::Value = codec::read_json(&report.metrics_path).unwrap();
        assert!(raw["val_pr_auc"].is_f64());
        assert_eq!(raw["run_type"], "SMOKE/DEBUG");
        assert_eq!(raw["trained_rows"], 60);
        assert_eq!(raw["chunks_trained"], 2);
        assert_eq!(raw["val_rows_used"], 30);

        let run_dir = dir.path().join("runs").join(&report.run_id);
        assert_eq!(read_status(&run_dir).unwrap(), "FINISHED");
        assert!(report.last_checkpoint.unwrap().ends_with("ckpt_chunk_2.bin.gz"));
    }

    #[test]
    fn test_resume_inherits_feature_space() {
        let dir = tempfile::tempdir().unwrap();
        let first = smoke_config(dir.path());
        let ckpt = TrainUseCase::new(first.clone()).execute().unwrap().last_checkpoint.unwrap();
        assert!(ckpt.ends_with("ckpt_chunk_2.bin.gz"));
        let resumed = TrainConfig {
            max_train_chunks: 3,
            hash_n_features: 4096,
            use_feature_cross: false,
            resume_from: Some(ckpt),
            ..first
        };
        let report = TrainUseCase::new(resumed).execute().unwrap();

        assert_eq!(report.metrics.chunks_trained, 3);
        assert_eq!(report.metrics.trained_rows, 90);
        assert_eq!(report.metrics.hash_n_features, 1024);
        assert!(report.metrics.use_feature_cross);
    }

    #[test]
    fn test_runs_sharing_a_root_keep_their_own_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let first = TrainConfig { seed: 1, ..smoke_config(dir.path()) };
        let second = TrainConfig { seed: 7, ..first.clone() };

        let a = TrainUseCase::new(first.clone()).execute().unwrap();
        let b = TrainUseCase::new(second).execute().unwrap();

        let a_ckpt = a.last_checkpoint.unwrap();
        let b_ckpt = b.last_checkpoint.unwrap();
        assert_ne!(a_ckpt, b_ckpt);
        assert_eq!(CheckpointManager::load(&a_ckpt).unwrap().config.seed, 1);
        assert_eq!(CheckpointManager::load(&b_ckpt).unwrap().config.seed, 7);

        // The checkpoints root resumes the most recent run
        assert_eq!(CheckpointManager::resolve(&first.checkpoint_dir()).unwrap(), b_ckpt);
        let resumed = TrainConfig {
            max_train_chunks: 3,
            resume_from: Some(first.checkpoint_dir()),
            ..first
        };
        let report = TrainUseCase::new(resumed).execute().unwrap();
        assert_eq!(report.metrics.chunks_trained, 3);
        let c_ckpt = report.last_checkpoint.unwrap();
        assert_eq!(CheckpointManager::load(&c_ckpt).unwrap().config.seed, 7);
    }

    #[test]
    fn test_resume_revalidates_inherited_fields() {
        use crate::data::hasher::FeatureHasher;
        use crate::ml::ensemble::Ensemble;
        use crate::ml::model::ClassWeight;
        use crate::ml::trainer::TrainingState;

        let dir = tempfile::tempdir().unwrap();
        let base = smoke_config(dir.path());

        // A checkpoint whose feature space no fresh config could declare
        let hasher: FeatureHasher =
            serde_json::from_value(serde_json::json!({"n_features": 1000, "alternate_sign": true})).unwrap();
        let state = TrainingState {
            config: TrainConfig { hash_n_features: 1000, ..base.clone() },
            ensemble: Ensemble::build(EnsembleKind::BaggingSgd, 2, 1, ClassWeight::uniform(), true).unwrap(),
            hasher,
            chunks_trained: 1,
            trained_rows: 30,
        };
        let ckpt = CheckpointManager::new(dir.path().join("foreign"))
            .unwrap()
            .save(&state)
            .unwrap();

        let err = TrainUseCase::new(TrainConfig { resume_from: Some(ckpt), ..base })
            .execute()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Config(_))));
        assert!(!dir.path().join("metrics").join(METRICS_FILE_NAME).exists());
    }

    #[test]
    fn test_missing_checkpoint_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            resume_from: Some(dir.path().join("nope.bin.gz")),
            ..smoke_config(dir.path())
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Resume(_))));
        assert!(!dir.path().join("metrics").join(METRICS_FILE_NAME).exists());
    }

    #[test]
    fn test_registry_failure_does_not_fail_run() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the registry directory should be
        let blocker = dir.path().join("registry");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let cfg = TrainConfig {
            registry_dir: Some(blocker),
            metric_gate_pr_auc: 0.0,
            ..smoke_config(dir.path())
        };
        let report = TrainUseCase::new(cfg).execute().unwrap();
        assert!(matches!(
            report.promotion,
            Some(PromotionOutcome::RegistryUnavailable { .. })
        ));
        assert!(report.artifact_path.exists());
    }

    #[test]
    fn test_val_chunks_derivation() {
        let mut c = TrainConfig { chunk_size: 30, val_rows: 31, val_chunks: 0, ..TrainConfig::default() };
        assert_eq!(c.effective_val_chunks(), 2);
        c.val_rows = 0;
        assert_eq!(c.effective_val_chunks(), 1);
        c.val_chunks = 4;
        assert_eq!(c.effective_val_chunks(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_width() {
        let c = TrainConfig { hash_n_features: 1000, ..TrainConfig::default() };
        assert!(matches!(c.validate(), Err(CtrError::Config(_))));
    }
}
