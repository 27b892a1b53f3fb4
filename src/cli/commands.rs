// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the subcommands and their flags:
//
//   train     streaming trainer (checkpoints, resume, promotion)
//   baseline  one full-batch model for comparison
//   predict   score a CSV or one JSON request with an artifact
//   promote   gate a metrics file and register the artifact
//   monitor   accuracy, drift and alerts from the prediction log
//   inspect   dataset sanity check
//
// Every trainer flag falls back to an environment variable
// (clap `env`); an explicit flag always wins.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{builder::BoolishValueParser, ArgAction, Args, Subcommand};

use crate::application::baseline_use_case::BaselineConfig;
use crate::application::inspect_use_case::{InspectConfig, DEFAULT_INSPECT_ROWS};
use crate::application::monitor_use_case::MonitorConfig;
use crate::application::predict_use_case::{DEFAULT_NROWS, DEFAULT_PREDICTION_LOG};
use crate::application::promote_use_case::PromoteConfig;
use crate::application::train_use_case::TrainConfig;
use crate::data::hasher::DEFAULT_N_FEATURES;
use crate::domain::error::CtrError;
use crate::domain::features::{parse_cross_list, EnsembleKind, Rebalancing};
use crate::infra::artifact::ARTIFACT_FILE_NAME;
use crate::infra::metrics::METRICS_FILE_NAME;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the streaming ensemble chunk by chunk
    Train(TrainArgs),

    /// Fit a single full-batch baseline model
    Baseline(BaselineArgs),

    /// Score rows of a CSV, or one JSON request, with a saved artifact
    Predict(PredictArgs),

    /// Apply the PR-AUC gate to a metrics file and register the artifact
    Promote(PromoteArgs),

    /// Compute accuracy, daily metrics, drift and alerts from logged predictions
    Monitor(MonitorArgs),

    /// Print shape, label distribution and column cardinalities of a dataset
    Inspect(InspectArgs),
}

// ─── Shared feature-space flags ───────────────────────────────────────────────

#[derive(Args, Debug, Clone)]
pub struct FeatureArgs {
    /// Width of the hashed feature space (power of two)
    #[arg(long, env = "HASH_N_FEATURES", default_value_t = DEFAULT_N_FEATURES)]
    pub hash_n_features: usize,

    /// Add crossed features for the configured column pairs
    #[arg(
        long,
        env = "USE_FEATURE_CROSS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub use_feature_cross: bool,

    /// Turn feature crosses off regardless of --use-feature-cross
    #[arg(long)]
    pub disable_feature_cross: bool,

    /// Cross pairs as `colA:colB,colC:colD`; empty means the default pairs
    #[arg(long, env = "CROSS_LIST", default_value = "")]
    pub cross_list: String,
}

impl FeatureArgs {
    fn use_cross(&self) -> bool {
        self.use_feature_cross && !self.disable_feature_cross
    }
}

// ─── train ────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Training CSV, gzip or plain
    #[arg(long, env = "AVAZU_TRAIN_GZ", default_value = "data/train.gz")]
    pub data_path: PathBuf,

    /// Rows per chunk
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 200_000)]
    pub chunk_size: usize,

    /// Chunks to train on before validation starts
    #[arg(long, env = "MAX_TRAIN_CHUNKS", default_value_t = 25)]
    pub max_train_chunks: u64,

    /// Validation rows; used to derive --val-chunks when that is 0
    #[arg(long, env = "VAL_ROWS", default_value_t = 400_000)]
    pub val_rows: u64,

    /// Validation chunks (0 = ceil(val_rows / chunk_size))
    #[arg(long, env = "VAL_CHUNKS", default_value_t = 0)]
    pub val_chunks: u64,

    /// Save a checkpoint every N trained chunks (0 = only at the end)
    #[arg(long, env = "CHECKPOINT_EVERY", default_value_t = 5)]
    pub checkpoint_every: u64,

    #[arg(long, env = "SEED", default_value_t = 42)]
    pub seed: u64,

    #[command(flatten)]
    pub features: FeatureArgs,

    /// `single` or `bagging_sgd`
    #[arg(long = "ensemble", env = "ENSEMBLE", default_value = "bagging_sgd")]
    pub ensemble_type: EnsembleKind,

    #[arg(long, env = "N_ESTIMATORS", default_value_t = 5)]
    pub n_estimators: usize,

    /// `class_weight_balanced` or `none`
    #[arg(long, env = "REBALANCING", default_value = "class_weight_balanced")]
    pub rebalancing: Rebalancing,

    /// Keep chunk rows in file order
    #[arg(long)]
    pub no_shuffle: bool,

    /// Minimum validation PR-AUC for registration
    #[arg(long, env = "METRIC_GATE_PR_AUC", default_value_t = 0.20)]
    pub metric_gate_pr_auc: f64,

    /// Checkpoint file, or a checkpoint directory (its latest file is used)
    #[arg(long, env = "RESUME_FROM")]
    pub resume_from: Option<PathBuf>,

    #[arg(long, env = "MODEL_REGISTER_NAME", default_value = "avazu_ctr")]
    pub register_name: String,

    #[arg(long, env = "MODEL_REGISTER_STAGE", default_value = "Staging")]
    pub register_stage: String,

    #[arg(long, default_value = "registry")]
    pub registry_dir: PathBuf,

    /// Skip the promotion step entirely
    #[arg(long)]
    pub no_register: bool,

    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,

    #[arg(long, default_value = "metrics")]
    pub metrics_dir: PathBuf,

    #[arg(long, default_value = "runs")]
    pub runs_dir: PathBuf,
}

/// Boundary between Layer 1 and Layer 2: the application layer
/// never sees clap types. Fallible because the cross list is parsed.
impl TryFrom<TrainArgs> for TrainConfig {
    type Error = CtrError;

    fn try_from(a: TrainArgs) -> Result<Self, Self::Error> {
        Ok(TrainConfig {
            data_path:          a.data_path,
            chunk_size:         a.chunk_size,
            max_train_chunks:   a.max_train_chunks,
            val_rows:           a.val_rows,
            val_chunks:         a.val_chunks,
            checkpoint_every:   a.checkpoint_every,
            seed:               a.seed,
            hash_n_features:    a.features.hash_n_features,
            use_feature_cross:  a.features.use_cross(),
            cross_pairs:        parse_cross_list(&a.features.cross_list)?,
            ensemble_type:      a.ensemble_type,
            n_estimators:       a.n_estimators,
            rebalancing:        a.rebalancing,
            shuffle:            !a.no_shuffle,
            metric_gate_pr_auc: a.metric_gate_pr_auc,
            resume_from:        a.resume_from,
            register_name:      a.register_name,
            register_stage:     a.register_stage,
            registry_dir:       (!a.no_register).then_some(a.registry_dir),
            model_dir:          a.model_dir,
            metrics_dir:        a.metrics_dir,
            runs_dir:           a.runs_dir,
        })
    }
}

// ─── baseline ─────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct BaselineArgs {
    #[arg(long, env = "AVAZU_TRAIN_GZ", default_value = "data/train.gz")]
    pub data_path: PathBuf,

    #[arg(long, env = "BASELINE_TRAIN_ROWS", default_value_t = 3_000_000)]
    pub train_rows: usize,

    #[arg(long, env = "BASELINE_VAL_ROWS", default_value_t = 300_000)]
    pub val_rows: usize,

    #[command(flatten)]
    pub features: FeatureArgs,

    #[arg(long, env = "SEED", default_value_t = 42)]
    pub seed: u64,

    /// Passes over the training slice
    #[arg(long, default_value_t = 5)]
    pub max_iter: usize,

    /// Blend the linear model with multinomial naive Bayes
    #[arg(long)]
    pub blend_nb: bool,

    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,

    #[arg(long, default_value = "metrics")]
    pub metrics_dir: PathBuf,
}

impl TryFrom<BaselineArgs> for BaselineConfig {
    type Error = CtrError;

    fn try_from(a: BaselineArgs) -> Result<Self, Self::Error> {
        Ok(BaselineConfig {
            data_path:         a.data_path,
            train_rows:        a.train_rows,
            val_rows:          a.val_rows,
            hash_n_features:   a.features.hash_n_features,
            use_feature_cross: a.features.use_cross(),
            cross_pairs:       parse_cross_list(&a.features.cross_list)?,
            seed:              a.seed,
            epochs:            a.max_iter,
            blend_nb:          a.blend_nb,
            model_dir:         a.model_dir,
            metrics_dir:       a.metrics_dir,
        })
    }
}

// ─── predict ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Model artifact produced by `train` or `baseline`
    #[arg(long, env = "MODEL_PATH", default_value_os_t = PathBuf::from("models").join(ARTIFACT_FILE_NAME))]
    pub model_path: PathBuf,

    /// Labelled CSV to score
    #[arg(long, env = "AVAZU_TRAIN_GZ", default_value = "data/train.gz")]
    pub data_path: PathBuf,

    /// Rows to score from the top of the file
    #[arg(long, default_value_t = DEFAULT_NROWS)]
    pub nrows: usize,

    /// Score one request body instead, e.g. '{"features": {"site_id": "..."}}'
    #[arg(long, conflicts_with = "nrows")]
    pub features_json: Option<String>,

    #[arg(long, default_value = DEFAULT_PREDICTION_LOG)]
    pub log_path: PathBuf,

    /// Do not append predictions to the log
    #[arg(long)]
    pub no_log: bool,
}

// ─── promote ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PromoteArgs {
    #[arg(long, default_value_os_t = PathBuf::from("metrics").join(METRICS_FILE_NAME))]
    pub metrics_path: PathBuf,

    #[arg(long, default_value_os_t = PathBuf::from("models").join(ARTIFACT_FILE_NAME))]
    pub model_path: PathBuf,

    #[arg(long, env = "METRIC_GATE_PR_AUC", default_value_t = 0.20)]
    pub min_pr_auc: f64,

    #[arg(long, env = "MODEL_REGISTER_NAME", default_value = "avazu_ctr")]
    pub model_name: String,

    #[arg(long, env = "MODEL_REGISTER_STAGE", default_value = "Staging")]
    pub stage: String,

    #[arg(long, default_value = "registry")]
    pub registry_dir: PathBuf,

    /// Run id recorded with the version (default: last_run_id.txt next to the model)
    #[arg(long)]
    pub run_id: Option<String>,
}

impl From<PromoteArgs> for PromoteConfig {
    fn from(a: PromoteArgs) -> Self {
        PromoteConfig {
            metrics_path:  a.metrics_path,
            artifact_path: a.model_path,
            min_pr_auc:    a.min_pr_auc,
            model_name:    a.model_name,
            stage:         a.stage,
            registry_dir:  a.registry_dir,
            run_id:        a.run_id,
        }
    }
}

// ─── monitor ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[arg(long, default_value = DEFAULT_PREDICTION_LOG)]
    pub log_path: PathBuf,

    #[arg(long, default_value = "reports")]
    pub reports_dir: PathBuf,

    /// Threshold used when none can be recommended from labelled rows
    #[arg(long, env = "OPERATING_THRESHOLD", default_value_t = 0.5)]
    pub operating_threshold: f64,
}

impl From<MonitorArgs> for MonitorConfig {
    fn from(a: MonitorArgs) -> Self {
        MonitorConfig {
            log_path:            a.log_path,
            reports_dir:         a.reports_dir,
            operating_threshold: a.operating_threshold,
        }
    }
}

// ─── inspect ──────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long, env = "AVAZU_TRAIN_GZ", default_value = "data/train.gz")]
    pub data_path: PathBuf,

    #[arg(long, default_value_t = DEFAULT_INSPECT_ROWS)]
    pub nrows: usize,
}

impl From<InspectArgs> for InspectConfig {
    fn from(a: InspectArgs) -> Self {
        InspectConfig { data_path: a.data_path, nrows: a.nrows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn train_args(argv: &[&str]) -> TrainArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Train(a) => a,
            other => panic!("expected train, got {other:?}"),
        }
    }

    #[test]
    fn test_train_flags_map_to_config() {
        let args = train_args(&[
            "ctr-stream", "train",
            "--chunk-size", "1000",
            "--ensemble", "single",
            "--rebalancing", "none",
            "--cross-list", "site_id:app_id",
            "--disable-feature-cross",
            "--no-register",
            "--no-shuffle",
        ]);
        let cfg = TrainConfig::try_from(args).unwrap();
        assert_eq!(cfg.chunk_size, 1000);
        assert_eq!(cfg.ensemble_type, EnsembleKind::Single);
        assert_eq!(cfg.rebalancing, Rebalancing::None);
        assert_eq!(cfg.cross_pairs.len(), 1);
        assert!(!cfg.use_feature_cross);
        assert!(!cfg.shuffle);
        assert!(cfg.registry_dir.is_none());
    }

    #[test]
    fn test_defaults_match_train_config_default() {
        let cfg = TrainConfig::try_from(train_args(&["ctr-stream", "train"])).unwrap();
        let d = TrainConfig::default();
        assert_eq!(cfg.chunk_size, d.chunk_size);
        assert_eq!(cfg.max_train_chunks, d.max_train_chunks);
        assert_eq!(cfg.cross_pairs, d.cross_pairs);
        assert_eq!(cfg.ensemble_type, d.ensemble_type);
        assert_eq!(cfg.registry_dir, d.registry_dir);
    }

    #[test]
    fn test_bad_cross_list_is_config_error() {
        let args = train_args(&["ctr-stream", "train", "--cross-list", "site_id"]);
        assert!(matches!(TrainConfig::try_from(args), Err(CtrError::Config(_))));
    }

    #[test]
    fn test_unknown_ensemble_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["ctr-stream", "train", "--ensemble", "forest"]).is_err());
    }
}
