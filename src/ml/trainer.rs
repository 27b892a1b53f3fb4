// ============================================================
// Layer 5 — Streaming Training Loop
// ============================================================
// Drives one run over a sequential chunk stream:
//
//   INIT ──fresh──▶ WARMUP ──▶ TRAINING ──▶ VALIDATING ──▶ FINALIZED
//     └──resume (skip chunks_trained chunks)──┘
//
//   WARMUP     first chunk only: class weights from this chunk,
//              build members, first fit declares classes {0, 1}
//   TRAINING   every member fits every chunk until
//              chunks_trained == max_train_chunks or the stream
//              ends; checkpoint every `checkpoint_every` chunks
//              and once more at the end if needed
//   VALIDATING the next `val_chunks` chunks of the same stream,
//              scored by the ensemble mean, never fitted
//
// The stream cannot seek, so resuming re-reads and discards the
// chunks already trained. Validation always reads chunks that
// come after the last trained one.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::data::batcher::ChunkBatcher;
use crate::data::hasher::FeatureHasher;
use crate::domain::error::CtrError;
use crate::domain::features::Rebalancing;
use crate::domain::traits::ChunkSource;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::{ChunkMetrics, MetricsLogger};
use crate::ml::ensemble::Ensemble;
use crate::ml::evaluation::ValidationSet;
use crate::ml::model::ClassWeight;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Warmup,
    Training,
    Validating,
    Finalized,
}

/// Everything needed to continue fitting: what a checkpoint holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    pub config: TrainConfig,
    pub ensemble: Ensemble,
    pub hasher: FeatureHasher,
    pub chunks_trained: u64,
    pub trained_rows: u64,
}

/// Result of one full pass through the state machine.
#[derive(Debug)]
pub struct TrainOutcome {
    pub state: TrainingState,
    pub validation: ValidationSet,
    pub val_chunks_used: u64,
    pub last_checkpoint: Option<PathBuf>,
    pub resumed: bool,
}

pub struct StreamingTrainer<'a> {
    checkpoints: &'a CheckpointManager,
    progress: Option<&'a MetricsLogger>,
    phase: Phase,
    started: Instant,
    last_saved: Option<u64>,
    last_checkpoint: Option<PathBuf>,
}

impl<'a> StreamingTrainer<'a> {
    pub fn new(checkpoints: &'a CheckpointManager) -> Self {
        Self {
            checkpoints,
            progress: None,
            phase: Phase::Init,
            started: Instant::now(),
            last_saved: None,
            last_checkpoint: None,
        }
    }

    /// Append a row per trained chunk to `logger`.
    pub fn with_progress_log(mut self, logger: &'a MetricsLogger) -> Self {
        self.progress = Some(logger);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run to FINALIZED. `resume` must already carry `config` (see
    /// `TrainConfig::resumed_from`).
    pub fn run<S: ChunkSource>(
        &mut self,
        config: &TrainConfig,
        resume: Option<TrainingState>,
        source: &mut S,
    ) -> Result<TrainOutcome> {
        self.phase = Phase::Init;
        self.started = Instant::now();
        let resumed = resume.is_some();

        let mut state = match resume {
            Some(state) => self.catch_up(config, state, source)?,
            None => self.warmup(config, source)?,
        };

        // ── TRAINING ──────────────────────────────────────────────────────────
        self.phase = Phase::Training;
        let batcher = ChunkBatcher::new(
            state.hasher,
            state.config.use_feature_cross,
            state.config.cross_pairs.clone(),
        );

        while state.chunks_trained < config.max_train_chunks {
            let Some(chunk) = source.next_chunk()? else {
                tracing::info!("Stream exhausted after {} chunks", state.chunks_trained);
                break;
            };

            let batch = batcher.encode(&chunk);
            let loss = state.ensemble.fit_chunk(&batch)?;
            state.chunks_trained += 1;
            state.trained_rows += chunk.len() as u64;

            self.after_chunk(&state, chunk.len(), loss)?;
        }

        if state.chunks_trained > 0 && self.last_saved != Some(state.chunks_trained) {
            self.checkpoint(&state)?;
        }

        // ── VALIDATING ────────────────────────────────────────────────────────
        self.phase = Phase::Validating;
        let planned = config.effective_val_chunks();
        let mut validation = ValidationSet::default();
        let mut val_chunks_used = 0;

        while val_chunks_used < planned {
            let Some(chunk) = source.next_chunk()? else {
                tracing::warn!(
                    "Stream ended after {} of {} validation chunks",
                    val_chunks_used,
                    planned
                );
                break;
            };
            let batch = batcher.encode(&chunk);
            let probs = state.ensemble.predict_proba(&batch.features)?;
            validation.extend(&batch.labels, &probs);
            val_chunks_used += 1;
        }
        tracing::info!(
            "Validated on {} rows from {} chunks",
            validation.len(),
            val_chunks_used
        );

        self.phase = Phase::Finalized;
        Ok(TrainOutcome {
            state,
            validation,
            val_chunks_used,
            last_checkpoint: self.last_checkpoint.clone(),
            resumed,
        })
    }

    /// Resume path: adopt the checkpoint, then re-read the chunks it
    /// already trained on.
    fn catch_up<S: ChunkSource>(
        &mut self,
        config: &TrainConfig,
        mut state: TrainingState,
        source: &mut S,
    ) -> Result<TrainingState> {
        if !config.same_feature_space(&state.config) {
            return Err(CtrError::resume(
                "resume config does not carry the checkpoint's feature/ensemble settings",
            )
            .into());
        }
        state.config = config.clone();

        tracing::info!(
            "Resuming at chunk {} ({} rows trained); skipping trained chunks",
            state.chunks_trained,
            state.trained_rows
        );
        let skipped = source.skip_chunks(state.chunks_trained)?;
        if skipped < state.chunks_trained {
            tracing::warn!(
                "Stream has only {} chunks but the checkpoint trained {}",
                skipped,
                state.chunks_trained
            );
        }

        // Already on disk
        self.last_saved = Some(state.chunks_trained);
        Ok(state)
    }

    fn warmup<S: ChunkSource>(&mut self, config: &TrainConfig, source: &mut S) -> Result<TrainingState> {
        self.phase = Phase::Warmup;

        let first = source
            .next_chunk()?
            .ok_or_else(|| CtrError::schema("no data available in the training stream"))?;

        let labels = first.labels();
        let class_weight = match config.rebalancing {
            Rebalancing::ClassWeightBalanced => ClassWeight::balanced(&labels),
            Rebalancing::None => ClassWeight::uniform(),
        };
        tracing::info!(
            "Warmup chunk: {} rows, {} positive; class weights {{0: {:.4}, 1: {:.4}}}",
            labels.len(),
            labels.iter().filter(|&&y| y == 1).count(),
            class_weight.negative,
            class_weight.positive
        );

        let hasher = FeatureHasher::new(config.hash_n_features)?;
        let mut ensemble = Ensemble::build(
            config.ensemble_type,
            config.n_estimators,
            config.seed,
            class_weight,
            config.shuffle,
        )?;
        tracing::info!(
            "Built {} ensemble with {} member(s), width {}",
            config.ensemble_type,
            ensemble.len(),
            hasher.n_features()
        );

        let batcher = ChunkBatcher::new(hasher, config.use_feature_cross, config.cross_pairs.clone());
        let loss = ensemble.fit_chunk(&batcher.encode(&first))?;

        let state = TrainingState {
            config: config.clone(),
            ensemble,
            hasher,
            chunks_trained: 1,
            trained_rows: first.len() as u64,
        };
        self.after_chunk(&state, first.len(), loss)?;
        Ok(state)
    }

    fn after_chunk(&mut self, state: &TrainingState, rows: usize, loss: f64) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs_f64();
        tracing::info!(
            "Chunk {} trained: rows={} total_rows={} loss={:.5} ({:.1}s)",
            state.chunks_trained,
            rows,
            state.trained_rows,
            loss,
            elapsed
        );

        if let Some(log) = self.progress {
            log.log(&ChunkMetrics {
                chunk: state.chunks_trained,
                rows,
                trained_rows: state.trained_rows,
                mean_log_loss: loss,
                elapsed_seconds: elapsed,
            })?;
        }

        let every = state.config.checkpoint_every;
        if every > 0 && state.chunks_trained % every == 0 {
            self.checkpoint(state)?;
        }
        Ok(())
    }

    fn checkpoint(&mut self, state: &TrainingState) -> Result<()> {
        let path = self.checkpoints.save(state)?;
        self.last_saved = Some(state.chunks_trained);
        self.last_checkpoint = Some(path);
        Ok(())
    }
}
