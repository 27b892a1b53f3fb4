// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores the full training state so a killed run
// can resume where its last checkpoint left off.
//
// What one checkpoint holds (a cumulative snapshot, not a delta):
//   - every ensemble member, mid-fit (weights, schedule, seed)
//   - the hasher
//   - the full TrainConfig of the run that wrote it
//   - chunks_trained / trained_rows
//
// File naming convention, one directory per run:
//   models/checkpoints/
//     ctr_streaming-20261016T091244-5f3a9c01/
//       ckpt_chunk_5.bin.gz    ← state after 5 trained chunks
//       ckpt_chunk_10.bin.gz
//       ckpt_chunk_12.bin.gz   ← end-of-run checkpoint
//
// A run directory is append-only: saving over an existing
// checkpoint is an error, and each file appears atomically
// (temp + rename), so the highest-numbered file is always
// complete.
//
// Resuming from the checkpoints root picks the run whose latest
// checkpoint was written most recently.
//
// Reference: bincode + flate2 (see infra/codec.rs)

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};

use crate::domain::error::CtrError;
use crate::infra::codec::{self, WriteMode};
use crate::ml::trainer::TrainingState;

pub const CHECKPOINT_PREFIX: &str = "ckpt_chunk_";
pub const CHECKPOINT_SUFFIX: &str = ".bin.gz";

/// Chunk count encoded in a checkpoint file name.
pub fn parse_checkpoint_name(name: &str) -> Option<u64> {
    name.strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?
        .parse()
        .ok()
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// The checkpoint directory of one run under `root`.
    pub fn for_run(root: &Path, run_id: &str) -> Result<Self> {
        Self::new(root.join(run_id))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, chunks_trained: u64) -> PathBuf {
        self.dir
            .join(format!("{CHECKPOINT_PREFIX}{chunks_trained}{CHECKPOINT_SUFFIX}"))
    }

    /// Persist `state` as `ckpt_chunk_{chunks_trained}`. Fails if that
    /// file already exists.
    pub fn save(&self, state: &TrainingState) -> Result<PathBuf> {
        let path = self.path_for(state.chunks_trained);

        if path.exists() {
            anyhow::bail!(
                "checkpoint '{}' already exists; refusing to overwrite it",
                path.display()
            );
        }

        codec::write_compressed(&path, state, WriteMode::CreateNew)
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::info!(
            "Saved checkpoint '{}' (chunks_trained={}, trained_rows={})",
            path.display(),
            state.chunks_trained,
            state.trained_rows
        );
        Ok(path)
    }

    /// Checkpoint file a resume path points at. A run directory resolves
    /// to its latest checkpoint, the checkpoints root to the latest
    /// checkpoint of its most recently written run.
    pub fn resolve(path: &Path) -> Result<PathBuf> {
        if !path.is_dir() {
            return Ok(path.to_path_buf());
        }
        let not_found = || CtrError::resume(format!("no checkpoint found in '{}'", path.display()));

        let here = Self { dir: path.to_path_buf() };
        if let Some(file) = here.latest()? {
            return Ok(file);
        }

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(path).with_context(|| format!("Cannot list '{}'", path.display()))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(file) = (Self { dir: entry.path() }).latest()? else {
                continue;
            };
            let written = fs::metadata(&file)?.modified()?;
            let newer = match &newest {
                None => true,
                Some((t, p)) => (written, &file) > (*t, p),
            };
            if newer {
                newest = Some((written, file));
            }
        }
        newest.map(|(_, file)| file).ok_or_else(|| not_found().into())
    }

    /// Exact inverse of `save`. Directories are resolved with `resolve`.
    /// Any failure is a resume error.
    pub fn load(path: &Path) -> Result<TrainingState> {
        let file = Self::resolve(path).map_err(|e| match e.downcast::<CtrError>() {
            Ok(ctr) => anyhow::Error::from(ctr),
            Err(other) => CtrError::resume(format!("{other:#}")).into(),
        })?;

        if !file.exists() {
            return Err(CtrError::resume(format!(
                "checkpoint '{}' does not exist",
                file.display()
            ))
            .into());
        }

        let mut state: TrainingState = codec::read_compressed(&file).map_err(|e| {
            CtrError::resume(format!("checkpoint '{}' is unreadable: {e:#}", file.display()))
        })?;

        if state.ensemble.is_empty() {
            return Err(CtrError::resume(format!(
                "checkpoint '{}' holds no ensemble members",
                file.display()
            ))
            .into());
        }
        if state.hasher.n_features() != state.config.hash_n_features {
            return Err(CtrError::resume(format!(
                "checkpoint '{}' hasher width {} disagrees with its config ({})",
                file.display(),
                state.hasher.n_features(),
                state.config.hash_n_features
            ))
            .into());
        }

        state.config.n_estimators = state.ensemble.len();

        tracing::info!(
            "Loaded checkpoint '{}' ({} members, chunks_trained={}, trained_rows={})",
            file.display(),
            state.ensemble.len(),
            state.chunks_trained,
            state.trained_rows
        );
        Ok(state)
    }

    /// All checkpoints in the directory, ordered by chunk count.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list '{}'", self.dir.display()))?
        {
            let entry = entry?;
            if let Some(n) = entry.file_name().to_str().and_then(parse_checkpoint_name) {
                found.push((n, entry.path()));
            }
        }
        found.sort_by_key(|(n, _)| *n);
        Ok(found)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|(_, p)| p))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainConfig;
    use crate::data::hasher::FeatureHasher;
    use crate::domain::features::EnsembleKind;
    use crate::ml::ensemble::Ensemble;
    use crate::ml::model::ClassWeight;

    fn state(chunks: u64) -> TrainingState {
        let mut config = TrainConfig::default();
        config.hash_n_features = 1 << 8;
        config.n_estimators = 3;
        TrainingState {
            ensemble: Ensemble::build(EnsembleKind::BaggingSgd, 2, 1, ClassWeight::uniform(), true)
                .unwrap(),
            hasher: FeatureHasher::new(1 << 8).unwrap(),
            config,
            chunks_trained: chunks,
            trained_rows: chunks * 10,
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(parse_checkpoint_name("ckpt_chunk_12.bin.gz"), Some(12));
        assert_eq!(parse_checkpoint_name("ckpt_chunk_x.bin.gz"), None);
        assert_eq!(parse_checkpoint_name("metrics.json"), None);
    }

    #[test]
    fn test_save_load_rederives_member_count() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let path = mgr.save(&state(5)).unwrap();
        assert!(path.ends_with("ckpt_chunk_5.bin.gz"));

        let back = CheckpointManager::load(&path).unwrap();
        assert_eq!(back.chunks_trained, 5);
        assert_eq!(back.trained_rows, 50);
        assert_eq!(back.config.n_estimators, 2);
    }

    #[test]
    fn test_latest_and_directory_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        for n in [5, 12, 10] {
            mgr.save(&state(n)).unwrap();
        }
        assert!(mgr.latest().unwrap().unwrap().ends_with("ckpt_chunk_12.bin.gz"));
        assert_eq!(CheckpointManager::load(dir.path()).unwrap().chunks_trained, 12);
    }

    #[test]
    fn test_existing_checkpoint_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        mgr.save(&state(5)).unwrap();

        let mut other = state(5);
        other.trained_rows = 999;
        assert!(mgr.save(&other).is_err());

        assert_eq!(CheckpointManager::load(&mgr.path_for(5)).unwrap().trained_rows, 50);
    }

    #[test]
    fn test_root_resolves_to_most_recent_run() {
        let root = tempfile::tempdir().unwrap();
        let older = CheckpointManager::for_run(root.path(), "run-a").unwrap();
        older.save(&state(7)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = CheckpointManager::for_run(root.path(), "run-b").unwrap();
        newer.save(&state(3)).unwrap();

        assert_eq!(CheckpointManager::resolve(root.path()).unwrap(), newer.path_for(3));
        assert_eq!(CheckpointManager::load(root.path()).unwrap().chunks_trained, 3);
        assert_eq!(CheckpointManager::load(older.dir()).unwrap().chunks_trained, 7);
    }

    #[test]
    fn test_missing_or_corrupt_is_resume_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CheckpointManager::load(&dir.path().join("ckpt_chunk_1.bin.gz")).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Resume(_))));

        let bad = dir.path().join("ckpt_chunk_2.bin.gz");
        fs::write(&bad, b"garbage").unwrap();
        let err = CheckpointManager::load(&bad).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Resume(_))));

        let err = CheckpointManager::load(&dir.path().join("empty")).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Resume(_))));
    }
}
