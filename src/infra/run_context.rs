// ============================================================
// Layer 6 — Run Context
// ============================================================
// One value per training run, passed explicitly to whoever
// records something about the run:
//
//   runs/<run_id>/
//     params.json     ← the effective TrainConfig
//     metrics.json    ← the final RunMetrics
//     status          ← RUNNING, then FINISHED or FAILED
//
// `finish()` marks the run FINISHED. If the context is dropped
// without it (an error propagated with `?`, a panic unwinding),
// Drop marks it FAILED, so no run is left RUNNING.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rand::Rng;
use serde::Serialize;

use crate::infra::codec;

pub const LAST_RUN_ID_FILE: &str = "last_run_id.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

pub struct RunContext {
    run_id: String,
    dir: PathBuf,
    closed: bool,
}

impl RunContext {
    /// Create `runs_dir/<run_id>/` and mark the run RUNNING.
    pub fn start(runs_dir: &Path, run_name: &str) -> Result<Self> {
        let suffix: u32 = rand::thread_rng().gen();
        let run_id = format!(
            "{}-{}-{:08x}",
            run_name,
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            suffix
        );

        let dir = runs_dir.join(&run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create run dir '{}'", dir.display()))?;

        let ctx = Self { run_id, dir, closed: false };
        ctx.write_status(RunStatus::Running)?;
        tracing::info!("Started run {}", ctx.run_id);
        Ok(ctx)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_status(&self, status: RunStatus) -> Result<()> {
        let path = self.dir.join("status");
        fs::write(&path, status.as_str())
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }

    pub fn log_params<T: Serialize>(&self, params: &T) -> Result<()> {
        codec::write_json(&self.dir.join("params.json"), params)
    }

    pub fn log_metrics<T: Serialize>(&self, metrics: &T) -> Result<()> {
        codec::write_json(&self.dir.join("metrics.json"), metrics)
    }

    /// Record this run as the most recent one in `dir/last_run_id.txt`.
    pub fn write_last_run_id(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(LAST_RUN_ID_FILE), &self.run_id)
            .with_context(|| format!("Cannot write run id into '{}'", dir.display()))
    }

    pub fn finish(mut self) -> Result<()> {
        self.closed = true;
        self.write_status(RunStatus::Finished)?;
        tracing::info!("Run {} finished", self.run_id);
        Ok(())
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.write_status(RunStatus::Failed) {
            tracing::warn!("Could not mark run {} as failed: {e:#}", self.run_id);
        } else {
            tracing::warn!("Run {} marked FAILED", self.run_id);
        }
    }
}

pub fn read_status(run_dir: &Path) -> Result<String> {
    Ok(fs::read_to_string(run_dir.join("status"))?.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_marks_finished() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::start(dir.path(), "ctr").unwrap();
        let run_dir = ctx.dir().to_path_buf();
        ctx.log_params(&serde_json::json!({"seed": 42})).unwrap();
        ctx.write_last_run_id(dir.path()).unwrap();
        let id = ctx.run_id().to_string();
        ctx.finish().unwrap();

        assert_eq!(read_status(&run_dir).unwrap(), "FINISHED");
        assert!(run_dir.join("params.json").exists());
        assert_eq!(fs::read_to_string(dir.path().join(LAST_RUN_ID_FILE)).unwrap(), id);
    }

    #[test]
    fn test_drop_on_error_path_marks_failed() {
        let dir = tempfile::tempdir().unwrap();

        fn failing(runs: &Path) -> Result<PathBuf> {
            let ctx = RunContext::start(runs, "ctr")?;
            let run_dir = ctx.dir().to_path_buf();
            anyhow::ensure!(run_dir.is_dir(), "unreachable");
            Err(anyhow::anyhow!("boom in {}", run_dir.display()))
        }

        let err = failing(dir.path()).unwrap_err();
        let run_dir = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        assert!(err.to_string().contains("boom"));
        assert_eq!(read_status(&run_dir).unwrap(), "FAILED");
    }
}
