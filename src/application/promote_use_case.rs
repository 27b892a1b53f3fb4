// ============================================================
// Layer 2 — Promotion Gate / PromoteUseCase
// ============================================================
// Decides whether a trained artifact becomes a staged registry
// candidate:
//
//   val_pr_auc < gate (or NaN) ─▶ GateNotMet, registry untouched
//   val_pr_auc ≥ gate          ─▶ ensure model
//                                 create version
//                                 poll until READY (bounded)
//                                 transition to stage
//                              ─▶ Registered { version, stage }
//   any registry error         ─▶ RegistryUnavailable { reason }
//
// The gate never returns an error: callers (the trainer, the
// `promote` command) branch on the outcome instead.
//
// PromoteUseCase is the standalone "validate and register" step:
// read a metrics file, apply the gate, register the artifact.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::domain::traits::{ModelRegistry, VersionStatus};
use crate::infra::metrics::{read_gate_metric, GATE_METRIC};
use crate::infra::registry::FsRegistry;
use crate::infra::run_context::LAST_RUN_ID_FILE;

#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    Registered { version: u32, stage: String },
    GateNotMet { metric: f64, gate: f64 },
    RegistryUnavailable { reason: String },
}

impl PromotionOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, PromotionOutcome::Registered { .. })
    }
}

impl fmt::Display for PromotionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromotionOutcome::Registered { version, stage } => {
                write!(f, "registered as version {version} in stage {stage}")
            }
            PromotionOutcome::GateNotMet { metric, gate } => {
                write!(f, "not registered: {GATE_METRIC}={metric:.5} is below the gate {gate:.5}")
            }
            PromotionOutcome::RegistryUnavailable { reason } => {
                write!(f, "registry unavailable: {reason}")
            }
        }
    }
}

/// Bounded readiness polling.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// What to register and where.
#[derive(Debug, Clone, Copy)]
pub struct PromotionRequest<'a> {
    pub model_name: &'a str,
    pub stage: &'a str,
    pub artifact: &'a Path,
    pub run_id: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct PromotionGate {
    min_pr_auc: f64,
    poll: PollPolicy,
}

impl PromotionGate {
    pub fn new(min_pr_auc: f64, poll: PollPolicy) -> Self {
        Self { min_pr_auc, poll }
    }

    /// NaN never passes.
    pub fn passes(&self, metric: f64) -> bool {
        metric >= self.min_pr_auc
    }

    pub fn not_met(&self, metric: f64) -> PromotionOutcome {
        PromotionOutcome::GateNotMet { metric, gate: self.min_pr_auc }
    }

    pub fn evaluate(
        &self,
        registry: &dyn ModelRegistry,
        metric: f64,
        request: &PromotionRequest<'_>,
    ) -> PromotionOutcome {
        if !self.passes(metric) {
            tracing::info!(
                "{}={:.5} below gate {:.5}; skipping registration",
                GATE_METRIC,
                metric,
                self.min_pr_auc
            );
            return self.not_met(metric);
        }

        match self.register(registry, request) {
            Ok(version) => PromotionOutcome::Registered {
                version,
                stage: request.stage.to_string(),
            },
            Err(e) => {
                tracing::warn!("Registration of '{}' failed: {e:#}", request.model_name);
                PromotionOutcome::RegistryUnavailable { reason: format!("{e:#}") }
            }
        }
    }

    fn register(&self, registry: &dyn ModelRegistry, request: &PromotionRequest<'_>) -> Result<u32> {
        let name = request.model_name;
        registry.ensure_model(name)?;
        let version = registry.create_version(name, request.artifact, request.run_id)?;

        let mut ready = false;
        for attempt in 1..=self.poll.attempts {
            match registry.version_status(name, version)? {
                VersionStatus::Ready => {
                    ready = true;
                    break;
                }
                VersionStatus::FailedRegistration => {
                    anyhow::bail!("version {version} of '{name}' failed to register")
                }
                VersionStatus::PendingRegistration => {
                    tracing::debug!("version {} pending (attempt {})", version, attempt);
                    if attempt < self.poll.attempts {
                        thread::sleep(self.poll.interval);
                    }
                }
            }
        }
        anyhow::ensure!(
            ready,
            "version {version} of '{name}' not ready after {} attempts",
            self.poll.attempts
        );

        registry.transition_stage(name, version, request.stage)?;
        Ok(version)
    }
}

// ─── PromoteUseCase ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PromoteConfig {
    pub metrics_path: PathBuf,
    pub artifact_path: PathBuf,
    pub min_pr_auc: f64,
    pub model_name: String,
    pub stage: String,
    pub registry_dir: PathBuf,
    /// Falls back to `<artifact dir>/last_run_id.txt`, then "manual"
    pub run_id: Option<String>,
}

pub struct PromoteUseCase {
    config: PromoteConfig,
}

impl PromoteUseCase {
    pub fn new(config: PromoteConfig) -> Self {
        Self { config }
    }

    fn run_id(&self) -> String {
        if let Some(id) = &self.config.run_id {
            return id.clone();
        }
        self.config
            .artifact_path
            .parent()
            .map(|dir| dir.join(LAST_RUN_ID_FILE))
            .and_then(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "manual".to_string())
    }

    /// A missing metrics file is an error; registry trouble is an outcome.
    pub fn execute(&self) -> Result<PromotionOutcome> {
        let cfg = &self.config;
        anyhow::ensure!(
            cfg.metrics_path.exists(),
            "metrics file not found: '{}'",
            cfg.metrics_path.display()
        );
        let metric = read_gate_metric(&cfg.metrics_path)
            .with_context(|| format!("Cannot read '{}'", cfg.metrics_path.display()))?;

        let gate = PromotionGate::new(cfg.min_pr_auc, PollPolicy::default());
        if !gate.passes(metric) {
            return Ok(gate.not_met(metric));
        }

        let registry = match FsRegistry::open(&cfg.registry_dir) {
            Ok(r) => r,
            Err(e) => return Ok(PromotionOutcome::RegistryUnavailable { reason: format!("{e:#}") }),
        };
        let run_id = self.run_id();
        Ok(gate.evaluate(
            &registry,
            metric,
            &PromotionRequest {
                model_name: &cfg.model_name,
                stage: &cfg.stage,
                artifact: &cfg.artifact_path,
                run_id: &run_id,
            },
        ))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records every call; becomes READY after `pending_polls` polls.
    #[derive(Default)]
    struct RecordingRegistry {
        calls: RefCell<Vec<String>>,
        pending_polls: u32,
        unreachable: bool,
    }

    impl ModelRegistry for RecordingRegistry {
        fn ensure_model(&self, name: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("ensure {name}"));
            anyhow::ensure!(!self.unreachable, "connection refused");
            Ok(())
        }

        fn create_version(&self, name: &str, _source: &Path, run_id: &str) -> Result<u32> {
            self.calls.borrow_mut().push(format!("create {name} {run_id}"));
            Ok(7)
        }

        fn version_status(&self, _name: &str, _version: u32) -> Result<VersionStatus> {
            let mut calls = self.calls.borrow_mut();
            calls.push("status".to_string());
            let polls = calls.iter().filter(|c| *c == "status").count() as u32;
            Ok(if polls > self.pending_polls {
                VersionStatus::Ready
            } else {
                VersionStatus::PendingRegistration
            })
        }

        fn transition_stage(&self, _name: &str, version: u32, stage: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("stage {version} {stage}"));
            Ok(())
        }
    }

    fn request() -> PromotionRequest<'static> {
        PromotionRequest {
            model_name: "avazu_ctr",
            stage: "Staging",
            artifact: Path::new("models/ctr_model_hashing.bin.gz"),
            run_id: "run-1",
        }
    }

    fn fast_gate(min: f64) -> PromotionGate {
        PromotionGate::new(min, PollPolicy { attempts: 3, interval: Duration::ZERO })
    }

    #[test]
    fn test_above_gate_registers() {
        let reg = RecordingRegistry { pending_polls: 1, ..Default::default() };
        let out = fast_gate(0.1).evaluate(&reg, 0.5, &request());

        assert_eq!(out, PromotionOutcome::Registered { version: 7, stage: "Staging".into() });
        let calls = reg.calls.borrow();
        assert_eq!(calls.first().unwrap(), "ensure avazu_ctr");
        assert_eq!(calls.last().unwrap(), "stage 7 Staging");
    }

    #[test]
    fn test_below_gate_makes_no_registry_call() {
        let reg = RecordingRegistry::default();
        let out = fast_gate(0.1).evaluate(&reg, 0.01, &request());
        assert!(matches!(out, PromotionOutcome::GateNotMet { .. }));
        assert!(reg.calls.borrow().is_empty());
    }

    #[test]
    fn test_nan_metric_never_passes() {
        let reg = RecordingRegistry::default();
        assert!(!fast_gate(0.0).evaluate(&reg, f64::NAN, &request()).is_registered());
        assert!(reg.calls.borrow().is_empty());
    }

    #[test]
    fn test_unreachable_registry_is_an_outcome() {
        let reg = RecordingRegistry { unreachable: true, ..Default::default() };
        let out = fast_gate(0.1).evaluate(&reg, 0.5, &request());
        assert!(matches!(out, PromotionOutcome::RegistryUnavailable { .. }));
    }

    #[test]
    fn test_never_ready_skips_stage_transition() {
        let reg = RecordingRegistry { pending_polls: 10, ..Default::default() };
        let out = fast_gate(0.1).evaluate(&reg, 0.5, &request());
        assert!(matches!(out, PromotionOutcome::RegistryUnavailable { .. }));
        assert!(!reg.calls.borrow().iter().any(|c| c.starts_with("stage")));
    }

    #[test]
    fn test_exhausted_polling_sleeps_between_attempts_only() {
        let reg = RecordingRegistry { pending_polls: 10, ..Default::default() };
        let gate = PromotionGate::new(0.1, PollPolicy { attempts: 2, interval: Duration::from_millis(300) });

        let started = std::time::Instant::now();
        let out = gate.evaluate(&reg, 0.5, &request());
        let elapsed = started.elapsed();

        assert!(matches!(out, PromotionOutcome::RegistryUnavailable { .. }));
        assert_eq!(reg.calls.borrow().iter().filter(|c| *c == "status").count(), 2);
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(600), "slept after the last poll: {elapsed:?}");
    }

    fn promote_config(root: &Path, pr: &str) -> PromoteConfig {
        let metrics_path = root.join("metrics").join("metrics.json");
        std::fs::create_dir_all(metrics_path.parent().unwrap()).unwrap();
        std::fs::write(&metrics_path, format!(r#"{{"val_pr_auc": {pr}}}"#)).unwrap();

        let artifact_path = root.join("models").join("ctr_model_hashing.bin.gz");
        std::fs::create_dir_all(artifact_path.parent().unwrap()).unwrap();
        std::fs::write(&artifact_path, b"bundle").unwrap();

        PromoteConfig {
            metrics_path,
            artifact_path,
            min_pr_auc: 0.1,
            model_name: "avazu_ctr".into(),
            stage: "Staging".into(),
            registry_dir: root.join("registry"),
            run_id: None,
        }
    }

    #[test]
    fn test_promote_use_case_registers_from_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = PromoteUseCase::new(promote_config(dir.path(), "0.5")).execute().unwrap();
        assert_eq!(out, PromotionOutcome::Registered { version: 1, stage: "Staging".into() });
        assert!(dir.path().join("registry").join("registry.json").exists());
    }

    #[test]
    fn test_promote_use_case_below_gate_leaves_registry_alone() {
        let dir = tempfile::tempdir().unwrap();
        let out = PromoteUseCase::new(promote_config(dir.path(), "0.01")).execute().unwrap();
        assert!(matches!(out, PromotionOutcome::GateNotMet { .. }));
        assert!(!dir.path().join("registry").exists());
    }

    #[test]
    fn test_missing_metrics_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = promote_config(dir.path(), "0.5");
        cfg.metrics_path = dir.path().join("absent.json");
        assert!(PromoteUseCase::new(cfg).execute().is_err());
    }
}
