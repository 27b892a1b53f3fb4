// ============================================================
// Layer 3 — Feature and Run Vocabulary
// ============================================================
// Declarative choices that shape a trained artifact:
//
//   CrossPair    — which two fields get crossed into one token
//   EnsembleKind — one model, or N seeded replicas
//   Rebalancing  — whether the first chunk sets class weights
//   RunType      — smoke/debug run vs a final run
//
// All of them parse from the strings the CLI and env vars carry
// (FromStr), and serialise with the same spellings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::CtrError;

// ─── CrossPair ────────────────────────────────────────────────────────────────

/// An ordered pair of field names whose values are crossed into one token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossPair {
    pub a: String,
    pub b: String,
}

impl CrossPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self { a: a.into(), b: b.into() }
    }
}

impl fmt::Display for CrossPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.a, self.b)
    }
}

/// Placement × app, domain × domain, device × connection.
pub fn default_cross_pairs() -> Vec<CrossPair> {
    vec![
        CrossPair::new("site_id", "app_id"),
        CrossPair::new("site_domain", "app_domain"),
        CrossPair::new("device_type", "device_conn_type"),
    ]
}

/// Parse `colA:colB,colC:colD`. An empty string yields the default pairs.
pub fn parse_cross_list(raw: &str) -> Result<Vec<CrossPair>, CtrError> {
    if raw.trim().is_empty() {
        return Ok(default_cross_pairs());
    }

    raw.split(',')
        .map(|item| {
            let parts: Vec<&str> = item.trim().split(':').collect();
            match parts.as_slice() {
                [a, b] if !a.is_empty() && !b.is_empty() => Ok(CrossPair::new(*a, *b)),
                _ => Err(CtrError::config(format!(
                    "invalid cross pair '{}', expected format colA:colB",
                    item.trim()
                ))),
            }
        })
        .collect()
}

/// Render pairs back into the `colA:colB,...` form.
pub fn format_cross_list(pairs: &[CrossPair]) -> String {
    pairs
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ─── EnsembleKind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnsembleKind {
    #[serde(rename = "single")]
    Single,
    #[serde(rename = "bagging_sgd")]
    BaggingSgd,
}

impl EnsembleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleKind::Single => "single",
            EnsembleKind::BaggingSgd => "bagging_sgd",
        }
    }

    /// Number of members a run of this kind holds.
    pub fn member_count(&self, n_estimators: usize) -> usize {
        match self {
            EnsembleKind::Single => 1,
            EnsembleKind::BaggingSgd => n_estimators,
        }
    }
}

impl fmt::Display for EnsembleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnsembleKind {
    type Err = CtrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single" => Ok(EnsembleKind::Single),
            "bagging_sgd" => Ok(EnsembleKind::BaggingSgd),
            other => Err(CtrError::config(format!(
                "unknown ensemble '{other}', expected 'single' or 'bagging_sgd'"
            ))),
        }
    }
}

// ─── Rebalancing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rebalancing {
    /// Inverse-frequency class weights computed from the first chunk
    #[serde(rename = "class_weight_balanced")]
    ClassWeightBalanced,
    /// Every sample weighs 1
    #[serde(rename = "none")]
    None,
}

impl Rebalancing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rebalancing::ClassWeightBalanced => "class_weight_balanced",
            Rebalancing::None => "none",
        }
    }
}

impl fmt::Display for Rebalancing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rebalancing {
    type Err = CtrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "class_weight_balanced" | "balanced" => Ok(Rebalancing::ClassWeightBalanced),
            "none" | "" => Ok(Rebalancing::None),
            other => Err(CtrError::config(format!(
                "unknown rebalancing '{other}', expected 'class_weight_balanced' or 'none'"
            ))),
        }
    }
}

// ─── RunType ──────────────────────────────────────────────────────────────────

/// Runs below either threshold are smoke/debug runs.
pub const SMOKE_MAX_ROWS: u64 = 100_000;
pub const SMOKE_MAX_CHUNKS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunType {
    #[serde(rename = "SMOKE/DEBUG")]
    SmokeDebug,
    #[serde(rename = "FINAL")]
    Final,
}

impl RunType {
    pub fn classify(trained_rows: u64, chunks_trained: u64) -> Self {
        if trained_rows < SMOKE_MAX_ROWS || chunks_trained < SMOKE_MAX_CHUNKS {
            RunType::SmokeDebug
        } else {
            RunType::Final
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::SmokeDebug => "SMOKE/DEBUG",
            RunType::Final => "FINAL",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
