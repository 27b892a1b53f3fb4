// ============================================================
// Layer 5 — SGD Ensemble
// ============================================================
// "Bagging" here means seeded replicas, not bootstrap samples:
// every member sees every chunk, and members differ only through
// their seed (seed + i), which changes their shuffle order.
//
//   chunk ──▶ member 0 (seed)     ─┐
//         ──▶ member 1 (seed + 1) ─┼─▶ mean P(click)
//         ──▶ member N (seed + N) ─┘
//
// Members are independent, so a chunk is fitted on all of them
// in parallel with rayon.

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::batcher::EncodedBatch;
use crate::data::sparse::SparseMatrix;
use crate::domain::error::CtrError;
use crate::domain::features::EnsembleKind;
use crate::domain::row::CLASSES;
use crate::ml::model::{ClassWeight, SgdClassifier, SgdConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ensemble {
    kind: EnsembleKind,
    members: Vec<SgdClassifier>,
}

impl Ensemble {
    /// Fresh, unfitted members. `Single` always holds one member
    /// seeded with `seed`; `BaggingSgd` holds `n_estimators`.
    pub fn build(
        kind: EnsembleKind,
        n_estimators: usize,
        seed: u64,
        class_weight: ClassWeight,
        shuffle: bool,
    ) -> Result<Self> {
        let count = kind.member_count(n_estimators);
        if count == 0 {
            return Err(CtrError::config("n_estimators must be at least 1").into());
        }

        let members = (0..count as u64)
            .map(|i| {
                SgdClassifier::new(
                    SgdConfig::new(seed.wrapping_add(i))
                        .with_class_weight(class_weight)
                        .with_shuffle(shuffle),
                )
            })
            .collect();

        Ok(Self { kind, members })
    }

    pub fn from_members(kind: EnsembleKind, members: Vec<SgdClassifier>) -> Result<Self> {
        if members.is_empty() {
            return Err(CtrError::artifact("ensemble has no members").into());
        }
        Ok(Self { kind, members })
    }

    pub fn kind(&self) -> EnsembleKind {
        self.kind
    }

    pub fn members(&self) -> &[SgdClassifier] {
        &self.members
    }

    pub fn into_members(self) -> Vec<SgdClassifier> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_fitted(&self) -> bool {
        self.members.iter().all(|m| m.is_fitted())
    }

    /// Fit every member on one chunk. Classes are declared on each
    /// member's first fit. Returns the mean member loss.
    pub fn fit_chunk(&mut self, batch: &EncodedBatch) -> Result<f64> {
        let losses = self
            .members
            .par_iter_mut()
            .map(|m| {
                let classes = (!m.is_fitted()).then_some(&CLASSES[..]);
                m.partial_fit(&batch.features, &batch.labels, classes)
            })
            .collect::<Result<Vec<f64>>>()?;

        Ok(losses.iter().sum::<f64>() / losses.len() as f64)
    }

    /// Uniform mean of member probabilities.
    pub fn predict_proba(&self, x: &SparseMatrix) -> Result<Vec<f64>> {
        mean_proba(&self.members, x)
    }
}

/// Uniform mean over members; a lone member is returned unchanged.
pub fn mean_proba(members: &[SgdClassifier], x: &SparseMatrix) -> Result<Vec<f64>> {
    match members {
        [] => Err(CtrError::artifact("ensemble has no members").into()),
        [only] => only.predict_proba(x),
        _ => {
            let per_member = members
                .par_iter()
                .map(|m| m.predict_proba(x))
                .collect::<Result<Vec<Vec<f64>>>>()?;

            let k = per_member.len() as f64;
            let mut mean = vec![0.0; x.n_rows()];
            for probs in &per_member {
                for (acc, p) in mean.iter_mut().zip(probs) {
                    *acc += p;
                }
            }
            mean.iter_mut().for_each(|p| *p /= k);
            Ok(mean)
        }
    }
}
