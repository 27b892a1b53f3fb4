// ============================================================
// Layer 5 — Multinomial Naive Bayes
// ============================================================
// Count-based companion model for the legacy "sgd + nb" blend
// artifact written by the baseline trainer.
//
//   log P(c | x) ∝ log P(c) + Σ_j |x_j| · log θ_cj
//   θ_cj = (N_cj + α) / (N_c + α · n_features)
//
// Hashed values can be -1 (alternate sign), so counts use |x_j|.
// Counts are additive, which makes partial_fit exact.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::data::sparse::{SparseMatrix, SparseRow};
use crate::domain::error::CtrError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultinomialNb {
    /// Additive (Laplace) smoothing
    alpha: f64,
    class_count: [f64; 2],
    /// Per class: summed |x_j| per column
    feature_count: [Vec<f64>; 2],
    /// Per class: Σ_j feature_count[c][j]
    feature_total: [f64; 2],
}

impl MultinomialNb {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            class_count: [0.0; 2],
            feature_count: [Vec::new(), Vec::new()],
            feature_total: [0.0; 2],
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.class_count.iter().sum::<f64>() > 0.0
    }

    pub fn n_features(&self) -> Option<usize> {
        self.is_fitted().then_some(self.feature_count[0].len())
    }

    pub fn partial_fit(&mut self, x: &SparseMatrix, y: &[u8]) -> Result<()> {
        if x.n_rows() != y.len() {
            return Err(CtrError::schema(format!(
                "{} feature rows but {} labels",
                x.n_rows(),
                y.len()
            ))
            .into());
        }

        if self.feature_count[0].is_empty() {
            self.feature_count = [vec![0.0; x.n_cols()], vec![0.0; x.n_cols()]];
        } else if self.feature_count[0].len() != x.n_cols() {
            return Err(CtrError::WidthMismatch {
                expected: self.feature_count[0].len(),
                actual: x.n_cols(),
            }
            .into());
        }

        for (row, &label) in x.rows().zip(y) {
            let c = (label == 1) as usize;
            self.class_count[c] += 1.0;
            for (j, v) in row.iter() {
                self.feature_count[c][j] += v.abs();
                self.feature_total[c] += v.abs();
            }
        }
        Ok(())
    }

    fn joint_log_likelihood(&self, row: SparseRow<'_>) -> [f64; 2] {
        let n = self.feature_count[0].len() as f64;
        let total: f64 = self.class_count.iter().sum();

        let mut jll = [0.0; 2];
        for (c, slot) in jll.iter_mut().enumerate() {
            let prior = (self.class_count[c] / total).ln();
            let denom = (self.feature_total[c] + self.alpha * n).ln();
            let evidence: f64 = row
                .iter()
                .map(|(j, v)| v.abs() * ((self.feature_count[c][j] + self.alpha).ln() - denom))
                .sum();
            *slot = prior + evidence;
        }
        jll
    }

    /// Probability of the positive class per row.
    pub fn predict_proba(&self, x: &SparseMatrix) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(CtrError::artifact("naive Bayes model has not been fitted").into());
        }
        if x.n_cols() != self.feature_count[0].len() {
            return Err(CtrError::WidthMismatch {
                expected: self.feature_count[0].len(),
                actual: x.n_cols(),
            }
            .into());
        }

        Ok(x.rows()
            .map(|r| {
                let [neg, pos] = self.joint_log_likelihood(r);
                1.0 / (1.0 + (neg - pos).exp())
            })
            .collect())
    }
}

impl Default for MultinomialNb {
    fn default() -> Self {
        Self::new(1.0)
    }
}
