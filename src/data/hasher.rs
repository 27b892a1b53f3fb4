// ============================================================
// Layer 4 — Feature Hasher
// ============================================================
// The hashing trick: every token is hashed straight to a column
// of a fixed-width sparse vector, so an unbounded categorical
// vocabulary fits in bounded memory with no fitted state.
//
//   column = xxh3_64(token) & (n_features - 1)
//   sign   = top hash bit → -1.0, else +1.0   (alternate_sign)
//
// The alternating sign makes colliding tokens cancel in
// expectation instead of piling up on one weight.
//
// The hasher is stateless: same token, same width → same
// column, on every machine and every run. Its width is part of
// the trained artifact and must match at inference time.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::data::sparse::{SparseMatrix, SparseVector};
use crate::data::tokenizer::TokenSet;
use crate::domain::error::CtrError;

/// Default sparse width: 2^20 columns
pub const DEFAULT_N_FEATURES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureHasher {
    n_features: usize,
    alternate_sign: bool,
}

impl FeatureHasher {
    /// `n_features` must be a non-zero power of two.
    pub fn new(n_features: usize) -> Result<Self, CtrError> {
        Self::with_sign(n_features, true)
    }

    pub fn with_sign(n_features: usize, alternate_sign: bool) -> Result<Self, CtrError> {
        if n_features == 0 || !n_features.is_power_of_two() {
            return Err(CtrError::config(format!(
                "hash_n_features must be a power of two, got {n_features}"
            )));
        }
        if n_features > u32::MAX as usize {
            return Err(CtrError::config(format!(
                "hash_n_features {n_features} exceeds the 32-bit column space"
            )));
        }
        Ok(Self { n_features, alternate_sign })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Column and signed value of a single token.
    pub fn hash_token(&self, token: &str) -> (u32, f64) {
        let h = xxh3_64(token.as_bytes());
        let column = (h & (self.n_features as u64 - 1)) as u32;
        let value = if self.alternate_sign && (h >> 63) == 1 { -1.0 } else { 1.0 };
        (column, value)
    }

    /// Hash one row's token set into a sparse vector.
    pub fn transform_one(&self, tokens: &TokenSet) -> SparseVector {
        SparseVector::from_pairs(tokens.iter().map(|t| self.hash_token(t)).collect())
    }

    /// Hash many token sets into a CSR matrix, one row per set.
    pub fn transform(&self, token_sets: &[TokenSet]) -> SparseMatrix {
        SparseMatrix::from_rows(
            self.n_features,
            token_sets.iter().map(|t| self.transform_one(t)),
        )
    }

    /// Hard error if a model was fitted at a different width.
    pub fn check_width(&self, expected: usize) -> Result<(), CtrError> {
        if expected != self.n_features {
            return Err(CtrError::WidthMismatch {
                expected,
                actual: self.n_features,
            });
        }
        Ok(())
    }
}
