// ============================================================
// Layer 4 — Chunk Batcher
// ============================================================
// Encodes one chunk of labelled rows into what the models
// consume: a CSR matrix (one hashed row per input row) and the
// label vector in the same order.
//
//   Chunk ──tokenize──▶ Vec<TokenSet> ──hash──▶ SparseMatrix
//                                              + labels
//
// Rows are independent, so tokenising and hashing fan out over
// rayon's pool; `collect` keeps them in stream order.

use rayon::prelude::*;

use crate::data::hasher::FeatureHasher;
use crate::data::sparse::{SparseMatrix, SparseVector};
use crate::data::tokenizer::FeatureTokenizer;
use crate::domain::features::CrossPair;
use crate::domain::row::Chunk;

/// One encoded chunk, ready for fitting or scoring.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    /// Shape: [rows, hash_n_features]
    pub features: SparseMatrix,

    /// One label per row
    pub labels: Vec<u8>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Holds the feature-space settings shared by every chunk of a run.
#[derive(Debug, Clone)]
pub struct ChunkBatcher {
    hasher: FeatureHasher,
    use_cross: bool,
    cross_pairs: Vec<CrossPair>,
}

impl ChunkBatcher {
    pub fn new(hasher: FeatureHasher, use_cross: bool, cross_pairs: Vec<CrossPair>) -> Self {
        Self { hasher, use_cross, cross_pairs }
    }

    pub fn hasher(&self) -> &FeatureHasher {
        &self.hasher
    }

    /// Tokenise and hash every row of `chunk`.
    pub fn encode(&self, chunk: &Chunk) -> EncodedBatch {
        let tokenizer = FeatureTokenizer::for_chunk(chunk, self.use_cross, &self.cross_pairs);

        let rows: Vec<SparseVector> = chunk
            .rows
            .par_iter()
            .map(|r| self.hasher.transform_one(&tokenizer.tokenize(&r.values)))
            .collect();

        EncodedBatch {
            features: SparseMatrix::from_rows(self.hasher.n_features(), rows),
            labels: chunk.labels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::default_cross_pairs;
    use crate::domain::row::Row;
    use std::sync::Arc;

    #[test]
    fn test_encode_keeps_row_order_and_labels() {
        let columns: Arc<[String]> =
            vec!["id".to_string(), "site_id".to_string(), "app_id".to_string()].into();
        let chunk = Chunk::new(
            columns,
            vec![
                Row::new(0, vec![Some("1".into()), Some("s1".into()), Some("a1".into())]),
                Row::new(1, vec![Some("2".into()), Some("s2".into()), None]),
            ],
        );

        let batcher = ChunkBatcher::new(FeatureHasher::new(1 << 10).unwrap(), true, default_cross_pairs());
        let batch = batcher.encode(&chunk);

        assert_eq!(batch.labels, vec![0, 1]);
        assert_eq!(batch.features.n_rows(), 2);
        assert_eq!(batch.features.n_cols(), 1024);

        // Encoding row 0 alone gives the same sparse row
        let solo = Chunk::new(chunk.columns.clone(), vec![chunk.rows[0].clone()]);
        let solo_batch = batcher.encode(&solo);
        assert_eq!(solo_batch.features.row(0).indices, batch.features.row(0).indices);
    }
}
