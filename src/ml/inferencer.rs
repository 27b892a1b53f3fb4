// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Turns a loaded ModelArtifact into one click predictor.
//
// The artifact's model shape is inspected exactly once, here:
//
//   Single(sgd)        ─▶ Blend::Single   p = sgd(x)
//   Blend { sgd, nb }  ─▶ Blend::Pair     p = (sgd(x) + nb(x)) / 2
//   Ensemble([m...])   ─▶ Blend::Mean     p = mean_i m_i(x)
//
// After that, every request goes through the same path:
//   feature map → tokens → hashed row → Blend::predict_proba

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::data::batcher::ChunkBatcher;
use crate::data::hasher::FeatureHasher;
use crate::data::sparse::SparseMatrix;
use crate::data::tokenizer::tokenize_map;
use crate::domain::error::CtrError;
use crate::domain::features::CrossPair;
use crate::domain::row::Chunk;
use crate::domain::traits::ClickPredictor;
use crate::infra::artifact::{ArtifactModels, ModelArtifact};
use crate::ml::ensemble::mean_proba;
use crate::ml::model::SgdClassifier;
use crate::ml::naive_bayes::MultinomialNb;

/// Probability at or above which a click is predicted
pub const DECISION_THRESHOLD: f64 = 0.5;

pub fn classify(probability: f64) -> u8 {
    (probability >= DECISION_THRESHOLD) as u8
}

/// Serving response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClickResponse {
    pub click_probability: f64,
    pub click_prediction: u8,
}

impl ClickResponse {
    pub fn from_probability(p: f64) -> Self {
        Self {
            click_probability: p,
            click_prediction: classify(p),
        }
    }
}

/// One inference strategy per historical artifact shape.
#[derive(Debug, Clone)]
pub enum Blend {
    Single(SgdClassifier),
    Pair { sgd: SgdClassifier, nb: MultinomialNb },
    Mean(Vec<SgdClassifier>),
}

impl Blend {
    fn from_models(models: ArtifactModels, width: usize) -> Result<Self, CtrError> {
        let check = |n: Option<usize>, what: &str| match n {
            None => Err(CtrError::artifact(format!("{what} in artifact was never fitted"))),
            Some(w) if w != width => Err(CtrError::WidthMismatch { expected: width, actual: w }),
            Some(_) => Ok(()),
        };

        match models {
            ArtifactModels::Single(m) => {
                check(m.n_features(), "model")?;
                Ok(Blend::Single(m))
            }
            ArtifactModels::Blend { sgd, nb } => {
                check(sgd.n_features(), "sgd model")?;
                check(nb.n_features(), "nb model")?;
                Ok(Blend::Pair { sgd, nb })
            }
            ArtifactModels::Ensemble(members) => {
                if members.is_empty() {
                    return Err(CtrError::artifact("artifact 'models' list is empty"));
                }
                for m in &members {
                    check(m.n_features(), "ensemble member")?;
                }
                Ok(Blend::Mean(members))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Blend::Single(_) => "single",
            Blend::Pair { .. } => "sgd+nb",
            Blend::Mean(_) => "mean",
        }
    }

    pub fn predict_proba(&self, x: &SparseMatrix) -> Result<Vec<f64>> {
        match self {
            Blend::Single(m) => m.predict_proba(x),
            Blend::Pair { sgd, nb } => {
                let a = sgd.predict_proba(x)?;
                let b = nb.predict_proba(x)?;
                Ok(a.iter().zip(&b).map(|(p, q)| 0.5 * (p + q)).collect())
            }
            Blend::Mean(members) => mean_proba(members, x),
        }
    }
}

/// Scores feature maps and chunks with a loaded artifact.
#[derive(Debug, Clone)]
pub struct ArtifactPredictor {
    hasher: FeatureHasher,
    use_cross: bool,
    cross_pairs: Vec<CrossPair>,
    blend: Blend,
}

impl ArtifactPredictor {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        let hasher = artifact.require_hasher()?;
        let blend = Blend::from_models(artifact.models, hasher.n_features())?;
        tracing::info!(
            "Predictor ready: {} blend, width {}, feature cross {}",
            blend.name(),
            hasher.n_features(),
            artifact.use_feature_cross
        );
        Ok(Self {
            hasher,
            use_cross: artifact.use_feature_cross,
            cross_pairs: artifact.cross_pairs,
            blend,
        })
    }

    pub fn blend(&self) -> &Blend {
        &self.blend
    }

    /// Score every row of a chunk, in order.
    pub fn predict_chunk(&self, chunk: &Chunk) -> Result<Vec<f64>> {
        let batcher = ChunkBatcher::new(self.hasher, self.use_cross, self.cross_pairs.clone());
        self.blend.predict_proba(&batcher.encode(chunk).features)
    }

    pub fn respond(&self, features: &Map<String, Value>) -> Result<ClickResponse> {
        Ok(ClickResponse::from_probability(self.predict_one(features)?))
    }
}

impl ClickPredictor for ArtifactPredictor {
    fn predict_one(&self, features: &Map<String, Value>) -> Result<f64> {
        let tokens = tokenize_map(features, self.use_cross, &self.cross_pairs);
        let x = SparseMatrix::from_rows(self.hasher.n_features(), [self.hasher.transform_one(&tokens)]);
        let p = self.blend.predict_proba(&x)?;
        p.first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("model returned no probability"))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::{default_cross_pairs, EnsembleKind, Rebalancing};
    use crate::domain::row::CLASSES;
    use crate::ml::model::SgdConfig;
    use serde_json::json;

    fn request(site: &str, app: &str) -> Map<String, Value> {
        json!({"site_id": site, "app_id": app}).as_object().unwrap().clone()
    }

    /// Two rows: (s1, a1) → 0, (s2, a2) → 1.
    fn two_row_fit(hasher: &FeatureHasher) -> (SparseMatrix, Vec<u8>) {
        let rows = [request("s1", "a1"), request("s2", "a2")]
            .iter()
            .map(|r| hasher.transform_one(&tokenize_map(r, true, &default_cross_pairs())))
            .collect::<Vec<_>>();
        (SparseMatrix::from_rows(hasher.n_features(), rows), vec![0, 1])
    }

    fn artifact(models: ArtifactModels, hasher: FeatureHasher) -> ModelArtifact {
        ModelArtifact {
            hash_n_features: hasher.n_features(),
            use_feature_cross: true,
            cross_pairs: default_cross_pairs(),
            ensemble_type: EnsembleKind::Single,
            n_estimators: 1,
            rebalancing: Rebalancing::None,
            hasher: Some(hasher),
            models,
        }
    }

    fn fitted(hasher: &FeatureHasher, seed: u64) -> SgdClassifier {
        let (x, y) = two_row_fit(hasher);
        let mut m = SgdClassifier::new(SgdConfig::new(seed));
        m.partial_fit(&x, &y, Some(&CLASSES[..])).unwrap();
        m
    }

    #[test]
    fn test_serving_is_deterministic() {
        let hasher = FeatureHasher::new(1 << 10).unwrap();
        let p = ArtifactPredictor::from_artifact(artifact(ArtifactModels::Single(fitted(&hasher, 1)), hasher))
            .unwrap();

        let req = request("s1", "a1");
        let a = p.predict_one(&req).unwrap();
        let b = p.predict_one(&req).unwrap();
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));

        let resp = p.respond(&req).unwrap();
        assert_eq!(resp.click_prediction, classify(resp.click_probability));
    }

    #[test]
    fn test_every_shape_loads() {
        let hasher = FeatureHasher::new(1 << 10).unwrap();
        let (x, y) = two_row_fit(&hasher);
        let mut nb = MultinomialNb::default();
        nb.partial_fit(&x, &y).unwrap();

        let shapes = [
            ArtifactModels::Single(fitted(&hasher, 1)),
            ArtifactModels::Blend { sgd: fitted(&hasher, 1), nb },
            ArtifactModels::Ensemble(vec![fitted(&hasher, 1), fitted(&hasher, 2)]),
        ];
        for (shape, name) in shapes.into_iter().zip(["single", "sgd+nb", "mean"]) {
            let p = ArtifactPredictor::from_artifact(artifact(shape, hasher)).unwrap();
            assert_eq!(p.blend().name(), name);
            let v = p.predict_one(&request("s2", "a2")).unwrap();
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_pair_blend_is_equal_weight() {
        let hasher = FeatureHasher::new(1 << 10).unwrap();
        let (x, y) = two_row_fit(&hasher);
        let sgd = fitted(&hasher, 3);
        let mut nb = MultinomialNb::default();
        nb.partial_fit(&x, &y).unwrap();

        let expected: Vec<f64> = sgd
            .predict_proba(&x)
            .unwrap()
            .iter()
            .zip(nb.predict_proba(&x).unwrap())
            .map(|(a, b)| (a + b) / 2.0)
            .collect();
        let blend = Blend::Pair { sgd, nb };
        assert_eq!(blend.predict_proba(&x).unwrap(), expected);
    }

    #[test]
    fn test_missing_hasher_and_width_mismatch() {
        let hasher = FeatureHasher::new(1 << 10).unwrap();
        let mut a = artifact(ArtifactModels::Single(fitted(&hasher, 1)), hasher);
        a.hasher = None;
        let err = ArtifactPredictor::from_artifact(a).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Artifact(_))));

        let wide = FeatureHasher::new(1 << 11).unwrap();
        let b = artifact(ArtifactModels::Single(fitted(&hasher, 1)), wide);
        let err = ArtifactPredictor::from_artifact(b).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::WidthMismatch { .. })));
    }

    #[test]
    fn test_unfitted_model_is_rejected() {
        let hasher = FeatureHasher::new(1 << 10).unwrap();
        let a = artifact(ArtifactModels::Ensemble(vec![]), hasher);
        assert!(ArtifactPredictor::from_artifact(a).is_err());

        let b = artifact(ArtifactModels::Single(SgdClassifier::new(SgdConfig::new(1))), hasher);
        assert!(ArtifactPredictor::from_artifact(b).is_err());
    }
}
