// ============================================================
// Layer 6 — Model Artifact
// ============================================================
// The single file a trained run hands to serving:
//
//   models/ctr_model_hashing.bin.gz
//     hash_n_features, use_feature_cross, cross_pairs,
//     ensemble_type, n_estimators, rebalancing,
//     hasher,
//     models: Single(sgd) | Blend { sgd, nb } | Ensemble([sgd, ...])
//
// Every historical model shape is a variant of ArtifactModels,
// so serving picks its strategy from the tag once, at load.
//
// The path is replaced atomically at the end of each run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::hasher::FeatureHasher;
use crate::domain::error::CtrError;
use crate::domain::features::{CrossPair, EnsembleKind, Rebalancing};
use crate::domain::traits::Persistable;
use crate::infra::codec::{self, WriteMode};
use crate::ml::model::SgdClassifier;
use crate::ml::naive_bayes::MultinomialNb;
use crate::ml::trainer::TrainingState;

pub const ARTIFACT_FILE_NAME: &str = "ctr_model_hashing.bin.gz";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArtifactModels {
    Single(SgdClassifier),
    /// Equal-weight blend of a linear model and naive Bayes
    Blend { sgd: SgdClassifier, nb: MultinomialNb },
    /// Uniform mean over N members
    Ensemble(Vec<SgdClassifier>),
}

impl ArtifactModels {
    pub fn shape_name(&self) -> &'static str {
        match self {
            ArtifactModels::Single(_) => "single",
            ArtifactModels::Blend { .. } => "sgd+nb",
            ArtifactModels::Ensemble(_) => "ensemble",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub hash_n_features: usize,
    pub use_feature_cross: bool,
    pub cross_pairs: Vec<CrossPair>,
    pub ensemble_type: EnsembleKind,
    pub n_estimators: usize,
    pub rebalancing: Rebalancing,
    /// Absent only in damaged or hand-built bundles
    pub hasher: Option<FeatureHasher>,
    pub models: ArtifactModels,
}

impl ModelArtifact {
    /// Bundle the final state of a streaming run.
    pub fn from_state(state: &TrainingState) -> Self {
        let members = state.ensemble.members().to_vec();
        Self {
            hash_n_features: state.hasher.n_features(),
            use_feature_cross: state.config.use_feature_cross,
            cross_pairs: state.config.cross_pairs.clone(),
            ensemble_type: state.ensemble.kind(),
            n_estimators: members.len(),
            rebalancing: state.config.rebalancing,
            hasher: Some(state.hasher),
            models: ArtifactModels::Ensemble(members),
        }
    }

    /// The hasher, or an artifact error naming the missing field.
    pub fn require_hasher(&self) -> Result<FeatureHasher, CtrError> {
        let hasher = self
            .hasher
            .ok_or_else(|| CtrError::artifact("artifact is missing required field 'hasher'"))?;
        if hasher.n_features() != self.hash_n_features {
            return Err(CtrError::artifact(format!(
                "artifact hasher width {} disagrees with hash_n_features {}",
                hasher.n_features(),
                self.hash_n_features
            )));
        }
        Ok(hasher)
    }
}

impl Persistable for ModelArtifact {
    fn save(&self, path: &Path) -> Result<()> {
        codec::write_compressed(path, self, WriteMode::Replace)
            .with_context(|| format!("Failed to save model artifact to '{}'", path.display()))?;
        tracing::info!(
            "Saved {} artifact to '{}' (width={}, members={})",
            self.models.shape_name(),
            path.display(),
            self.hash_n_features,
            self.n_estimators
        );
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        codec::read_compressed(path).map_err(|e| {
            CtrError::artifact(format!(
                "cannot load model artifact '{}': {e:#}. Have you run 'train' first?",
                path.display()
            ))
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::features::default_cross_pairs;
    use crate::ml::model::SgdConfig;

    fn artifact(hasher: Option<FeatureHasher>) -> ModelArtifact {
        ModelArtifact {
            hash_n_features: 256,
            use_feature_cross: true,
            cross_pairs: default_cross_pairs(),
            ensemble_type: EnsembleKind::Single,
            n_estimators: 1,
            rebalancing: Rebalancing::None,
            hasher,
            models: ArtifactModels::Single(SgdClassifier::new(SgdConfig::new(1))),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ARTIFACT_FILE_NAME);
        let a = artifact(Some(FeatureHasher::new(256).unwrap()));
        a.save(&path).unwrap();
        a.save(&path).unwrap();

        let back = ModelArtifact::load(&path).unwrap();
        assert_eq!(back.cross_pairs, default_cross_pairs());
        assert_eq!(back.models.shape_name(), "single");
        assert!(back.require_hasher().is_ok());
    }

    #[test]
    fn test_missing_hasher_is_artifact_error() {
        let a = artifact(None);
        assert!(matches!(a.require_hasher(), Err(CtrError::Artifact(_))));

        let mut b = artifact(Some(FeatureHasher::new(512).unwrap()));
        b.hash_n_features = 256;
        assert!(matches!(b.require_hasher(), Err(CtrError::Artifact(_))));
    }

    #[test]
    fn test_missing_file_is_artifact_error() {
        let err = ModelArtifact::load(Path::new("/nonexistent/model.bin.gz")).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Artifact(_))));
    }
}
