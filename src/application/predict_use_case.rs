// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Loads one artifact and serves predictions from it, two ways:
//
//   score_file     first N rows of a labelled CSV
//                  → (id, true click, probability) per row
//
//   respond_json   one request body {"features": {...}}
//                  → {"click_probability", "click_prediction"}
//
// Every prediction is appended to the prediction log so the
// monitor can compute accuracy and drift later.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::data::loader::CsvChunkReader;
use crate::domain::error::CtrError;
use crate::domain::row::ID_COLUMN;
use crate::domain::traits::Persistable;
use crate::infra::artifact::ModelArtifact;
use crate::infra::prediction_log::{PredictionLog, PredictionRecord};
use crate::ml::inferencer::{classify, ArtifactPredictor, ClickResponse};

pub const DEFAULT_PREDICTION_LOG: &str = "data/predictions.csv";
pub const DEFAULT_NROWS: usize = 200;

#[derive(Debug, Clone)]
pub struct PredictConfig {
    pub artifact_path: PathBuf,
    /// None disables logging
    pub log_path:      Option<PathBuf>,
}

/// One scored CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRow {
    pub id:     Option<String>,
    pub y_true: u8,
    pub proba:  f64,
}

impl std::fmt::Display for ScoredRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {:.6}",
            self.id.as_deref().unwrap_or("-"),
            self.y_true,
            self.proba
        )
    }
}

pub struct PredictUseCase {
    predictor: ArtifactPredictor,
    log:       Option<PredictionLog>,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Result<Self> {
        let artifact = ModelArtifact::load(&config.artifact_path)?;
        let predictor = ArtifactPredictor::from_artifact(artifact).with_context(|| {
            format!("Artifact '{}' cannot serve predictions", config.artifact_path.display())
        })?;
        Ok(Self {
            predictor,
            log: config.log_path.map(PredictionLog::new),
        })
    }

    pub fn from_predictor(predictor: ArtifactPredictor, log_path: Option<PathBuf>) -> Self {
        Self {
            predictor,
            log: log_path.map(PredictionLog::new),
        }
    }

    pub fn predictor(&self) -> &ArtifactPredictor {
        &self.predictor
    }

    /// Score the first `nrows` rows of a labelled CSV (plain or gzip).
    pub fn score_file(&self, data_path: &Path, nrows: usize) -> Result<Vec<ScoredRow>> {
        if nrows == 0 {
            return Ok(Vec::new());
        }
        let mut reader = CsvChunkReader::open(data_path, nrows)?;
        let Some(chunk) = reader.read_rows(nrows)? else {
            tracing::warn!("'{}' has no data rows", data_path.display());
            return Ok(Vec::new());
        };

        let probabilities = self.predictor.predict_chunk(&chunk)?;
        let id_index = chunk.column_index(ID_COLUMN);

        let scored: Vec<ScoredRow> = chunk
            .rows
            .iter()
            .zip(&probabilities)
            .map(|(row, &proba)| ScoredRow {
                id: id_index.and_then(|i| row.values[i].clone()),
                y_true: row.label,
                proba,
            })
            .collect();

        let records: Vec<PredictionRecord> = scored
            .iter()
            .map(|s| PredictionRecord::now(classify(s.proba), s.proba, Some(s.y_true)))
            .collect();
        self.record(&records)?;

        tracing::info!("Scored {} rows from '{}'", scored.len(), data_path.display());
        Ok(scored)
    }

    /// Score one request. Accepts `{"features": {...}}` or a bare feature map.
    pub fn respond_json(&self, body: &str) -> Result<ClickResponse> {
        let value: Value = serde_json::from_str(body).context("Request body is not valid JSON")?;
        let features = request_features(&value)?;
        let response = self.predictor.respond(features)?;

        self.record(&[PredictionRecord::now(
            response.click_prediction,
            response.click_probability,
            None,
        )])?;
        Ok(response)
    }

    fn record(&self, records: &[PredictionRecord]) -> Result<()> {
        match &self.log {
            Some(log) => log.append(records),
            None => Ok(()),
        }
    }
}

fn request_features(value: &Value) -> Result<&Map<String, Value>, CtrError> {
    let object = value
        .as_object()
        .ok_or_else(|| CtrError::schema("request body must be a JSON object"))?;
    match object.get("features") {
        Some(Value::Object(features)) => Ok(features),
        Some(_) => Err(CtrError::schema("'features' must be a JSON object")),
        None => Ok(object),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::hasher::FeatureHasher;
    use crate::data::tokenizer::tokenize_map;
    use crate::data::sparse::SparseMatrix;
    use crate::domain::features::{default_cross_pairs, EnsembleKind, Rebalancing};
    use crate::domain::row::CLASSES;
    use crate::infra::artifact::ArtifactModels;
    use crate::ml::model::{SgdClassifier, SgdConfig};
    use serde_json::json;
    use std::fs;

    fn predictor() -> ArtifactPredictor {
        let hasher = FeatureHasher::new(1 << 10).unwrap();
        let rows = [("s1", "a1"), ("s2", "a2")]
            .iter()
            .map(|(s, a)| {
                let m = json!({"site_id": s, "app_id": a}).as_object().unwrap().clone();
                hasher.transform_one(&tokenize_map(&m, true, &default_cross_pairs()))
            })
            .collect::<Vec<_>>();
        let x = SparseMatrix::from_rows(hasher.n_features(), rows);
        let mut m = SgdClassifier::new(SgdConfig::new(7));
        m.partial_fit(&x, &[0, 1], Some(&CLASSES[..])).unwrap();

        ArtifactPredictor::from_artifact(ModelArtifact {
            hash_n_features: hasher.n_features(),
            use_feature_cross: true,
            cross_pairs: default_cross_pairs(),
            ensemble_type: EnsembleKind::Single,
            n_estimators: 1,
            rebalancing: Rebalancing::None,
            hasher: Some(hasher),
            models: ArtifactModels::Single(m),
        })
        .unwrap()
    }

    #[test]
    fn test_score_file_logs_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("sample.csv");
        fs::write(&data, "id,click,site_id,app_id\n10,0,s1,a1\n11,1,s2,a2\n12,0,s1,a2\n").unwrap();
        let log_path = dir.path().join("data").join("predictions.csv");

        let uc = PredictUseCase::from_predictor(predictor(), Some(log_path.clone()));
        let scored = uc.score_file(&data, 2).unwrap();

        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].id.as_deref(), Some("10"));
        assert_eq!(scored[1].y_true, 1);
        assert!(scored[0].to_string().starts_with("10 | 0 | "));

        let logged = PredictionLog::new(log_path).read_all().unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[1].y_true, Some(1));
        assert_eq!(logged[0].prediction, classify(logged[0].proba));
    }

    #[test]
    fn test_respond_accepts_wrapped_and_bare_maps() {
        let uc = PredictUseCase::from_predictor(predictor(), None);
        let wrapped = uc
            .respond_json(r#"{"features": {"site_id": "s2", "app_id": "a2"}}"#)
            .unwrap();
        let bare = uc.respond_json(r#"{"site_id": "s2", "app_id": "a2"}"#).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped.click_prediction, classify(wrapped.click_probability));
    }

    #[test]
    fn test_malformed_request_is_rejected() {
        let uc = PredictUseCase::from_predictor(predictor(), None);
        assert!(uc.respond_json("not json").is_err());
        assert!(uc.respond_json("[1, 2]").is_err());
        let err = uc.respond_json(r#"{"features": 3}"#).unwrap_err();
        assert!(matches!(err.downcast_ref::<CtrError>(), Some(CtrError::Schema(_))));
    }
}
