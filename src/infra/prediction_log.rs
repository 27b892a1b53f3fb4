// ============================================================
// Layer 6 — Prediction Log
// ============================================================
// Append-only CSV of served predictions, read back by the
// monitor for accuracy and drift:
//
//   timestamp,prediction,proba,y_true
//   2026-10-16T09:12:44.120331,0,0.1832,0
//   2026-10-16T09:12:44.120502,1,0.6120,
//
// `y_true` is empty when the label is unknown.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub timestamp: String,
    pub prediction: u8,
    pub proba: f64,
    pub y_true: Option<u8>,
}

impl PredictionRecord {
    /// Stamped with the current UTC time.
    pub fn now(prediction: u8, proba: f64, y_true: Option<u8>) -> Self {
        Self {
            timestamp: chrono::Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string(),
            prediction,
            proba,
            y_true,
        }
    }

    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .or_else(|| {
                chrono::DateTime::parse_from_rfc3339(&self.timestamp)
                    .ok()
                    .map(|t| t.naive_utc())
            })
    }
}

pub struct PredictionLog {
    path: PathBuf,
}

impl PredictionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, records: &[PredictionRecord]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let is_new = !self.path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open prediction log '{}'", self.path.display()))?;

        let mut w = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        for r in records {
            w.serialize(r)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Every record, oldest first. A missing log reads as empty.
    pub fn read_all(&self) -> Result<Vec<PredictionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut r = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Cannot read prediction log '{}'", self.path.display()))?;
        r.deserialize()
            .collect::<Result<Vec<PredictionRecord>, _>>()
            .with_context(|| format!("Malformed prediction log '{}'", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("data").join("predictions.csv"));

        log.append(&[PredictionRecord::now(0, 0.2, Some(0))]).unwrap();
        log.append(&[PredictionRecord::now(1, 0.7, None)]).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("timestamp")).count(), 1);

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].y_true, Some(0));
        assert_eq!(rows[1].y_true, None);
        assert!(rows[1].parsed_timestamp().is_some());
    }

    #[test]
    fn test_missing_log_is_empty() {
        let log = PredictionLog::new("/nonexistent/predictions.csv");
        assert!(log.read_all().unwrap().is_empty());
    }
}
