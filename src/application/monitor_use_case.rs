// ============================================================
// Layer 2 — MonitorUseCase
// ============================================================
// Reads the prediction log and reports on served traffic:
//
//   Step 1: Load records, drop unparseable timestamps
//   Step 2: Accuracy over rows that carry a true label
//   Step 3: Threshold recommendation (best F1 with an SLA floor
//           on precision); it becomes the operating threshold
//   Step 4: Daily metrics at that threshold
//   Step 5: PSI oldest half vs newest half, then alerts
//   Step 6: Write daily_metrics.csv, monitoring_summary.json
//           and threshold_recommendation.json
//
// Nothing here touches a model.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::infra::codec;
use crate::infra::prediction_log::PredictionLog;
use crate::ml::evaluation::{accuracy, average_precision, f1, precision_recall_at, psi, roc_auc};

pub const DAILY_METRICS_FILE: &str = "daily_metrics.csv";
pub const SUMMARY_FILE: &str = "monitoring_summary.json";
pub const RECOMMENDATION_FILE: &str = "threshold_recommendation.json";

/// Precision SLA at the operating threshold
pub const MIN_PRECISION: f64 = 0.20;
/// Drift alert level
pub const MAX_PSI: f64 = 0.20;
/// Last-day AUC below this share of the earlier days' mean raises an alert
pub const MAX_AUC_DROP_RATIO: f64 = 0.90;

const PSI_BINS: usize = 10;
/// Each half needs more rows than this for PSI to be computed
const PSI_MIN_HALF: usize = 20;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub log_path:            PathBuf,
    pub reports_dir:         PathBuf,
    /// Used when no threshold can be recommended
    pub operating_threshold: f64,
}

// ─── Report types ─────────────────────────────────────────────────────────────

/// Metrics of one calendar day. None where a metric is undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub day: String,
    pub n: usize,
    pub roc_auc: Option<f64>,
    pub pr_auc: Option<f64>,
    pub precision_at_threshold: Option<f64>,
    pub recall_at_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRecommendation {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub total_rows: usize,
    pub labelled_rows: usize,
    pub accuracy: Option<f64>,
    pub psi: Option<f64>,
    pub alerts: Vec<String>,
    pub operating_threshold: f64,
    pub min_precision: f64,
    pub max_psi: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<ThresholdRecommendation>,
}

/// A record with a parsed timestamp.
struct Observation {
    at: NaiveDateTime,
    proba: f64,
    y_true: Option<u8>,
    prediction: u8,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn labelled(obs: &[&Observation]) -> (Vec<u8>, Vec<f64>) {
    obs.iter()
        .filter_map(|o| o.y_true.map(|y| (y, o.proba)))
        .unzip()
}

// ─── Metric steps ─────────────────────────────────────────────────────────────

/// Best F1 over thresholds 0.01..=0.99 among those meeting the
/// precision floor. When none meets it, the first threshold tried is
/// kept. None unless both classes appear among labelled rows.
pub fn recommend_threshold(labels: &[u8], probs: &[f64]) -> Option<ThresholdRecommendation> {
    if !(labels.contains(&0) && labels.contains(&1)) {
        return None;
    }

    let mut best: Option<(bool, ThresholdRecommendation)> = None;
    for i in 0..99 {
        let t = 0.01 + 0.98 * i as f64 / 98.0;
        let (precision, recall) = precision_recall_at(labels, probs, t);
        let candidate = ThresholdRecommendation { threshold: t, precision, recall, f1: f1(precision, recall) };
        let meets = precision >= MIN_PRECISION;

        best = match best {
            None => Some((meets, candidate)),
            Some((false, _)) if meets => Some((true, candidate)),
            Some((true, b)) if meets && candidate.f1 > b.f1 => Some((true, candidate)),
            keep => keep,
        };
    }
    best.map(|(_, r)| r)
}

fn daily_metrics(obs: &[Observation], threshold: f64) -> Vec<DailyMetrics> {
    let mut days: BTreeMap<NaiveDate, Vec<&Observation>> = BTreeMap::new();
    for o in obs {
        days.entry(o.at.date()).or_default().push(o);
    }

    days.into_iter()
        .map(|(day, group)| {
            let (y, p) = labelled(&group);
            let (prec, rec, auc, ap) = if y.is_empty() {
                (None, None, None, None)
            } else {
                let (prec, rec) = precision_recall_at(&y, &p, threshold);
                (Some(prec), Some(rec), finite(roc_auc(&y, &p)), finite(average_precision(&y, &p)))
            };
            DailyMetrics {
                day: day.format("%Y-%m-%d").to_string(),
                n: group.len(),
                roc_auc: auc,
                pr_auc: ap,
                precision_at_threshold: prec,
                recall_at_threshold: rec,
            }
        })
        .collect()
}

/// PSI of the newest half of traffic against the oldest half.
fn half_split_psi(obs: &[Observation]) -> Option<f64> {
    let mut probs: Vec<(NaiveDateTime, f64)> = obs.iter().map(|o| (o.at, o.proba)).collect();
    probs.sort_by_key(|(at, _)| *at);
    let mid = probs.len() / 2;
    let baseline: Vec<f64> = probs[..mid].iter().map(|(_, p)| *p).collect();
    let current: Vec<f64> = probs[mid..].iter().map(|(_, p)| *p).collect();

    if baseline.len() > PSI_MIN_HALF && current.len() > PSI_MIN_HALF {
        finite(psi(&baseline, &current, PSI_BINS))
    } else {
        None
    }
}

fn alerts(daily: &[DailyMetrics], psi_value: Option<f64>, threshold: f64) -> Vec<String> {
    let mut out = Vec::new();

    let aucs: Vec<f64> = daily.iter().filter_map(|d| d.roc_auc).collect();
    if let Some((&last, earlier)) = aucs.split_last().filter(|(_, e)| !e.is_empty()) {
        let base = earlier.iter().sum::<f64>() / earlier.len() as f64;
        if base > 0.0 && last < base * MAX_AUC_DROP_RATIO {
            out.push(format!("ROC-AUC drop: last={last:.3} baseline={base:.3}"));
        }
    }

    if let Some(last) = daily.iter().rev().find_map(|d| d.precision_at_threshold) {
        if last < MIN_PRECISION {
            out.push(format!(
                "Precision SLA violated at {threshold:.2}: {last:.3} < {MIN_PRECISION}"
            ));
        }
    }

    if let Some(v) = psi_value.filter(|v| *v > MAX_PSI) {
        out.push(format!("Prediction drift (PSI) high: {v:.3} > {MAX_PSI}"));
    }
    out
}

// ─── Use case ─────────────────────────────────────────────────────────────────

pub struct MonitorReport {
    pub summary: MonitoringSummary,
    pub daily: Vec<DailyMetrics>,
    pub written: Vec<PathBuf>,
}

pub struct MonitorUseCase {
    config: MonitorConfig,
}

impl MonitorUseCase {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<MonitorReport> {
        // ── Step 1: Load ──────────────────────────────────────
        let log = PredictionLog::new(&self.config.log_path);
        if !log.path().exists() {
            anyhow::bail!(
                "Prediction log '{}' not found; run `predict` first",
                log.path().display()
            );
        }
        let records = log.read_all()?;
        let total = records.len();
        let obs: Vec<Observation> = records
            .into_iter()
            .filter_map(|r| {
                let at = r.parsed_timestamp()?;
                r.proba.is_finite().then_some(Observation {
                    at,
                    proba: r.proba,
                    y_true: r.y_true,
                    prediction: r.prediction,
                })
            })
            .collect();
        if obs.len() < total {
            tracing::warn!("Dropped {} records with unusable timestamp or proba", total - obs.len());
        }

        // ── Step 2: Accuracy ──────────────────────────────────
        let (truth, predicted): (Vec<u8>, Vec<u8>) = obs
            .iter()
            .filter_map(|o| o.y_true.map(|y| (y, o.prediction)))
            .unzip();
        let acc = finite(accuracy(&truth, &predicted));

        // ── Step 3: Threshold ─────────────────────────────────
        let all: Vec<&Observation> = obs.iter().collect();
        let (y, p) = labelled(&all);
        let recommendation = recommend_threshold(&y, &p);
        let threshold = recommendation
            .as_ref()
            .map_or(self.config.operating_threshold, |r| r.threshold);

        // ── Step 4 + 5: Daily metrics, drift, alerts ─────────
        let daily = daily_metrics(&obs, threshold);
        let psi_value = half_split_psi(&obs);
        let summary = MonitoringSummary {
            total_rows: obs.len(),
            labelled_rows: truth.len(),
            accuracy: acc,
            psi: psi_value,
            alerts: alerts(&daily, psi_value, threshold),
            operating_threshold: threshold,
            min_precision: MIN_PRECISION,
            max_psi: MAX_PSI,
            recommendation: recommendation.clone(),
        };

        // ── Step 6: Write reports ─────────────────────────────
        let dir = &self.config.reports_dir;
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create reports dir '{}'", dir.display()))?;

        let daily_path = dir.join(DAILY_METRICS_FILE);
        let mut w = csv::Writer::from_path(&daily_path)
            .with_context(|| format!("Cannot write '{}'", daily_path.display()))?;
        for d in &daily {
            w.serialize(d)?;
        }
        w.flush()?;

        let summary_path = dir.join(SUMMARY_FILE);
        codec::write_json(&summary_path, &summary)?;
        let mut written = vec![daily_path, summary_path];

        if let Some(rec) = &recommendation {
            let rec_path = dir.join(RECOMMENDATION_FILE);
            codec::write_json(&rec_path, rec)?;
            written.push(rec_path);
        }

        tracing::info!(
            "Monitored {} predictions over {} days, {} alerts",
            summary.total_rows,
            daily.len(),
            summary.alerts.len()
        );
        Ok(MonitorReport { summary, daily, written })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::prediction_log::PredictionRecord;

    fn record(day: u32, second: u32, proba: f64, y: Option<u8>) -> PredictionRecord {
        PredictionRecord {
            timestamp: format!("2026-10-{day:02}T10:00:{second:02}.000000"),
            prediction: (proba >= 0.5) as u8,
            proba,
            y_true: y,
        }
    }

    fn config(dir: &std::path::Path) -> MonitorConfig {
        MonitorConfig {
            log_path: dir.join("predictions.csv"),
            reports_dir: dir.join("reports"),
            operating_threshold: 0.5,
        }
    }

    #[test]
    fn test_recommendation_respects_precision_floor() {
        let labels = [1, 1, 0, 0, 0, 0];
        let probs = [0.9, 0.6, 0.55, 0.3, 0.2, 0.1];
        let rec = recommend_threshold(&labels, &probs).unwrap();
        assert!(rec.precision >= MIN_PRECISION);
        assert!((rec.f1 - 1.0).abs() < 1e-12);
        assert!(rec.threshold > 0.5 && rec.threshold <= 0.6 + 1e-9);

        assert!(recommend_threshold(&[1, 1], &[0.4, 0.6]).is_none());
    }

    #[test]
    fn test_alerts_fire_on_auc_drop_and_psi() {
        let day = |d: &str, auc: f64, prec: f64| DailyMetrics {
            day: d.into(),
            n: 10,
            roc_auc: Some(auc),
            pr_auc: None,
            precision_at_threshold: Some(prec),
            recall_at_threshold: Some(0.5),
        };
        let daily = [day("2026-10-01", 0.8, 0.5), day("2026-10-02", 0.6, 0.1)];
        let out = alerts(&daily, Some(0.5), 0.5);
        assert_eq!(out.len(), 3);
        assert!(out[0].starts_with("ROC-AUC drop"));
        assert!(out[1].starts_with("Precision SLA"));
        assert!(out[2].starts_with("Prediction drift"));

        assert!(alerts(&daily[..1], None, 0.5).is_empty());
    }

    #[test]
    fn test_execute_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut records = Vec::new();
        for s in 0..30 {
            let y = (s % 3 == 0) as u8;
            records.push(record(1, s, if y == 1 { 0.7 } else { 0.2 }, Some(y)));
            records.push(record(2, s, if y == 1 { 0.6 } else { 0.4 }, Some(y)));
        }
        records.push(record(2, 59, 0.5, None));
        PredictionLog::new(&cfg.log_path).append(&records).unwrap();

        let report = MonitorUseCase::new(cfg.clone()).execute().unwrap();
        assert_eq!(report.daily.len(), 2);
        assert_eq!(report.summary.total_rows, 61);
        assert_eq!(report.summary.labelled_rows, 60);
        assert_eq!(report.summary.accuracy, Some(1.0));
        assert!(report.summary.psi.is_some());
        assert!(report.summary.recommendation.is_some());
        assert_eq!(report.written.len(), 3);
        assert!(cfg.reports_dir.join(DAILY_METRICS_FILE).exists());
        assert!(cfg.reports_dir.join(RECOMMENDATION_FILE).exists());
    }

    #[test]
    fn test_unlabelled_log_has_no_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let records: Vec<_> = (0..5).map(|s| record(3, s, 0.3, None)).collect();
        PredictionLog::new(&cfg.log_path).append(&records).unwrap();

        let report = MonitorUseCase::new(cfg).execute().unwrap();
        assert_eq!(report.summary.accuracy, None);
        assert_eq!(report.summary.psi, None);
        assert_eq!(report.summary.operating_threshold, 0.5);
        assert_eq!(report.daily[0].precision_at_threshold, None);
        assert_eq!(report.written.len(), 2);
    }

    #[test]
    fn test_missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MonitorUseCase::new(config(dir.path())).execute().is_err());
    }
}
