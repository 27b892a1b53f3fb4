// ============================================================
// Layer 5 — Evaluation Metrics
// ============================================================
// Ranking and calibration metrics over (label, probability)
// pairs:
//
//   roc_auc           — rank statistic, ties share average ranks
//   average_precision — Σ (R_k - R_{k-1}) · P_k over thresholds
//   log_loss          — mean binary cross-entropy, clipped
//   precision/recall  — at a fixed decision threshold
//   psi               — population stability index between two
//                       score samples (drift)
//
// Every metric that needs both classes returns NaN when one is
// missing, rather than a misleading number.

use serde::{Deserialize, Serialize};

// ─── Core metrics ─────────────────────────────────────────────────────────────

fn class_counts(labels: &[u8]) -> (usize, usize) {
    let pos = labels.iter().filter(|&&y| y == 1).count();
    (pos, labels.len() - pos)
}

/// Area under the ROC curve via the Mann-Whitney U statistic.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> f64 {
    let (n_pos, n_neg) = class_counts(labels);
    if n_pos == 0 || n_neg == 0 || labels.len() != scores.len() {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Average 1-based rank within each tie group
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if labels[k] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

/// Area under the precision-recall curve as average precision.
pub fn average_precision(labels: &[u8], scores: &[f64]) -> f64 {
    let (n_pos, _) = class_counts(labels);
    if n_pos == 0 || labels.len() != scores.len() {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut fp) = (0.0, 0.0);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;

    let mut i = 0;
    while i < order.len() {
        // One threshold per distinct score
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] == 1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let recall = tp / n_pos as f64;
        let precision = tp / (tp + fp);
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}

/// Mean binary cross-entropy with probabilities clipped to [eps, 1-eps].
pub fn log_loss(labels: &[u8], probs: &[f64]) -> f64 {
    let (n_pos, n_neg) = class_counts(labels);
    if n_pos == 0 || n_neg == 0 || labels.len() != probs.len() {
        return f64::NAN;
    }

    let eps = f64::EPSILON;
    let total: f64 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            if y == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / labels.len() as f64
}

/// (precision, recall) at `threshold`; 0 when a ratio is undefined.
pub fn precision_recall_at(labels: &[u8], probs: &[f64], threshold: f64) -> (f64, f64) {
    let (mut tp, mut fp, mut fn_) = (0.0, 0.0, 0.0);
    for (&y, &p) in labels.iter().zip(probs) {
        match (p >= threshold, y == 1) {
            (true, true) => tp += 1.0,
            (true, false) => fp += 1.0,
            (false, true) => fn_ += 1.0,
            (false, false) => {}
        }
    }
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    (precision, recall)
}

pub fn accuracy(labels: &[u8], predicted: &[u8]) -> f64 {
    if labels.is_empty() {
        return f64::NAN;
    }
    let hits = labels.iter().zip(predicted).filter(|(a, b)| a == b).count();
    hits as f64 / labels.len() as f64
}

pub fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

// ─── PSI ──────────────────────────────────────────────────────────────────────

const PSI_FLOOR: f64 = 1e-12;

/// Linear-interpolated quantile of a sorted sample.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn histogram(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let bins = edges.len() - 1;
    let mut counts = vec![0.0; bins];
    for &v in values {
        if v < edges[0] || v > edges[bins] {
            continue;
        }
        // Half-open bins, the last one closed on the right
        let idx = edges.partition_point(|&e| e <= v).saturating_sub(1).min(bins - 1);
        counts[idx] += 1.0;
    }
    counts
}

fn proportions(counts: &[f64]) -> Vec<f64> {
    let total = counts.iter().sum::<f64>().max(1.0);
    counts.iter().map(|c| (c / total).max(PSI_FLOOR)).collect()
}

/// Population stability index of `actual` against `expected`, with
/// bin edges at the quantiles of `expected` (outer edges pinned to 0
/// and 1). Scores are clipped into (0, 1) first.
pub fn psi(expected: &[f64], actual: &[f64], bins: usize) -> f64 {
    if expected.is_empty() || actual.is_empty() || bins == 0 {
        return f64::NAN;
    }

    let clip = |v: &f64| v.clamp(PSI_FLOOR, 1.0 - PSI_FLOOR);
    let mut e: Vec<f64> = expected.iter().map(clip).collect();
    let a: Vec<f64> = actual.iter().map(clip).collect();
    e.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (0..=bins).map(|k| quantile(&e, k as f64 / bins as f64)).collect();
    edges[0] = 0.0;
    edges[bins] = 1.0;

    let e_pct = proportions(&histogram(&e, &edges));
    let a_pct = proportions(&histogram(&a, &edges));

    e_pct
        .iter()
        .zip(&a_pct)
        .map(|(e, a)| (a - e) * (a / e).ln())
        .sum()
}

// ─── ValidationSet ────────────────────────────────────────────────────────────

/// Held-out labels and scores, accumulated chunk by chunk.
#[derive(Debug, Clone, Default)]
pub struct ValidationSet {
    pub labels: Vec<u8>,
    pub probabilities: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub auc: f64,
    pub logloss: f64,
    pub pr_auc: f64,
}

impl ValidationSet {
    pub fn extend(&mut self, labels: &[u8], probabilities: &[f64]) {
        self.labels.extend_from_slice(labels);
        self.probabilities.extend_from_slice(probabilities);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn metrics(&self) -> ValidationMetrics {
        ValidationMetrics {
            auc: roc_auc(&self.labels, &self.probabilities),
            logloss: log_loss(&self.labels, &self.probabilities),
            pr_auc: average_precision(&self.labels, &self.probabilities),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = [0, 0, 1, 1];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]), 1.0);
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]), 0.0);
    }

    #[test]
    fn test_auc_ties_count_half() {
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), 0.5);
        // classic example: 0.75
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]);
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_is_nan() {
        assert!(roc_auc(&[1, 1], &[0.2, 0.3]).is_nan());
        assert!(log_loss(&[0, 0], &[0.2, 0.3]).is_nan());
        assert!(average_precision(&[0, 0], &[0.2, 0.3]).is_nan());
    }

    #[test]
    fn test_average_precision() {
        // ranks: 0.8(1) 0.4(0) 0.35(1) 0.1(0) → (1/2)·1 + (1/2)·(2/3)
        let ap = average_precision(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]);
        assert!((ap - (0.5 + 1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_clips_extremes() {
        let ll = log_loss(&[0, 1], &[0.0, 1.0]);
        assert!(ll.is_finite() && ll < 1e-10);
        let ll = log_loss(&[0, 1], &[0.5, 0.5]);
        assert!((ll - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn test_precision_recall_zero_division() {
        assert_eq!(precision_recall_at(&[0, 1], &[0.1, 0.2], 0.9), (0.0, 0.0));
        assert_eq!(precision_recall_at(&[0, 1], &[0.1, 0.95], 0.5), (1.0, 1.0));
    }

    #[test]
    fn test_psi_identical_samples_is_zero() {
        let s: Vec<f64> = (1..100).map(|i| i as f64 / 100.0).collect();
        assert!(psi(&s, &s, 10).abs() < 1e-9);
    }

    #[test]
    fn test_psi_detects_shift() {
        let expected: Vec<f64> = (1..100).map(|i| i as f64 / 200.0).collect();
        let actual: Vec<f64> = expected.iter().map(|p| p + 0.5).collect();
        assert!(psi(&expected, &actual, 10) > 0.2);
    }

    proptest! {
        #[test]
        fn prop_auc_in_unit_interval(
            pairs in prop::collection::vec((0u8..2, 0.0f64..1.0), 2..200)
        ) {
            let (y, p): (Vec<u8>, Vec<f64>) = pairs.into_iter().unzip();
            let auc = roc_auc(&y, &p);
            prop_assert!(auc.is_nan() || (0.0..=1.0).contains(&auc));
            let ap = average_precision(&y, &p);
            prop_assert!(ap.is_nan() || (0.0..=1.0 + 1e-12).contains(&ap));
        }
    }
}
