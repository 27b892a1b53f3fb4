// ============================================================
// Layer 5 — SgdClassifier
// ============================================================
// Binary logistic regression over hashed sparse features,
// trained by plain SGD one chunk at a time.
//
// Per sample (labels mapped to y ∈ {-1, +1}):
//
//   p      = w·x + b
//   eta    = 1 / (alpha * (t0 + t - 1))          "optimal" schedule
//   g      = dloss(y, p)                          logistic gradient
//   w     *= 1 - eta * alpha                      L2 shrink
//   w     += -eta * g * cw[y] * x
//   b     += -eta * g * cw[y] * intercept_decay
//   t     += 1
//
// The L2 shrink touches every weight, so weights are stored as
// `wscale * coef`: shrinking is one multiply, and only the few
// columns a sparse row touches are written per sample.
//
// `t` carries over between calls, so fitting N rows as one
// chunk or as several consecutive chunks gives the same model
// (with shuffling off). With shuffling on, each call permutes
// its chunk using a ChaCha stream seeded from (seed, chunks seen),
// which makes a resumed model identical to an uninterrupted one.
//
// Reference: Bottou (2010); Shalev-Shwartz et al. (2007) Pegasos

use anyhow::Result;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::data::sparse::{SparseMatrix, SparseRow};
use crate::domain::error::CtrError;
use crate::domain::row::CLASSES;

/// L2 regularisation strength
pub const DEFAULT_ALPHA: f64 = 1e-6;

/// Intercept updates are damped on sparse input
pub const SPARSE_INTERCEPT_DECAY: f64 = 0.01;

const MIN_WSCALE: f64 = 1e-9;
const MAX_DLOSS: f64 = 1e12;

// ─── Logistic loss ────────────────────────────────────────────────────────────

/// ln(1 + e^(-y·p)), stable in both tails.
pub fn log_loss_value(y: f64, p: f64) -> f64 {
    let z = p * y;
    if z > 18.0 {
        (-z).exp()
    } else if z < -18.0 {
        -z
    } else {
        (-z).exp().ln_1p()
    }
}

/// d/dp of `log_loss_value`.
pub fn log_loss_dloss(y: f64, p: f64) -> f64 {
    let z = p * y;
    if z > 18.0 {
        -y * (-z).exp()
    } else if z < -18.0 {
        -y
    } else {
        -y / (z.exp() + 1.0)
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Offset t0 of the "optimal" schedule: the first step size equals
/// the typical weight magnitude 1/sqrt(sqrt(alpha)).
fn optimal_init(alpha: f64) -> f64 {
    let typw = (1.0 / alpha.sqrt()).sqrt();
    let initial_eta0 = typw / f64::max(1.0, log_loss_dloss(1.0, -typw));
    1.0 / (initial_eta0 * alpha)
}

// ─── ClassWeight ──────────────────────────────────────────────────────────────

/// Per-class sample weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeight {
    pub negative: f64,
    pub positive: f64,
}

impl ClassWeight {
    pub fn uniform() -> Self {
        Self { negative: 1.0, positive: 1.0 }
    }

    /// Inverse-frequency weights `n / (2 * count_c)` over {0, 1}.
    /// A class absent from `labels` keeps weight 1.0.
    pub fn balanced(labels: &[u8]) -> Self {
        let n = labels.len() as f64;
        let positives = labels.iter().filter(|&&y| y == 1).count() as f64;
        let negatives = n - positives;

        let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 1.0 };
        Self {
            negative: weight(negatives),
            positive: weight(positives),
        }
    }

    pub fn for_label(&self, label: u8) -> f64 {
        if label == 1 {
            self.positive
        } else {
            self.negative
        }
    }
}

impl Default for ClassWeight {
    fn default() -> Self {
        Self::uniform()
    }
}

// ─── SgdConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdConfig {
    pub alpha: f64,
    pub seed: u64,
    /// Permute each chunk before visiting its samples
    pub shuffle: bool,
    pub class_weight: ClassWeight,
    pub intercept_decay: f64,
}

impl SgdConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            seed,
            shuffle: true,
            class_weight: ClassWeight::uniform(),
            intercept_decay: SPARSE_INTERCEPT_DECAY,
        }
    }

    pub fn with_class_weight(mut self, class_weight: ClassWeight) -> Self {
        self.class_weight = class_weight;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

// ─── SgdClassifier ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdClassifier {
    config: SgdConfig,
    /// Unscaled weights; empty until the first fit
    coef: Vec<f64>,
    wscale: f64,
    intercept: f64,
    /// Schedule counter, starts at 1
    t: f64,
    /// Declared on the first partial_fit
    classes: Option<[u8; 2]>,
    chunks_seen: u64,
    samples_seen: u64,
}

impl SgdClassifier {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            config,
            coef: Vec::new(),
            wscale: 1.0,
            intercept: 0.0,
            t: 1.0,
            classes: None,
            chunks_seen: 0,
            samples_seen: 0,
        }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.classes.is_some()
    }

    /// Feature width the model was fitted at.
    pub fn n_features(&self) -> Option<usize> {
        self.is_fitted().then_some(self.coef.len())
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Materialised weight vector.
    pub fn coefficients(&self) -> Vec<f64> {
        self.coef.iter().map(|c| c * self.wscale).collect()
    }

    fn check_classes(&mut self, classes: Option<&[u8]>) -> Result<(), CtrError> {
        let declared = match classes {
            Some(c) => {
                let mut sorted = c.to_vec();
                sorted.sort_unstable();
                sorted.dedup();
                if sorted != CLASSES {
                    return Err(CtrError::config(format!(
                        "classes must be exactly {CLASSES:?}, got {c:?}"
                    )));
                }
                Some(CLASSES)
            }
            None => None,
        };

        match (self.classes, declared) {
            (None, None) => Err(CtrError::config(
                "classes must be passed on the first call to partial_fit",
            )),
            (None, Some(c)) => {
                self.classes = Some(c);
                Ok(())
            }
            (Some(_), _) => Ok(()),
        }
    }

    fn scale_weights(&mut self, factor: f64) {
        self.wscale *= factor;
        if self.wscale < MIN_WSCALE {
            let s = self.wscale;
            self.coef.iter_mut().for_each(|c| *c *= s);
            self.wscale = 1.0;
        }
    }

    fn raw_score(&self, row: SparseRow<'_>) -> f64 {
        row.dot(&self.coef) * self.wscale + self.intercept
    }

    /// One SGD pass over `x`. The first call must declare `classes`
    /// ({0, 1}); later calls may omit it. Returns the mean log-loss
    /// of the samples, each measured just before its update.
    pub fn partial_fit(&mut self, x: &SparseMatrix, y: &[u8], classes: Option<&[u8]>) -> Result<f64> {
        self.check_classes(classes)?;

        if self.coef.is_empty() {
            self.coef = vec![0.0; x.n_cols()];
        } else if self.coef.len() != x.n_cols() {
            return Err(CtrError::WidthMismatch {
                expected: self.coef.len(),
                actual: x.n_cols(),
            }
            .into());
        }

        if x.n_rows() != y.len() {
            return Err(CtrError::schema(format!(
                "{} feature rows but {} labels",
                x.n_rows(),
                y.len()
            ))
            .into());
        }
        if let Some(bad) = y.iter().find(|&&l| l > 1) {
            return Err(CtrError::schema(format!("label {bad} is not 0 or 1")).into());
        }

        let mut order: Vec<usize> = (0..x.n_rows()).collect();
        if self.config.shuffle {
            let stream = self.chunks_seen.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed ^ stream);
            order.shuffle(&mut rng);
        }

        let alpha = self.config.alpha;
        let t0 = optimal_init(alpha);
        let mut loss_sum = 0.0;

        for &i in &order {
            let row = x.row(i);
            let y_signed = if y[i] == 1 { 1.0 } else { -1.0 };

            let p = self.raw_score(row);
            let eta = 1.0 / (alpha * (t0 + self.t - 1.0));

            loss_sum += log_loss_value(y_signed, p);
            let dloss = log_loss_dloss(y_signed, p).clamp(-MAX_DLOSS, MAX_DLOSS);
            let update = -eta * dloss * self.config.class_weight.for_label(y[i]);

            self.scale_weights((1.0 - eta * alpha).max(0.0));

            if update != 0.0 {
                let step = update / self.wscale;
                for (j, v) in row.iter() {
                    self.coef[j] += v * step;
                }
                self.intercept += update * self.config.intercept_decay;
            }

            self.t += 1.0;
        }

        self.chunks_seen += 1;
        self.samples_seen += x.n_rows() as u64;

        Ok(if order.is_empty() {
            0.0
        } else {
            loss_sum / order.len() as f64
        })
    }

    /// Full-batch fit: reset, then `epochs` passes over `x`.
    pub fn fit(&mut self, x: &SparseMatrix, y: &[u8], epochs: usize) -> Result<f64> {
        *self = Self::new(self.config.clone());

        let mut loss = f64::NAN;
        for epoch in 0..epochs.max(1) {
            let classes = (epoch == 0).then_some(&CLASSES[..]);
            loss = self.partial_fit(x, y, classes)?;
            tracing::debug!("epoch {}/{} mean log-loss {:.5}", epoch + 1, epochs, loss);
        }
        Ok(loss)
    }

    fn check_predict_input(&self, x: &SparseMatrix) -> Result<()> {
        if !self.is_fitted() {
            return Err(CtrError::artifact("model has not been fitted").into());
        }
        if x.n_cols() != self.coef.len() {
            return Err(CtrError::WidthMismatch {
                expected: self.coef.len(),
                actual: x.n_cols(),
            }
            .into());
        }
        Ok(())
    }

    /// Raw margins w·x + b.
    pub fn decision_function(&self, x: &SparseMatrix) -> Result<Vec<f64>> {
        self.check_predict_input(x)?;
        Ok(x.rows().map(|r| self.raw_score(r)).collect())
    }

    /// Probability of the positive class per row.
    pub fn predict_proba(&self, x: &SparseMatrix) -> Result<Vec<f64>> {
        Ok(self
            .decision_function(x)?
            .into_iter()
            .map(sigmoid)
            .collect())
    }
}
