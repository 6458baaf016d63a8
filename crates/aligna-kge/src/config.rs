//! Run configuration.
//!
//! [`AlignConfig`] is built once (defaults, then a JSON file, then explicit
//! overrides), validated against the task with [`AlignConfig::validate`], and
//! then only ever borrowed. Each component copies the knobs it needs in its
//! constructor.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Nearest-neighbour metric used by evaluation and bootstrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Inner product (cosine when `eval_normalize` is set).
    Inner,
    /// Cosine similarity, regardless of `eval_normalize`.
    Cosine,
    /// L2 distance.
    Euclidean,
    /// L1 distance.
    Manhattan,
}

impl Metric {
    /// Whether raw scores are distances (smaller is closer).
    pub fn is_distance(self) -> bool {
        matches!(self, Self::Euclidean | Self::Manhattan)
    }

    /// Name as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Manhattan => "manhattan",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "cosine" => Ok(Self::Cosine),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "manhattan" | "l1" => Ok(Self::Manhattan),
            other => Err(Error::InvalidConfig(format!("unknown eval_metric '{}'", other))),
        }
    }
}

/// Every option the engine recognises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Embedding model tag, resolved through the model registry.
    pub embedding_module: String,
    /// Output dimension of the embedding model.
    pub embedding_dim: usize,
    /// Learning rate handed to the embedding model.
    pub learning_rate: f32,

    /// Seed pairs per training step.
    pub batch_size: usize,
    /// Negatives per positive example.
    pub neg_multi: usize,
    /// Margin of the contrastive negative loss.
    pub neg_margin: f32,
    /// Weight of the negative alignment loss.
    pub neg_param: f32,
    /// Weight of the relation loss.
    pub rel_param: f32,
    /// Fraction of nearest candidates eligible as truncated negatives.
    ///
    /// The closest `ceil(truncated_epsilon * n)` candidates form the pool, so
    /// smaller values give harder negatives and `1.0` samples uniformly.
    pub truncated_epsilon: f32,
    /// Minimum number of facts a relation needs to feed the relation loss.
    pub min_rel_win: usize,

    /// Number of epochs.
    pub max_epoch: usize,
    /// First epoch that may validate.
    pub start_valid: usize,
    /// Validate every `eval_freq` epochs from `start_valid`.
    pub eval_freq: usize,
    /// First epoch that bootstraps.
    pub start_augment: usize,
    /// Stop after this many validations without a Hits@1 improvement.
    pub early_stop_patience: Option<usize>,

    /// Cut-offs reported as Hits@k.
    pub hits_k: Vec<usize>,
    /// Nearest-neighbour metric.
    pub eval_metric: Metric,
    /// L2-normalise vectors before scoring.
    pub eval_normalize: bool,
    /// CSLS neighbourhood size (0 disables CSLS).
    pub eval_csls: usize,
    /// Worker threads for evaluation and bootstrap similarity.
    pub eval_threads_num: usize,

    /// Minimum confidence for a bootstrap pair.
    pub sim_th: f32,
    /// Maximum distance for a bootstrap pair (distance metrics only).
    pub distance_threshold: f32,

    /// Seed for every random stream of the run.
    pub seed: u64,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            embedding_module: "table".to_string(),
            embedding_dim: 100,
            learning_rate: 0.001,
            batch_size: 1000,
            neg_multi: 10,
            neg_margin: 1.5,
            neg_param: 0.1,
            rel_param: 0.01,
            truncated_epsilon: 0.9,
            min_rel_win: 15,
            max_epoch: 1000,
            start_valid: 10,
            eval_freq: 5,
            start_augment: 4,
            early_stop_patience: None,
            hits_k: vec![1, 5, 10, 50],
            eval_metric: Metric::Inner,
            eval_normalize: true,
            eval_csls: 10,
            eval_threads_num: 10,
            sim_th: 0.5,
            distance_threshold: 0.6,
            seed: 42,
        }
    }
}

impl AlignConfig {
    /// Defaults overlaid with the keys present in a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_embedding_module(mut self, tag: impl Into<String>) -> Self {
        self.embedding_module = tag.into();
        self
    }

    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_neg_multi(mut self, n: usize) -> Self {
        self.neg_multi = n;
        self
    }

    pub fn with_max_epoch(mut self, epochs: usize) -> Self {
        self.max_epoch = epochs;
        self
    }

    pub fn with_schedule(mut self, start_valid: usize, eval_freq: usize, start_augment: usize) -> Self {
        self.start_valid = start_valid;
        self.eval_freq = eval_freq;
        self.start_augment = start_augment;
        self
    }

    pub fn with_hits_k(mut self, hits_k: Vec<usize>) -> Self {
        self.hits_k = hits_k;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.eval_metric = metric;
        self
    }

    pub fn with_csls(mut self, k: usize) -> Self {
        self.eval_csls = k;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.eval_normalize = normalize;
        self
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.eval_threads_num = n;
        self
    }

    pub fn with_min_rel_win(mut self, n: usize) -> Self {
        self.min_rel_win = n;
        self
    }

    pub fn with_bootstrap_thresholds(mut self, sim_th: f32, distance_threshold: f32) -> Self {
        self.sim_th = sim_th;
        self.distance_threshold = distance_threshold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject configurations that cannot run on a task with `ent_num` entities.
    pub fn validate(&self, ent_num: usize) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidConfig(msg));

        if self.hits_k.is_empty() {
            return fail("hits_k must not be empty".into());
        }
        if let Some(&k) = self.hits_k.iter().find(|&&k| k == 0 || k >= ent_num) {
            return fail(format!("hits_k value {} must be in [1, ent_num = {})", k, ent_num));
        }
        if self.eval_threads_num == 0 {
            return fail("eval_threads_num must be positive".into());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive".into());
        }
        if self.neg_multi == 0 {
            return fail("neg_multi must be positive".into());
        }
        if self.eval_freq == 0 {
            return fail("eval_freq must be positive".into());
        }
        if self.max_epoch == 0 {
            return fail("max_epoch must be positive".into());
        }
        if self.embedding_dim == 0 {
            return fail("embedding_dim must be positive".into());
        }
        if !(self.truncated_epsilon > 0.0 && self.truncated_epsilon <= 1.0) {
            return fail(format!(
                "truncated_epsilon must be in (0, 1], got {}",
                self.truncated_epsilon
            ));
        }
        for (name, v) in [
            ("neg_margin", self.neg_margin),
            ("neg_param", self.neg_param),
            ("rel_param", self.rel_param),
            ("learning_rate", self.learning_rate),
            ("distance_threshold", self.distance_threshold),
        ] {
            if !v.is_finite() || v < 0.0 {
                return fail(format!("{} must be finite and non-negative, got {}", name, v));
            }
        }
        if !self.sim_th.is_finite() {
            return fail(format!("sim_th must be finite, got {}", self.sim_th));
        }
        Ok(())
    }

    /// Whether epoch `epoch` (1-based) runs a validation round.
    pub fn is_validation_epoch(&self, epoch: usize) -> bool {
        epoch >= self.start_valid && (epoch - self.start_valid) % self.eval_freq == 0
    }

    /// Whether epoch `epoch` (1-based) runs a bootstrap round.
    pub fn is_augment_epoch(&self, epoch: usize) -> bool {
        epoch >= self.start_augment
    }
}
