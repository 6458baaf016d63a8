//! Contract between the engine and an embedding model.
//!
//! The engine never looks inside a model. It needs two things:
//!
//! - [`AlignmentModel::predict_embeddings`]: an immutable snapshot, one row per entity
//! - [`AlignmentModel::update`]: one gradient step on a positive + negative batch
//!
//! Models are selected by tag through a [`ModelRegistry`], resolved once at
//! startup.
//!
//! # Batch Layout
//!
//! Negatives are stored flat, `neg_multi` per positive, in positive order:
//!
//! ```text
//! positives: [p0,            p1,            ...]
//! negatives: [n0_0 .. n0_k,  n1_0 .. n1_k,  ...]   k = neg_multi
//! ```
//!
//! Relation negatives may be fewer than `neg_multi` per positive (a negative is
//! dropped when no substitute can avoid every known fact), so models should
//! treat the relation negatives as a flat pool.

use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::evaluation::AlignmentMetrics;
use crate::models::TableModel;
use aligna_core::{AlignmentTask, EmbeddingSnapshot, EntityId, RelTriple};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Seed pairs of one step and their corrupted counterparts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentBatch {
    /// `(graph1, graph2)` seed pairs.
    pub positives: Vec<(EntityId, EntityId)>,
    /// `neg_multi` corrupted pairs per positive.
    pub negatives: Vec<(EntityId, EntityId)>,
}

impl AlignmentBatch {
    /// Negatives generated for positive `i`.
    pub fn negatives_of(&self, i: usize, neg_multi: usize) -> &[(EntityId, EntityId)] {
        let start = (i * neg_multi).min(self.negatives.len());
        let end = ((i + 1) * neg_multi).min(self.negatives.len());
        &self.negatives[start..end]
    }
}

/// Relation facts of one step and their corrupted counterparts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationBatch {
    /// Observed facts.
    pub positives: Vec<RelTriple>,
    /// Corrupted facts (never observed).
    pub negatives: Vec<RelTriple>,
}

/// Everything one update step consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingBatch {
    /// Alignment term.
    pub alignment: AlignmentBatch,
    /// Relation-consistency term.
    pub relation: RelationBatch,
}

/// Loss weights handed to the model with every batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    /// Margin of the contrastive negative term.
    pub neg_margin: f32,
    /// Weight of the negative alignment term.
    pub neg_param: f32,
    /// Weight of the relation term.
    pub rel_param: f32,
}

impl LossWeights {
    /// Weights from a run configuration.
    pub fn from_config(config: &AlignConfig) -> Self {
        Self {
            neg_margin: config.neg_margin,
            neg_param: config.neg_param,
            rel_param: config.rel_param,
        }
    }
}

/// What happened in one epoch.
///
/// The orchestrator keeps one record per finished epoch; the list is both the
/// model's early-stop input and the body of the training report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch (1-based).
    pub epoch: usize,
    /// Mean step loss.
    pub loss: f32,
    /// Number of update steps.
    pub steps: usize,
    /// Reference metrics, if this epoch validated.
    pub validation: Option<AlignmentMetrics>,
    /// Pairs added by bootstrapping, if this epoch augmented.
    pub bootstrap_added: Option<usize>,
    /// Seed size at the end of the epoch.
    pub seed_size: usize,
}

/// Embedding model driven by the training orchestrator.
///
/// Calls are strictly sequential: the orchestrator never calls `update` while
/// a snapshot is being read, so implementations need no interior locking.
pub trait AlignmentModel: Send {
    /// Registry tag.
    fn name(&self) -> &'static str;

    /// Current entity embeddings, `ent_num x dim`.
    fn predict_embeddings(&self) -> Result<EmbeddingSnapshot>;

    /// Apply one gradient step and return the batch loss.
    ///
    /// A non-finite return value is treated as divergence and halts the run.
    fn update(&mut self, batch: &TrainingBatch, weights: &LossWeights) -> Result<f32>;

    /// Early-stop hook, consulted after each epoch.
    fn should_stop(&self, _history: &[EpochMetrics]) -> bool {
        false
    }
}

/// Builds a model for a task.
pub type ModelConstructor = fn(&AlignmentTask, &AlignConfig) -> Result<Box<dyn AlignmentModel>>;

/// Tag to constructor map.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    constructors: BTreeMap<String, ModelConstructor>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tags()).finish()
    }
}

impl ModelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in models (`"table"`).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(TableModel::TAG, TableModel::build);
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register(&mut self, tag: impl Into<String>, constructor: ModelConstructor) {
        self.constructors.insert(tag.into(), constructor);
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Whether a tag is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Build the model named by `config.embedding_module`.
    pub fn build(&self, task: &AlignmentTask, config: &AlignConfig) -> Result<Box<dyn AlignmentModel>> {
        let tag = config.embedding_module.as_str();
        let constructor = self.constructors.get(tag).ok_or_else(|| Error::UnknownModel {
            tag: tag.to_string(),
            available: self.tags().collect::<Vec<_>>().join(", "),
        })?;
        constructor(task, config)
    }
}
