//! Training orchestration: epochs, validation, bootstrapping.
//!
//! ```text
//! INIT -> EPOCH* -> DONE
//!
//! EPOCH = TRAIN_STEP* -> [VALIDATE] -> [AUGMENT]
//! ```
//!
//! Each epoch:
//!
//! 1. Takes one embedding snapshot (the state at the end of the previous
//!    epoch). Every negative of the epoch is sampled against it.
//! 2. Splits the seed alignment into `batch_size` chunks, and the relation
//!    facts of well-supported relations into the same number of chunks. Each
//!    step hands positives, negatives and [`LossWeights`] to the model.
//! 3. Takes a second snapshot after the last step. Validation (on the
//!    reference set) and bootstrapping both read this one snapshot, so
//!    they see a consistent view.
//!
//! Training steps are sequential; only evaluation and bootstrap similarity
//! run on the worker pool, and the loop waits for them before continuing.
//!
//! A non-finite step loss halts the run with [`Error::Divergence`]. It is not
//! retried.
//!
//! # Example
//!
//! ```rust
//! use aligna_core::{SyntheticConfig, SyntheticTaskSource, TaskSource};
//! use aligna_kge::{AlignConfig, AlignmentTrainer, ModelRegistry};
//!
//! let task = SyntheticTaskSource::new(SyntheticConfig {
//!     entities: 30,
//!     ..Default::default()
//! })
//! .load()
//! .unwrap();
//!
//! let config = AlignConfig::default()
//!     .with_embedding_dim(16)
//!     .with_max_epoch(3)
//!     .with_schedule(1, 1, 2)
//!     .with_hits_k(vec![1, 5])
//!     .with_threads(2);
//!
//! let mut trainer = AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin()).unwrap();
//! let report = trainer.train().unwrap();
//! assert_eq!(report.epochs.len(), 3);
//! ```

use crate::bootstrap::BootstrapAugmenter;
use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::evaluation::{AlignmentMetrics, Evaluator};
use crate::model::{AlignmentModel, EpochMetrics, LossWeights, ModelRegistry, TrainingBatch};
use crate::sampling::NegativeSampler;
use crate::similarity::EntityPairSimilarity;
use aligna_core::{
    AlignmentTask, EmbeddingSnapshot, EntityId, LinkedEntities, RelTriple, SeedAlignment,
};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Empty bootstrap rounds in a row before a warning is logged.
const EMPTY_ROUNDS_WARNING: usize = 3;

/// Outcome of [`AlignmentTrainer::train`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Registry tag of the model.
    pub model: String,
    /// One record per finished epoch.
    pub epochs: Vec<EpochMetrics>,
    /// Seed size before the first epoch.
    pub initial_seed_size: usize,
    /// Whether a stop policy ended the run before `max_epoch`.
    pub stopped_early: bool,
}

impl TrainingReport {
    /// Mean loss per epoch.
    pub fn loss_history(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    /// `(epoch, metrics)` of every validation round.
    pub fn validations(&self) -> impl Iterator<Item = (usize, &AlignmentMetrics)> {
        self.epochs
            .iter()
            .filter_map(|e| e.validation.as_ref().map(|m| (e.epoch, m)))
    }

    /// Seed size at the end of each epoch.
    pub fn seed_sizes(&self) -> Vec<usize> {
        self.epochs.iter().map(|e| e.seed_size).collect()
    }

    /// Total pairs added by bootstrapping.
    pub fn bootstrap_total(&self) -> usize {
        self.epochs.iter().filter_map(|e| e.bootstrap_added).sum()
    }

    /// Last validation round, if any.
    pub fn last_validation(&self) -> Option<&AlignmentMetrics> {
        self.validations().last().map(|(_, m)| m)
    }
}

/// Drives one alignment run.
pub struct AlignmentTrainer {
    config: AlignConfig,
    task: AlignmentTask,
    model: Box<dyn AlignmentModel>,
    sampler: NegativeSampler,
    evaluator: Evaluator,
    augmenter: BootstrapAugmenter,
    weights: LossWeights,
    seed: SeedAlignment,
    linked: LinkedEntities,
    relation_anchors: Vec<RelTriple>,
    history: Vec<EpochMetrics>,
    epoch: usize,
    empty_rounds: usize,
}

impl std::fmt::Debug for AlignmentTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignmentTrainer")
            .field("model", &self.model.name())
            .field("epoch", &self.epoch)
            .field("seed", &self.seed.len())
            .field("linked", &self.linked.len())
            .finish()
    }
}

impl AlignmentTrainer {
    /// Validate `config` against `task` and build the model it names.
    pub fn new(task: AlignmentTask, config: AlignConfig, registry: &ModelRegistry) -> Result<Self> {
        config.validate(task.ent_num())?;
        let model = registry.build(&task, &config)?;
        Self::with_model(task, config, model)
    }

    /// Use an already-built model.
    pub fn with_model(
        task: AlignmentTask,
        config: AlignConfig,
        model: Box<dyn AlignmentModel>,
    ) -> Result<Self> {
        config.validate(task.ent_num())?;

        let engine = Arc::new(EntityPairSimilarity::from_config(&config)?);
        let sampler = NegativeSampler::new(&config);
        let relation_anchors = sampler.relation_anchors(&task);
        let trainer = Self {
            evaluator: Evaluator::with_engine(&config, Arc::clone(&engine)),
            augmenter: BootstrapAugmenter::with_engine(&config, engine),
            weights: LossWeights::from_config(&config),
            seed: SeedAlignment::new(task.seed().clone()),
            linked: task.linked_entities(),
            relation_anchors,
            sampler,
            model,
            task,
            config,
            history: Vec::new(),
            epoch: 0,
            empty_rounds: 0,
        };
        trainer.snapshot()?;

        tracing::info!(
            model = trainer.model.name(),
            ent_num = trainer.task.ent_num(),
            seed = trainer.seed.len(),
            reference = trainer.task.reference().len(),
            relation_facts = trainer.relation_anchors.len(),
            "alignment run initialised"
        );
        Ok(trainer)
    }

    /// Run configuration.
    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Task being aligned.
    pub fn task(&self) -> &AlignmentTask {
        &self.task
    }

    /// Current (growing) seed alignment.
    pub fn seed(&self) -> &SeedAlignment {
        &self.seed
    }

    /// Entities covered by seed or reference pairs.
    pub fn linked(&self) -> &LinkedEntities {
        &self.linked
    }

    /// Number of finished epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Records of finished epochs.
    pub fn history(&self) -> &[EpochMetrics] {
        &self.history
    }

    /// Relation facts that feed the relation loss.
    pub fn relation_anchors(&self) -> &[RelTriple] {
        &self.relation_anchors
    }

    /// Current embeddings, checked against the task's entity count.
    pub fn snapshot(&self) -> Result<EmbeddingSnapshot> {
        let snapshot = self.model.predict_embeddings()?;
        if snapshot.num_entities() != self.task.ent_num() {
            return Err(Error::DimensionMismatch(format!(
                "model produced {} rows for {} entities",
                snapshot.num_entities(),
                self.task.ent_num()
            )));
        }
        Ok(snapshot)
    }

    /// Run epochs until `max_epoch` or a stop policy fires.
    pub fn train(&mut self) -> Result<TrainingReport> {
        self.train_with_callback(|_| {})
    }

    /// [`AlignmentTrainer::train`], calling `callback` after every epoch.
    pub fn train_with_callback<F>(&mut self, mut callback: F) -> Result<TrainingReport>
    where
        F: FnMut(&EpochMetrics),
    {
        let initial_seed_size = self.seed.len();
        let mut stopped_early = false;

        while self.epoch < self.config.max_epoch {
            let record = self.run_epoch()?;
            callback(&record);

            if self.patience_exhausted() {
                tracing::info!(epoch = self.epoch, "validation stopped improving, stopping early");
                stopped_early = true;
                break;
            }
            if self.model.should_stop(&self.history) {
                tracing::info!(epoch = self.epoch, "model requested early stop");
                stopped_early = true;
                break;
            }
        }

        Ok(TrainingReport {
            model: self.model.name().to_string(),
            epochs: self.history.clone(),
            initial_seed_size,
            stopped_early,
        })
    }

    /// One full epoch: train steps, then validation and bootstrapping when due.
    pub fn run_epoch(&mut self) -> Result<EpochMetrics> {
        self.epoch += 1;
        let epoch = self.epoch;

        let (loss, steps) = self.train_steps(epoch)?;

        let validate = self.config.is_validation_epoch(epoch);
        let augment = self.config.is_augment_epoch(epoch);
        let mut validation = None;
        let mut bootstrap_added = None;

        if validate || augment {
            let snapshot = self.snapshot()?;
            if validate {
                let metrics = self.evaluator.evaluate(&snapshot, self.task.reference())?;
                tracing::info!(epoch, "validation: {}", metrics.summary());
                validation = Some(metrics);
            }
            if augment {
                let added = self.augmenter.augment(
                    &snapshot,
                    self.task.space(),
                    &mut self.seed,
                    &mut self.linked,
                )?;
                self.note_bootstrap(epoch, added);
                bootstrap_added = Some(added);
            }
        }

        let record = EpochMetrics {
            epoch,
            loss,
            steps,
            validation,
            bootstrap_added,
            seed_size: self.seed.len(),
        };
        tracing::info!(epoch, loss, steps, seed = record.seed_size, "epoch finished");
        self.history.push(record.clone());
        Ok(record)
    }

    /// Final evaluation of the current embeddings on the reference set.
    pub fn test(&self) -> Result<AlignmentMetrics> {
        let snapshot = self.snapshot()?;
        let metrics = self.evaluator.evaluate(&snapshot, self.task.reference())?;
        tracing::info!("test: {}", metrics.summary());
        Ok(metrics)
    }

    fn train_steps(&mut self, epoch: usize) -> Result<(f32, usize)> {
        let snapshot = self.snapshot()?;

        let mut positives: Vec<(EntityId, EntityId)> = self.seed.pairs().iter().collect();
        positives.shuffle(&mut XorShiftRng::seed_from_u64(mix_seed(self.config.seed, epoch, 0, 0)));

        let batch_size = self.config.batch_size;
        let steps = positives.len().div_ceil(batch_size).max(1);
        let rel_chunk = self.relation_anchors.len().div_ceil(steps).max(1);

        let mut total = 0.0f32;
        for step in 0..steps {
            let align_pos = chunk(&positives, step, batch_size);
            let rel_pos = chunk(&self.relation_anchors, step, rel_chunk);
            if align_pos.is_empty() && rel_pos.is_empty() {
                continue;
            }

            let alignment = self.sampler.alignment_negatives(
                &snapshot,
                self.task.space(),
                &self.linked,
                align_pos,
                mix_seed(self.config.seed, epoch, step, 1),
            )?;
            let relation = self.sampler.relation_negatives(
                self.task.space(),
                self.task.rel_index(),
                rel_pos,
                mix_seed(self.config.seed, epoch, step, 2),
            );
            let batch = TrainingBatch { alignment, relation };

            let loss = self.model.update(&batch, &self.weights)?;
            if !loss.is_finite() {
                return Err(Error::Divergence { epoch, step, loss });
            }
            tracing::debug!(
                epoch,
                step,
                loss,
                positives = batch.alignment.positives.len(),
                negatives = batch.alignment.negatives.len(),
                relation_facts = batch.relation.positives.len(),
                "training step"
            );
            total += loss;
        }

        Ok((total / steps as f32, steps))
    }

    fn note_bootstrap(&mut self, epoch: usize, added: usize) {
        if added > 0 {
            self.empty_rounds = 0;
            tracing::info!(
                epoch,
                added,
                seed = self.seed.len(),
                version = self.seed.version(),
                "bootstrap extended seed alignment"
            );
        } else {
            self.empty_rounds += 1;
            if self.empty_rounds >= EMPTY_ROUNDS_WARNING {
                tracing::warn!(
                    epoch,
                    rounds = self.empty_rounds,
                    sim_th = self.config.sim_th,
                    "bootstrap found no new pairs in consecutive rounds"
                );
            } else {
                tracing::debug!(epoch, "bootstrap found no new pairs");
            }
        }
    }

    /// Whether Hits@ (smallest k) has not improved for `early_stop_patience`
    /// validations.
    fn patience_exhausted(&self) -> bool {
        let Some(patience) = self.config.early_stop_patience else {
            return false;
        };
        let Some(&k) = self.config.hits_k.iter().min() else {
            return false;
        };
        let scores: Vec<f64> = self
            .history
            .iter()
            .filter_map(|e| e.validation.as_ref().and_then(|m| m.hits_at(k)))
            .collect();

        let mut best = f64::NEG_INFINITY;
        let mut since_best = 0;
        for s in scores {
            if s > best {
                best = s;
                since_best = 0;
            } else {
                since_best += 1;
            }
        }
        since_best >= patience.max(1)
    }
}

fn chunk<T>(items: &[T], index: usize, size: usize) -> &[T] {
    let start = (index * size).min(items.len());
    let end = (start + size).min(items.len());
    &items[start..end]
}

/// Independent seed per (epoch, step, stream) from the run seed.
fn mix_seed(base: u64, epoch: usize, step: usize, stream: u64) -> u64 {
    base ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (step as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ stream.wrapping_mul(0x1656_67B1_9E37_79F9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aligna_core::{SyntheticConfig, SyntheticTaskSource, TaskSource};

    fn task(entities: usize) -> AlignmentTask {
        SyntheticTaskSource::new(SyntheticConfig {
            entities,
            ..Default::default()
        })
        .load()
        .unwrap()
    }

    fn config() -> AlignConfig {
        AlignConfig::default()
            .with_embedding_dim(16)
            .with_learning_rate(0.05)
            .with_batch_size(8)
            .with_neg_multi(2)
            .with_max_epoch(4)
            .with_schedule(2, 1, 3)
            .with_hits_k(vec![1, 5])
            .with_min_rel_win(3)
            .with_threads(2)
    }

    /// Returns a fixed embedding table and records what it was given.
    struct ScriptedModel {
        table: EmbeddingSnapshot,
        losses: Vec<f32>,
        calls: usize,
        stop_after: Option<usize>,
    }

    impl AlignmentModel for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn predict_embeddings(&self) -> Result<EmbeddingSnapshot> {
            Ok(self.table.clone())
        }

        fn update(&mut self, _batch: &TrainingBatch, _weights: &LossWeights) -> Result<f32> {
            let loss = self.losses.get(self.calls).copied().unwrap_or(0.5);
            self.calls += 1;
            Ok(loss)
        }

        fn should_stop(&self, history: &[EpochMetrics]) -> bool {
            self.stop_after.is_some_and(|n| history.len() >= n)
        }
    }

    fn scripted(task: &AlignmentTask, losses: Vec<f32>, stop_after: Option<usize>) -> Box<ScriptedModel> {
        let dim = 4;
        let rows: Vec<Vec<f32>> = (0..task.ent_num())
            .map(|e| (0..dim).map(|d| ((e * 7 + d * 3) % 11) as f32 / 11.0).collect())
            .collect();
        Box::new(ScriptedModel {
            table: EmbeddingSnapshot::from_rows(&rows).unwrap(),
            losses,
            calls: 0,
            stop_after,
        })
    }

    #[test]
    fn test_schedule_drives_validation_and_bootstrap() {
        let mut trainer = AlignmentTrainer::new(task(40), config(), &ModelRegistry::with_builtin()).unwrap();
        let report = trainer.train().unwrap();

        assert_eq!(report.model, "table");
        assert_eq!(report.epochs.len(), 4);
        let validated: Vec<usize> = report.validations().map(|(e, _)| e).collect();
        assert_eq!(validated, vec![2, 3, 4]);
        assert!(report.epochs[1].bootstrap_added.is_none());
        assert!(report.epochs[2].bootstrap_added.is_some());
        assert!(!report.stopped_early);
    }

    #[test]
    fn test_seed_never_shrinks() {
        let mut trainer = AlignmentTrainer::new(task(40), config(), &ModelRegistry::with_builtin()).unwrap();
        let report = trainer.train().unwrap();
        let sizes = report.seed_sizes();
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
        assert!(sizes[0] >= report.initial_seed_size);
        assert_eq!(
            *sizes.last().unwrap(),
            report.initial_seed_size + report.bootstrap_total()
        );
    }

    #[test]
    fn test_non_finite_loss_halts() {
        let task = task(20);
        // One step per epoch: epoch 1 is fine, epoch 2 diverges.
        let model = scripted(&task, vec![0.3, f32::NAN], None);
        let mut trainer = AlignmentTrainer::with_model(task, config(), model).unwrap();
        match trainer.train() {
            Err(Error::Divergence { epoch: 2, step: 0, loss }) => assert!(loss.is_nan()),
            other => panic!("expected divergence, got {:?}", other.map(|r| r.epochs.len())),
        }
    }

    #[test]
    fn test_model_stop_hook() {
        let task = task(20);
        let model = scripted(&task, Vec::new(), Some(2));
        let mut trainer = AlignmentTrainer::with_model(task, config(), model).unwrap();
        let report = trainer.train().unwrap();
        assert_eq!(report.epochs.len(), 2);
        assert!(report.stopped_early);
    }

    #[test]
    fn test_patience_on_flat_validation() {
        let task = task(20);
        // Fixed embeddings: validation never improves after the first round.
        let model = scripted(&task, Vec::new(), None);
        let mut config = config().with_max_epoch(10).with_schedule(1, 1, 100);
        config.early_stop_patience = Some(2);
        let mut trainer = AlignmentTrainer::with_model(task, config, model).unwrap();
        let report = trainer.train().unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.epochs.len(), 3);
    }

    #[test]
    fn test_wrong_row_count_is_rejected() {
        let task = task(20);
        let mut model = scripted(&task, Vec::new(), None);
        model.table = EmbeddingSnapshot::from_rows(&vec![vec![0.0; 4]; 3]).unwrap();
        assert!(matches!(
            AlignmentTrainer::with_model(task, config(), model),
            Err(Error::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_invalid_config_fails_before_training() {
        let task = task(20);
        let config = config().with_hits_k(vec![1, 40]);
        assert!(matches!(
            AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_mix_seed_separates_streams() {
        assert_ne!(mix_seed(42, 1, 0, 1), mix_seed(42, 1, 0, 2));
        assert_ne!(mix_seed(42, 1, 0, 1), mix_seed(42, 2, 0, 1));
        assert_eq!(mix_seed(42, 3, 4, 1), mix_seed(42, 3, 4, 1));
    }
}
