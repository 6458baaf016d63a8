//! Lookup-table embeddings with TransE relation vectors.
//!
//! Each entity owns a free vector. Initial vectors mix random noise with a
//! random projection of the entity's temporal profile, so entities active in
//! the same time buckets start close together.
//!
//! # Loss
//!
//! ```text
//! L = mean_pos ||x_a - x_b||²
//!   + neg_param * mean_pos sum_neg relu(neg_margin - ||x - y||²)
//!   + rel_param * mean_rel ( ||h + r - t||²  or  relu(neg_margin - ||h + r - t||²) )
//! ```
//!
//! minimised with plain SGD. Entity rows whose norm exceeds 1 are projected
//! back onto the unit ball after every step.

use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::model::{AlignmentModel, LossWeights, TrainingBatch};
use aligna_core::{AlignmentTask, EmbeddingSnapshot, EntityId, RelTriple};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand_distr::Normal;
use rand_xorshift::XorShiftRng;
use std::collections::HashMap;

/// Weight of the temporal projection relative to the random part.
const TEMPORAL_WEIGHT: f32 = 1.0;
/// Norm of the random part before mixing.
const NOISE_NORM: f32 = 0.5;

/// Entity lookup table trained with SGD.
#[derive(Debug, Clone)]
pub struct TableModel {
    entities: Array2<f32>,
    relations: Array2<f32>,
    learning_rate: f32,
}

impl TableModel {
    /// Registry tag.
    pub const TAG: &'static str = "table";

    /// Initialise for `task` with `config.embedding_dim` columns.
    pub fn new(task: &AlignmentTask, config: &AlignConfig) -> Result<Self> {
        let dim = config.embedding_dim;
        if dim == 0 {
            return Err(Error::InvalidConfig("embedding_dim must be positive".into()));
        }
        let mut rng = XorShiftRng::seed_from_u64(config.seed);
        let normal = Normal::new(0.0f32, 1.0 / (dim as f32).sqrt())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let features = task.time_features();
        let projection = Array2::from_shape_fn((features.time_size(), dim), |_| normal.sample(&mut rng));

        let mut entities = Array2::from_shape_fn((task.ent_num(), dim), |_| normal.sample(&mut rng));
        for mut row in entities.axis_iter_mut(Axis(0)) {
            let norm = l2(row.view()).max(1e-8);
            row.mapv_inplace(|x| x * NOISE_NORM / norm);
        }

        for (e, profile) in features.profiles().into_iter().enumerate() {
            if profile.is_empty() {
                continue;
            }
            let mut temporal = Array1::<f32>::zeros(dim);
            for (bucket, value) in profile {
                temporal.scaled_add(value, &projection.row(bucket));
            }
            let norm = l2(temporal.view()).max(1e-8);
            entities
                .row_mut(e)
                .scaled_add(TEMPORAL_WEIGHT / norm, &temporal);
        }
        for mut row in entities.axis_iter_mut(Axis(0)) {
            let norm = l2(row.view()).max(1e-8);
            row.mapv_inplace(|x| x / norm);
        }

        let relations = Array2::from_shape_fn((task.rel_num(), dim), |_| normal.sample(&mut rng) * 0.1);

        Ok(Self {
            entities,
            relations,
            learning_rate: config.learning_rate,
        })
    }

    /// Registry constructor.
    pub fn build(task: &AlignmentTask, config: &AlignConfig) -> Result<Box<dyn AlignmentModel>> {
        Ok(Box::new(Self::new(task, config)?))
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.entities.ncols()
    }

    fn check_entity(&self, e: EntityId) -> Result<()> {
        if e < self.entities.nrows() {
            Ok(())
        } else {
            Err(Error::ModelUpdate(format!(
                "entity {} outside table of {} rows",
                e,
                self.entities.nrows()
            )))
        }
    }

    fn check_triple(&self, t: &RelTriple) -> Result<()> {
        self.check_entity(t.head)?;
        self.check_entity(t.tail)?;
        if t.relation < self.relations.nrows() {
            Ok(())
        } else {
            Err(Error::ModelUpdate(format!("relation {} outside table", t.relation)))
        }
    }

    /// `h + r - t`.
    fn translation(&self, t: &RelTriple) -> Array1<f32> {
        &self.entities.row(t.head) + &self.relations.row(t.relation) - &self.entities.row(t.tail)
    }
}

impl AlignmentModel for TableModel {
    fn name(&self) -> &'static str {
        Self::TAG
    }

    fn predict_embeddings(&self) -> Result<EmbeddingSnapshot> {
        Ok(EmbeddingSnapshot::new(self.entities.clone())?)
    }

    fn update(&mut self, batch: &TrainingBatch, weights: &LossWeights) -> Result<f32> {
        let align = &batch.alignment;
        let rel = &batch.relation;
        for &(a, b) in align.positives.iter().chain(&align.negatives) {
            self.check_entity(a)?;
            self.check_entity(b)?;
        }
        for t in rel.positives.iter().chain(&rel.negatives) {
            self.check_triple(t)?;
        }

        let mut entity_grads: HashMap<EntityId, Array1<f32>> = HashMap::new();
        let mut relation_grads: HashMap<usize, Array1<f32>> = HashMap::new();
        let mut loss = 0.0f32;

        if !align.positives.is_empty() {
            let scale = 1.0 / align.positives.len() as f32;

            for &(a, b) in &align.positives {
                let diff = &self.entities.row(a) - &self.entities.row(b);
                loss += scale * diff.dot(&diff);
                let g = diff.mapv(|x| 2.0 * scale * x);
                accumulate_grad(&mut entity_grads, b, &(-&g));
                accumulate_grad(&mut entity_grads, a, &g);
            }

            let neg_scale = scale * weights.neg_param;
            for &(x, y) in &align.negatives {
                let diff = &self.entities.row(x) - &self.entities.row(y);
                let hinge = weights.neg_margin - diff.dot(&diff);
                if hinge > 0.0 {
                    loss += neg_scale * hinge;
                    // d/dx of -||x - y||²
                    let g = diff.mapv(|v| -2.0 * neg_scale * v);
                    accumulate_grad(&mut entity_grads, y, &(-&g));
                    accumulate_grad(&mut entity_grads, x, &g);
                }
            }
        }

        let rel_count = rel.positives.len() + rel.negatives.len();
        if rel_count > 0 && weights.rel_param > 0.0 {
            let scale = weights.rel_param / rel_count as f32;
            let terms = rel
                .positives
                .iter()
                .map(|t| (t, true))
                .chain(rel.negatives.iter().map(|t| (t, false)));
            for (t, positive) in terms {
                let diff = self.translation(t);
                let d = diff.dot(&diff);
                let sign = if positive {
                    loss += scale * d;
                    1.0
                } else if weights.neg_margin - d > 0.0 {
                    loss += scale * (weights.neg_margin - d);
                    -1.0
                } else {
                    continue;
                };
                let g = diff.mapv(|v| 2.0 * sign * scale * v);
                accumulate_grad(&mut entity_grads, t.head, &g);
                accumulate_grad(&mut relation_grads, t.relation, &g);
                accumulate_grad(&mut entity_grads, t.tail, &(-&g));
            }
        }

        if !loss.is_finite() {
            return Ok(loss);
        }

        let lr = self.learning_rate;
        for (e, grad) in &entity_grads {
            let mut row = self.entities.row_mut(*e);
            row.scaled_add(-lr, grad);
            let norm = l2(row.view());
            if norm > 1.0 {
                row.mapv_inplace(|x| x / norm);
            }
        }
        for (r, grad) in &relation_grads {
            self.relations.row_mut(*r).scaled_add(-lr, grad);
        }

        Ok(loss)
    }
}

fn l2(v: ArrayView1<'_, f32>) -> f32 {
    v.dot(&v).sqrt()
}

/// Accumulate gradient into HashMap.
fn accumulate_grad(grads: &mut HashMap<usize, Array1<f32>>, key: usize, grad: &Array1<f32>) {
    grads
        .entry(key)
        .and_modify(|g| *g += grad)
        .or_insert_with(|| grad.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlignmentBatch;
    use aligna_core::{SyntheticConfig, SyntheticTaskSource, TaskSource};

    fn task() -> AlignmentTask {
        SyntheticTaskSource::new(SyntheticConfig {
            entities: 30,
            ..Default::default()
        })
        .load()
        .unwrap()
    }

    fn weights() -> LossWeights {
        LossWeights::from_config(&AlignConfig::default())
    }

    #[test]
    fn test_rows_start_on_unit_sphere() {
        let task = task();
        let model = TableModel::new(&task, &AlignConfig::default().with_embedding_dim(16)).unwrap();
        let snapshot = model.predict_embeddings().unwrap();
        for e in 0..task.ent_num() {
            let norm = l2(snapshot.row(e).unwrap());
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_temporal_profile_pulls_counterparts_together() {
        let task = task();
        let model = TableModel::new(&task, &AlignConfig::default().with_embedding_dim(32)).unwrap();
        let snapshot = model.predict_embeddings().unwrap();
        let pairs: Vec<(EntityId, EntityId)> = task.seed().iter().collect();
        let dot = |x: EntityId, y: EntityId| snapshot.row(x).unwrap().dot(&snapshot.row(y).unwrap());

        let aligned: f32 = pairs.iter().map(|&(a, b)| dot(a, b)).sum();
        let shifted: f32 = pairs
            .iter()
            .zip(pairs.iter().cycle().skip(1))
            .map(|(&(a, _), &(_, b))| dot(a, b))
            .sum();
        assert!(aligned > shifted);
    }

    #[test]
    fn test_update_reduces_alignment_loss() {
        let task = task();
        let config = AlignConfig::default()
            .with_embedding_dim(16)
            .with_learning_rate(0.5);
        let mut model = TableModel::new(&task, &config).unwrap();
        let batch = TrainingBatch {
            alignment: AlignmentBatch {
                positives: task.seed().iter().collect(),
                negatives: Vec::new(),
            },
            ..Default::default()
        };
        let first = model.update(&batch, &weights()).unwrap();
        let mut last = first;
        for _ in 0..20 {
            last = model.update(&batch, &weights()).unwrap();
        }
        assert!(last < first, "loss did not decrease: {} -> {}", first, last);
    }

    #[test]
    fn test_out_of_range_entity_is_rejected() {
        let task = task();
        let mut model = TableModel::new(&task, &AlignConfig::default().with_embedding_dim(4)).unwrap();
        let batch = TrainingBatch {
            alignment: AlignmentBatch {
                positives: vec![(0, 10_000)],
                negatives: Vec::new(),
            },
            ..Default::default()
        };
        assert!(matches!(
            model.update(&batch, &weights()),
            Err(Error::ModelUpdate(_))
        ));
    }
}
