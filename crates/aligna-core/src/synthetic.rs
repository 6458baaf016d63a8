//! Synthetic two-graph alignment tasks with a known ground truth.
//!
//! Graph 2 is a relabelled copy of graph 1 (a random permutation of ids) with
//! a fraction of its triples dropped. Aligned entities share their temporal
//! buckets. True pairs are split into seed, reference, and a remainder that
//! no alignment set mentions (what bootstrapping is meant to find). Useful
//! for smoke-testing the training loop end to end.

use crate::alignment::AlignmentPairs;
use crate::entity::EntityId;
use crate::error::{Error, Result};
use crate::relation::RelTriple;
use crate::task::{AlignmentTask, TaskFile, TaskSource, TemporalGraph};
use crate::temporal::TemporalFeatures;
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Shape of a synthetic task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Entities per graph.
    pub entities: usize,
    /// Number of relations.
    pub relations: usize,
    /// Average out-degree in graph 1.
    pub triples_per_entity: usize,
    /// Number of time buckets.
    pub time_size: usize,
    /// Buckets per entity.
    pub buckets_per_entity: usize,
    /// Fraction of aligned pairs used as seed.
    pub seed_ratio: f32,
    /// Fraction of aligned pairs used as reference.
    pub reference_ratio: f32,
    /// Probability of dropping a triple when copying into graph 2.
    pub drop_rate: f32,
    /// Random seed.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            entities: 200,
            relations: 8,
            triples_per_entity: 4,
            time_size: 32,
            buckets_per_entity: 3,
            seed_ratio: 0.3,
            reference_ratio: 0.5,
            drop_rate: 0.1,
            seed: 42,
        }
    }
}

/// [`TaskSource`] that generates a task in memory.
#[derive(Debug, Clone, Default)]
pub struct SyntheticTaskSource {
    config: SyntheticConfig,
}

impl SyntheticTaskSource {
    /// Source for the given shape.
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    fn generate(&self) -> Result<TaskFile> {
        let c = &self.config;
        if c.entities < 2 || c.relations == 0 || c.time_size == 0 {
            return Err(Error::Validation(
                "synthetic task needs >= 2 entities, >= 1 relation, >= 1 time bucket".into(),
            ));
        }
        let ratios_ok = c.seed_ratio >= 0.0
            && c.reference_ratio >= 0.0
            && c.seed_ratio + c.reference_ratio <= 1.0;
        if !ratios_ok || !(0.0..1.0).contains(&c.drop_rate) {
            return Err(Error::Validation(
                "seed_ratio + reference_ratio must be in [0, 1] and drop_rate in [0, 1)".into(),
            ));
        }

        let n = c.entities;
        let mut rng = XorShiftRng::seed_from_u64(c.seed);

        // counterpart[i] is the graph-2 id aligned with graph-1 id i.
        let mut counterpart: Vec<EntityId> = (n..2 * n).collect();
        counterpart.shuffle(&mut rng);

        let mut triples1 = BTreeSet::new();
        for head in 0..n {
            for _ in 0..c.triples_per_entity {
                let tail = rng.random_range(0..n);
                if tail == head {
                    continue;
                }
                // Skewed relation choice so relation supports differ.
                let relation = (rng.random_range(0..c.relations) * rng.random_range(1..=c.relations))
                    % c.relations;
                triples1.insert(RelTriple::new(head, relation, tail));
            }
        }

        let triples2: Vec<RelTriple> = triples1
            .iter()
            .filter(|_| rng.random::<f32>() >= c.drop_rate)
            .map(|t| RelTriple::new(counterpart[t.head], t.relation, counterpart[t.tail]))
            .collect();

        let mut coords = Vec::new();
        let mut values = Vec::new();
        let per_entity = c.buckets_per_entity.min(c.time_size);
        for e in 0..n {
            let buckets: BTreeSet<usize> = (0..c.time_size)
                .collect::<Vec<_>>()
                .choose_multiple(&mut rng, per_entity)
                .copied()
                .collect();
            for b in buckets {
                let v = 1.0 + rng.random::<f32>();
                coords.push((e, b));
                values.push(v);
                coords.push((counterpart[e], b));
                values.push(v);
            }
        }
        let time_features = TemporalFeatures::new(coords, values, c.time_size, 2 * n)?;

        let mut order: Vec<EntityId> = (0..n).collect();
        order.shuffle(&mut rng);
        let seed_len = (((n as f32) * c.seed_ratio).round() as usize).min(n);
        let ref_len = (((n as f32) * c.reference_ratio).round() as usize).min(n - seed_len);
        let (seed_ids, rest) = order.split_at(seed_len);
        let ref_ids = &rest[..ref_len];

        Ok(TaskFile {
            kg1: TemporalGraph {
                entities: (0..n).collect(),
                triples: triples1.into_iter().collect(),
            },
            kg2: TemporalGraph {
                entities: (n..2 * n).collect(),
                triples: triples2,
            },
            seed: AlignmentPairs::from_pairs(seed_ids.iter().map(|&e| (e, counterpart[e]))),
            reference: AlignmentPairs::from_pairs(ref_ids.iter().map(|&e| (e, counterpart[e]))),
            rel_num: c.relations,
            rel_id_mapping: (0..c.relations).map(|r| (r, r)).collect::<BTreeMap<_, _>>(),
            time_features,
        })
    }
}

impl TaskSource for SyntheticTaskSource {
    fn load(&self) -> Result<AlignmentTask> {
        let task = AlignmentTask::new(self.generate()?)?;
        tracing::debug!(
            ent_num = task.ent_num(),
            tri_num = task.tri_num(),
            seed = task.seed().len(),
            "generated synthetic alignment task"
        );
        Ok(task)
    }
}
