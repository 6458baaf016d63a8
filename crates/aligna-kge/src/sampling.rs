//! Negative sampling for the alignment and relation losses.
//!
//! # Alignment negatives (truncated)
//!
//! For a seed pair `(a, b)` a negative keeps one side and replaces the other
//! with a same-graph entity. Negatives alternate: even slots replace `b`,
//! odd slots replace `a`.
//!
//! Candidates for replacing `b` are graph-2 entities that are neither `b` nor
//! linked by a known alignment. They are ranked by similarity to the kept
//! element `a`, and only the closest `ceil(truncated_epsilon * n)` are
//! eligible. The draw within that pool is uniform.
//!
//! ```text
//!   candidates ranked by s(a, ·)
//!   [ c0  c1  c2  ...  c(m-1) | c(m) ... c(n-1) ]
//!    \______ eligible ______/   m = ceil(eps * n)
//! ```
//!
//! If no unlinked candidate exists (every entity is covered by a seed or
//! reference pair) the same ranking and truncation run over every graph-2
//! entity other than `b`.
//!
//! # Relation negatives
//!
//! Only relations with at least `min_rel_win` distinct facts feed the relation
//! loss. A fact `(h, r, t)` is corrupted by replacing `t` (even slots) or `h`
//! (odd slots) with a same-graph entity that takes part in no fact of `r`, so
//! the corrupted fact cannot be a true one hiding in `rel_ht_dict[r]`. When
//! every same-graph entity takes part in `r`, the draw falls back to the whole
//! entity space, still rejecting known facts.

use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::model::{AlignmentBatch, RelationBatch};
use crate::similarity::SimilarityConfig;
use aligna_core::{
    AlignmentTask, EmbeddingSnapshot, EntityId, EntitySpace, GraphSide, LinkedEntities,
    RelTriple, RelationId, RelationIndex,
};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Knobs the sampler copies out of [`AlignConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Negatives per positive.
    pub neg_multi: usize,
    /// Fraction of ranked candidates eligible as negatives.
    pub truncated_epsilon: f32,
    /// Minimum support for a relation to feed the relation loss.
    pub min_rel_win: usize,
}

impl SamplingParams {
    /// Copy the sampling knobs out of a run configuration.
    pub fn from_config(config: &AlignConfig) -> Self {
        Self {
            neg_multi: config.neg_multi,
            truncated_epsilon: config.truncated_epsilon,
            min_rel_win: config.min_rel_win,
        }
    }
}

/// Produces negatives for one training step.
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    params: SamplingParams,
    similarity: SimilarityConfig,
}

impl NegativeSampler {
    /// Sampler ranking candidates with the evaluation metric (without CSLS).
    pub fn new(config: &AlignConfig) -> Self {
        Self {
            params: SamplingParams::from_config(config),
            similarity: SimilarityConfig {
                csls_k: 0,
                ..SimilarityConfig::from_config(config)
            },
        }
    }

    /// Sampling knobs.
    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Size of the eligible pool among `n` ranked candidates.
    pub fn pool_size(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let m = (self.params.truncated_epsilon * n as f32).ceil() as usize;
        m.clamp(1, n)
    }

    /// Relations supported by at least `min_rel_win` distinct facts.
    pub fn eligible_relations(&self, index: &RelationIndex) -> BTreeSet<RelationId> {
        index
            .relations()
            .filter(|&r| index.support(r) >= self.params.min_rel_win)
            .collect()
    }

    /// Facts of eligible relations, in task order.
    ///
    /// Logs the relations left out of the relation loss.
    pub fn relation_anchors(&self, task: &AlignmentTask) -> Vec<RelTriple> {
        let eligible = self.eligible_relations(task.rel_index());
        let skipped = task.rel_index().len() - eligible.len();
        if skipped > 0 {
            tracing::warn!(
                skipped,
                min_rel_win = self.params.min_rel_win,
                "relations below minimum support excluded from relation loss"
            );
        }
        task.triples()
            .filter(|t| eligible.contains(&t.relation))
            .copied()
            .collect()
    }

    /// `neg_multi` corrupted pairs per seed pair.
    pub fn alignment_negatives(
        &self,
        snapshot: &EmbeddingSnapshot,
        space: &EntitySpace,
        linked: &LinkedEntities,
        positives: &[(EntityId, EntityId)],
        seed: u64,
    ) -> Result<AlignmentBatch> {
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let neg_multi = self.params.neg_multi;

        let unlinked1: Vec<EntityId> = linked.unlinked(space.entities(GraphSide::First)).collect();
        let unlinked2: Vec<EntityId> = linked.unlinked(space.entities(GraphSide::Second)).collect();

        let mut negatives = Vec::with_capacity(positives.len() * neg_multi);
        for &(a, b) in positives {
            // Replace b, keep a.
            let right = self.candidate_pool(snapshot, space, a, b, &unlinked2, GraphSide::Second)?;
            // Replace a, keep b; only needed when there is an odd slot.
            let left = if neg_multi > 1 || right.is_empty() {
                self.candidate_pool(snapshot, space, b, a, &unlinked1, GraphSide::First)?
            } else {
                Vec::new()
            };
            if right.is_empty() && left.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "no negative exists for pair ({}, {}): each graph needs two entities",
                    a, b
                )));
            }

            for slot in 0..neg_multi {
                let replace_right = (slot % 2 == 0 && !right.is_empty()) || left.is_empty();
                let negative = if replace_right {
                    (a, pick(&right, &mut rng)?)
                } else {
                    (pick(&left, &mut rng)?, b)
                };
                negatives.push(negative);
            }
        }

        Ok(AlignmentBatch {
            positives: positives.to_vec(),
            negatives,
        })
    }

    /// Eligible replacements for `exclude`, ranked against `keep`.
    fn candidate_pool(
        &self,
        snapshot: &EmbeddingSnapshot,
        space: &EntitySpace,
        keep: EntityId,
        exclude: EntityId,
        unlinked: &[EntityId],
        side: GraphSide,
    ) -> Result<Vec<EntityId>> {
        let mut candidates: Vec<EntityId> =
            unlinked.iter().copied().filter(|&c| c != exclude).collect();
        if candidates.is_empty() {
            tracing::debug!(keep, exclude, "no unlinked candidate, ranking the whole side");
            candidates = space
                .entities(side)
                .iter()
                .copied()
                .filter(|&c| c != exclude)
                .collect();
        }

        let anchor = snapshot.row(keep)?;
        let mut scored = Vec::with_capacity(candidates.len());
        for c in candidates {
            scored.push((self.similarity.score(anchor, snapshot.row(c)?), c));
        }

        let m = self.pool_size(scored.len());
        if m < scored.len() {
            scored.select_nth_unstable_by(m - 1, closest_first);
            scored.truncate(m);
        }
        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    /// Up to `neg_multi` corrupted facts per positive fact.
    pub fn relation_negatives(
        &self,
        space: &EntitySpace,
        index: &RelationIndex,
        positives: &[RelTriple],
        seed: u64,
    ) -> RelationBatch {
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let mut pools: HashMap<(RelationId, GraphSide), Vec<EntityId>> = HashMap::new();
        let mut negatives = Vec::with_capacity(positives.len() * self.params.neg_multi);
        let mut dropped = 0usize;

        for &triple in positives {
            let Some(side) = space.side_of(triple.head) else {
                dropped += self.params.neg_multi;
                continue;
            };
            let pool = pools.entry((triple.relation, side)).or_insert_with(|| {
                let pairs = index.get(triple.relation);
                space
                    .entities(side)
                    .iter()
                    .copied()
                    .filter(|&e| !pairs.is_some_and(|p| p.involves(e)))
                    .collect()
            });

            for slot in 0..self.params.neg_multi {
                let corrupt_tail = slot % 2 == 0;
                let negative = if let Some(&e) = pool.choose(&mut rng) {
                    Some(substitute(triple, e, corrupt_tail))
                } else {
                    uniform_fallback(space, index, triple, corrupt_tail, &mut rng)
                };
                match negative {
                    Some(n) => negatives.push(n),
                    None => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, "relation negatives dropped: every substitute is a known fact");
        }

        RelationBatch {
            positives: positives.to_vec(),
            negatives,
        }
    }
}

/// Higher score first; lower id first among equal scores.
fn closest_first(x: &(f32, EntityId), y: &(f32, EntityId)) -> Ordering {
    y.0.total_cmp(&x.0).then(x.1.cmp(&y.1))
}

fn pick(pool: &[EntityId], rng: &mut XorShiftRng) -> Result<EntityId> {
    pool.choose(rng)
        .copied()
        .ok_or_else(|| Error::InvalidConfig("empty negative pool".into()))
}

fn substitute(triple: RelTriple, entity: EntityId, corrupt_tail: bool) -> RelTriple {
    if corrupt_tail {
        RelTriple::new(triple.head, triple.relation, entity)
    } else {
        RelTriple::new(entity, triple.relation, triple.tail)
    }
}

/// Uniform draw over the whole entity space, rejecting known facts.
fn uniform_fallback(
    space: &EntitySpace,
    index: &RelationIndex,
    triple: RelTriple,
    corrupt_tail: bool,
    rng: &mut XorShiftRng,
) -> Option<RelTriple> {
    let ent_num = space.len();
    // Cheap rejection sampling first, exhaustive scan only if that fails.
    for _ in 0..32 {
        let candidate = substitute(triple, rng.random_range(0..ent_num), corrupt_tail);
        if !index.contains(&candidate) {
            tracing::debug!(relation = triple.relation, "relation pool exhausted, uniform fallback");
            return Some(candidate);
        }
    }
    let valid: Vec<RelTriple> = (0..ent_num)
        .map(|e| substitute(triple, e, corrupt_tail))
        .filter(|c| !index.contains(c))
        .collect();
    valid.choose(rng).copied()
}
