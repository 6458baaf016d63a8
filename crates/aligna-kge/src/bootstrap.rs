//! Self-training: grow the seed alignment with confident mutual matches.
//!
//! Candidates are the entities no known alignment covers yet: unlinked
//! graph-1 entities (rows) against unlinked graph-2 entities (columns), both
//! in ascending id order. A pair `(a, b)` is proposed when
//!
//! 1. `b` is `a`'s nearest neighbour and `a` is `b`'s (CSLS-adjusted scores,
//!    ties to the lowest id),
//! 2. its confidence is at least `sim_th` (raw similarity for `inner` and
//!    `cosine`, `1 / (1 + d)` for distance metrics), and
//! 3. for distance metrics, `d < distance_threshold`.
//!
//! Gates 2 and 3 read the raw score, not the CSLS-adjusted one.
//!
//! Accepted pairs are permanent. A round with no accepted pair leaves the
//! seed set untouched.

use crate::config::AlignConfig;
use crate::error::Result;
use crate::similarity::{argmax_lowest, EntityPairSimilarity};
use aligna_core::{EmbeddingSnapshot, EntityId, EntitySpace, GraphSide, LinkedEntities, SeedAlignment};
use std::sync::Arc;

/// Proposes and applies bootstrap pairs.
#[derive(Debug, Clone)]
pub struct BootstrapAugmenter {
    engine: Arc<EntityPairSimilarity>,
    sim_th: f32,
    distance_threshold: f32,
}

impl BootstrapAugmenter {
    /// Augmenter with its own worker pool.
    pub fn new(config: &AlignConfig) -> Result<Self> {
        Ok(Self::with_engine(
            config,
            Arc::new(EntityPairSimilarity::from_config(config)?),
        ))
    }

    /// Augmenter sharing the evaluator's similarity engine.
    pub fn with_engine(config: &AlignConfig, engine: Arc<EntityPairSimilarity>) -> Self {
        Self {
            engine,
            sim_th: config.sim_th,
            distance_threshold: config.distance_threshold,
        }
    }

    /// Mutual nearest neighbours among unlinked entities that pass both gates.
    ///
    /// Pairs come out in ascending graph-1 id order.
    pub fn propose(
        &self,
        snapshot: &EmbeddingSnapshot,
        space: &EntitySpace,
        linked: &LinkedEntities,
    ) -> Result<Vec<(EntityId, EntityId)>> {
        let sources: Vec<EntityId> = linked.unlinked(space.entities(GraphSide::First)).collect();
        let targets: Vec<EntityId> = linked.unlinked(space.entities(GraphSide::Second)).collect();
        if sources.is_empty() || targets.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.engine.scores(snapshot, &sources, &targets)?;
        let ranking = scores.ranking();

        let row_best: Vec<Option<usize>> = self
            .engine
            .run_sharded(sources.len(), |rows| {
                Ok(rows
                    .map(|i| argmax_lowest(ranking.row(i).iter().copied()).map(|(j, _)| j))
                    .collect::<Vec<_>>())
            })?
            .into_iter()
            .flatten()
            .collect();
        let col_best: Vec<Option<usize>> = self
            .engine
            .run_sharded(targets.len(), |cols| {
                Ok(cols
                    .map(|j| argmax_lowest(ranking.column(j).iter().copied()).map(|(i, _)| i))
                    .collect::<Vec<_>>())
            })?
            .into_iter()
            .flatten()
            .collect();

        let config = self.engine.config();
        let raw = scores.raw();
        let mut proposals = Vec::new();
        for (i, best) in row_best.iter().enumerate() {
            let Some(j) = *best else { continue };
            if col_best[j] != Some(i) {
                continue;
            }
            let score = raw[[i, j]];
            if config.confidence(score) < self.sim_th {
                continue;
            }
            if config.distance(score).is_some_and(|d| d >= self.distance_threshold) {
                continue;
            }
            proposals.push((sources[i], targets[j]));
        }

        tracing::debug!(
            sources = sources.len(),
            targets = targets.len(),
            proposed = proposals.len(),
            "bootstrap candidates scored"
        );
        Ok(proposals)
    }

    /// Propose, then append accepted pairs to `seed` and `linked`.
    ///
    /// Returns the number of pairs added.
    pub fn augment(
        &self,
        snapshot: &EmbeddingSnapshot,
        space: &EntitySpace,
        seed: &mut SeedAlignment,
        linked: &mut LinkedEntities,
    ) -> Result<usize> {
        let proposals = self.propose(snapshot, space, linked)?;
        Ok(seed.extend(&proposals, linked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use aligna_core::AlignmentPairs;
    use ndarray::Array2;

    fn one_hot_snapshot(n: usize) -> EmbeddingSnapshot {
        // Entity i and i + n share one-hot vector i.
        let m = Array2::from_shape_fn((2 * n, n), |(e, d)| if e % n == d { 1.0 } else { 0.0 });
        EmbeddingSnapshot::new(m).unwrap()
    }

    #[test]
    fn test_linked_entities_are_not_candidates() {
        let space = EntitySpace::contiguous(3, 3);
        let linked: LinkedEntities = [0, 3].into_iter().collect();
        let augmenter = BootstrapAugmenter::new(&AlignConfig::default().with_threads(2)).unwrap();

        let proposals = augmenter.propose(&one_hot_snapshot(3), &space, &linked).unwrap();
        assert_eq!(proposals, vec![(1, 4), (2, 5)]);
    }

    #[test]
    fn test_sim_th_gate() {
        let space = EntitySpace::contiguous(2, 2);
        let m = Array2::from_shape_vec(
            (4, 2),
            vec![1.0, 0.0, 0.0, 1.0, 0.3, 0.954, 0.954, 0.3],
        )
        .unwrap();
        let snapshot = EmbeddingSnapshot::new(m).unwrap();
        let config = AlignConfig::default().with_csls(0).with_threads(1);
        let augmenter = BootstrapAugmenter::new(&config).unwrap();

        // 0 <-> 3 and 1 <-> 2 at cosine ~0.954
        let proposals = augmenter.propose(&snapshot, &space, &LinkedEntities::new()).unwrap();
        assert_eq!(proposals, vec![(0, 3), (1, 2)]);

        let strict = BootstrapAugmenter::new(&config.with_bootstrap_thresholds(0.99, 0.6)).unwrap();
        assert!(strict.propose(&snapshot, &space, &LinkedEntities::new()).unwrap().is_empty());
    }

    #[test]
    fn test_distance_threshold_gate() {
        let space = EntitySpace::contiguous(1, 1);
        let m = Array2::from_shape_vec((2, 1), vec![0.0, 0.5]).unwrap();
        let snapshot = EmbeddingSnapshot::new(m).unwrap();
        let config = AlignConfig::default()
            .with_metric(Metric::Euclidean)
            .with_normalize(false)
            .with_csls(0)
            .with_threads(1);

        // d = 0.5 < 0.6 and 1 / 1.5 >= 0.5
        let loose = BootstrapAugmenter::new(&config).unwrap();
        assert_eq!(loose.propose(&snapshot, &space, &LinkedEntities::new()).unwrap(), vec![(0, 1)]);

        let tight = BootstrapAugmenter::new(&config.with_bootstrap_thresholds(0.5, 0.4)).unwrap();
        assert!(tight.propose(&snapshot, &space, &LinkedEntities::new()).unwrap().is_empty());
    }

    #[test]
    fn test_augment_grows_seed() {
        let space = EntitySpace::contiguous(3, 3);
        let mut seed = SeedAlignment::new(AlignmentPairs::from_pairs([(0, 3)]));
        let mut linked: LinkedEntities = [0, 3].into_iter().collect();
        let augmenter = BootstrapAugmenter::new(&AlignConfig::default().with_threads(1)).unwrap();

        let added = augmenter
            .augment(&one_hot_snapshot(3), &space, &mut seed, &mut linked)
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(seed.len(), 3);
        assert!(linked.contains(5));

        // Nothing left to align.
        let added = augmenter
            .augment(&one_hot_snapshot(3), &space, &mut seed, &mut linked)
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(seed.version(), 1);
    }
}
