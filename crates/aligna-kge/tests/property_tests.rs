//! Property-based tests for the alignment engine.

use aligna_core::{
    AlignmentPairs, EmbeddingSnapshot, EntityId, EntitySpace, GraphSide, LinkedEntities,
    RelTriple, RelationIndex,
};
use aligna_kge::{AlignConfig, BootstrapAugmenter, Evaluator, Metric, NegativeSampler};
use ndarray::Array2;
use proptest::prelude::*;

const DIM: usize = 3;

/// Graph sizes plus one embedding row per entity.
fn graphs_and_embeddings() -> impl Strategy<Value = (usize, usize, Vec<f32>)> {
    (2usize..10, 2usize..10).prop_flat_map(|(n1, n2)| {
        (
            Just(n1),
            Just(n2),
            prop::collection::vec(-1.0f32..1.0, (n1 + n2) * DIM),
        )
    })
}

fn snapshot(rows: usize, values: Vec<f32>) -> EmbeddingSnapshot {
    EmbeddingSnapshot::new(Array2::from_shape_vec((rows, DIM), values).unwrap()).unwrap()
}

fn metric() -> impl Strategy<Value = Metric> {
    prop_oneof![
        Just(Metric::Inner),
        Just(Metric::Cosine),
        Just(Metric::Euclidean),
        Just(Metric::Manhattan),
    ]
}

// ============================================================================
// Negative sampling
// ============================================================================

mod sampling_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// A corrupted pair keeps one side, swaps the other, and never
        /// reproduces its positive.
        #[test]
        fn alignment_negative_differs_from_anchor(
            (n1, n2, values) in graphs_and_embeddings(),
            neg_multi in 1usize..6,
            epsilon in 0.05f32..1.0,
            seed in any::<u64>(),
        ) {
            let space = EntitySpace::contiguous(n1, n2);
            let snap = snapshot(n1 + n2, values);
            let positives: Vec<(EntityId, EntityId)> =
                (0..n1.min(n2)).map(|i| (i, n1 + i)).collect();

            let mut config = AlignConfig::default().with_neg_multi(neg_multi);
            config.truncated_epsilon = epsilon;
            let sampler = NegativeSampler::new(&config);

            let batch = sampler
                .alignment_negatives(&snap, &space, &LinkedEntities::new(), &positives, seed)
                .unwrap();
            prop_assert_eq!(batch.negatives.len(), positives.len() * neg_multi);

            for (i, &(a, b)) in positives.iter().enumerate() {
                for &(x, y) in batch.negatives_of(i, neg_multi) {
                    prop_assert!((x, y) != (a, b));
                    prop_assert!(x == a || y == b);
                    prop_assert_eq!(space.side_of(x), Some(GraphSide::First));
                    prop_assert_eq!(space.side_of(y), Some(GraphSide::Second));
                }
            }
        }

        /// Corrupted facts are never observed facts, even when a relation
        /// touches every entity and the draw falls back to the whole space.
        #[test]
        fn relation_negative_is_never_known(
            n in 3usize..12,
            edges in prop::collection::vec((0usize..12, 0usize..3, 0usize..12), 1..30),
            neg_multi in 1usize..5,
            seed in any::<u64>(),
        ) {
            let space = EntitySpace::contiguous(n, n);
            let triples: Vec<RelTriple> = edges
                .into_iter()
                .map(|(h, r, t)| RelTriple::new(h % n, r, t % n))
                .collect();
            let index = RelationIndex::from_triples(&triples);

            let sampler = NegativeSampler::new(&AlignConfig::default().with_neg_multi(neg_multi));
            let batch = sampler.relation_negatives(&space, &index, &triples, seed);

            prop_assert!(batch.negatives.len() <= triples.len() * neg_multi);
            for t in &batch.negatives {
                prop_assert!(!index.contains(t));
                prop_assert!(space.side_of(t.head).is_some() && space.side_of(t.tail).is_some());
            }
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

mod evaluation_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Hits@k never decreases as k grows.
        #[test]
        fn hits_monotone_in_k(
            (n1, n2, values) in graphs_and_embeddings(),
            metric in metric(),
            csls in 0usize..5,
        ) {
            let snap = snapshot(n1 + n2, values);
            let reference = AlignmentPairs::from_pairs((0..n1.min(n2)).map(|i| (i, n1 + i)));
            let config = AlignConfig::default()
                .with_hits_k(vec![1, 2, 3, 5, 8])
                .with_metric(metric)
                .with_csls(csls)
                .with_threads(2);

            let m = Evaluator::new(&config).unwrap().evaluate(&snap, &reference).unwrap();
            let hits: Vec<f64> = m.hits.values().copied().collect();
            prop_assert!(hits.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(m.mrr > 0.0 && m.mrr <= 1.0);
            prop_assert!(m.mr >= 1.0);
        }

        /// The number of worker threads does not change any rank.
        #[test]
        fn ranks_independent_of_threads(
            (n1, n2, values) in graphs_and_embeddings(),
            metric in metric(),
            threads in 2usize..6,
        ) {
            let snap = snapshot(n1 + n2, values);
            let reference = AlignmentPairs::from_pairs((0..n1.min(n2)).map(|i| (i, n1 + i)));
            let base = AlignConfig::default().with_hits_k(vec![1]).with_metric(metric);

            let serial = Evaluator::new(&base.clone().with_threads(1)).unwrap();
            let parallel = Evaluator::new(&base.with_threads(threads)).unwrap();
            prop_assert_eq!(
                serial.ranks(&snap, &reference).unwrap(),
                parallel.ranks(&snap, &reference).unwrap()
            );
        }
    }
}

// ============================================================================
// Bootstrapping
// ============================================================================

mod bootstrap_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every proposal is a mutual nearest neighbour, and no entity is
        /// proposed twice.
        #[test]
        fn proposals_are_mutual_and_one_to_one(
            (n1, n2, values) in graphs_and_embeddings(),
            metric in metric(),
        ) {
            let space = EntitySpace::contiguous(n1, n2);
            let snap = snapshot(n1 + n2, values);
            // Gates wide open: only mutuality filters.
            let config = AlignConfig::default()
                .with_metric(metric)
                .with_bootstrap_thresholds(f32::MIN, f32::MAX)
                .with_threads(2);
            let augmenter = BootstrapAugmenter::new(&config).unwrap();
            let proposals = augmenter.propose(&snap, &space, &LinkedEntities::new()).unwrap();

            let sources = space.entities(GraphSide::First);
            let targets = space.entities(GraphSide::Second);
            let engine = aligna_kge::EntityPairSimilarity::from_config(&config).unwrap();
            let scores = engine.scores(&snap, sources, targets).unwrap();
            let ranking = scores.ranking();

            let mut seen = std::collections::HashSet::new();
            for &(a, b) in &proposals {
                prop_assert!(seen.insert(a));
                prop_assert!(seen.insert(b));

                let i = sources.iter().position(|&e| e == a).unwrap();
                let j = targets.iter().position(|&e| e == b).unwrap();
                let best = ranking.row(i).iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let best_col = ranking.column(j).iter().copied().fold(f32::NEG_INFINITY, f32::max);
                prop_assert_eq!(ranking[[i, j]], best);
                prop_assert_eq!(ranking[[i, j]], best_col);
            }
        }
    }
}
