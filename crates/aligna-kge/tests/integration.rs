//! Integration tests for the alignment engine.
//!
//! Covers evaluation, bootstrapping and relation filtering on hand-built
//! inputs, then the full pipeline on a synthetic task.

use aligna_core::{
    AlignmentPairs, AlignmentTask, EmbeddingSnapshot, EntitySpace, LinkedEntities, RelTriple,
    SeedAlignment, SyntheticConfig, SyntheticTaskSource, TaskFile, TaskSource, TemporalFeatures,
    TemporalGraph,
};
use aligna_kge::{
    AlignConfig, AlignmentTrainer, BootstrapAugmenter, Error, Evaluator, Metric, ModelRegistry,
    NegativeSampler,
};
use ndarray::Array2;

/// `2n` entities; entity `i` and `i + n` share one-hot vector `i`.
fn paired_one_hot(n: usize) -> EmbeddingSnapshot {
    let m = Array2::from_shape_fn((2 * n, n), |(e, d)| if e % n == d { 1.0 } else { 0.0 });
    EmbeddingSnapshot::new(m).unwrap()
}

/// Deterministic dense embeddings without structure.
fn scrambled(rows: usize, dim: usize) -> EmbeddingSnapshot {
    let m = Array2::from_shape_fn((rows, dim), |(i, d)| ((i * 31 + d * 17) as f32 * 0.37).sin());
    EmbeddingSnapshot::new(m).unwrap()
}

/// Two graphs of `n` entities each (`0..n`, `n..2n`) with the given facts.
fn two_graph_task(n: usize, triples1: Vec<RelTriple>, rel_num: usize) -> AlignmentTask {
    AlignmentTask::new(TaskFile {
        kg1: TemporalGraph {
            entities: (0..n).collect(),
            triples: triples1,
        },
        kg2: TemporalGraph {
            entities: (n..2 * n).collect(),
            triples: Vec::new(),
        },
        seed: AlignmentPairs::from_pairs([(0, n)]),
        reference: AlignmentPairs::from_pairs([(1, n + 1)]),
        rel_num,
        rel_id_mapping: Default::default(),
        time_features: TemporalFeatures::empty(2 * n, 4),
    })
    .unwrap()
}

// =============================================================================
// Bootstrapping
// =============================================================================

#[test]
fn test_bootstrap_accepts_identical_pairs() {
    let space = EntitySpace::contiguous(6, 6);
    let snapshot = paired_one_hot(6);

    for metric in [Metric::Inner, Metric::Cosine, Metric::Euclidean, Metric::Manhattan] {
        let config = AlignConfig::default()
            .with_metric(metric)
            .with_bootstrap_thresholds(0.5, 0.6)
            .with_threads(3);
        let augmenter = BootstrapAugmenter::new(&config).unwrap();

        let mut seed = SeedAlignment::default();
        let mut linked = LinkedEntities::new();
        let added = augmenter.augment(&snapshot, &space, &mut seed, &mut linked).unwrap();

        assert_eq!(added, 6, "metric {}", metric);
        let pairs: Vec<(usize, usize)> = seed.pairs().iter().collect();
        assert_eq!(pairs, (0..6).map(|i| (i, i + 6)).collect::<Vec<_>>());
        assert_eq!(linked.len(), 12);
    }
}

#[test]
fn test_bootstrap_round_without_candidates_is_not_an_error() {
    let space = EntitySpace::contiguous(3, 3);
    let config = AlignConfig::default().with_bootstrap_thresholds(2.0, 0.6).with_threads(2);
    let augmenter = BootstrapAugmenter::new(&config).unwrap();

    let mut seed = SeedAlignment::new(AlignmentPairs::from_pairs([(0, 3)]));
    let mut linked: LinkedEntities = [0, 3].into_iter().collect();
    let added = augmenter
        .augment(&paired_one_hot(3), &space, &mut seed, &mut linked)
        .unwrap();

    assert_eq!(added, 0);
    assert_eq!(seed.len(), 1);
    assert_eq!(seed.version(), 0);
}

// =============================================================================
// Evaluation
// =============================================================================

#[test]
fn test_perfect_ranking_scores_one_everywhere() {
    let snapshot = paired_one_hot(100);
    let reference = AlignmentPairs::from_pairs((0..100).map(|i| (i, i + 100)));
    let config = AlignConfig::default().with_hits_k(vec![1, 5, 10, 50]).with_threads(4);
    config.validate(200).unwrap();

    let metrics = Evaluator::new(&config).unwrap().evaluate(&snapshot, &reference).unwrap();
    for k in [1, 5, 10, 50] {
        assert_eq!(metrics.hits_at(k), Some(1.0));
    }
    assert_eq!(metrics.mr, 1.0);
    assert_eq!(metrics.mrr, 1.0);
    assert_eq!(metrics.num_queries, 100);
}

#[test]
fn test_thread_count_does_not_change_metrics() {
    let snapshot = scrambled(300, 12);
    let reference = AlignmentPairs::from_pairs((0..150).map(|i| (i, i + 150)));

    for metric in [Metric::Inner, Metric::Euclidean] {
        let base = AlignConfig::default().with_hits_k(vec![1, 5, 10, 50]).with_metric(metric);
        let one = Evaluator::new(&base.clone().with_threads(1)).unwrap();
        let four = Evaluator::new(&base.with_threads(4)).unwrap();

        assert_eq!(
            one.ranks(&snapshot, &reference).unwrap(),
            four.ranks(&snapshot, &reference).unwrap()
        );
        assert_eq!(
            one.evaluate(&snapshot, &reference).unwrap(),
            four.evaluate(&snapshot, &reference).unwrap()
        );
    }
}

#[test]
fn test_evaluation_is_repeatable() {
    let snapshot = scrambled(80, 6);
    let reference = AlignmentPairs::from_pairs((0..40).map(|i| (i, i + 40)));
    let evaluator = Evaluator::new(&AlignConfig::default().with_hits_k(vec![1, 10]).with_threads(3)).unwrap();

    let first = evaluator.evaluate(&snapshot, &reference).unwrap();
    for _ in 0..3 {
        assert_eq!(evaluator.evaluate(&snapshot, &reference).unwrap(), first);
    }
}

#[test]
fn test_overflowing_scores_void_the_round() {
    let m = Array2::from_elem((4, 2), 1e30f32);
    let snapshot = EmbeddingSnapshot::new(m).unwrap();
    let reference = AlignmentPairs::from_pairs([(0, 2), (1, 3)]);
    let config = AlignConfig::default()
        .with_hits_k(vec![1])
        .with_normalize(false)
        .with_csls(0)
        .with_threads(2);

    let result = Evaluator::new(&config).unwrap().evaluate(&snapshot, &reference);
    assert!(matches!(result, Err(Error::ShardFailed { .. })));
}

// =============================================================================
// Relation negatives
// =============================================================================

#[test]
fn test_relation_below_min_support_is_excluded() {
    let min_rel_win = 5;
    // Relation 0 has exactly min_rel_win facts, relation 1 one fewer.
    let mut triples: Vec<RelTriple> = (1..=min_rel_win).map(|t| RelTriple::new(0, 0, t)).collect();
    triples.extend((1..min_rel_win).map(|t| RelTriple::new(t, 1, t + 1)));
    let task = two_graph_task(12, triples, 2);

    let config = AlignConfig::default().with_min_rel_win(min_rel_win).with_neg_multi(4);
    let sampler = NegativeSampler::new(&config);

    let anchors = sampler.relation_anchors(&task);
    assert_eq!(anchors.len(), min_rel_win);
    assert!(anchors.iter().all(|t| t.relation == 0));

    let batch = sampler.relation_negatives(task.space(), task.rel_index(), &anchors, 9);
    assert!(batch.negatives.iter().all(|t| t.relation == 0));
    assert!(batch.negatives.iter().all(|t| !task.rel_index().contains(t)));
}

// =============================================================================
// Full pipeline
// =============================================================================

#[test]
fn test_synthetic_pipeline() {
    let task = SyntheticTaskSource::new(SyntheticConfig {
        entities: 60,
        ..Default::default()
    })
    .load()
    .unwrap();
    let initial_linked = task.linked_entities().len();

    let config = AlignConfig::default()
        .with_embedding_dim(24)
        .with_learning_rate(0.05)
        .with_batch_size(16)
        .with_neg_multi(3)
        .with_max_epoch(6)
        .with_schedule(2, 2, 3)
        .with_hits_k(vec![1, 5, 10, 50])
        .with_min_rel_win(4)
        .with_threads(4);

    let mut trainer = AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin()).unwrap();
    let report = trainer.train().unwrap();

    assert_eq!(report.epochs.len(), 6);
    assert!(report.loss_history().iter().all(|l| l.is_finite()));
    assert_eq!(report.validations().count(), 3);

    let sizes = report.seed_sizes();
    assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(trainer.linked().len(), initial_linked + 2 * report.bootstrap_total());

    for (_, m) in report.validations() {
        let hits: Vec<f64> = m.hits.values().copied().collect();
        assert!(hits.windows(2).all(|w| w[0] <= w[1]));
    }

    let test = trainer.test().unwrap();
    assert_eq!(test.num_queries, trainer.task().reference().len());
    assert!(test.mrr > 0.0 && test.mrr <= 1.0);
}

#[test]
fn test_unknown_model_fails_fast() {
    let task = SyntheticTaskSource::default().load().unwrap();
    let config = AlignConfig::default().with_embedding_module("gcn");
    assert!(matches!(
        AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin()),
        Err(Error::UnknownModel { .. })
    ));
}
