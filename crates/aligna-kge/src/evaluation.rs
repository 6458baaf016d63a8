//! Rank-based evaluation of an alignment against the reference set.
//!
//! Every `ref_ent1[i]` is a query; its true counterpart is `ref_ent2[i]` and
//! the candidates are all of `ref_ent2`. The query's rank is the position of
//! the counterpart when candidates are sorted by (CSLS-adjusted) similarity.
//!
//! # Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | Hits@k | [0, 1] | Fraction of queries with rank <= k |
//! | MR | [1, n] | Mean rank |
//! | MRR | (0, 1] | Mean of 1/rank |
//!
//! # Ties
//!
//! Among equal scores the lower candidate index ranks first, so
//!
//! ```text
//! rank(i) = 1 + #{ j : s(i, j) > s(i, i) } + #{ j < i : s(i, j) == s(i, i) }
//! ```
//!
//! Ranks are computed per contiguous shard of queries on the similarity
//! engine's worker pool and concatenated in shard order. A failing shard voids
//! the round.

use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::similarity::EntityPairSimilarity;
use aligna_core::{EmbeddingSnapshot, ReferenceAlignment};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hits@k, MR and MRR over a set of queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMetrics {
    /// Hits@k for each requested k.
    pub hits: BTreeMap<usize, f64>,
    /// Mean rank.
    pub mr: f64,
    /// Mean reciprocal rank.
    pub mrr: f64,
    /// Number of queries.
    pub num_queries: usize,
}

impl AlignmentMetrics {
    /// Compute metrics from 1-based ranks.
    pub fn from_ranks(ranks: &[usize], hits_k: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self {
                hits: hits_k.iter().map(|&k| (k, 0.0)).collect(),
                ..Self::default()
            };
        }

        let n = ranks.len() as f64;
        let hits = hits_k
            .iter()
            .map(|&k| (k, ranks.iter().filter(|&&r| r <= k).count() as f64 / n))
            .collect();

        Self {
            hits,
            mr: ranks.iter().map(|&r| r as f64).sum::<f64>() / n,
            mrr: ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
            num_queries: ranks.len(),
        }
    }

    /// Hits@k, if `k` was requested.
    pub fn hits_at(&self, k: usize) -> Option<f64> {
        self.hits.get(&k).copied()
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        let hits: Vec<String> = self
            .hits
            .iter()
            .map(|(k, v)| format!("H@{}: {:.3}", k, v))
            .collect();
        format!(
            "{} | MR: {:.1} | MRR: {:.4} (n={})",
            hits.join(" | "),
            self.mr,
            self.mrr,
            self.num_queries
        )
    }
}

/// Rank of column `target` in `row`, ties broken toward lower columns.
pub fn rank_in_row(row: ArrayView1<'_, f32>, target: usize) -> usize {
    let s = row[target];
    let mut rank = 1;
    for (j, &v) in row.iter().enumerate() {
        if v > s || (v == s && j < target) {
            rank += 1;
        }
    }
    rank
}

/// Parallel Hits@k evaluator.
#[derive(Debug, Clone)]
pub struct Evaluator {
    engine: Arc<EntityPairSimilarity>,
    hits_k: Vec<usize>,
}

impl Evaluator {
    /// Evaluator with its own worker pool.
    pub fn new(config: &AlignConfig) -> Result<Self> {
        Ok(Self::with_engine(
            config,
            Arc::new(EntityPairSimilarity::from_config(config)?),
        ))
    }

    /// Evaluator sharing an existing similarity engine.
    pub fn with_engine(config: &AlignConfig, engine: Arc<EntityPairSimilarity>) -> Self {
        let mut hits_k = config.hits_k.clone();
        hits_k.sort_unstable();
        hits_k.dedup();
        Self { engine, hits_k }
    }

    /// Requested cut-offs, ascending.
    pub fn hits_k(&self) -> &[usize] {
        &self.hits_k
    }

    /// Rank of each reference counterpart, in reference order.
    pub fn ranks(&self, snapshot: &EmbeddingSnapshot, reference: &ReferenceAlignment) -> Result<Vec<usize>> {
        if reference.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.engine.scores(snapshot, reference.ent1(), reference.ent2())?;
        let ranking = scores.ranking();

        let shards = self.engine.run_sharded(reference.len(), |rows| {
            Ok(rows.map(|i| rank_in_row(ranking.row(i), i)).collect::<Vec<_>>())
        })?;
        let ranks: Vec<usize> = shards.into_iter().flatten().collect();

        if ranks.len() != reference.len() {
            return Err(Error::ShardFailed {
                shard: 0,
                reason: format!("merged {} ranks for {} queries", ranks.len(), reference.len()),
            });
        }
        Ok(ranks)
    }

    /// Hits@k, MR and MRR of the reference alignment under `snapshot`.
    pub fn evaluate(
        &self,
        snapshot: &EmbeddingSnapshot,
        reference: &ReferenceAlignment,
    ) -> Result<AlignmentMetrics> {
        let ranks = self.ranks(snapshot, reference)?;
        let metrics = AlignmentMetrics::from_ranks(&ranks, &self.hits_k);
        tracing::debug!(
            queries = metrics.num_queries,
            threads = self.engine.threads(),
            "evaluated reference alignment"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use aligna_core::AlignmentPairs;
    use ndarray::{array, Array2};

    #[test]
    fn test_from_ranks() {
        let m = AlignmentMetrics::from_ranks(&[1, 2, 4, 10], &[1, 5]);
        assert_eq!(m.hits_at(1), Some(0.25));
        assert_eq!(m.hits_at(5), Some(0.75));
        assert_eq!(m.hits_at(10), None);
        assert!((m.mr - 4.25).abs() < 1e-12);
        assert!((m.mrr - (1.0 + 0.5 + 0.25 + 0.1) / 4.0).abs() < 1e-12);
        assert_eq!(m.num_queries, 4);
    }

    #[test]
    fn test_empty_ranks() {
        let m = AlignmentMetrics::from_ranks(&[], &[1, 10]);
        assert_eq!(m.hits_at(1), Some(0.0));
        assert_eq!(m.num_queries, 0);
    }

    #[test]
    fn test_rank_ties_go_to_lower_column() {
        let row = array![0.5f32, 0.9, 0.5, 0.5];
        assert_eq!(rank_in_row(row.view(), 1), 1);
        assert_eq!(rank_in_row(row.view(), 0), 2);
        assert_eq!(rank_in_row(row.view(), 3), 4);
    }

    #[test]
    fn test_summary_lists_every_k() {
        let m = AlignmentMetrics::from_ranks(&[1], &[1, 10]);
        let s = m.summary();
        assert!(s.contains("H@1: 1.000"));
        assert!(s.contains("H@10: 1.000"));
        assert!(s.contains("n=1"));
    }

    #[test]
    fn test_ranks_with_tied_scores() {
        let m = Array2::from_shape_vec(
            (4, 2),
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.1],
        )
        .unwrap();
        let snapshot = EmbeddingSnapshot::new(m).unwrap();
        let reference = AlignmentPairs::from_pairs([(0, 2), (1, 3)]);
        let config = AlignConfig::default()
            .with_hits_k(vec![1, 2])
            .with_metric(Metric::Inner)
            .with_normalize(false)
            .with_csls(0)
            .with_threads(2);

        let ranks = Evaluator::new(&config).unwrap().ranks(&snapshot, &reference).unwrap();
        // query 0 scores [1.0, 1.0]: tie, its counterpart is column 0
        // query 1 scores [0.0, 0.1]
        assert_eq!(ranks, vec![1, 1]);
    }
}
