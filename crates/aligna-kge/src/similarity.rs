//! Pairwise similarity between two entity sets, with optional CSLS.
//!
//! Every metric is mapped to a "higher is closer" score so ranking code never
//! needs to know which metric produced it:
//!
//! | Metric | Score |
//! |--------|-------|
//! | `inner` | `<a, b>` |
//! | `cosine` | `<a, b> / (‖a‖ ‖b‖)` |
//! | `euclidean` | `-‖a - b‖₂` |
//! | `manhattan` | `-‖a - b‖₁` |
//!
//! With `normalize`, rows are L2-normalised first, which turns `inner` into
//! cosine similarity.
//!
//! # CSLS
//!
//! Cross-domain similarity local scaling (Conneau et al. 2018) penalises hub
//! entities that are close to everything:
//!
//! ```text
//! csls(i, j) = 2 * s(i, j) - r_src(i) - r_tgt(j)
//! r_src(i)   = mean of the k largest s(i, ·)
//! r_tgt(j)   = mean of the k largest s(·, j)
//! ```
//!
//! # Parallelism and Determinism
//!
//! Rows (and, for CSLS, columns) are split into contiguous shards, one per
//! worker thread. Each score is a per-pair dot product or distance computed
//! independently of shard boundaries, so the result is bit-identical for any
//! thread count. A shard that panics or meets a non-finite score voids the
//! whole round.

use crate::config::{AlignConfig, Metric};
use crate::error::{Error, Result};
use aligna_core::{EmbeddingSnapshot, EntityId};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Metric, normalisation and CSLS neighbourhood size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityConfig {
    /// Metric.
    pub metric: Metric,
    /// L2-normalise rows before scoring.
    pub normalize: bool,
    /// CSLS neighbourhood size; 0 disables CSLS.
    pub csls_k: usize,
}

impl SimilarityConfig {
    /// Copy the evaluation knobs out of a run configuration.
    pub fn from_config(config: &AlignConfig) -> Self {
        Self {
            metric: config.eval_metric,
            normalize: config.eval_normalize,
            csls_k: config.eval_csls,
        }
    }

    fn normalizes(&self) -> bool {
        self.normalize || self.metric == Metric::Cosine
    }

    /// Score of one pair (normalising on the fly if configured).
    pub fn score(&self, a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
        if self.normalizes() {
            let na = l2_norm(a).max(1e-12);
            let nb = l2_norm(b).max(1e-12);
            match self.metric {
                Metric::Inner | Metric::Cosine => a.dot(&b) / (na * nb),
                Metric::Euclidean => -a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x / na - y / nb).powi(2))
                    .sum::<f32>()
                    .sqrt(),
                Metric::Manhattan => -a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x / na - y / nb).abs())
                    .sum::<f32>(),
            }
        } else {
            raw_score(self.metric, a, b)
        }
    }

    /// Confidence in `[.., 1]` used by the bootstrap `sim_th` gate.
    ///
    /// Similarity metrics report the score itself; distance metrics report
    /// `1 / (1 + d)`.
    pub fn confidence(&self, raw: f32) -> f32 {
        match self.distance(raw) {
            Some(d) => 1.0 / (1.0 + d),
            None => raw,
        }
    }

    /// Distance behind a raw score, for distance metrics only.
    pub fn distance(&self, raw: f32) -> Option<f32> {
        self.metric.is_distance().then_some(-raw)
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self::from_config(&AlignConfig::default())
    }
}

/// Score of already-prepared vectors.
fn raw_score(metric: Metric, a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    match metric {
        Metric::Inner | Metric::Cosine => a.dot(&b),
        Metric::Euclidean => -a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
        Metric::Manhattan => -a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f32>(),
    }
}

fn l2_norm(v: ArrayView1<'_, f32>) -> f32 {
    v.dot(&v).sqrt()
}

/// Mean of the `k` largest values (all values if fewer than `k`).
pub fn top_k_mean(values: impl Iterator<Item = f32>, k: usize) -> f32 {
    let mut values: Vec<f32> = values.collect();
    let k = k.min(values.len());
    if k == 0 {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| b.total_cmp(a));
    values[..k].iter().sum::<f32>() / k as f32
}

/// Split `0..len` into at most `shards` contiguous ranges.
pub fn shard_ranges(len: usize, shards: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let size = len.div_ceil(shards.clamp(1, len));
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Raw scores plus the CSLS-adjusted matrix used for ranking.
#[derive(Debug, Clone)]
pub struct PairScores {
    raw: Array2<f32>,
    csls: Option<Array2<f32>>,
}

impl PairScores {
    /// Scores before CSLS (`rows = sources`, `cols = targets`).
    pub fn raw(&self) -> ArrayView2<'_, f32> {
        self.raw.view()
    }

    /// Scores used for nearest-neighbour ranking (CSLS when enabled).
    pub fn ranking(&self) -> ArrayView2<'_, f32> {
        self.csls.as_ref().unwrap_or(&self.raw).view()
    }

    /// Number of sources.
    pub fn nrows(&self) -> usize {
        self.raw.nrows()
    }

    /// Number of targets.
    pub fn ncols(&self) -> usize {
        self.raw.ncols()
    }
}

/// Sharded similarity engine shared by evaluation and bootstrapping.
pub struct EntityPairSimilarity {
    config: SimilarityConfig,
    threads: usize,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for EntityPairSimilarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPairSimilarity")
            .field("config", &self.config)
            .field("threads", &self.threads)
            .finish()
    }
}

impl EntityPairSimilarity {
    /// Engine with its own pool of `threads` workers.
    pub fn new(config: SimilarityConfig, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(Error::InvalidConfig("eval_threads_num must be positive".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("aligna-eval-{}", i))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        Ok(Self {
            config,
            threads,
            pool,
        })
    }

    /// Engine configured from `eval_metric`, `eval_normalize`, `eval_csls`,
    /// `eval_threads_num`.
    pub fn from_config(config: &AlignConfig) -> Result<Self> {
        Self::new(SimilarityConfig::from_config(config), config.eval_threads_num)
    }

    /// Scoring configuration.
    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// Worker count (also the shard count).
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f` on each shard of `0..len` concurrently, in shard order.
    ///
    /// Fails with [`Error::ShardFailed`] if any shard errors or panics.
    pub fn run_sharded<T, F>(&self, len: usize, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(Range<usize>) -> Result<T> + Sync,
    {
        let ranges = shard_ranges(len, self.threads);
        self.pool.install(|| {
            ranges
                .into_par_iter()
                .enumerate()
                .map(|(shard, range)| {
                    match catch_unwind(AssertUnwindSafe(|| f(range))) {
                        Ok(Ok(v)) => Ok(v),
                        Ok(Err(Error::ShardFailed { reason, .. })) => {
                            Err(Error::ShardFailed { shard, reason })
                        }
                        Ok(Err(e)) => Err(Error::ShardFailed {
                            shard,
                            reason: e.to_string(),
                        }),
                        Err(payload) => Err(Error::ShardFailed {
                            shard,
                            reason: panic_message(payload.as_ref()),
                        }),
                    }
                })
                .collect()
        })
    }

    /// Rows of `ids`, normalised if configured.
    pub fn prepare(&self, snapshot: &EmbeddingSnapshot, ids: &[EntityId]) -> Result<Array2<f32>> {
        let mut m = snapshot.gather(ids)?;
        if self.config.normalizes() {
            for mut row in m.axis_iter_mut(Axis(0)) {
                let norm = l2_norm(row.view()).max(1e-12);
                row.mapv_inplace(|x| x / norm);
            }
        }
        Ok(m)
    }

    /// Scores between every source and every target entity.
    pub fn scores(
        &self,
        snapshot: &EmbeddingSnapshot,
        sources: &[EntityId],
        targets: &[EntityId],
    ) -> Result<PairScores> {
        let src = self.prepare(snapshot, sources)?;
        let tgt = self.prepare(snapshot, targets)?;
        self.scores_prepared(src.view(), tgt.view())
    }

    /// Scores between prepared matrices.
    pub fn scores_prepared(
        &self,
        src: ArrayView2<'_, f32>,
        tgt: ArrayView2<'_, f32>,
    ) -> Result<PairScores> {
        if src.ncols() != tgt.ncols() {
            return Err(Error::DimensionMismatch(format!(
                "source dim {} vs target dim {}",
                src.ncols(),
                tgt.ncols()
            )));
        }
        let metric = self.config.metric;
        let (n, m) = (src.nrows(), tgt.nrows());

        let blocks = self.run_sharded(n, |rows| {
            let mut block = Array2::<f32>::zeros((rows.len(), m));
            for (bi, i) in rows.clone().enumerate() {
                let a = src.row(i);
                for j in 0..m {
                    let v = raw_score(metric, a, tgt.row(j));
                    if !v.is_finite() {
                        return Err(Error::ShardFailed {
                            shard: 0,
                            reason: format!("non-finite score at ({}, {})", i, j),
                        });
                    }
                    block[[bi, j]] = v;
                }
            }
            Ok(block)
        })?;
        let raw = stack_rows(blocks, m)?;

        let csls = if self.config.csls_k > 0 && n > 0 && m > 0 {
            Some(self.csls(raw.view())?)
        } else {
            None
        };

        Ok(PairScores { raw, csls })
    }

    /// CSLS-adjusted copy of `raw`.
    fn csls(&self, raw: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let k = self.config.csls_k;
        let (n, m) = raw.dim();

        let r_src = self.run_sharded(n, |rows| {
            Ok(rows
                .map(|i| top_k_mean(raw.row(i).iter().copied(), k))
                .collect::<Vec<_>>())
        })?;
        let r_tgt = self.run_sharded(m, |cols| {
            Ok(cols
                .map(|j| top_k_mean(raw.column(j).iter().copied(), k))
                .collect::<Vec<_>>())
        })?;
        let r_src = Array1::from_iter(r_src.into_iter().flatten());
        let r_tgt = Array1::from_iter(r_tgt.into_iter().flatten());

        let blocks = self.run_sharded(n, |rows| {
            let mut block = Array2::<f32>::zeros((rows.len(), m));
            for (bi, i) in rows.clone().enumerate() {
                for j in 0..m {
                    let v = 2.0 * raw[[i, j]] - r_src[i] - r_tgt[j];
                    if !v.is_finite() {
                        return Err(Error::ShardFailed {
                            shard: 0,
                            reason: format!("non-finite CSLS score at ({}, {})", i, j),
                        });
                    }
                    block[[bi, j]] = v;
                }
            }
            Ok(block)
        })?;
        stack_rows(blocks, m)
    }
}

fn stack_rows(blocks: Vec<Array2<f32>>, ncols: usize) -> Result<Array2<f32>> {
    let nrows: usize = blocks.iter().map(Array2::nrows).sum();
    let mut out = Array2::<f32>::zeros((nrows, ncols));
    let mut at = 0;
    for block in blocks {
        let h = block.nrows();
        out.slice_mut(s![at..at + h, ..]).assign(&block);
        at += h;
    }
    Ok(out)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax_lowest(values: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}
