#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::uninlined_format_args)]

//! Alignment training engine for two temporal knowledge graphs.
//!
//! Entity alignment learns one vector per entity so that an entity of graph 1
//! lands next to its counterpart in graph 2. This crate drives that learning
//! around an external embedding model:
//!
//! | Component | Role |
//! |-----------|------|
//! | [`EntityPairSimilarity`] | Pairwise scores between two entity sets, optional CSLS |
//! | [`NegativeSampler`] | Truncated negatives for seed pairs, filtered negatives for relation facts |
//! | [`Evaluator`] | Hits@k / MR / MRR on the reference set, sharded across threads |
//! | [`BootstrapAugmenter`] | Mutual-nearest-neighbour pseudo-labels among unlinked entities |
//! | [`AlignmentTrainer`] | Epoch loop: train, validate, bootstrap |
//!
//! The model is anything implementing [`AlignmentModel`]; [`ModelRegistry`]
//! resolves `embedding_module` tags to constructors. The built-in `"table"`
//! model ([`TableModel`]) is a plain lookup table, enough to run the engine
//! end to end.
//!
//! ## The Loop
//!
//! ```text
//!              seed pairs ───────────────┐
//!                  │                     │ grows (never shrinks)
//!                  v                     │
//!   snapshot(N-1) ─> NegativeSampler ─> model.update ─> snapshot(N)
//!                                                        │
//!                                         ┌──────────────┴──────────────┐
//!                                         v                             v
//!                                     Evaluator                BootstrapAugmenter
//!                                   (reference set)           (unlinked entities)
//! ```
//!
//! ## CSLS
//!
//! Nearest-neighbour retrieval in high dimension suffers from hubs: a few
//! points that are close to everything. CSLS ([Conneau et al. 2018](https://arxiv.org/abs/1710.04087))
//! subtracts each point's mean similarity to its `k` nearest neighbours in
//! the other set:
//!
//! ```text
//! csls(i, j) = 2 s(i, j) - r_src(i) - r_tgt(j)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use aligna_core::{SyntheticConfig, SyntheticTaskSource, TaskSource};
//! use aligna_kge::{AlignConfig, AlignmentTrainer, ModelRegistry};
//!
//! let task = SyntheticTaskSource::new(SyntheticConfig {
//!     entities: 40,
//!     ..Default::default()
//! })
//! .load()
//! .unwrap();
//!
//! let config = AlignConfig::default()
//!     .with_embedding_dim(16)
//!     .with_max_epoch(2)
//!     .with_schedule(1, 1, 1)
//!     .with_hits_k(vec![1, 10])
//!     .with_threads(2);
//!
//! let mut trainer = AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin()).unwrap();
//! let report = trainer.train().unwrap();
//! let test = trainer.test().unwrap();
//!
//! assert!(report.seed_sizes().windows(2).all(|w| w[0] <= w[1]));
//! assert!(test.hits_at(1).unwrap() <= test.hits_at(10).unwrap());
//! ```
//!
//! ## References
//!
//! - Sun et al. (2018). "Bootstrapping Entity Alignment with Knowledge
//!   Graph Embedding." IJCAI.
//! - Conneau et al. (2018). "Word Translation Without Parallel Data." ICLR.
//! - Xu et al. (2021). "Time-aware Graph Neural Networks for Entity
//!   Alignment between Temporal Knowledge Graphs." EMNLP.

pub mod bootstrap;
pub mod config;
mod error;
pub mod evaluation;
pub mod model;
pub mod models;
pub mod sampling;
pub mod similarity;
pub mod training;

pub use bootstrap::BootstrapAugmenter;
pub use config::{AlignConfig, Metric};
pub use error::{Error, Result};
pub use evaluation::{AlignmentMetrics, Evaluator};
pub use model::{
    AlignmentBatch, AlignmentModel, EpochMetrics, LossWeights, ModelConstructor, ModelRegistry,
    RelationBatch, TrainingBatch,
};
pub use models::TableModel;
pub use sampling::{NegativeSampler, SamplingParams};
pub use similarity::{EntityPairSimilarity, PairScores, SimilarityConfig};
pub use training::{AlignmentTrainer, TrainingReport};
