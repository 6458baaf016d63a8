//! `aligna` aligns entities across two temporal knowledge graphs.
//!
//! This crate is a facade over the workspace:
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`core`] (`aligna-core`) | Entity spaces, alignments, relation index, temporal features, task loading |
//! | [`kge`] (`aligna-kge`) | Negative sampling, training loop, Hits@k/CSLS evaluation, bootstrapping |
//!
//! ```rust
//! use aligna::{AlignConfig, AlignmentTrainer, ModelRegistry, SyntheticTaskSource, TaskSource};
//!
//! let task = SyntheticTaskSource::default().load().unwrap();
//! let config = AlignConfig::default()
//!     .with_embedding_dim(8)
//!     .with_max_epoch(1)
//!     .with_threads(2);
//! let mut trainer = AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin()).unwrap();
//! trainer.train().unwrap();
//! assert_eq!(trainer.test().unwrap().num_queries, 100);
//! ```

pub use aligna_core as core;
pub use aligna_kge as kge;

pub use aligna_core::{
    AlignmentPairs, AlignmentTask, EmbeddingSnapshot, EntityId, EntitySpace, JsonTaskSource,
    LinkedEntities, RelTriple, SeedAlignment, SyntheticConfig, SyntheticTaskSource, TaskSource,
};
pub use aligna_kge::{
    AlignConfig, AlignmentMetrics, AlignmentModel, AlignmentTrainer, BootstrapAugmenter,
    Evaluator, Metric, ModelRegistry, NegativeSampler, TrainingReport,
};
