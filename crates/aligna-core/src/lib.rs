#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::uninlined_format_args)]

//! Core types for two-graph temporal entity alignment.
//!
//! Entity alignment asks which entity of one knowledge graph denotes the
//! same real-world thing as an entity of another graph. This crate holds the
//! data the alignment engine consumes:
//!
//! - [`EntitySpace`] - shared id space `[0, ent_num)` split into two graphs
//! - [`AlignmentPairs`] / [`SeedAlignment`] - parallel `ent1`/`ent2` columns
//! - [`LinkedEntities`] - every entity already covered by a known alignment
//! - [`RelationIndex`] - `rel_ht_dict`: relation to observed `(head, tail)` pairs
//! - [`TemporalFeatures`] - sparse `[entity, time_bucket]` matrix
//! - [`EmbeddingSnapshot`] - read-only `ent_num x dim` embedding matrix
//! - [`AlignmentTask`] - validated bundle of all of the above
//!
//! # Data Invariants
//!
//! | Structure | Invariant |
//! |-----------|-----------|
//! | Alignment | `len(ent1) == len(ent2)`, ids in range, graph 1 to graph 2 |
//! | Seed vs reference | disjoint at load time |
//! | Seed | grows only; an entity is aligned at most once |
//! | Temporal | no duplicate coordinates, ids valid, values finite |
//!
//! # Example
//!
//! ```rust
//! use aligna_core::{SyntheticConfig, SyntheticTaskSource, TaskSource};
//!
//! let task = SyntheticTaskSource::new(SyntheticConfig {
//!     entities: 20,
//!     ..Default::default()
//! })
//! .load()
//! .unwrap();
//!
//! assert_eq!(task.ent_num(), 40);
//! assert!(task.seed().len() > 0);
//! ```

mod alignment;
mod embedding;
mod entity;
mod error;
mod relation;
pub mod synthetic;
pub mod task;
mod temporal;

pub use alignment::{AlignmentPairs, ReferenceAlignment, SeedAlignment};
pub use embedding::EmbeddingSnapshot;
pub use entity::{EntityId, EntitySpace, GraphSide, LinkedEntities, RelationId};
pub use error::{Error, Result};
pub use relation::{RelTriple, RelationIndex, RelationPairs};
pub use synthetic::{SyntheticConfig, SyntheticTaskSource};
pub use task::{AlignmentTask, JsonTaskSource, TaskFile, TaskSource, TemporalGraph};
pub use temporal::TemporalFeatures;

// Re-export ndarray so model implementations agree on the matrix type.
pub use ndarray;
