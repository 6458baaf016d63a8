//! A two-graph temporal alignment task: the loader's output.
//!
//! [`AlignmentTask`] bundles everything the training engine reads: both
//! graphs' entities and triples, seed and reference alignments, the relation
//! index (`rel_ht_dict`), and the temporal feature matrix. Construction
//! validates every cross-structure invariant once, so downstream code can
//! index without re-checking.
//!
//! Loaders implement [`TaskSource`]. [`JsonTaskSource`] reads the crate's own
//! serialized task format; parsing raw knowledge-graph dumps is left to
//! callers.

use crate::alignment::{AlignmentPairs, ReferenceAlignment};
use crate::entity::{EntityId, EntitySpace, GraphSide, LinkedEntities, RelationId};
use crate::error::{Error, Result};
use crate::relation::{RelTriple, RelationIndex};
use crate::temporal::TemporalFeatures;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

/// Entities and facts of one graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalGraph {
    /// Entity ids owned by this graph.
    pub entities: Vec<EntityId>,
    /// Facts whose head and tail both belong to this graph.
    pub triples: Vec<RelTriple>,
}

/// Serialized form of a task, validated into [`AlignmentTask`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFile {
    /// Graph 1.
    pub kg1: TemporalGraph,
    /// Graph 2.
    pub kg2: TemporalGraph,
    /// Seed alignment (`sup_ent1`, `sup_ent2`).
    pub seed: AlignmentPairs,
    /// Reference alignment (`ref_ent1`, `ref_ent2`).
    pub reference: AlignmentPairs,
    /// Number of relations.
    pub rel_num: usize,
    /// Relation-id remapping produced by the loader.
    #[serde(default)]
    pub rel_id_mapping: BTreeMap<RelationId, RelationId>,
    /// Sparse `[entity, time_bucket]` features.
    pub time_features: TemporalFeatures,
}

/// Validated two-graph alignment task.
#[derive(Debug, Clone)]
pub struct AlignmentTask {
    file: TaskFile,
    space: EntitySpace,
    rel_index: RelationIndex,
    adjacency: Vec<(EntityId, EntityId)>,
}

impl AlignmentTask {
    /// Validate a task file.
    pub fn new(file: TaskFile) -> Result<Self> {
        let space = EntitySpace::new(file.kg1.entities.clone(), file.kg2.entities.clone())?;
        let ent_num = space.len();

        for (graph, side) in [(&file.kg1, GraphSide::First), (&file.kg2, GraphSide::Second)] {
            for t in &graph.triples {
                space.check(t.head)?;
                space.check(t.tail)?;
                if space.side_of(t.head) != Some(side) || space.side_of(t.tail) != Some(side) {
                    return Err(Error::Validation(format!(
                        "triple ({}, {}, {}) crosses graphs",
                        t.head, t.relation, t.tail
                    )));
                }
                if t.relation >= file.rel_num {
                    return Err(Error::Validation(format!(
                        "relation {} out of range (rel_num = {})",
                        t.relation, file.rel_num
                    )));
                }
            }
        }

        file.seed.validate(&space)?;
        file.reference.validate(&space)?;
        check_one_to_one(&file.seed, "seed")?;
        check_one_to_one(&file.reference, "reference")?;

        let seed_entities: HashSet<EntityId> = file.seed.entities().collect();
        if let Some(entity) = file.reference.entities().find(|e| seed_entities.contains(e)) {
            return Err(Error::OverlappingAlignment { entity });
        }

        if file.time_features.ent_num() != ent_num {
            return Err(Error::LengthMismatch {
                what: "temporal feature rows and entity count",
                left: file.time_features.ent_num(),
                right: ent_num,
            });
        }

        let all_triples = file.kg1.triples.iter().chain(file.kg2.triples.iter());
        let rel_index = RelationIndex::from_triples(all_triples.clone());

        let adjacency: BTreeSet<(EntityId, EntityId)> = all_triples
            .filter(|t| t.head != t.tail)
            .map(|t| (t.head.min(t.tail), t.head.max(t.tail)))
            .collect();

        Ok(Self {
            file,
            space,
            rel_index,
            adjacency: adjacency.into_iter().collect(),
        })
    }

    /// Serializable form.
    pub fn to_file(&self) -> &TaskFile {
        &self.file
    }

    /// Entity membership.
    pub fn space(&self) -> &EntitySpace {
        &self.space
    }

    /// Total number of entities.
    pub fn ent_num(&self) -> usize {
        self.space.len()
    }

    /// Number of relations.
    pub fn rel_num(&self) -> usize {
        self.file.rel_num
    }

    /// Number of triples across both graphs.
    pub fn tri_num(&self) -> usize {
        self.file.kg1.triples.len() + self.file.kg2.triples.len()
    }

    /// Graph 1.
    pub fn kg1(&self) -> &TemporalGraph {
        &self.file.kg1
    }

    /// Graph 2.
    pub fn kg2(&self) -> &TemporalGraph {
        &self.file.kg2
    }

    /// Every triple of both graphs.
    pub fn triples(&self) -> impl Iterator<Item = &RelTriple> {
        self.file.kg1.triples.iter().chain(self.file.kg2.triples.iter())
    }

    /// Undirected entity adjacency (deduplicated, `a < b`).
    pub fn adjacency(&self) -> &[(EntityId, EntityId)] {
        &self.adjacency
    }

    /// Seed alignment as loaded.
    pub fn seed(&self) -> &AlignmentPairs {
        &self.file.seed
    }

    /// Held-out reference alignment.
    pub fn reference(&self) -> &ReferenceAlignment {
        &self.file.reference
    }

    /// `rel_ht_dict`.
    pub fn rel_index(&self) -> &RelationIndex {
        &self.rel_index
    }

    /// Loader-provided relation remapping.
    pub fn rel_id_mapping(&self) -> &BTreeMap<RelationId, RelationId> {
        &self.file.rel_id_mapping
    }

    /// Temporal feature matrix.
    pub fn time_features(&self) -> &TemporalFeatures {
        &self.file.time_features
    }

    /// Union of every entity in the seed and reference alignments.
    pub fn linked_entities(&self) -> LinkedEntities {
        self.file
            .seed
            .entities()
            .chain(self.file.reference.entities())
            .collect()
    }
}

impl TryFrom<TaskFile> for AlignmentTask {
    type Error = Error;

    fn try_from(file: TaskFile) -> Result<Self> {
        Self::new(file)
    }
}

fn check_one_to_one(pairs: &AlignmentPairs, what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(pairs.len() * 2);
    for e in pairs.entities() {
        if !seen.insert(e) {
            return Err(Error::Validation(format!(
                "entity {} aligned more than once in {} alignment",
                e, what
            )));
        }
    }
    Ok(())
}

/// Anything that can produce an [`AlignmentTask`].
pub trait TaskSource {
    /// Load and validate the task.
    fn load(&self) -> Result<AlignmentTask>;
}

/// Reads a JSON-serialized [`TaskFile`].
#[derive(Debug, Clone)]
pub struct JsonTaskSource {
    path: PathBuf,
}

impl JsonTaskSource {
    /// Source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskSource for JsonTaskSource {
    fn load(&self) -> Result<AlignmentTask> {
        let text = std::fs::read_to_string(&self.path)?;
        let file: TaskFile = serde_json::from_str(&text)?;
        let task = AlignmentTask::new(file)?;
        tracing::info!(
            path = %self.path.display(),
            ent_num = task.ent_num(),
            tri_num = task.tri_num(),
            seed = task.seed().len(),
            reference = task.reference().len(),
            "loaded alignment task"
        );
        Ok(task)
    }
}

/// Write a task as JSON.
pub fn write_task_json(task: &AlignmentTask, path: impl AsRef<Path>) -> Result<()> {
    let text = serde_json::to_string(task.to_file())?;
    std::fs::write(path, text)?;
    Ok(())
}
