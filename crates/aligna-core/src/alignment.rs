//! Seed and reference alignment sets.
//!
//! Both are stored as two parallel columns (`ent1[i]` in graph 1 is aligned
//! with `ent2[i]` in graph 2). The seed set is the training supervision and
//! only ever grows; the reference set is held out for evaluation.

use crate::entity::{EntityId, EntitySpace, GraphSide, LinkedEntities};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Two parallel columns of aligned entity ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPairs {
    ent1: Vec<EntityId>,
    ent2: Vec<EntityId>,
}

impl AlignmentPairs {
    /// Build from parallel columns. Lengths must match.
    pub fn new(ent1: Vec<EntityId>, ent2: Vec<EntityId>) -> Result<Self> {
        if ent1.len() != ent2.len() {
            return Err(Error::LengthMismatch {
                what: "alignment columns",
                left: ent1.len(),
                right: ent2.len(),
            });
        }
        Ok(Self { ent1, ent2 })
    }

    /// Build from `(graph1, graph2)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (EntityId, EntityId)>) -> Self {
        let (ent1, ent2) = pairs.into_iter().unzip();
        Self { ent1, ent2 }
    }

    /// Graph-1 column.
    pub fn ent1(&self) -> &[EntityId] {
        &self.ent1
    }

    /// Graph-2 column.
    pub fn ent2(&self) -> &[EntityId] {
        &self.ent2
    }

    /// Pair at position `i`.
    pub fn get(&self, i: usize) -> Option<(EntityId, EntityId)> {
        Some((*self.ent1.get(i)?, *self.ent2.get(i)?))
    }

    /// Iterate over `(graph1, graph2)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.ent1.iter().copied().zip(self.ent2.iter().copied())
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.ent1.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.ent1.is_empty()
    }

    /// Every entity of either column.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ent1.iter().chain(self.ent2.iter()).copied()
    }

    /// Check ids are in range and each column lives in its own graph.
    pub fn validate(&self, space: &EntitySpace) -> Result<()> {
        // Deserialized columns bypass `new`.
        if self.ent1.len() != self.ent2.len() {
            return Err(Error::LengthMismatch {
                what: "alignment columns",
                left: self.ent1.len(),
                right: self.ent2.len(),
            });
        }
        for (a, b) in self.iter() {
            space.check(a)?;
            space.check(b)?;
            if space.side_of(a) != Some(GraphSide::First)
                || space.side_of(b) != Some(GraphSide::Second)
            {
                return Err(Error::Validation(format!(
                    "pair ({}, {}) does not go from graph 1 to graph 2",
                    a, b
                )));
            }
        }
        Ok(())
    }

    fn push(&mut self, a: EntityId, b: EntityId) {
        self.ent1.push(a);
        self.ent2.push(b);
    }
}

/// Held-out ground truth used only for evaluation.
pub type ReferenceAlignment = AlignmentPairs;

/// Training supervision that grows monotonically during bootstrapping.
///
/// Pairs are never removed. Each call to [`SeedAlignment::extend`] that adds
/// at least one pair bumps [`SeedAlignment::version`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedAlignment {
    pairs: AlignmentPairs,
    version: u64,
}

impl SeedAlignment {
    /// Start a run from the loader's seed pairs.
    pub fn new(pairs: AlignmentPairs) -> Self {
        Self { pairs, version: 0 }
    }

    /// Current pairs.
    pub fn pairs(&self) -> &AlignmentPairs {
        &self.pairs
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of growth steps applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Append new pairs and mark their entities as linked.
    ///
    /// Pairs touching an already-linked entity are skipped, so an entity is
    /// aligned at most once. Returns the number of pairs actually added.
    pub fn extend(
        &mut self,
        new_pairs: &[(EntityId, EntityId)],
        linked: &mut LinkedEntities,
    ) -> usize {
        let mut added = 0;
        for &(a, b) in new_pairs {
            if a == b || linked.contains(a) || linked.contains(b) {
                continue;
            }
            linked.insert(a);
            linked.insert(b);
            self.pairs.push(a, b);
            added += 1;
        }
        if added > 0 {
            self.version += 1;
        }
        added
    }
}
