//! Entity identifiers and the two-graph entity space.
//!
//! Entities of both knowledge graphs share one id space `[0, ent_num)`.
//! Every id belongs to exactly one graph; [`EntitySpace`] records which.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Entity identifier, unique across both graphs.
pub type EntityId = usize;

/// Relation identifier.
pub type RelationId = usize;

/// Which of the two knowledge graphs an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphSide {
    /// Source graph (`kg1`, left column of alignments).
    First,
    /// Target graph (`kg2`, right column of alignments).
    Second,
}

impl GraphSide {
    /// The other graph.
    pub fn opposite(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

/// Membership of every entity id in one of the two graphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpace {
    /// `side[e]` is the graph of entity `e`.
    side: Vec<GraphSide>,
    /// Sorted ids of graph 1.
    first: Vec<EntityId>,
    /// Sorted ids of graph 2.
    second: Vec<EntityId>,
}

impl EntitySpace {
    /// Build from the two (disjoint) per-graph entity lists.
    ///
    /// The union must cover `[0, ent_num)` exactly.
    pub fn new(first: Vec<EntityId>, second: Vec<EntityId>) -> Result<Self> {
        let ent_num = first.len() + second.len();
        let mut side: Vec<Option<GraphSide>> = vec![None; ent_num];

        for (ids, tag) in [(&first, GraphSide::First), (&second, GraphSide::Second)] {
            for &e in ids {
                let slot = side
                    .get_mut(e)
                    .ok_or(Error::EntityOutOfRange { entity: e, ent_num })?;
                if slot.is_some() {
                    return Err(Error::Validation(format!(
                        "entity {} listed more than once across graphs",
                        e
                    )));
                }
                *slot = Some(tag);
            }
        }

        // Every slot is filled: ent_num ids placed without duplicates.
        let side = side.into_iter().flatten().collect::<Vec<_>>();

        let mut first = first;
        let mut second = second;
        first.sort_unstable();
        second.sort_unstable();

        Ok(Self {
            side,
            first,
            second,
        })
    }

    /// Graph 1 takes `[0, n1)`, graph 2 takes `[n1, n1 + n2)`.
    pub fn contiguous(n1: usize, n2: usize) -> Self {
        let mut side = vec![GraphSide::First; n1];
        side.extend(std::iter::repeat(GraphSide::Second).take(n2));
        Self {
            side,
            first: (0..n1).collect(),
            second: (n1..n1 + n2).collect(),
        }
    }

    /// Total number of entities (`ent_num`).
    pub fn len(&self) -> usize {
        self.side.len()
    }

    /// Whether the space has no entities.
    pub fn is_empty(&self) -> bool {
        self.side.is_empty()
    }

    /// Graph of an entity, `None` if out of range.
    pub fn side_of(&self, entity: EntityId) -> Option<GraphSide> {
        self.side.get(entity).copied()
    }

    /// Sorted entity ids of one graph.
    pub fn entities(&self, side: GraphSide) -> &[EntityId] {
        match side {
            GraphSide::First => &self.first,
            GraphSide::Second => &self.second,
        }
    }

    /// Fail if `entity` is not a valid id.
    pub fn check(&self, entity: EntityId) -> Result<()> {
        if entity < self.len() {
            Ok(())
        } else {
            Err(Error::EntityOutOfRange {
                entity,
                ent_num: self.len(),
            })
        }
    }
}

/// Entities already covered by a known alignment (seed or reference).
///
/// Excluded from negative sampling pools and from bootstrap candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedEntities {
    entities: HashSet<EntityId>,
}

impl LinkedEntities {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an entity as linked. Returns `false` if it already was.
    pub fn insert(&mut self, entity: EntityId) -> bool {
        self.entities.insert(entity)
    }

    /// Whether the entity is linked.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains(&entity)
    }

    /// Number of linked entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is linked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities of `ids` that are not linked, in the order of `ids`.
    pub fn unlinked<'a>(&'a self, ids: &'a [EntityId]) -> impl Iterator<Item = EntityId> + 'a {
        ids.iter().copied().filter(move |e| !self.entities.contains(e))
    }
}

impl Extend<EntityId> for LinkedEntities {
    fn extend<T: IntoIterator<Item = EntityId>>(&mut self, iter: T) {
        self.entities.extend(iter);
    }
}

impl FromIterator<EntityId> for LinkedEntities {
    fn from_iter<T: IntoIterator<Item = EntityId>>(iter: T) -> Self {
        Self {
            entities: iter.into_iter().collect(),
        }
    }
}
