//! Relation triples and the per-relation `(head, tail)` index.

use crate::entity::{EntityId, RelationId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A `(head, relation, tail)` fact inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelTriple {
    /// Head entity.
    pub head: EntityId,
    /// Relation.
    pub relation: RelationId,
    /// Tail entity.
    pub tail: EntityId,
}

impl RelTriple {
    /// Create a new triple.
    pub fn new(head: EntityId, relation: RelationId, tail: EntityId) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }
}

/// Pairs and participants of one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationPairs {
    pairs: HashSet<(EntityId, EntityId)>,
    participants: HashSet<EntityId>,
}

impl RelationPairs {
    /// Whether `(head, tail)` is a known fact for this relation.
    pub fn contains(&self, head: EntityId, tail: EntityId) -> bool {
        self.pairs.contains(&(head, tail))
    }

    /// Whether the entity occurs as head or tail of any known fact.
    pub fn involves(&self, entity: EntityId) -> bool {
        self.participants.contains(&entity)
    }

    /// Number of distinct `(head, tail)` pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the relation has no facts.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Known `(head, tail)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = &(EntityId, EntityId)> {
        self.pairs.iter()
    }
}

/// `rel_ht_dict`: relation id to its observed `(head, tail)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationIndex {
    relations: BTreeMap<RelationId, RelationPairs>,
}

impl RelationIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every triple (duplicates collapse).
    pub fn from_triples<'a>(triples: impl IntoIterator<Item = &'a RelTriple>) -> Self {
        let mut index = Self::new();
        for t in triples {
            index.insert(*t);
        }
        index
    }

    /// Add one fact.
    pub fn insert(&mut self, triple: RelTriple) {
        let entry = self.relations.entry(triple.relation).or_default();
        entry.pairs.insert((triple.head, triple.tail));
        entry.participants.insert(triple.head);
        entry.participants.insert(triple.tail);
    }

    /// Facts of one relation.
    pub fn get(&self, relation: RelationId) -> Option<&RelationPairs> {
        self.relations.get(&relation)
    }

    /// Whether `(head, relation, tail)` is a known fact.
    pub fn contains(&self, triple: &RelTriple) -> bool {
        self.relations
            .get(&triple.relation)
            .is_some_and(|p| p.contains(triple.head, triple.tail))
    }

    /// Number of distinct pairs observed for a relation (0 if unknown).
    pub fn support(&self, relation: RelationId) -> usize {
        self.relations.get(&relation).map_or(0, RelationPairs::len)
    }

    /// Relation ids in ascending order.
    pub fn relations(&self) -> impl Iterator<Item = RelationId> + '_ {
        self.relations.keys().copied()
    }

    /// Number of relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether no relation is indexed.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
