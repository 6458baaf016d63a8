//! Immutable per-entity embedding snapshot.
//!
//! The embedding model owns its parameters; the engine only ever sees a
//! snapshot taken at a phase boundary. Worker threads borrow a single
//! `&EmbeddingSnapshot` for the length of a round; nothing mutates it while
//! they run.

use crate::entity::EntityId;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// One row per entity, `ent_num x dim`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSnapshot {
    matrix: Array2<f32>,
}

impl EmbeddingSnapshot {
    /// Wrap a matrix. Every value must be finite.
    pub fn new(matrix: Array2<f32>) -> Result<Self> {
        if let Some(((row, col), v)) = matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "non-finite embedding value {} at ({}, {})",
                v, row, col
            )));
        }
        Ok(Self { matrix })
    }

    /// Build from row vectors of equal length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::Validation(format!(
                    "row {} has dimension {} but expected {}",
                    i,
                    row.len(),
                    dim
                )));
            }
            flat.extend_from_slice(row);
        }
        let matrix = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| Error::Validation(e.to_string()))?;
        Self::new(matrix)
    }

    /// Number of entities.
    pub fn num_entities(&self) -> usize {
        self.matrix.nrows()
    }

    /// Embedding dimension.
    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    /// Full matrix view.
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.matrix.view()
    }

    /// Vector of one entity.
    pub fn row(&self, entity: EntityId) -> Result<ArrayView1<'_, f32>> {
        if entity >= self.num_entities() {
            return Err(Error::EntityOutOfRange {
                entity,
                ent_num: self.num_entities(),
            });
        }
        Ok(self.matrix.row(entity))
    }

    /// Rows of `ids`, in order, as a new matrix.
    pub fn gather(&self, ids: &[EntityId]) -> Result<Array2<f32>> {
        if let Some(&bad) = ids.iter().find(|&&e| e >= self.num_entities()) {
            return Err(Error::EntityOutOfRange {
                entity: bad,
                ent_num: self.num_entities(),
            });
        }
        Ok(self.matrix.select(Axis(0), ids))
    }
}
