//! Sparse `[entity, time_bucket]` feature matrix in coordinate form.

use crate::entity::EntityId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Temporal features: nonzero coordinates, their values, and `time_size`.
///
/// Invariants (checked by [`TemporalFeatures::new`]): coordinates and values
/// are parallel, every entity id is below `ent_num`, every bucket is below
/// `time_size`, no coordinate repeats, every value is finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTemporalFeatures")]
pub struct TemporalFeatures {
    coords: Vec<(EntityId, usize)>,
    values: Vec<f32>,
    time_size: usize,
    ent_num: usize,
}

#[derive(Deserialize)]
struct RawTemporalFeatures {
    coords: Vec<(EntityId, usize)>,
    values: Vec<f32>,
    time_size: usize,
    ent_num: usize,
}

impl TryFrom<RawTemporalFeatures> for TemporalFeatures {
    type Error = Error;

    fn try_from(raw: RawTemporalFeatures) -> Result<Self> {
        Self::new(raw.coords, raw.values, raw.time_size, raw.ent_num)
    }
}

impl TemporalFeatures {
    /// Validate and build.
    pub fn new(
        coords: Vec<(EntityId, usize)>,
        values: Vec<f32>,
        time_size: usize,
        ent_num: usize,
    ) -> Result<Self> {
        if coords.len() != values.len() {
            return Err(Error::LengthMismatch {
                what: "temporal coordinates and values",
                left: coords.len(),
                right: values.len(),
            });
        }

        let mut seen = HashSet::with_capacity(coords.len());
        for (&(entity, bucket), value) in coords.iter().zip(&values) {
            if entity >= ent_num {
                return Err(Error::EntityOutOfRange { entity, ent_num });
            }
            if bucket >= time_size {
                return Err(Error::Validation(format!(
                    "time bucket {} out of range (time_size = {})",
                    bucket, time_size
                )));
            }
            if !value.is_finite() {
                return Err(Error::Validation(format!(
                    "non-finite temporal value at ({}, {})",
                    entity, bucket
                )));
            }
            if !seen.insert((entity, bucket)) {
                return Err(Error::Validation(format!(
                    "duplicate temporal coordinate ({}, {})",
                    entity, bucket
                )));
            }
        }

        Ok(Self {
            coords,
            values,
            time_size,
            ent_num,
        })
    }

    /// No temporal signal at all.
    pub fn empty(ent_num: usize, time_size: usize) -> Self {
        Self {
            coords: Vec::new(),
            values: Vec::new(),
            time_size,
            ent_num,
        }
    }

    /// Number of time buckets.
    pub fn time_size(&self) -> usize {
        self.time_size
    }

    /// Number of rows (entities).
    pub fn ent_num(&self) -> usize {
        self.ent_num
    }

    /// Number of stored nonzeros.
    pub fn nnz(&self) -> usize {
        self.coords.len()
    }

    /// Coordinates (`time_matrix` in the row-per-nonzero layout).
    pub fn coords(&self) -> &[(EntityId, usize)] {
        &self.coords
    }

    /// Values parallel to [`TemporalFeatures::coords`].
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Iterate `(entity, bucket, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, usize, f32)> + '_ {
        self.coords
            .iter()
            .zip(&self.values)
            .map(|(&(e, b), &v)| (e, b, v))
    }

    /// Per-entity `(bucket, value)` lists, indexed by entity id.
    pub fn profiles(&self) -> Vec<Vec<(usize, f32)>> {
        let mut rows = vec![Vec::new(); self.ent_num];
        for (e, b, v) in self.iter() {
            rows[e].push((b, v));
        }
        rows
    }
}
