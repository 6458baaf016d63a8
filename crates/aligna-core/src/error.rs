use thiserror::Error;

/// Errors that can occur while building or validating alignment data.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Structural validation failed.
    #[error("Validation error: {0}")]
    Validation(String),
    /// An entity id lies outside `[0, ent_num)`.
    #[error("Entity {entity} out of range (ent_num = {ent_num})")]
    EntityOutOfRange {
        /// Offending id.
        entity: usize,
        /// Size of the entity space.
        ent_num: usize,
    },
    /// Two sequences that must be parallel have different lengths.
    #[error("Length mismatch for {what}: {left} vs {right}")]
    LengthMismatch {
        /// Which pair of sequences.
        what: &'static str,
        /// Length of the first sequence.
        left: usize,
        /// Length of the second sequence.
        right: usize,
    },
    /// An entity occurs in both the seed and the reference alignment.
    #[error("Entity {entity} appears in both seed and reference alignment")]
    OverlappingAlignment {
        /// Offending id.
        entity: usize,
    },
}

/// Result type alias for aligna-core.
pub type Result<T> = std::result::Result<T, Error>;
