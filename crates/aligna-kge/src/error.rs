use thiserror::Error;

/// Errors raised by the alignment engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Data-model error from aligna-core.
    #[error(transparent)]
    Core(#[from] aligna_core::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration rejected before training started.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// No constructor registered under this tag.
    #[error("Unknown embedding module '{tag}' (available: {available})")]
    UnknownModel {
        /// Requested tag.
        tag: String,
        /// Comma-separated registered tags.
        available: String,
    },
    /// The model's update step produced a non-finite loss.
    #[error("Training diverged at epoch {epoch}, step {step} (loss = {loss})")]
    Divergence {
        /// Epoch (1-based).
        epoch: usize,
        /// Step within the epoch (0-based).
        step: usize,
        /// Offending loss value.
        loss: f32,
    },
    /// The model's update step reported a failure.
    #[error("Model update failed: {0}")]
    ModelUpdate(String),
    /// A worker failed to complete its shard; the round is void.
    #[error("Shard {shard} failed: {reason}")]
    ShardFailed {
        /// Shard index.
        shard: usize,
        /// What went wrong.
        reason: String,
    },
    /// Worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    /// Embedding matrix shape does not match the task.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Result type alias for aligna-kge.
pub type Result<T> = std::result::Result<T, Error>;
