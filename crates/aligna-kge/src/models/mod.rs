//! Built-in embedding models.
//!
//! Each model implements [`AlignmentModel`](crate::AlignmentModel) and is
//! registered by tag in [`ModelRegistry::with_builtin`](crate::ModelRegistry::with_builtin).
//!
//! | Tag | Model | Backend |
//! |-----|-------|---------|
//! | `table` | [`TableModel`]: entity lookup table + TransE relations | ndarray |

mod table;

pub use table::TableModel;
