//! Process tracking primitives.
//!
//! - [`ProcessState`]: canonical lifecycle state shared by every backend
//! - [`translate()`]: backend label to canonical state
//! - [`make_id`] / [`unmake_id`]: `(upid, round)` identity encoding
//! - [`ProcessRecord`]: one logical process, with or without a backend handle
//! - [`ProcessRegistry`]: the per-supervisor map of records

pub mod id;
pub mod record;
pub mod registry;
pub mod state;
pub mod translate;

pub use id::{make_id, unmake_id};
pub use record::{ProcessRecord, LOST_ON_SUBMISSION};
pub use registry::{ProcessMap, ProcessRegistry};
pub use state::ProcessState;
pub use translate::translate;
