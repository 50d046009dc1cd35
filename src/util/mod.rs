//! Utilities: canonical hashing and runtime constants.

pub mod canon;
pub mod constants;
pub mod deadline;

pub use canon::{canonical_json, content_key, hex_sha256};
pub use constants::*;
pub use deadline::Deadline;
