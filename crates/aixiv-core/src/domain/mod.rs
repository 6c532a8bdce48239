//! Domain model for the orchestration core.

pub mod error;
pub mod lifecycle;

pub use error::{RailError, Result, RetryClass, StageError};
pub use lifecycle::{next_state, Trigger};
