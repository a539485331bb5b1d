//! Recreating a persisted tree on an account.

pub mod progress;
pub mod reconstructor;
pub mod retry;

pub use progress::{Progress, count_operations};
pub use reconstructor::{Reconstructor, ReplayError, ReplayOptions, ReplayReport};
pub use retry::{BackoffPolicy, ErrorClass, ErrorClassTable, RetryError, RetryGovernor};
