//! Cross-process coordination primitives.
//!
//! In-process locks have no effect across processes; these two are the only
//! machine-wide coordination the transports use.

mod named_mutex;
mod resource_counter;

pub use named_mutex::{LockOutcome, NamedMutex, NamedMutexGuard};
pub use resource_counter::ResourceCounter;
