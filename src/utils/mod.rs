//! Pure utility functions.
//!
//! Host bootstrap, machine identity and retry schedules shared across the
//! transports.

pub mod bootstrap;
pub mod machine;
pub mod retry;
