//! Domain logic for the seamless-loop render adapter.
//!
//! Everything here is free of network I/O: job request parsing,
//! payload decoding, workflow template binding and parametrization,
//! and output extraction from completed history records.

pub mod error;
pub mod history;
pub mod job;
pub mod naming;
pub mod payload;
pub mod workflow;
