//! `seamloop-worker` library crate.
//!
//! The job handler, input staging, configuration and HTTP surface of the
//! seamless-loop adapter. The binary entrypoint lives in `main.rs`.

pub mod config;
pub mod handler;
pub mod router;
pub mod routes;
pub mod staging;
pub mod state;
