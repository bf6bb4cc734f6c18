//! ComfyUI REST client, server lifecycle, and completion polling.
//!
//! Provides the HTTP API wrapper used to submit workflows and read
//! history, the readiness gate that launches a local ComfyUI process
//! once per adapter process, and the bounded poll that waits for a
//! queued prompt to finish.

pub mod api;
pub mod poll;
pub mod server;
