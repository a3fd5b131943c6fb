//! `transcode-worker` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod reconnect;
pub mod registry;
pub mod sampler;
pub mod supervisor;
pub mod worker;
