//! Pure domain logic for the transcode worker.
//!
//! Nothing in this crate touches the network or spawns processes. The
//! `transcode-worker` crate wires these pieces into the running daemon.

pub mod accel;
pub mod benchmark;
pub mod cpu;
pub mod env_overlay;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod task;
pub mod types;
