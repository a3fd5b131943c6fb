//! Environment overlay for spawned jobs.
//!
//! Job payloads are built on the orchestrator's host, which may run a
//! different architecture than this worker. Before a job is launched, the
//! architecture-bound keys in its environment are re-bound to the values
//! of the worker process itself.

use std::collections::HashMap;

/// Keys whose values always come from the worker's own environment.
pub const OVERLAY_KEYS: [&str; 3] = [
    "PLEX_ARCH",
    "PLEX_MEDIA_SERVER_INFO_MODEL",
    "FFMPEG_EXTERNAL_LIBS",
];

/// Overlay `base` with the current process environment.
pub fn overlay(base: &HashMap<String, String>) -> HashMap<String, String> {
    overlay_with(base, |key| std::env::var(key).ok())
}

/// Overlay `base` using `lookup` as the worker environment.
///
/// The input is never modified. For every key in [`OVERLAY_KEYS`] the
/// worker's value replaces the payload's; if the worker has no value the
/// key is dropped from the result. All other keys pass through unchanged.
pub fn overlay_with<F>(base: &HashMap<String, String>, lookup: F) -> HashMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = base.clone();
    for key in OVERLAY_KEYS {
        match lookup(key) {
            Some(value) => {
                env.insert(key.to_string(), value);
            }
            None => {
                env.remove(key);
            }
        }
    }
    env
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
