//! Ephemeral worker identity.
//!
//! A new identity is generated on every process start and is never
//! persisted; the orchestrator learns it from the announce sent on each
//! (re)connection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIdentity {
    pub worker_id: Uuid,
    pub host: String,
}

impl WorkerIdentity {
    /// Generate a fresh identity for `host`.
    pub fn generate(host: impl Into<String>) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            host: host.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_generation_is_unique() {
        let a = WorkerIdentity::generate("node-1");
        let b = WorkerIdentity::generate("node-1");
        assert_ne!(a.worker_id, b.worker_id);
        assert_eq!(a.host, b.host);
    }

    #[test]
    fn serializes_camel_case() {
        let id = WorkerIdentity::generate("node-1");
        let v = serde_json::to_value(&id).expect("serializable");
        assert_eq!(v["host"], "node-1");
        assert_eq!(v["workerId"], id.worker_id.to_string());
    }
}
