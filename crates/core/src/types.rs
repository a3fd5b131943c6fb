/// Opaque task identifier assigned by the orchestrator.
pub type TaskId = String;

/// Sequence number assigned to every process the worker spawns.
pub type RunId = u64;
