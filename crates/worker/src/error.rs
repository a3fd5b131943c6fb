use transcode_core::error::CoreError;

/// Invalid value in the worker's environment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a valid {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// A job process could not be started.
#[derive(Debug, thiserror::Error)]
#[error("Failed to spawn {program}: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// A CPU utilisation sample could not be taken.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Failed to read CPU statistics: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] CoreError),

    #[error("No CPU time elapsed during the sample window")]
    NoElapsedTime,
}

/// Errors on the orchestrator event channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Connecting, sending, or receiving on the WebSocket failed.
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// An outbound message could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(CoreError),
}
