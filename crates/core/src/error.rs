#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unreadable CPU statistics: {0}")]
    CpuStats(String),
}
