use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O failure. The pipeline treats this as fatal: a node whose
    /// persistent store misbehaves cannot continue safely.
    #[error("storage fault: {0}")]
    Fault(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
