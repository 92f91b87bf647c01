use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("node connection error: {0}")]
    Connection(String),

    #[error("unknown address")]
    UnknownAddress,
}
