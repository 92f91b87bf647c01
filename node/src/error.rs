use thiserror::Error;

#[derive(Debug, Error)]
pub enum TangleError {
    #[error("store error: {0}")]
    Store(#[from] tangle_store::StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] tangle_ledger::LedgerError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("operation did not complete before its deadline")]
    AwaitTimeout,

    #[error("the node is shutting down")]
    Shutdown,

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
