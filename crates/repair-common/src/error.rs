use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepairError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Write task failed: {0}")]
    Task(String),
}

impl RepairError {
    /// Whether a failed write must abort the run.
    /// Duplicate keys mean the row is already there, which repair expects.
    pub fn is_fatal_write(&self) -> bool {
        !matches!(self, RepairError::DuplicateKey(_))
    }

    /// Process exit status for an error that ended the run
    pub fn exit_code(&self) -> i32 {
        match self {
            RepairError::Database(_) | RepairError::DuplicateKey(_) | RepairError::Task(_) => 9,
            _ => 1,
        }
    }
}
