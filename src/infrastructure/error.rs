use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Alarm authority error: {0}")]
    Authority(String),
    #[error("Alarm authority does not support {0}")]
    Unsupported(&'static str),
    #[error("Alarm authority timed out during {0}")]
    Timeout(String),
}
