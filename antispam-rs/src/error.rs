use thiserror::Error;

#[derive(Error, Debug)]
pub enum AntispamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid list entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("GeoIP database error: {0}")]
    GeoDatabase(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for AntispamError {
    fn from(err: config::ConfigError) -> Self {
        AntispamError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AntispamError>;
