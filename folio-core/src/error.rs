use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("durability error: {0}")]
    Durability(#[source] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("worker request failed: {0}")]
    WorkerRequest(#[from] reqwest::Error),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("video encoding failed: {0}")]
    Encode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
