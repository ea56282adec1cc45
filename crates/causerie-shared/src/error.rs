use thiserror::Error;

#[derive(Error, Debug)]
pub enum WidgetError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Chat client not initialized")]
    NotInitialized,

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("No platform data directory available")]
    NoDataDir,

    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File type not allowed: {0}")]
    FileTypeNotAllowed(String),
}
