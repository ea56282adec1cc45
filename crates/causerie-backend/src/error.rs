use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Row not found")]
    NotFound,

    #[error("Channel closed")]
    Closed,
}
