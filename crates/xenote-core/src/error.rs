use thiserror::Error;

#[derive(Debug, Error)]
pub enum XenoteError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("No document has been staged for save")]
    NothingStaged,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, XenoteError>;
