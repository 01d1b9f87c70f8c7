use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum NodeError {
    #[error("Invalid child id {0}: 255 is reserved for the node itself")]
    InvalidChildId(u8),

    #[error("Child id {0} is already registered")]
    DuplicateChild(u8),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
