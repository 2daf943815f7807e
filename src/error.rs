use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
