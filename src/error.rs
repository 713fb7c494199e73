use thiserror::Error;

use crate::llm::LlmError;
use crate::nlq::athena::AthenaError;

// Validator rejections and cancellations are outcomes, not errors:
// rejections travel in the response envelope, and a cancelled request
// simply drops its future before any cache write.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("model transport error: {0}")]
    ModelTransport(String),

    #[error("model protocol error: {0}")]
    ModelProtocol(String),

    #[error("{0}")]
    Athena(AthenaError),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<LlmError> for Error {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Connection(msg) => Error::ModelTransport(msg),
            LlmError::Response(msg) => Error::ModelProtocol(msg),
            LlmError::Config(msg) => Error::Config(msg),
        }
    }
}

impl From<AthenaError> for Error {
    fn from(e: AthenaError) -> Self {
        Error::Athena(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
