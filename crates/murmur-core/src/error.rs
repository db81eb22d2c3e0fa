use murmur_api::ValidationError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("fetch {0}")]
    Fetch(String),
    #[error("write {0}")]
    Write(String),
    #[error("validation {0}")]
    Validation(String),
    #[error("media {0}")]
    Media(String),
    #[error("not found")]
    NotFound,
    #[error("session closed")]
    Closed,
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
