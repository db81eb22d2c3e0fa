use crate::types::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty field {0}")]
    Empty(&'static str),
    #[error("too long {0}")]
    TooLong(&'static str),
    #[error("missing content for kind")]
    MissingContent,
    #[error("media reference on text message")]
    UnexpectedMedia,
    #[error("sender and receiver are the same")]
    SelfAddressed,
    #[error("provisional id from remote")]
    ProvisionalId,
}

pub fn validate_user_id(user: &UserId) -> Result<(), ValidationError> {
    if user.value.trim().is_empty() {
        return Err(ValidationError::Empty("user_id"));
    }
    Ok(())
}

fn validate_media_ref(kind: MessageKind, media_ref: Option<&str>) -> Result<(), ValidationError> {
    match (kind.is_media(), media_ref) {
        (true, None) => Err(ValidationError::MissingContent),
        (true, Some(r)) if r.trim().is_empty() => Err(ValidationError::Empty("file_url")),
        (false, Some(_)) => Err(ValidationError::UnexpectedMedia),
        _ => Ok(()),
    }
}

/// Shape check for a record received from the store or the push stream.
pub fn validate_message(message: &Message) -> Result<(), ValidationError> {
    if message.id.value.trim().is_empty() {
        return Err(ValidationError::Empty("id"));
    }
    if message.is_provisional() {
        return Err(ValidationError::ProvisionalId);
    }
    validate_user_id(&message.sender_id)?;
    validate_user_id(&message.receiver_id)?;
    if message.sender_id == message.receiver_id {
        return Err(ValidationError::SelfAddressed);
    }
    validate_media_ref(message.kind, message.media_ref.as_deref())
}

pub fn validate_outgoing(
    content: &str,
    kind: MessageKind,
    media_ref: Option<&str>,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    if content.len() > limits.max_text_bytes {
        return Err(ValidationError::TooLong("content"));
    }
    if matches!(kind, MessageKind::Text) && content.trim().is_empty() {
        return Err(ValidationError::MissingContent);
    }
    validate_media_ref(kind, media_ref)
}

pub fn validate_media_blob(
    kind: MessageKind,
    len: usize,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    if !kind.is_media() {
        return Err(ValidationError::UnexpectedMedia);
    }
    if len == 0 {
        return Err(ValidationError::Empty("blob"));
    }
    if len > limits.max_media_bytes {
        return Err(ValidationError::TooLong("blob"));
    }
    Ok(())
}
