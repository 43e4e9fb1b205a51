use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("mention field `{field}` is required")]
    MissingField { field: &'static str },
    #[error("mention field `{field}` exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn too_long(field: &'static str, max: usize) -> Self {
        Self::FieldTooLong { field, max }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
