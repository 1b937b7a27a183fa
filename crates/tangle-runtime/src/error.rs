use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown property: {key}")]
    UnknownProperty { key: String },

    #[error("property {key} does not hold a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("property {key} is read-only")]
    ReadOnly { key: String },

    #[error("cannot change property {key}: record is frozen")]
    Frozen { key: String },

    #[error("property already defined: {key}")]
    DuplicateProperty { key: String },

    #[error("invalid field name {name:?}: {reason}")]
    InvalidField { name: String, reason: &'static str },

    #[error("duplicate field: {name}")]
    DuplicateField { name: String },

    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid runtime config: {message}")]
    Config { message: String },
}

impl Error {
    #[must_use]
    pub fn unknown(key: impl Into<String>) -> Self {
        Self::UnknownProperty { key: key.into() }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
