//! Error type shared by the store, resolver and link handling.

use thiserror::Error;

use crate::links::LinkRejection;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You don't have permission to {0}")]
    Forbidden(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    LinkRejected(#[from] LinkRejection),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl HubError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        HubError::Invalid(msg.into())
    }

    pub(crate) fn forbidden(what: impl Into<String>) -> Self {
        HubError::Forbidden(what.into())
    }
}
