//! Error types for fetching, storing and querying observations.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single source adapter.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request could not be built or sent, or the status was not 2xx.
    #[error("{source_name}: transport error: {message}")]
    Transport {
        source_name: String,
        message: String,
    },

    /// The payload did not match the expected JSON or XML shape.
    #[error("{source_name}: failed to decode response: {message}")]
    Decode {
        source_name: String,
        message: String,
    },

    /// The upstream answered but flagged the response as unsuccessful.
    #[error("{source_name}: api error: {message}")]
    Api {
        source_name: String,
        message: String,
    },

    /// Nothing usable survived currency filtering.
    #[error("{source_name}: no supported currency rates found")]
    EmptyResult { source_name: String },
}

impl FetchError {
    pub fn transport(source_name: &str, message: impl ToString) -> Self {
        Self::Transport {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn decode(source_name: &str, message: impl ToString) -> Self {
        Self::Decode {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn api(source_name: &str, message: impl ToString) -> Self {
        Self::Api {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    pub fn empty(source_name: &str) -> Self {
        Self::EmptyResult {
            source_name: source_name.to_string(),
        }
    }

    pub fn source_name(&self) -> &str {
        match self {
            Self::Transport { source_name, .. }
            | Self::Decode { source_name, .. }
            | Self::Api { source_name, .. }
            | Self::EmptyResult { source_name } => source_name,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("invalid observation: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Backend(#[from] fjall::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the aggregation layer.
#[derive(Error, Debug)]
pub enum RateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid filter: {0}")]
    Validation(String),

    #[error("refresh exceeded deadline of {0:?}")]
    Deadline(Duration),

    #[error("refresh task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RateError::Store(StoreError::NotFound))
    }
}
