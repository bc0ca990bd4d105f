//! Fatal error taxonomy for the cascade contract.
//!
//! Recoverable level failures never surface here — they stay inside
//! `Result::metadata.failed_levels` (see [`crate::result`]). Only kinds a
//! caller must react to at the `infer` boundary live in this enum.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("no levels configured")]
    NoLevelsConfigured,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("all levels failed: {0}")]
    AllLevelsFailed(String),

    #[error("overall deadline exceeded")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn all_levels_failed(message: impl Into<String>) -> Self {
        Self::AllLevelsFailed(message.into())
    }
}
