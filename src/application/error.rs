use thiserror::Error;

use crate::{cascade::StoreError, infra::error::InfraError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infra_errors_render_transparently() {
        let err = AppError::from(InfraError::configuration("queue.directory is required"));
        assert_eq!(
            err.to_string(),
            "configuration error: queue.directory is required"
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: AppError = StoreError::InvalidKey("../x".to_string()).into();
        assert!(matches!(err, AppError::Store(_)));
    }
}
