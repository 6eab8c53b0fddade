use bastion_core::errors::StoreError;
use thiserror::Error;

pub mod approval;

pub use approval::SqlApprovalStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(source) => StoreError::Backend(source.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}
