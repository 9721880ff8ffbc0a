//! Chronicle CLI — error types.

use chronicle_core::error::StoreError;
use thiserror::Error;

/// Startup and command errors for the CLI.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Writing command output failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    /// Encoding command output failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl AppError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78,
            Self::Store(err) if err.is_conflict() => 75,
            Self::Store(
                StoreError::AggregateNotFound(_)
                | StoreError::DeletedAggregate(_)
                | StoreError::TransactionNotFound(_),
            ) => 66,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_missing_things_map_to_no_input() {
        assert_eq!(
            AppError::from(StoreError::AggregateNotFound(Uuid::new_v4())).exit_code(),
            66
        );
        assert_eq!(
            AppError::from(StoreError::TransactionNotFound(Uuid::new_v4())).exit_code(),
            66
        );
    }

    #[test]
    fn test_conflict_is_temporary_failure() {
        let err = AppError::from(StoreError::RepositoryConflict {
            transaction_uuid: Uuid::new_v4(),
            reason: "claimed".into(),
        });

        assert_eq!(err.exit_code(), 75);
    }

    #[test]
    fn test_store_error_message_is_transparent() {
        let id = Uuid::new_v4();

        let err = AppError::from(StoreError::DeletedAggregate(id));

        assert_eq!(err.to_string(), format!("aggregate deleted: {id}"));
    }

    #[test]
    fn test_config_error_exit_code() {
        assert_eq!(AppError::Config("missing".into()).exit_code(), 78);
        assert_eq!(
            AppError::Store(StoreError::Infrastructure("down".into())).exit_code(),
            1
        );
    }
}
