use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Could not decode a stored value: {0}")]
    DecodeError(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::UniqueViolation(db.message().to_string()),
            sqlx::Error::RowNotFound => Self::NotFound("Row not found".to_string()),
            e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => Self::DecodeError(e.to_string()),
            e => Self::DatabaseError(e.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::DatabaseError(format!("Migration failed. {e}"))
    }
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }
}
