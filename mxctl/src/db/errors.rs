use thiserror::Error;

/// Unified error type for database operations that application code can handle
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation")]
    ForeignKeyViolation { table: Option<String>, message: String },

    /// Check constraint violation
    #[error("Check constraint violation")]
    CheckViolation { table: Option<String>, message: String },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                // SQLite does not report the table separately, it is part of the message
                let table = db_err.table().map(|s| s.to_string()).or_else(|| table_from_message(&message));
                if db_err.is_unique_violation() {
                    DbError::UniqueViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table,
                        message,
                    }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation { table, message }
                } else if db_err.is_check_violation() {
                    DbError::CheckViolation { table, message }
                } else {
                    DbError::Other(anyhow::Error::from(err))
                }
            }
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Extract the table from SQLite constraint messages such as
/// "UNIQUE constraint failed: users.username".
fn table_from_message(message: &str) -> Option<String> {
    let (_, columns) = message.split_once(": ")?;
    let first = columns.split(',').next()?.trim();
    let (table, _) = first.split_once('.')?;
    Some(table.to_string())
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;
