/// Domain-specific error types for the classifieds core
///
/// Every variant carries a human-readable message so the request layer can
/// surface it directly without re-deriving context.

#[derive(Debug, thiserror::Error)]
pub enum ClassifiedsError {
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    #[error("Not found: {message}")]
    NotFound {
        message: String,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
    },

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for ClassifiedsError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => ClassifiedsError::Conflict {
                message: db.message().to_string(),
            },
            _ => ClassifiedsError::Persistence(e.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ClassifiedsError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        ClassifiedsError::Persistence(format!("Migration failed: {}", e))
    }
}

impl ClassifiedsError {
    /// Helper to create input errors with field names
    ///
    /// Example:
    /// ```
    /// use classifieds::errors::ClassifiedsError;
    /// let err = ClassifiedsError::invalid("query", "Search query must be a string.");
    /// ```
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ClassifiedsError::InvalidInput {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ClassifiedsError::NotFound {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ClassifiedsError::Unauthorized {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ClassifiedsError::Conflict {
            message: message.into(),
        }
    }

    /// Short machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            ClassifiedsError::InvalidInput { .. } => "INVALID INPUT",
            ClassifiedsError::NotFound { .. } => "NOT FOUND",
            ClassifiedsError::Unauthorized { .. } => "UNAUTHORIZED",
            ClassifiedsError::Conflict { .. } => "CONFLICT",
            ClassifiedsError::Config(_) => "CONFIGURATION",
            ClassifiedsError::Persistence(_) => "PERSISTENCE FAILURE",
        }
    }
}

pub type Result<T, E = ClassifiedsError> = std::result::Result<T, E>;
