use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failures and in-band LMS exceptions alike.
    #[error("Failed to connect to LMS: {0}")]
    ExternalService(String),

    #[error("Course {0} is the LMS site course and holds no students")]
    SiteCourse(i64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn is_gateway(&self) -> bool {
        matches!(self, IngestError::ExternalService(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
