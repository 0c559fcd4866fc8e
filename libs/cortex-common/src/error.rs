use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the engine to its callers.
///
/// Validation variants are raised synchronously by `submit` and never
/// produce a task. Per-task failures on the worker side are turned into
/// data (a failed `ExecutionResult`) and do not appear here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Exercise not found: {0}")]
    ExerciseNotFound(i64),

    #[error("Exercise {exercise_id} is a {expected} exercise, got a {actual} submission")]
    LanguageMismatch {
        exercise_id: i64,
        expected: String,
        actual: String,
    },

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Source code exceeds maximum size of {limit} bytes ({actual} bytes)")]
    SourceTooLarge { limit: usize, actual: usize },

    #[error("Result not available for task {0}")]
    ResultNotAvailable(Uuid),

    #[error("Submission not found: {0}")]
    SubmissionNotFound(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::UnsupportedLanguage(_) => "unsupported_language",
            EngineError::ExerciseNotFound(_) => "exercise_not_found",
            EngineError::LanguageMismatch { .. } => "language_mismatch",
            EngineError::InvalidSource(_) => "invalid_source",
            EngineError::SourceTooLarge { .. } => "source_too_large",
            EngineError::ResultNotAvailable(_) => "result_not_available",
            EngineError::SubmissionNotFound(_) => "submission_not_found",
            EngineError::Config(_) => "config",
            EngineError::Redis(_) => "redis",
            EngineError::Serialization(_) => "serialization",
            EngineError::Io(_) => "io",
        }
    }

    /// True for errors caused by the caller's input rather than infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedLanguage(_)
                | EngineError::ExerciseNotFound(_)
                | EngineError::LanguageMismatch { .. }
                | EngineError::InvalidSource(_)
                | EngineError::SourceTooLarge { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
