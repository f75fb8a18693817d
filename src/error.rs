use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Completion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Optimization error: {0}")]
    Optimization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Nl2SqlError {
    /// Whether the generation loop may spend another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Nl2SqlError::Completion(_)
                | Nl2SqlError::Timeout { .. }
                | Nl2SqlError::Extraction(_)
                | Nl2SqlError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Nl2SqlError::Timeout { secs: 30 }.is_retryable());
        assert!(Nl2SqlError::Completion("503".to_string()).is_retryable());
        assert!(!Nl2SqlError::Cancelled.is_retryable());
        assert!(!Nl2SqlError::Config("missing key".to_string()).is_retryable());
    }
}
