use crate::store::StoreError;

/// Failure while turning one unit into index records
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to analyze {url}: {message}")]
    Analysis { url: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not an indexable unit: {url}")]
    InvalidUnit { url: String },
}

impl IndexError {
    pub fn analysis(url: impl Into<String>, message: impl Into<String>) -> Self {
        IndexError::Analysis {
            url: url.into(),
            message: message.into(),
        }
    }
}
