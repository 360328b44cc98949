#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SnpFinderError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("API error from {api}: {message}")]
    Api { api: String, message: String },

    #[error("API JSON error from {api}: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected response from {api}: missing field '{path}'")]
    MissingField { api: String, path: String },

    #[error("Unexpected response from {api}: '{value}' at '{path}'")]
    UnexpectedValue {
        api: String,
        path: String,
        value: String,
    },

    #[error("{entity} '{id}' not found.\n\n{suggestion}")]
    NotFound {
        entity: String,
        id: String,
        suggestion: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Batch retrieval incomplete: {failed} failed. {reason}\n\nThe result table was left unchanged.")]
    PartialBatch { failed: String, reason: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operation-level classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Transport,
    UpstreamFormat,
    VariantNotFound,
    PartialBatchFailure,
    Cancelled,
    Local,
}

impl SnpFinderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_) => ErrorCategory::Configuration,
            Self::HttpClientInit(_) | Self::Http(_) | Self::HttpMiddleware(_) | Self::Api { .. } => {
                ErrorCategory::Transport
            }
            Self::ApiJson { .. } | Self::MissingField { .. } | Self::UnexpectedValue { .. } => {
                ErrorCategory::UpstreamFormat
            }
            Self::NotFound { .. } => ErrorCategory::VariantNotFound,
            Self::PartialBatch { .. } => ErrorCategory::PartialBatchFailure,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Template(_) | Self::Json(_) | Self::Csv(_) | Self::Io(_) => ErrorCategory::Local,
        }
    }
}
