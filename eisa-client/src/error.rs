use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to fetch resources from {url}: HTTP {status}")]
    Discovery {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Error fetching data from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchCause,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid JSON payload: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Discovery { status, .. } => Some(*status),
            ApiError::Fetch {
                source: FetchCause::Status { status, .. },
                ..
            } => Some(*status),
            ApiError::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Why a single page request inside a pagination loop failed.
#[derive(Error, Debug)]
pub enum FetchCause {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid page payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid next link '{link}': {reason}")]
    NextLink { link: String, reason: url::ParseError },
}

pub type Result<T> = std::result::Result<T, ApiError>;
