use thiserror::Error;

/// Everything that can go wrong talking to the market service or mutating
/// through it. Malformed payload entries never show up here: the
/// normaliser drops them on the way in.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Request could not be sent, came back with a non-success status, or
    /// the body could not be read.
    #[error("request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },

    /// Bad user input, caught before any request is made.
    #[error("{0}")]
    Validation(String),

    /// The service answered `ok: false` or with an explicit error message.
    #[error("{0}")]
    Rejected(String),
}

impl MarketError {
    pub fn network(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        MarketError::Network { endpoint: endpoint.into(), reason: reason.to_string() }
    }
}

impl From<reqwest::Error> for MarketError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e
            .url()
            .map(|url| url.path().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let reason = match e.status() {
            Some(status) => format!("status {status}"),
            None => e.to_string(),
        };
        MarketError::Network { endpoint, reason }
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
