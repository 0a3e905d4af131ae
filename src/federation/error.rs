use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status}")]
    Upstream { provider: &'static str, status: u16 },
    #[error("request to identity provider failed")]
    Transport(#[from] reqwest::Error),
    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },
    #[error("{0} profile has no usable email")]
    MissingEmail(&'static str),
    #[error("token was issued for another client")]
    AudienceMismatch,
}
