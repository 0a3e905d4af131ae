use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid signature")]
    Signature,
    #[error("failed to sign token: {0}")]
    Signing(&'static str),
    #[error("signing key unavailable")]
    SigningKeyUnavailable,
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("failed to encode RSA public key")]
    KeyEncode,
    #[error("rsa error")]
    Rsa(#[from] rsa::Error),
    #[error("invalid payload key length: {0}")]
    KeyLength(usize),
    #[error("failed to decrypt payload")]
    Decrypt,
    #[error("failed to compress payload")]
    Compress(#[from] std::io::Error),
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
}
