use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a request's identity could not be established.
///
/// Callers in the gate treat every variant the same way (no session); the
/// distinction exists for logs and tests.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed session cookie: {0}")]
    Cookie(String),

    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    #[error("token expired")]
    Expired,

    /// Algorithm outside the allow-list, or an HS256 token checked against a key set.
    #[error("unsupported JWT algorithm: {0:?}")]
    UnsupportedAlg(jsonwebtoken::Algorithm),

    /// Signature, issuer, audience or `nbf` check failed.
    #[error("token rejected: {0}")]
    Validation(String),

    #[error("JWKS error: {0}")]
    Jwks(String),

    #[error("no key in the JWKS matches the token")]
    NoMatchingKey,

    #[cfg(feature = "fetch-reqwest")]
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl Error {
    /// Map a `jsonwebtoken` decode failure, keeping expiry distinguishable.
    pub(crate) fn rejected(e: &jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::Expired,
            _ => Error::Validation(e.to_string()),
        }
    }
}
