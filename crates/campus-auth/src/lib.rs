//! campus-auth
//!
//! Request-identity primitives used by the campus gate. Three recurring problems:
//!
//! - **Reading the tenant label** out of a `Host` header (`acme.platform.test` -> `acme`)
//! - **Finding the bearer credential** in the Supabase auth cookie (plain, chunked, or
//!   `base64-` encoded) or the `Authorization` header
//! - **Verifying JWTs** against a JWKS (kid selection, algorithm allow-list, iss/aud/leeway
//!   checks) or a shared HS256 secret
//!
//! Nothing in here performs policy: a parsed label may still be reserved, and a verified
//! token still has to be turned into a session with live role memberships.
//!
//! ## Quick start
//! ```no_run
//! use campus_auth::{HostConfig, JwtVerifier, KeySource, VerifyOptions, extract_credential, parse_host};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let hosts = HostConfig::with_root("platform.test");
//! assert_eq!(parse_host("acme.platform.test:443", &hosts).as_deref(), Some("acme"));
//!
//! let cred = extract_credential(None, Some("Bearer eyJ..."), "sb-ref-auth-token").unwrap();
//! let verified = JwtVerifier::default()
//!     .verify(
//!         &cred.token,
//!         &KeySource::Url("https://ref.supabase.co/auth/v1/.well-known/jwks.json".to_string()),
//!         &VerifyOptions::default(),
//!     )
//!     .await?;
//! println!("sub={:?}", verified.sub());
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]

mod credential;
mod error;
mod host;
mod jwt;

pub use credential::{
    Credential, CredentialSource, bearer_token, decode_session_cookie, extract_credential,
    parse_cookie_header,
};
pub use error::{Error, Result};
pub use host::{HostConfig, is_valid_label, parse_host};
pub use jwt::{Jwk, JwksSet, JwtVerifier, KeySource, SupabaseClaims, VerifiedJwt, VerifyOptions};
