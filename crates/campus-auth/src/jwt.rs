//! Access-token verification (JWKS or shared secret).

use crate::{Error, Result};

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "cache")]
use dashmap::DashMap;
#[cfg(feature = "cache")]
use once_cell::sync::Lazy;

/// A JWKS (JSON Web Key Set).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwksSet {
    pub keys: Vec<Jwk>,
}

/// Public JWK as published by the Supabase auth server (RSA or EC).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC").
    pub kty: String,
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub alg: Option<String>,

    // RSA
    pub n: Option<String>,
    pub e: Option<String>,

    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Where verification keys come from.
#[derive(Clone)]
pub enum KeySource {
    /// Fetch a JWKS from this URL (cached when the `cache` feature is on).
    Url(String),
    /// Parse this JWKS JSON string.
    Json(String),
    /// Use this parsed key set.
    Set(JwksSet),
    /// Legacy HS256 project secret.
    Secret(String),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            KeySource::Json(_) => f.write_str("Json(..)"),
            KeySource::Set(set) => f.debug_tuple("Set").field(&set.keys.len()).finish(),
            KeySource::Secret(_) => f.write_str("Secret(<redacted>)"),
        }
    }
}

/// Options for token verification.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Expected issuer (`iss`), e.g. `https://<ref>.supabase.co/auth/v1`.
    pub issuer: Option<String>,

    /// Expected audience (`aud`). Supabase user tokens carry `authenticated`.
    pub audience: Option<String>,

    /// Allowed asymmetric algorithms. HS256 is only accepted with [`KeySource::Secret`].
    pub allowed_algs: Vec<Algorithm>,

    /// Clock skew/leeway in seconds.
    pub leeway_seconds: u64,

    /// Max cache age for a fetched JWKS (seconds).
    pub max_jwks_age_seconds: u64,

    /// Reject tokens without a `kid` header.
    pub require_kid: bool,

    /// Timeout for fetching the JWKS.
    pub fetch_timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: Some("authenticated".to_string()),
            allowed_algs: vec![Algorithm::RS256, Algorithm::ES256],
            leeway_seconds: 30,
            max_jwks_age_seconds: 600,
            require_kid: false,
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

/// Claims carried by a Supabase access token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupabaseClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Postgres role, `authenticated` for signed-in users.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub app_metadata: Value,
}

/// A verified JWT (header + claims).
#[derive(Debug, Clone)]
pub struct VerifiedJwt {
    pub header: Header,
    pub claims: Value,
}

impl VerifiedJwt {
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    pub fn sub(&self) -> Option<&str> {
        self.claim("sub").and_then(Value::as_str)
    }

    pub fn iss(&self) -> Option<&str> {
        self.claim("iss").and_then(Value::as_str)
    }

    pub fn aud(&self) -> Option<&Value> {
        self.claim("aud")
    }

    /// Typed view of the Supabase claim set.
    pub fn supabase_claims(&self) -> Result<SupabaseClaims> {
        let claims: SupabaseClaims = serde_json::from_value(self.claims.clone())?;
        if claims.sub.is_empty() {
            return Err(Error::InvalidJwt("empty sub".to_string()));
        }
        Ok(claims)
    }
}

#[cfg(feature = "cache")]
#[derive(Debug, Clone)]
struct CachedJwks {
    exp_at_ms: u128,
    jwks: JwksSet,
}

#[cfg(feature = "cache")]
static JWKS_CACHE: Lazy<DashMap<String, CachedJwks>> = Lazy::new(DashMap::new);

/// Verifies access tokens.
#[derive(Debug, Clone, Default)]
pub struct JwtVerifier {
    _priv: (),
}

impl JwtVerifier {
    /// Verify `token` with keys from `source`.
    pub async fn verify(
        &self,
        token: &str,
        source: &KeySource,
        opts: &VerifyOptions,
    ) -> Result<VerifiedJwt> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::InvalidJwt(format!("failed to decode header: {e}")))?;

        if let KeySource::Secret(secret) = source {
            // Never let an asymmetric-looking token be checked with the shared secret.
            if header.alg != Algorithm::HS256 {
                return Err(Error::UnsupportedAlg(header.alg));
            }
            return verify_with_secret(token, secret, opts);
        }

        if !opts.allowed_algs.contains(&header.alg) {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        if opts.require_kid && header.kid.as_deref().unwrap_or("").is_empty() {
            return Err(Error::InvalidJwt("missing kid".to_string()));
        }

        let jwks = self.load_jwks(source, opts).await?;
        verify_against_jwks(token, &header, &jwks, opts)
    }

    async fn load_jwks(&self, source: &KeySource, opts: &VerifyOptions) -> Result<JwksSet> {
        match source {
            KeySource::Set(set) => Ok(set.clone()),
            KeySource::Json(json) => Ok(serde_json::from_str(json)?),
            KeySource::Secret(_) => Err(Error::Jwks("a shared secret is not a key set".to_string())),
            KeySource::Url(url) => {
                #[cfg(feature = "cache")]
                {
                    let now_ms = now_epoch_ms();
                    if let Some(cached) = JWKS_CACHE.get(url) {
                        if cached.exp_at_ms > now_ms {
                            return Ok(cached.jwks.clone());
                        }
                    }

                    let (set, max_age_seconds) = fetch_jwks_url(url, opts.fetch_timeout).await?;
                    let ttl = std::cmp::min(max_age_seconds, opts.max_jwks_age_seconds);
                    JWKS_CACHE.insert(
                        url.clone(),
                        CachedJwks {
                            exp_at_ms: now_ms + u128::from(ttl) * 1000,
                            jwks: set.clone(),
                        },
                    );
                    return Ok(set);
                }

                #[cfg(not(feature = "cache"))]
                {
                    let (set, _max_age_seconds) = fetch_jwks_url(url, opts.fetch_timeout).await?;
                    Ok(set)
                }
            }
        }
    }
}

fn base_validation(alg: Algorithm, opts: &VerifyOptions) -> Validation {
    let mut validation = Validation::new(alg);
    validation.leeway = opts.leeway_seconds;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    // iss/aud are checked by hand so both string and array audiences work.
    validation.validate_aud = false;
    validation.required_spec_claims = ["exp", "sub"].iter().map(|s| (*s).to_string()).collect();
    validation
}

fn verify_with_secret(token: &str, secret: &str, opts: &VerifyOptions) -> Result<VerifiedJwt> {
    if secret.is_empty() {
        return Err(Error::Validation("empty signing secret".to_string()));
    }
    let key = DecodingKey::from_secret(secret.as_bytes());
    let data = jsonwebtoken::decode::<Value>(token, &key, &base_validation(Algorithm::HS256, opts))
        .map_err(|e| Error::rejected(&e))?;
    let verified = VerifiedJwt {
        header: data.header,
        claims: data.claims,
    };
    validate_issuer_audience(&verified, opts)?;
    Ok(verified)
}

fn verify_against_jwks(
    token: &str,
    header: &Header,
    jwks: &JwksSet,
    opts: &VerifyOptions,
) -> Result<VerifiedJwt> {
    let validation = base_validation(header.alg, opts);

    // Prefer kid match when present.
    let mut candidates: Vec<&Jwk> = match header.kid.as_deref() {
        Some(kid) => jwks.keys.iter().filter(|k| k.kid.as_deref() == Some(kid)).collect(),
        None => Vec::new(),
    };
    if candidates.is_empty() {
        candidates = jwks.keys.iter().collect();
    }

    let mut last_err: Option<jsonwebtoken::errors::Error> = None;

    for jwk in candidates {
        let Ok(key) = decoding_key_from_jwk(jwk) else {
            continue;
        };
        match jsonwebtoken::decode::<Value>(token, &key, &validation) {
            Ok(data) => {
                let verified = VerifiedJwt {
                    header: data.header,
                    claims: data.claims,
                };
                validate_issuer_audience(&verified, opts)?;
                return Ok(verified);
            }
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(e) => Err(Error::rejected(&e)),
        None => Err(Error::NoMatchingKey),
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_deref()
                .ok_or_else(|| Error::Jwks("RSA JWK missing n".to_string()))?;
            let e = jwk
                .e
                .as_deref()
                .ok_or_else(|| Error::Jwks("RSA JWK missing e".to_string()))?;
            Ok(DecodingKey::from_rsa_components(n, e)?)
        }
        "EC" => {
            let x = jwk
                .x
                .as_deref()
                .ok_or_else(|| Error::Jwks("EC JWK missing x".to_string()))?;
            let y = jwk
                .y
                .as_deref()
                .ok_or_else(|| Error::Jwks("EC JWK missing y".to_string()))?;
            Ok(DecodingKey::from_ec_components(x, y)?)
        }
        other => Err(Error::Jwks(format!("unsupported kty: {other}"))),
    }
}

fn validate_issuer_audience(verified: &VerifiedJwt, opts: &VerifyOptions) -> Result<()> {
    if let Some(expected_iss) = &opts.issuer {
        let iss = verified
            .iss()
            .ok_or_else(|| Error::Validation("missing iss".to_string()))?;
        if iss.trim_end_matches('/') != expected_iss.trim_end_matches('/') {
            return Err(Error::Validation(format!(
                "issuer mismatch: expected {expected_iss}, got {iss}"
            )));
        }
    }

    if let Some(expected_aud) = &opts.audience {
        let aud = verified
            .aud()
            .ok_or_else(|| Error::Validation("missing aud".to_string()))?;
        let ok = match aud {
            Value::String(s) => s == expected_aud,
            Value::Array(arr) => arr
                .iter()
                .any(|v| v.as_str() == Some(expected_aud.as_str())),
            _ => false,
        };
        if !ok {
            return Err(Error::Validation(format!(
                "audience mismatch: expected {expected_aud}"
            )));
        }
    }

    Ok(())
}

#[cfg_attr(not(feature = "cache"), allow(dead_code))]
fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
}

#[cfg(feature = "fetch-reqwest")]
async fn fetch_jwks_url(url: &str, timeout: Duration) -> Result<(JwksSet, u64)> {
    use reqwest::header;

    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Jwks(format!("fetch failed: {}", resp.status())));
    }

    let max_age = resp
        .headers()
        .get(header::CACHE_CONTROL)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_cache_control_max_age)
        .unwrap_or(600);

    let text = resp.text().await?;
    let set: JwksSet = serde_json::from_str(&text)?;
    Ok((set, max_age))
}

#[cfg(not(feature = "fetch-reqwest"))]
async fn fetch_jwks_url(_url: &str, _timeout: Duration) -> Result<(JwksSet, u64)> {
    Err(Error::Jwks(
        "KeySource::Url requires the fetch-reqwest feature (or provide KeySource::Json/Set)"
            .to_string(),
    ))
}

#[cfg_attr(not(feature = "fetch-reqwest"), allow(dead_code))]
fn parse_cache_control_max_age(cc: &str) -> Option<u64> {
    cc.split(',')
        .filter_map(|part| part.trim().strip_prefix("max-age="))
        .find_map(|rest| rest.trim().parse::<u64>().ok())
}
