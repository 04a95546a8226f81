//! Bearer credential extraction.
//!
//! The auth cookie is checked first, then the `Authorization` header. The
//! Supabase SSR helpers store the session under `sb-<ref>-auth-token` in one
//! of several shapes, all of which are accepted here:
//!
//! - a raw JWT
//! - a JSON session object (`{"access_token": "...", ...}`)
//! - a legacy JSON array (`["<access>", "<refresh>", ...]`)
//! - any of the JSON forms prefixed with `base64-` and base64url encoded
//! - split across `name.0`, `name.1`, ... when the value exceeds cookie size limits

use crate::{Error, Result};

use base64::Engine;
use serde_json::Value;

const BASE64_PREFIX: &str = "base64-";

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cookie,
    Header,
}

/// A bearer token and its origin.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

// Tokens never reach logs through Debug.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Find the request's bearer credential: cookie first, header fallback.
///
/// A malformed cookie counts as absent, so a valid header still wins.
pub fn extract_credential(
    cookie_header: Option<&str>,
    authorization: Option<&str>,
    cookie_name: &str,
) -> Option<Credential> {
    let from_cookie = cookie_header
        .and_then(|h| assemble_cookie(&parse_cookie_header(h), cookie_name))
        .and_then(|raw| decode_session_cookie(&raw).ok());

    if let Some(token) = from_cookie {
        return Some(Credential {
            token,
            source: CredentialSource::Cookie,
        });
    }

    authorization.and_then(bearer_token).map(|token| Credential {
        token,
        source: CredentialSource::Header,
    })
}

/// Split a `Cookie` header into name/value pairs, skipping junk segments.
pub fn parse_cookie_header(header: &str) -> Vec<(&str, &str)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name, value.trim().trim_matches('"')))
        })
        .collect()
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<String> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Decode one (already reassembled) auth cookie value into an access token.
pub fn decode_session_cookie(raw: &str) -> Result<String> {
    let value = urlencoding::decode(raw)
        .map_err(|e| Error::Cookie(format!("invalid percent-encoding: {e}")))?;
    let value = value.trim();

    let value = match value.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => decode_base64(encoded)?,
        None => value.to_string(),
    };

    let token = if value.starts_with('{') || value.starts_with('[') {
        access_token_from_json(&serde_json::from_str(&value)?)?
    } else {
        value
    };

    if token.is_empty() {
        return Err(Error::Cookie("empty access token".to_string()));
    }
    Ok(token)
}

fn assemble_cookie(cookies: &[(&str, &str)], name: &str) -> Option<String> {
    if let Some((_, value)) = cookies.iter().find(|(n, _)| *n == name) {
        return Some((*value).to_string());
    }

    let mut joined = String::new();
    for index in 0.. {
        let chunk_name = format!("{name}.{index}");
        match cookies.iter().find(|(n, _)| *n == chunk_name) {
            Some((_, value)) => joined.push_str(value),
            None => break,
        }
    }

    if joined.is_empty() { None } else { Some(joined) }
}

fn decode_base64(encoded: &str) -> Result<String> {
    let engines = [
        base64::engine::general_purpose::URL_SAFE_NO_PAD,
        base64::engine::general_purpose::URL_SAFE,
        base64::engine::general_purpose::STANDARD,
    ];
    let bytes = engines
        .iter()
        .find_map(|engine| engine.decode(encoded).ok())
        .ok_or_else(|| Error::Cookie("invalid base64 payload".to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::Cookie(format!("payload is not UTF-8: {e}")))
}

fn access_token_from_json(value: &Value) -> Result<String> {
    let token = match value {
        Value::Object(map) => map.get("access_token").and_then(Value::as_str),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    };
    token
        .map(str::to_string)
        .ok_or_else(|| Error::Cookie("session JSON has no access token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "sb-ref-auth-token";

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s)
    }

    #[test]
    fn raw_jwt_cookie() {
        let cred = extract_credential(Some("theme=dark; sb-ref-auth-token=abc.def.ghi"), None, NAME)
            .unwrap();
        assert_eq!(cred.token, "abc.def.ghi");
        assert_eq!(cred.source, CredentialSource::Cookie);
    }

    #[test]
    fn base64_session_object_cookie() {
        let session = r#"{"access_token":"tok-1","refresh_token":"r","expires_at":1}"#;
        let header = format!("{NAME}=base64-{}", b64(session));
        let cred = extract_credential(Some(&header), None, NAME).unwrap();
        assert_eq!(cred.token, "tok-1");
    }

    #[test]
    fn chunked_cookie_is_reassembled_in_order() {
        let encoded = format!("base64-{}", b64(r#"{"access_token":"tok-chunked"}"#));
        let (a, b) = encoded.split_at(encoded.len() / 2);
        let header = format!("{NAME}.1={b}; other=1; {NAME}.0={a}");
        let cred = extract_credential(Some(&header), None, NAME).unwrap();
        assert_eq!(cred.token, "tok-chunked");
    }

    #[test]
    fn legacy_array_cookie() {
        let header = format!(
            "{NAME}={}",
            urlencoding::encode(r#"["tok-legacy","refresh",null,null,null]"#)
        );
        let cred = extract_credential(Some(&header), None, NAME).unwrap();
        assert_eq!(cred.token, "tok-legacy");
    }

    #[test]
    fn cookie_preferred_over_header() {
        let cred = extract_credential(
            Some("sb-ref-auth-token=from-cookie"),
            Some("Bearer from-header"),
            NAME,
        )
        .unwrap();
        assert_eq!(cred.token, "from-cookie");
    }

    #[test]
    fn malformed_cookie_falls_back_to_header() {
        let cred = extract_credential(
            Some("sb-ref-auth-token=base64-%%%"),
            Some("bearer from-header"),
            NAME,
        )
        .unwrap();
        assert_eq!(cred.token, "from-header");
        assert_eq!(cred.source, CredentialSource::Header);
    }

    #[test]
    fn absent_everywhere() {
        assert!(extract_credential(None, None, NAME).is_none());
        assert!(extract_credential(Some("other=1"), Some("Basic dXNlcg=="), NAME).is_none());
        assert!(extract_credential(Some("sb-ref-auth-token="), Some("Bearer   "), NAME).is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let cred = Credential {
            token: "secret".to_string(),
            source: CredentialSource::Header,
        };
        assert!(!format!("{cred:?}").contains("secret"));
    }
}
