//! Supabase-backed collaborators: tenant lookups through PostgREST and
//! session validation through the auth service plus live profile rows.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campus_api::{
    CredentialValidator, GateError, Role, SecretStore, Session, Tenant, TenantDirectory,
    TenantKey, TenantStatus,
};
use campus_auth::{JwtVerifier, KeySource, VerifyOptions};
use campus_core::{SupabaseSettings, VerificationMode};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Resolved project coordinates and keys.
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub service_role_key: String,
    pub jwt_secret: Option<String>,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .field("service_role_key", &"<redacted>")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SupabaseConfig {
    pub fn from_settings(
        settings: &SupabaseSettings,
        secrets: &dyn SecretStore,
    ) -> Result<Self, GateError> {
        let url = secrets.get(&settings.url_ref)?.trim_end_matches('/').to_string();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(GateError::Validation(format!(
                "{} must be an http(s) URL",
                settings.url_ref
            )));
        }
        let jwt_secret = match &settings.jwt_secret_ref {
            Some(r) => Some(secrets.get(r)?),
            None => None,
        };
        Ok(Self {
            url,
            anon_key: secrets.get(&settings.anon_key_ref)?,
            service_role_key: secrets.get(&settings.service_role_key_ref)?,
            jwt_secret,
        })
    }

    /// First label of the project host (`abcd` for `https://abcd.supabase.co`).
    pub fn project_ref(&self) -> Option<&str> {
        let rest = self.url.split_once("://").map_or(self.url.as_str(), |(_, r)| r);
        let authority = rest.split('/').next().unwrap_or("");
        let host = authority.rsplit('@').next().unwrap_or("");
        let host = host.split(':').next().unwrap_or("");
        host.split('.').next().filter(|l| !l.is_empty())
    }

    /// Name of the session cookie written by the Supabase SSR helpers.
    pub fn auth_cookie_name(&self) -> String {
        match self.project_ref() {
            Some(r) => format!("sb-{r}-auth-token"),
            None => "sb-auth-token".to_string(),
        }
    }

    pub fn issuer(&self) -> String {
        format!("{}/auth/v1", self.url)
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/auth/v1/.well-known/jwks.json", self.url)
    }
}

/// Thin async PostgREST / GoTrue client shared by both collaborators.
#[derive(Clone)]
pub struct SupabaseClient {
    config: Arc<SupabaseConfig>,
    http: Client,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig, timeout: Duration) -> Result<Self, GateError> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// `GET /rest/v1/{table}?{query}` with the service-role key.
    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, GateError> {
        let url = format!("{}/rest/v1/{table}?{query}", self.config.url);
        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.config.service_role_key)
            .bearer_auth(&self.config.service_role_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(table, %status, "postgrest query failed");
            return Err(GateError::Connection(format!(
                "postgrest {table} returned {status}: {body}"
            )));
        }
        resp.json().await.map_err(|e| {
            GateError::Connection(format!("postgrest {table} returned malformed rows: {e}"))
        })
    }

    /// `GET /auth/v1/user`; `None` when the auth server rejects the token.
    async fn auth_user(&self, access_token: &str) -> Result<Option<AuthUser>, GateError> {
        let url = format!("{}/auth/v1/user", self.config.url);
        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;

        match resp.status() {
            s if s.is_success() => resp
                .json()
                .await
                .map(Some)
                .map_err(|e| GateError::Connection(format!("auth user response: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            s => Err(GateError::Connection(format!("auth server returned {s}"))),
        }
    }
}

fn transport_error(e: reqwest::Error) -> GateError {
    if e.is_timeout() {
        GateError::Timeout(e.to_string())
    } else {
        GateError::Connection(e.to_string())
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

#[derive(Debug, Deserialize)]
struct TenantRow {
    id: String,
    subdomain: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TenantKeyRow {
    subdomain: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    institute_id: Option<String>,
    #[serde(default)]
    must_change_password: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    role: String,
}

/// Tenant records from the institutes table, excluding soft-deleted rows.
pub struct SupabaseTenantDirectory {
    client: SupabaseClient,
    table: String,
}

impl SupabaseTenantDirectory {
    pub fn new(client: SupabaseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl TenantDirectory for SupabaseTenantDirectory {
    async fn tenant_by_key(&self, key: &str) -> Result<Option<Tenant>, GateError> {
        let query = format!(
            "subdomain={}&deleted_at=is.null&select=id,subdomain,status&limit=1",
            eq(key)
        );
        let rows: Vec<TenantRow> = self.client.select(&self.table, &query).await?;
        let Some(row) = rows.into_iter().next() else {
            debug!(tenant = key, "no tenant row");
            return Ok(None);
        };
        let status = TenantStatus::from_str(&row.status)?;
        Ok(Some(Tenant {
            id: row.id,
            key: row.subdomain,
            status,
        }))
    }

    async fn tenant_key_by_id(&self, id: &str) -> Result<Option<TenantKey>, GateError> {
        let query = format!("id={}&deleted_at=is.null&select=subdomain&limit=1", eq(id));
        let rows: Vec<TenantKeyRow> = self.client.select(&self.table, &query).await?;
        Ok(rows.into_iter().next().map(|r| r.subdomain))
    }
}

enum TokenCheck {
    /// Local signature check against the project key set or a shared secret.
    Local {
        source: KeySource,
        options: VerifyOptions,
    },
    AuthServer,
}

/// Turns an access token into a [`Session`] with current role memberships.
///
/// The token only establishes *who* is asking; tenant affiliation, roles and
/// the password-change flag always come from the live profile rows.
pub struct SupabaseSessionValidator {
    client: SupabaseClient,
    check: TokenCheck,
    verifier: JwtVerifier,
    profiles_table: String,
    roles_table: String,
}

impl SupabaseSessionValidator {
    pub fn new(client: SupabaseClient, settings: &SupabaseSettings, fetch_timeout: Duration) -> Self {
        let check = match settings.verification {
            VerificationMode::AuthServer => TokenCheck::AuthServer,
            VerificationMode::Jwks => {
                let config = client.config();
                let source = match &config.jwt_secret {
                    Some(secret) => KeySource::Secret(secret.clone()),
                    None => KeySource::Url(config.jwks_url()),
                };
                TokenCheck::Local {
                    source,
                    options: VerifyOptions {
                        issuer: Some(config.issuer()),
                        fetch_timeout,
                        ..VerifyOptions::default()
                    },
                }
            }
        };
        Self {
            client,
            check,
            verifier: JwtVerifier::default(),
            profiles_table: settings.profiles_table.clone(),
            roles_table: settings.roles_table.clone(),
        }
    }

    /// Subject and (claimed) email of a valid token; `None` when invalid.
    async fn identify(&self, token: &str) -> Result<Option<(String, Option<String>)>, GateError> {
        match &self.check {
            TokenCheck::AuthServer => Ok(self.client.auth_user(token).await?.map(|u| (u.id, u.email))),
            TokenCheck::Local { source, options } => {
                match self.verifier.verify(token, source, options).await {
                    Ok(verified) => match verified.supabase_claims() {
                        Ok(claims) => Ok(Some((claims.sub, claims.email))),
                        Err(e) => {
                            debug!(error = %e, "token claims rejected");
                            Ok(None)
                        }
                    },
                    Err(e @ (campus_auth::Error::Jwks(_) | campus_auth::Error::Reqwest(_))) => {
                        Err(GateError::Connection(format!("key set unavailable: {e}")))
                    }
                    Err(e) => {
                        debug!(error = %e, "token rejected");
                        Ok(None)
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CredentialValidator for SupabaseSessionValidator {
    async fn validate_credential(&self, token: &str) -> Result<Option<Session>, GateError> {
        let Some((user_id, claimed_email)) = self.identify(token).await? else {
            return Ok(None);
        };

        let query = format!(
            "id={}&select=id,email,institute_id,must_change_password&limit=1",
            eq(&user_id)
        );
        let profiles: Vec<ProfileRow> = self.client.select(&self.profiles_table, &query).await?;
        let Some(profile) = profiles.into_iter().next() else {
            warn!(user = %user_id, "valid token without a profile");
            return Ok(None);
        };

        let query = format!("user_id={}&select=role", eq(&user_id));
        let rows: Vec<RoleRow> = self.client.select(&self.roles_table, &query).await?;
        let roles = rows.iter().filter_map(|r| match Role::from_str(&r.role) {
            Ok(role) => Some(role),
            Err(_) => {
                debug!(user = %user_id, role = %r.role, "ignoring unknown role");
                None
            }
        });

        let email = profile.email.or(claimed_email).unwrap_or_default();
        match Session::new(
            profile.id,
            email,
            roles,
            profile.institute_id,
            profile.must_change_password.unwrap_or(false),
        ) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(user = %user_id, error = %e, "rejecting inconsistent session");
                Ok(None)
            }
        }
    }
}
