use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use campus_api::{GateError, Role};
use serde::Deserialize;

use campus_auth::is_valid_label;

use crate::policy::{AccessPolicy, RouteRule};

pub const CONFIG_FILE: &str = "gate.toml";

const DEFAULT_TEMPLATE: &str = include_str!("../../../docs/campus-gate/gate.toml.example");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub root_domain: String,
    pub scheme: String,
    pub port: Option<u16>,
    pub local_hosts: Vec<String>,
}

impl PlatformConfig {
    /// Origin of the platform root (`None`) or of one institute subdomain.
    pub fn origin(&self, tenant_key: Option<&str>) -> String {
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        match tenant_key {
            Some(key) => format!("{}://{key}.{}{port}", self.scheme, self.root_domain),
            None => format!("{}://{}{port}", self.scheme, self.root_domain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pages {
    pub login: String,
    pub password_change: String,
    pub unauthorized: String,
    pub tenant_not_found: String,
    pub tenant_home: String,
    pub return_param: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub tenant_lookup: Duration,
    pub session_validation: Duration,
    /// Whole round trip to the upstream when the gate forwards requests.
    pub upstream: Duration,
    /// `None` disables the tenant lookup cache.
    pub tenant_cache_ttl: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSettings {
    pub cookie_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Verify the token signature locally, then fetch the profile.
    Jwks,
    /// Ask the auth server for the user on every request.
    AuthServer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseSettings {
    pub url_ref: String,
    pub anon_key_ref: String,
    pub service_role_key_ref: String,
    pub jwt_secret_ref: Option<String>,
    pub verification: VerificationMode,
    pub tenants_table: String,
    pub profiles_table: String,
    pub roles_table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub platform: PlatformConfig,
    pub pages: Pages,
    pub policy: AccessPolicy,
    pub timeouts: Timeouts,
    pub session: SessionSettings,
    pub supabase: SupabaseSettings,
}

impl GateConfig {
    /// Built-in configuration for a given platform root.
    pub fn with_root_domain(root_domain: &str) -> Result<Self, GateError> {
        let raw = RawGateConfig {
            platform: RawPlatform {
                root_domain: root_domain.to_string(),
                scheme: default_scheme(),
                port: None,
                local_hosts: default_local_hosts(),
            },
            pages: RawPages::default(),
            policy: RawPolicy::default(),
            timeouts: RawTimeouts::default(),
            session: RawSession::default(),
            supabase: RawSupabase::default(),
        };
        raw.into_config()
    }
}

pub fn validate_config(config: &GateConfig) -> Result<(), GateError> {
    let platform = &config.platform;
    if platform.root_domain.is_empty()
        || !platform.root_domain.split('.').all(is_valid_label)
    {
        return Err(GateError::Validation(format!(
            "platform.root_domain {:?} is not a valid host name",
            platform.root_domain
        )));
    }
    if platform.scheme != "http" && platform.scheme != "https" {
        return Err(GateError::Validation(format!(
            "platform.scheme must be http or https, got {}",
            platform.scheme
        )));
    }

    let pages = &config.pages;
    for (name, path) in [
        ("pages.login", &pages.login),
        ("pages.password_change", &pages.password_change),
        ("pages.unauthorized", &pages.unauthorized),
        ("pages.tenant_not_found", &pages.tenant_not_found),
        ("pages.tenant_home", &pages.tenant_home),
    ] {
        require_path(name, path)?;
    }
    if pages.return_param.is_empty() {
        return Err(GateError::Validation("pages.return_param is empty".to_string()));
    }

    let policy = &config.policy;
    // Redirect targets must be reachable without passing the check that sent
    // the requester there.
    for (name, path) in [
        ("pages.login", &pages.login),
        ("pages.unauthorized", &pages.unauthorized),
        ("pages.tenant_not_found", &pages.tenant_not_found),
    ] {
        if !policy.is_public(path) {
            return Err(GateError::Validation(format!(
                "{name} {path} must be listed in policy.public_paths"
            )));
        }
    }
    if policy.is_bypassed(&pages.password_change) {
        return Err(GateError::Validation(format!(
            "pages.password_change {} must not be a bypass path",
            pages.password_change
        )));
    }
    if policy.password_change_path() != pages.password_change {
        return Err(GateError::Validation(
            "policy password-change path disagrees with pages.password_change".to_string(),
        ));
    }

    for label in policy.reserved_subdomains() {
        if !is_valid_label(label) {
            return Err(GateError::Validation(format!(
                "reserved subdomain {label:?} is not a valid host label"
            )));
        }
    }
    for path in policy.public_paths().iter().chain(policy.bypass_prefixes()) {
        require_path("policy path", path)?;
    }

    let mut seen = BTreeSet::new();
    for rule in policy.routes() {
        require_path("policy.route.prefix", &rule.prefix)?;
        if rule.prefix == "/" {
            return Err(GateError::Validation(
                "policy.route.prefix \"/\" would gate every page".to_string(),
            ));
        }
        if !seen.insert(rule.prefix.to_ascii_lowercase()) {
            return Err(GateError::Validation(format!(
                "duplicate route prefix {}",
                rule.prefix
            )));
        }
        if rule.roles.is_empty() {
            return Err(GateError::Validation(format!(
                "route {} allows no roles",
                rule.prefix
            )));
        }
    }

    let timeouts = &config.timeouts;
    if timeouts.tenant_lookup.is_zero()
        || timeouts.session_validation.is_zero()
        || timeouts.upstream.is_zero()
    {
        return Err(GateError::Validation("timeouts must be greater than zero".to_string()));
    }

    Ok(())
}

fn require_path(name: &str, path: &str) -> Result<(), GateError> {
    if path.starts_with('/') && !path.starts_with("//") {
        Ok(())
    } else {
        Err(GateError::Validation(format!(
            "{name} {path:?} must be an absolute path"
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGateConfig {
    platform: RawPlatform,
    #[serde(default)]
    pages: RawPages,
    #[serde(default)]
    policy: RawPolicy,
    #[serde(default)]
    timeouts: RawTimeouts,
    #[serde(default)]
    session: RawSession,
    #[serde(default)]
    supabase: RawSupabase,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlatform {
    root_domain: String,
    #[serde(default = "default_scheme")]
    scheme: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default = "default_local_hosts")]
    local_hosts: Vec<String>,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_local_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPages {
    login: String,
    password_change: String,
    unauthorized: String,
    tenant_not_found: String,
    tenant_home: String,
    return_param: String,
}

impl Default for RawPages {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            password_change: "/change-password".to_string(),
            unauthorized: "/unauthorized".to_string(),
            tenant_not_found: "/institute-not-found".to_string(),
            tenant_home: "/".to_string(),
            return_param: "redirect".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawPolicy {
    reserved_subdomains: Vec<String>,
    public_paths: Vec<String>,
    bypass_prefixes: Vec<String>,
    #[serde(rename = "route")]
    routes: Vec<RawRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoute {
    prefix: String,
    roles: Vec<Role>,
    #[serde(default)]
    tenant_scoped: bool,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Default for RawPolicy {
    fn default() -> Self {
        let route = |prefix: &str, roles: &[Role], tenant_scoped: bool| RawRoute {
            prefix: prefix.to_string(),
            roles: roles.to_vec(),
            tenant_scoped,
        };
        Self {
            reserved_subdomains: strings(&[
                "www",
                "api",
                "admin-platform",
                "app",
                "auth",
                "mail",
                "static",
                "cdn",
            ]),
            public_paths: strings(&[
                "/",
                "/login",
                "/forgot-password",
                "/reset-password",
                "/auth/callback",
                "/unauthorized",
                "/institute-not-found",
            ]),
            bypass_prefixes: strings(&[
                "/_next",
                "/static",
                "/images",
                "/favicon.ico",
                "/robots.txt",
            ]),
            routes: vec![
                route("/super-admin", &[Role::SuperAdmin], false),
                route("/admin", &[Role::InstituteAdmin, Role::SuperAdmin], true),
                route("/teacher", &[Role::Teacher], true),
                route("/student", &[Role::Student], true),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawTimeouts {
    tenant_lookup_ms: u64,
    session_validation_ms: u64,
    upstream_ms: u64,
    tenant_cache_ttl_secs: u64,
}

impl Default for RawTimeouts {
    fn default() -> Self {
        Self {
            tenant_lookup_ms: 2_000,
            session_validation_ms: 3_000,
            upstream_ms: 30_000,
            tenant_cache_ttl_secs: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSession {
    cookie_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSupabase {
    url_ref: String,
    anon_key_ref: String,
    service_role_key_ref: String,
    jwt_secret_ref: Option<String>,
    verification: VerificationMode,
    tenants_table: String,
    profiles_table: String,
    roles_table: String,
}

impl Default for RawSupabase {
    fn default() -> Self {
        Self {
            url_ref: "NEXT_PUBLIC_SUPABASE_URL".to_string(),
            anon_key_ref: "NEXT_PUBLIC_SUPABASE_ANON_KEY".to_string(),
            service_role_key_ref: "SUPABASE_SERVICE_ROLE_KEY".to_string(),
            jwt_secret_ref: None,
            verification: VerificationMode::Jwks,
            tenants_table: "institutes".to_string(),
            profiles_table: "profiles".to_string(),
            roles_table: "user_roles".to_string(),
        }
    }
}

impl RawGateConfig {
    fn into_config(self) -> Result<GateConfig, GateError> {
        let pages = Pages {
            login: self.pages.login,
            password_change: self.pages.password_change,
            unauthorized: self.pages.unauthorized,
            tenant_not_found: self.pages.tenant_not_found,
            tenant_home: self.pages.tenant_home,
            return_param: self.pages.return_param,
        };

        let routes = self
            .policy
            .routes
            .into_iter()
            .map(|r| RouteRule {
                prefix: r.prefix.trim_end_matches('/').to_string(),
                roles: r.roles.into_iter().collect(),
                tenant_scoped: r.tenant_scoped,
            })
            .collect();

        let policy = AccessPolicy::new(
            self.policy
                .reserved_subdomains
                .iter()
                .map(|s| s.trim().to_ascii_lowercase()),
            self.policy.public_paths,
            self.policy.bypass_prefixes,
            routes,
            pages.password_change.clone(),
        );

        let ttl = self.timeouts.tenant_cache_ttl_secs;
        let config = GateConfig {
            platform: PlatformConfig {
                root_domain: self
                    .platform
                    .root_domain
                    .trim()
                    .trim_start_matches('.')
                    .to_ascii_lowercase(),
                scheme: self.platform.scheme.to_ascii_lowercase(),
                port: self.platform.port,
                local_hosts: self.platform.local_hosts,
            },
            pages,
            policy,
            timeouts: Timeouts {
                tenant_lookup: Duration::from_millis(self.timeouts.tenant_lookup_ms),
                session_validation: Duration::from_millis(self.timeouts.session_validation_ms),
                upstream: Duration::from_millis(self.timeouts.upstream_ms),
                tenant_cache_ttl: (ttl > 0).then(|| Duration::from_secs(ttl)),
            },
            session: SessionSettings {
                cookie_name: self.session.cookie_name.filter(|c| !c.trim().is_empty()),
            },
            supabase: SupabaseSettings {
                url_ref: self.supabase.url_ref,
                anon_key_ref: self.supabase.anon_key_ref,
                service_role_key_ref: self.supabase.service_role_key_ref,
                jwt_secret_ref: self.supabase.jwt_secret_ref,
                verification: self.supabase.verification,
                tenants_table: self.supabase.tenants_table,
                profiles_table: self.supabase.profiles_table,
                roles_table: self.supabase.roles_table,
            },
        };

        validate_config(&config)?;
        Ok(config)
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("campus-gate")
    } else {
        PathBuf::from(".campus-gate")
    }
}

pub fn parse_config(content: &str, origin: &str) -> Result<GateConfig, GateError> {
    let raw: RawGateConfig = toml::from_str(content)
        .map_err(|e| GateError::Validation(format!("invalid TOML in {origin}: {e}")))?;
    raw.into_config()
        .map_err(|e| GateError::Validation(format!("{origin}: {e}")))
}

pub fn load_config_from_dir(dir: &Path) -> Result<GateConfig, GateError> {
    load_config_from_file(&dir.join(CONFIG_FILE))
}

pub fn load_config_from_file(path: &Path) -> Result<GateConfig, GateError> {
    let content = fs::read_to_string(path)
        .map_err(|e| GateError::NotFound(format!("failed to read {}: {e}", path.display())))?;
    parse_config(&content, &path.display().to_string())
}

/// Write the commented default `gate.toml`; existing files are kept unless `force`.
pub fn write_default_config_files(dir: &Path, force: bool) -> Result<PathBuf, GateError> {
    fs::create_dir_all(dir)
        .map_err(|e| GateError::Internal(format!("failed to create {}: {e}", dir.display())))?;

    let path = dir.join(CONFIG_FILE);
    if force || !path.exists() {
        fs::write(&path, DEFAULT_TEMPLATE).map_err(|e| {
            GateError::Internal(format!("failed to write {}: {e}", path.display()))
        })?;
    }
    Ok(path)
}
