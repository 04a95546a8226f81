use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type TenantId = String;
pub type TenantKey = String;
pub type UserId = String;

/// Names of the request headers that carry the trusted context downstream.
///
/// The gate owns these names: inbound copies are always discarded before
/// admission, so a handler reading them only ever sees server-derived values.
pub mod headers {
    pub const TENANT_ID: &str = "x-tenant-id";
    pub const TENANT_KEY: &str = "x-tenant-key";
    pub const TENANT_STATUS: &str = "x-tenant-status";
    pub const USER_ID: &str = "x-user-id";
    pub const USER_EMAIL: &str = "x-user-email";
    pub const USER_ROLES: &str = "x-user-roles";

    pub const ALL: [&str; 6] = [
        TENANT_ID,
        TENANT_KEY,
        TENANT_STATUS,
        USER_ID,
        USER_EMAIL,
        USER_ROLES,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    InstituteAdmin,
    Teacher,
    Student,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::SuperAdmin,
        Role::InstituteAdmin,
        Role::Teacher,
        Role::Student,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::InstituteAdmin => "INSTITUTE_ADMIN",
            Role::Teacher => "TEACHER",
            Role::Student => "STUDENT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            "INSTITUTE_ADMIN" => Ok(Role::InstituteAdmin),
            "TEACHER" => Ok(Role::Teacher),
            "STUDENT" => Ok(Role::Student),
            other => Err(GateError::Validation(format!("unknown role {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Pending,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "pending" => Ok(TenantStatus::Pending),
            other => Err(GateError::Validation(format!("unknown tenant status {other}"))),
        }
    }
}

/// One institute account, addressed by its subdomain `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub key: TenantKey,
    pub status: TenantStatus,
}

impl Tenant {
    pub fn is_operational(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// The validated identity behind one request.
///
/// Constructed only through [`Session::new`], which enforces that every
/// non-`SUPER_ADMIN` session is affiliated with a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    user_id: UserId,
    email: String,
    roles: BTreeSet<Role>,
    tenant_id: Option<TenantId>,
    must_change_password: bool,
}

impl Session {
    pub fn new(
        user_id: impl Into<UserId>,
        email: impl Into<String>,
        roles: impl IntoIterator<Item = Role>,
        tenant_id: Option<TenantId>,
        must_change_password: bool,
    ) -> Result<Self, GateError> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(GateError::Validation("session without user id".to_string()));
        }

        let roles: BTreeSet<Role> = roles.into_iter().collect();
        let tenant_id = tenant_id.filter(|t| !t.is_empty());
        if tenant_id.is_none() && !roles.contains(&Role::SuperAdmin) {
            return Err(GateError::Validation(format!(
                "user {user_id} has no tenant affiliation and is not a super admin"
            )));
        }

        Ok(Self {
            user_id,
            email: email.into(),
            roles,
            tenant_id,
            must_change_password,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn must_change_password(&self) -> bool {
        self.must_change_password
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles.contains(&Role::SuperAdmin)
    }

    pub fn has_any_role(&self, allowed: &BTreeSet<Role>) -> bool {
        !self.roles.is_disjoint(allowed)
    }
}

/// Outcome of mapping a host label to a tenant record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tenant", rename_all = "snake_case")]
pub enum TenantResolution {
    /// Bare platform domain; no tenant context.
    Platform,
    /// Infrastructure label such as `www` or `api`.
    Reserved,
    NotFound,
    Suspended,
    Found(Tenant),
}

impl TenantResolution {
    /// True when the request can be answered without looking at the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TenantResolution::Reserved | TenantResolution::NotFound | TenantResolution::Suspended
        )
    }

    pub fn tenant(&self) -> Option<&Tenant> {
        match self {
            TenantResolution::Found(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Allow,
    RedirectLogin { return_path: String },
    RedirectUnauthorized,
    RedirectPasswordChange,
    RedirectTenantNotFound,
    /// `None` sends the requester to the bare platform root.
    RedirectTenantHome { tenant_key: Option<TenantKey> },
}

impl RouteDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, RouteDecision::Allow)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RouteDecision::Allow => "allow",
            RouteDecision::RedirectLogin { .. } => "redirect_login",
            RouteDecision::RedirectUnauthorized => "redirect_unauthorized",
            RouteDecision::RedirectPasswordChange => "redirect_password_change",
            RouteDecision::RedirectTenantNotFound => "redirect_tenant_not_found",
            RouteDecision::RedirectTenantHome { .. } => "redirect_tenant_home",
        }
    }
}

/// Trusted metadata handed to downstream handlers.
///
/// A missing tenant id means a platform-level request; a missing user id
/// means the requester is not authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Option<TenantId>,
    pub tenant_key: Option<TenantKey>,
    pub tenant_status: Option<TenantStatus>,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub roles: Option<BTreeSet<Role>>,
}

impl RequestContext {
    pub fn is_platform(&self) -> bool {
        self.tenant_id.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Header name/value pairs in [`headers::ALL`] order, skipping empty fields.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(id) = &self.tenant_id {
            out.push((headers::TENANT_ID, id.clone()));
        }
        if let Some(key) = &self.tenant_key {
            out.push((headers::TENANT_KEY, key.clone()));
        }
        if let Some(status) = self.tenant_status {
            out.push((headers::TENANT_STATUS, status.as_str().to_string()));
        }
        if let Some(user) = &self.user_id {
            out.push((headers::USER_ID, user.clone()));
        }
        if let Some(email) = &self.email {
            out.push((headers::USER_EMAIL, email.clone()));
        }
        if let Some(roles) = &self.roles {
            let joined = roles.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(",");
            out.push((headers::USER_ROLES, joined));
        }
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub trait SecretStore: Send + Sync {
    fn get(&self, secret_ref: &str) -> Result<String, GateError>;
}

/// Read-only view of the tenant table. Implementations must only ever
/// return non-deleted tenants.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant_by_key(&self, key: &str) -> Result<Option<Tenant>, GateError>;
    async fn tenant_key_by_id(&self, id: &str) -> Result<Option<TenantKey>, GateError>;
}

/// Turns a bearer credential into a [`Session`].
///
/// `Ok(None)` means the credential was rejected. Implementations must
/// resolve current role memberships, not just claims baked into the token.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate_credential(&self, token: &str) -> Result<Option<Session>, GateError>;
}
