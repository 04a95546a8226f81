use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use campus_api::{
    CredentialValidator, GateError, RequestContext, RouteDecision, SecretStore, Session,
    TenantDirectory, TenantResolution,
};
use campus_auth::{HostConfig, extract_credential, parse_host};
use campus_connectors::supabase_collaborators;
use campus_core::{GateConfig, LabelClass, Ruling, inject, redirect_location};
use serde::Serialize;
use tracing::{debug, warn};

/// The parts of an inbound request the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub host: &'a str,
    pub path: &'a str,
    pub cookie: Option<&'a str>,
    pub authorization: Option<&'a str>,
}

/// Outcome of running one request through the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub resolution: TenantResolution,
    pub decision: RouteDecision,
    /// Present only when `decision` is `Allow`.
    pub context: Option<RequestContext>,
    /// `Location` for redirects.
    pub location: Option<String>,
}

/// Host parser → tenant resolver → session validator → authorizer → injector.
///
/// Holds only immutable configuration and shared collaborators; every call to
/// [`Gate::admit`] is independent.
pub struct Gate {
    config: Arc<GateConfig>,
    hosts: HostConfig,
    cookie_name: String,
    tenants: Arc<dyn TenantDirectory>,
    sessions: Arc<dyn CredentialValidator>,
}

impl Gate {
    pub fn new(
        config: GateConfig,
        tenants: Arc<dyn TenantDirectory>,
        sessions: Arc<dyn CredentialValidator>,
        cookie_name: impl Into<String>,
    ) -> Self {
        let hosts = HostConfig {
            root_domain: Some(config.platform.root_domain.clone()),
            local_hosts: config.platform.local_hosts.clone(),
        };
        Self {
            config: Arc::new(config),
            hosts,
            cookie_name: cookie_name.into(),
            tenants,
            sessions,
        }
    }

    /// Gate backed by the Supabase project named in `config`.
    pub fn from_config(config: GateConfig, secrets: &dyn SecretStore) -> Result<Self, GateError> {
        let collaborators = supabase_collaborators(&config, secrets)?;
        Ok(Self::new(
            config,
            collaborators.tenants,
            collaborators.sessions,
            collaborators.cookie_name,
        ))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn is_bypassed(&self, path: &str) -> bool {
        self.config.policy.is_bypassed(path)
    }

    pub async fn admit(&self, req: &GateRequest<'_>) -> Admission {
        let resolution = self.resolve_tenant(req.host).await;

        let session = if resolution.is_terminal() {
            None
        } else {
            self.validate_session(req.cookie, req.authorization).await
        };

        let decision = match self
            .config
            .policy
            .authorize(req.path, &resolution, session.as_ref())
        {
            Ruling::Decided(decision) => decision,
            Ruling::ForwardToHomeTenant { tenant_id } => self.home_tenant(&tenant_id).await,
        };

        if let (Some(tenant), Some(s)) = (resolution.tenant(), session.as_ref()) {
            if decision == RouteDecision::RedirectUnauthorized
                && !s.is_super_admin()
                && s.tenant_id() != Some(tenant.id.as_str())
            {
                warn!(tenant = %tenant.key, user = %s.user_id(), path = req.path, "cross-tenant request");
            }
        }
        debug!(
            host = req.host,
            path = req.path,
            user = session.as_ref().map(Session::user_id),
            decision = decision.label(),
            "gate decision"
        );

        let context = inject(&decision, &resolution, session.as_ref());
        let location = redirect_location(&decision, &self.config.platform, &self.config.pages);
        Admission {
            resolution,
            decision,
            context,
            location,
        }
    }

    /// Map the `Host` header to a tenant, failing closed to `NotFound`.
    pub async fn resolve_tenant(&self, host: &str) -> TenantResolution {
        let label = parse_host(host, &self.hosts);
        let key = match self.config.policy.classify(label.as_deref()) {
            LabelClass::Platform => return TenantResolution::Platform,
            LabelClass::Reserved => return TenantResolution::Reserved,
            LabelClass::Candidate(key) => key,
        };

        let lookup = self.tenants.tenant_by_key(&key);
        match bounded(self.config.timeouts.tenant_lookup, lookup).await {
            Ok(Some(tenant)) if tenant.is_operational() => TenantResolution::Found(tenant),
            Ok(Some(tenant)) => {
                debug!(tenant = %key, status = %tenant.status, "tenant not operational");
                TenantResolution::Suspended
            }
            Ok(None) => TenantResolution::NotFound,
            Err(e) => {
                warn!(tenant = %key, error = %e, "tenant lookup failed");
                TenantResolution::NotFound
            }
        }
    }

    /// Find and validate the request credential; every failure means no session.
    pub async fn validate_session(
        &self,
        cookie: Option<&str>,
        authorization: Option<&str>,
    ) -> Option<Session> {
        let credential = extract_credential(cookie, authorization, &self.cookie_name)?;

        let validation = self.sessions.validate_credential(&credential.token);
        match bounded(self.config.timeouts.session_validation, validation).await {
            Ok(session) => session,
            Err(e) => {
                warn!(source = ?credential.source, error = %e, "session validation failed");
                None
            }
        }
    }

    async fn home_tenant(&self, tenant_id: &str) -> RouteDecision {
        let lookup = self.tenants.tenant_key_by_id(tenant_id);
        match bounded(self.config.timeouts.tenant_lookup, lookup).await {
            Ok(Some(key)) => RouteDecision::RedirectTenantHome {
                tenant_key: Some(key),
            },
            Ok(None) => {
                warn!(tenant_id, "home tenant not found");
                RouteDecision::RedirectUnauthorized
            }
            Err(e) => {
                warn!(tenant_id, error = %e, "home tenant lookup failed");
                RouteDecision::RedirectUnauthorized
            }
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, GateError>>,
) -> Result<T, GateError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GateError::Timeout(format!("no answer within {limit:?}"))),
    }
}
