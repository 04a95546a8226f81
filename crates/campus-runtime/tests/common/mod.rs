//! Shared fixtures: a small tenant table, a handful of sessions, and
//! misbehaving collaborators for the fail-closed paths.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use campus_api::{
    CredentialValidator, GateError, Role, Session, Tenant, TenantDirectory, TenantKey,
    TenantStatus,
};
use campus_connectors::{InMemoryTenantDirectory, StaticCredentialValidator};
use campus_core::GateConfig;
use campus_runtime::Gate;

pub const COOKIE: &str = "sb-test-auth-token";

pub fn config() -> GateConfig {
    GateConfig::with_root_domain("platform.test").unwrap()
}

fn tenant(id: &str, key: &str, status: TenantStatus) -> Tenant {
    Tenant {
        id: id.to_string(),
        key: key.to_string(),
        status,
    }
}

pub fn directory() -> InMemoryTenantDirectory {
    InMemoryTenantDirectory::new([
        tenant("t-acme", "acme", TenantStatus::Active),
        tenant("t-beta", "beta", TenantStatus::Active),
        tenant("t-frozen", "frozen", TenantStatus::Suspended),
        tenant("t-newco", "newco", TenantStatus::Pending),
    ])
}

fn session(id: &str, roles: &[Role], tenant_id: Option<&str>, must_change: bool) -> Session {
    Session::new(
        id,
        format!("{id}@example.test"),
        roles.iter().copied(),
        tenant_id.map(str::to_string),
        must_change,
    )
    .unwrap()
}

pub fn validator() -> StaticCredentialValidator {
    StaticCredentialValidator::new()
        .with_session("tok-root", session("root", &[Role::SuperAdmin], None, false))
        .with_session(
            "tok-acme-admin",
            session("acme-admin", &[Role::InstituteAdmin], Some("t-acme"), false),
        )
        .with_session(
            "tok-acme-teacher",
            session("acme-teacher", &[Role::Teacher], Some("t-acme"), false),
        )
        .with_session(
            "tok-beta-teacher",
            session("beta-teacher", &[Role::Teacher], Some("t-beta"), false),
        )
        .with_session(
            "tok-acme-new-student",
            session("acme-student", &[Role::Student], Some("t-acme"), true),
        )
}

pub fn gate() -> Gate {
    Gate::new(config(), Arc::new(directory()), Arc::new(validator()), COOKIE)
}

pub fn gate_with(
    tenants: impl TenantDirectory + 'static,
    sessions: impl CredentialValidator + 'static,
) -> Gate {
    Gate::new(config(), Arc::new(tenants), Arc::new(sessions), COOKIE)
}

/// Directory whose every call fails.
pub struct BrokenDirectory;

#[async_trait]
impl TenantDirectory for BrokenDirectory {
    async fn tenant_by_key(&self, _key: &str) -> Result<Option<Tenant>, GateError> {
        Err(GateError::Connection("connection refused".to_string()))
    }

    async fn tenant_key_by_id(&self, _id: &str) -> Result<Option<TenantKey>, GateError> {
        Err(GateError::Connection("connection refused".to_string()))
    }
}

/// Resolves tenants normally but cannot map ids back to keys.
pub struct NoReverseLookup(pub InMemoryTenantDirectory);

#[async_trait]
impl TenantDirectory for NoReverseLookup {
    async fn tenant_by_key(&self, key: &str) -> Result<Option<Tenant>, GateError> {
        self.0.tenant_by_key(key).await
    }

    async fn tenant_key_by_id(&self, _id: &str) -> Result<Option<TenantKey>, GateError> {
        Err(GateError::Timeout("replica lagging".to_string()))
    }
}

/// Sets `dropped` when the in-flight call is abandoned before finishing.
pub struct DropFlag {
    pub dropped: Arc<AtomicBool>,
}

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Never answers within any sane timeout.
#[derive(Default)]
pub struct HangingDirectory {
    pub dropped: Arc<AtomicBool>,
    pub finished: Arc<AtomicBool>,
}

#[async_trait]
impl TenantDirectory for HangingDirectory {
    async fn tenant_by_key(&self, _key: &str) -> Result<Option<Tenant>, GateError> {
        let _guard = DropFlag {
            dropped: self.dropped.clone(),
        };
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(None)
    }

    async fn tenant_key_by_id(&self, _id: &str) -> Result<Option<TenantKey>, GateError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }
}

/// Counts calls, then delegates or misbehaves.
pub struct CountingValidator {
    pub calls: AtomicUsize,
    pub behaviour: Behaviour,
}

pub enum Behaviour {
    Delegate(StaticCredentialValidator),
    Fail,
    Hang,
}

impl CountingValidator {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            behaviour,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialValidator for CountingValidator {
    async fn validate_credential(&self, token: &str) -> Result<Option<Session>, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Delegate(inner) => inner.validate_credential(token).await,
            Behaviour::Fail => Err(GateError::Connection("auth service down".to_string())),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}
