use std::collections::BTreeMap;

use async_trait::async_trait;
use campus_api::{CredentialValidator, GateError, Session, Tenant, TenantDirectory, TenantKey};

/// Fixed tenant table, for demos and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTenantDirectory {
    tenants: BTreeMap<TenantKey, Tenant>,
}

impl InMemoryTenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: tenants.into_iter().map(|t| (t.key.clone(), t)).collect(),
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: Tenant) -> Self {
        self.tenants.insert(tenant.key.clone(), tenant);
        self
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn tenant_by_key(&self, key: &str) -> Result<Option<Tenant>, GateError> {
        Ok(self.tenants.get(key).cloned())
    }

    async fn tenant_key_by_id(&self, id: &str) -> Result<Option<TenantKey>, GateError> {
        Ok(self
            .tenants
            .values()
            .find(|t| t.id == id)
            .map(|t| t.key.clone()))
    }
}

/// Token → session table, for demos and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialValidator {
    sessions: BTreeMap<String, Session>,
}

impl StaticCredentialValidator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(mut self, token: impl Into<String>, session: Session) -> Self {
        self.sessions.insert(token.into(), session);
        self
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentialValidator {
    async fn validate_credential(&self, token: &str) -> Result<Option<Session>, GateError> {
        Ok(self.sessions.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_api::{Role, TenantStatus};

    #[tokio::test]
    async fn lookups_both_ways() {
        let dir = InMemoryTenantDirectory::default().with_tenant(Tenant {
            id: "t-acme".to_string(),
            key: "acme".to_string(),
            status: TenantStatus::Active,
        });
        assert_eq!(dir.tenant_by_key("acme").await.unwrap().unwrap().id, "t-acme");
        assert!(dir.tenant_by_key("beta").await.unwrap().is_none());
        assert_eq!(dir.tenant_key_by_id("t-acme").await.unwrap().as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn unknown_token_is_no_session() {
        let session = Session::new("u", "u@x.test", [Role::SuperAdmin], None, false).unwrap();
        let v = StaticCredentialValidator::new().with_session("tok", session);
        assert!(v.validate_credential("tok").await.unwrap().is_some());
        assert!(v.validate_credential("other").await.unwrap().is_none());
    }
}
