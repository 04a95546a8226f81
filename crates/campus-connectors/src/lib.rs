//! Collaborator implementations for the campus gate.

mod cache;
mod memory;
mod secrets;
mod supabase;

use std::sync::Arc;

use campus_api::{CredentialValidator, GateError, SecretStore, TenantDirectory};
use campus_core::GateConfig;

pub use cache::CachedTenantDirectory;
pub use memory::{InMemoryTenantDirectory, StaticCredentialValidator};
pub use secrets::EnvSecretStore;
pub use supabase::{
    SupabaseClient, SupabaseConfig, SupabaseSessionValidator, SupabaseTenantDirectory,
};

/// The live collaborators a gate needs, plus the cookie they expect.
pub struct Collaborators {
    pub tenants: Arc<dyn TenantDirectory>,
    pub sessions: Arc<dyn CredentialValidator>,
    pub cookie_name: String,
}

/// Build the Supabase-backed collaborators described by `config`.
pub fn supabase_collaborators(
    config: &GateConfig,
    secrets: &dyn SecretStore,
) -> Result<Collaborators, GateError> {
    let supabase = SupabaseConfig::from_settings(&config.supabase, secrets)?;
    let cookie_name = config
        .session
        .cookie_name
        .clone()
        .unwrap_or_else(|| supabase.auth_cookie_name());

    let timeouts = &config.timeouts;
    let http_timeout = timeouts.tenant_lookup.max(timeouts.session_validation);
    let client = SupabaseClient::new(supabase, http_timeout)?;

    let directory = SupabaseTenantDirectory::new(client.clone(), &config.supabase.tenants_table);
    let tenants: Arc<dyn TenantDirectory> = match timeouts.tenant_cache_ttl {
        Some(ttl) => Arc::new(CachedTenantDirectory::new(directory, ttl)),
        None => Arc::new(directory),
    };

    let sessions = Arc::new(SupabaseSessionValidator::new(
        client,
        &config.supabase,
        timeouts.session_validation,
    ));

    Ok(Collaborators {
        tenants,
        sessions,
        cookie_name,
    })
}
