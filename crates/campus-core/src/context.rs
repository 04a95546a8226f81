use campus_api::{RequestContext, RouteDecision, Session, TenantResolution};

/// Build the trusted context for an admitted request.
///
/// Returns `None` for anything but [`RouteDecision::Allow`]; redirected
/// requests never carry context downstream. Every field is copied from the
/// resolved tenant or the validated session, never from the request itself.
pub fn inject(
    decision: &RouteDecision,
    resolution: &TenantResolution,
    session: Option<&Session>,
) -> Option<RequestContext> {
    if !decision.is_allow() {
        return None;
    }

    let mut ctx = RequestContext::default();
    if let Some(tenant) = resolution.tenant() {
        ctx.tenant_id = Some(tenant.id.clone());
        ctx.tenant_key = Some(tenant.key.clone());
        ctx.tenant_status = Some(tenant.status);
    }
    if let Some(session) = session {
        ctx.user_id = Some(session.user_id().to_string());
        ctx.email = Some(session.email().to_string());
        ctx.roles = Some(session.roles().clone());
    }
    Some(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_api::{Role, Tenant, TenantStatus, headers};

    fn acme() -> TenantResolution {
        TenantResolution::Found(Tenant {
            id: "t-acme".to_string(),
            key: "acme".to_string(),
            status: TenantStatus::Active,
        })
    }

    fn teacher() -> Session {
        Session::new(
            "u-1",
            "t@acme.test",
            [Role::Teacher, Role::Student],
            Some("t-acme".to_string()),
            false,
        )
        .unwrap()
    }

    #[test]
    fn full_context_on_tenant() {
        let ctx = inject(&RouteDecision::Allow, &acme(), Some(&teacher())).unwrap();
        assert_eq!(ctx.tenant_id.as_deref(), Some("t-acme"));
        assert_eq!(ctx.tenant_key.as_deref(), Some("acme"));
        assert_eq!(ctx.tenant_status, Some(TenantStatus::Active));
        assert_eq!(ctx.user_id.as_deref(), Some("u-1"));
        assert_eq!(ctx.email.as_deref(), Some("t@acme.test"));
        assert_eq!(ctx.roles.as_ref().map(|r| r.len()), Some(2));

        let pairs = ctx.header_pairs();
        assert!(pairs.contains(&(headers::USER_ROLES, "TEACHER,STUDENT".to_string())));
    }

    #[test]
    fn platform_request_has_no_tenant_fields() {
        let ctx = inject(&RouteDecision::Allow, &TenantResolution::Platform, Some(&teacher())).unwrap();
        assert!(ctx.is_platform());
        assert!(ctx.tenant_key.is_none());
        assert!(ctx.tenant_status.is_none());
        assert!(ctx.is_authenticated());
    }

    #[test]
    fn anonymous_public_request() {
        let ctx = inject(&RouteDecision::Allow, &acme(), None).unwrap();
        assert!(!ctx.is_authenticated());
        assert!(ctx.roles.is_none());
        assert_eq!(ctx.tenant_id.as_deref(), Some("t-acme"));
    }

    #[test]
    fn redirects_carry_nothing() {
        for decision in [
            RouteDecision::RedirectUnauthorized,
            RouteDecision::RedirectPasswordChange,
            RouteDecision::RedirectTenantNotFound,
            RouteDecision::RedirectLogin {
                return_path: "/admin".to_string(),
            },
            RouteDecision::RedirectTenantHome { tenant_key: None },
        ] {
            assert!(inject(&decision, &acme(), Some(&teacher())).is_none());
        }
    }
}
