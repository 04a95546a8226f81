//! The admission state machine.
//!
//! Rules are evaluated in a fixed order and the first match wins. The order
//! is the contract: a wrong-tenant session and a wrong-role session receive
//! different redirects, and a pending password change outranks both.

use campus_api::{RouteDecision, Session, TenantId, TenantResolution};

use crate::policy::{AccessPolicy, normalize_path};

/// Output of [`AccessPolicy::authorize`].
///
/// `ForwardToHomeTenant` is the one outcome that needs more I/O: the caller
/// looks up the tenant key for `tenant_id` and redirects to that subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ruling {
    Decided(RouteDecision),
    ForwardToHomeTenant { tenant_id: TenantId },
}

impl Ruling {
    pub fn decision(&self) -> Option<&RouteDecision> {
        match self {
            Ruling::Decided(d) => Some(d),
            Ruling::ForwardToHomeTenant { .. } => None,
        }
    }
}

impl From<RouteDecision> for Ruling {
    fn from(decision: RouteDecision) -> Self {
        Ruling::Decided(decision)
    }
}

impl AccessPolicy {
    /// Decide what happens to a request. Pure: same inputs, same ruling.
    pub fn authorize(
        &self,
        path: &str,
        resolution: &TenantResolution,
        session: Option<&Session>,
    ) -> Ruling {
        let path = normalize_path(path);

        match resolution {
            TenantResolution::Reserved => {
                return RouteDecision::RedirectTenantHome { tenant_key: None }.into();
            }
            TenantResolution::NotFound | TenantResolution::Suspended => {
                return RouteDecision::RedirectTenantNotFound.into();
            }
            TenantResolution::Platform | TenantResolution::Found(_) => {}
        }

        if session.is_some_and(Session::must_change_password)
            && !self.is_password_change_normalized(&path)
        {
            return RouteDecision::RedirectPasswordChange.into();
        }

        if self.is_public_normalized(&path) {
            return RouteDecision::Allow.into();
        }

        let Some(session) = session else {
            return RouteDecision::RedirectLogin { return_path: path }.into();
        };

        if let TenantResolution::Found(tenant) = resolution {
            if !session.is_super_admin() && session.tenant_id() != Some(tenant.id.as_str()) {
                return RouteDecision::RedirectUnauthorized.into();
            }
        }

        let rule = self.route_for_normalized(&path);

        if matches!(resolution, TenantResolution::Platform)
            && !session.is_super_admin()
            && rule.is_some_and(|r| r.tenant_scoped)
        {
            if let Some(tenant_id) = session.tenant_id() {
                return Ruling::ForwardToHomeTenant {
                    tenant_id: tenant_id.to_string(),
                };
            }
        }

        if let Some(rule) = rule {
            if !session.has_any_role(&rule.roles) {
                return RouteDecision::RedirectUnauthorized.into();
            }
        }

        RouteDecision::Allow.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GateConfig;
    use campus_api::{Role, Tenant, TenantStatus};

    fn policy() -> AccessPolicy {
        GateConfig::with_root_domain("platform.test").unwrap().policy
    }

    fn tenant(id: &str, key: &str) -> Tenant {
        Tenant {
            id: id.to_string(),
            key: key.to_string(),
            status: TenantStatus::Active,
        }
    }

    fn found(id: &str, key: &str) -> TenantResolution {
        TenantResolution::Found(tenant(id, key))
    }

    fn session(roles: &[Role], tenant_id: Option<&str>, must_change: bool) -> Session {
        Session::new(
            "user-1",
            "user@example.test",
            roles.iter().copied(),
            tenant_id.map(str::to_string),
            must_change,
        )
        .unwrap()
    }

    fn decided(d: RouteDecision) -> Ruling {
        Ruling::Decided(d)
    }

    const PROTECTED: [&str; 6] = [
        "/admin/dashboard",
        "/teacher/batches",
        "/student/courses/7",
        "/super-admin/institutes",
        "/profile",
        "/change-password",
    ];
    const PUBLIC: [&str; 4] = ["/", "/login", "/reset-password", "/unauthorized"];

    /// Every session shape the authorizer should care about.
    fn sessions() -> Vec<Option<Session>> {
        let mut out = vec![None];
        for must_change in [false, true] {
            out.push(Some(session(&[Role::SuperAdmin], None, must_change)));
            out.push(Some(session(&[Role::SuperAdmin], Some("t-acme"), must_change)));
            for role in [Role::InstituteAdmin, Role::Teacher, Role::Student] {
                for tenant_id in ["t-acme", "t-beta"] {
                    out.push(Some(session(&[role], Some(tenant_id), must_change)));
                }
            }
            out.push(Some(session(
                &[Role::Teacher, Role::Student],
                Some("t-acme"),
                must_change,
            )));
        }
        out
    }

    fn resolutions() -> Vec<TenantResolution> {
        vec![
            TenantResolution::Platform,
            TenantResolution::Reserved,
            TenantResolution::NotFound,
            TenantResolution::Suspended,
            found("t-acme", "acme"),
            found("t-beta", "beta"),
        ]
    }

    // --- concrete scenarios ---

    #[test]
    fn anonymous_on_tenant_admin_path_goes_to_login() {
        let ruling = policy().authorize("/admin/dashboard", &found("t-acme", "acme"), None);
        assert_eq!(
            ruling,
            decided(RouteDecision::RedirectLogin {
                return_path: "/admin/dashboard".to_string()
            })
        );
    }

    #[test]
    fn super_admin_on_platform_root() {
        let s = session(&[Role::SuperAdmin], None, false);
        let ruling = policy().authorize("/super-admin/institutes", &TenantResolution::Platform, Some(&s));
        assert_eq!(ruling, decided(RouteDecision::Allow));
    }

    #[test]
    fn unknown_tenant_ignores_session() {
        for s in sessions() {
            assert_eq!(
                policy().authorize("/teacher", &TenantResolution::NotFound, s.as_ref()),
                decided(RouteDecision::RedirectTenantNotFound)
            );
        }
    }

    #[test]
    fn cross_tenant_teacher_is_unauthorized() {
        let s = session(&[Role::Teacher], Some("t-beta"), false);
        let ruling = policy().authorize("/teacher/batches", &found("t-acme", "acme"), Some(&s));
        assert_eq!(ruling, decided(RouteDecision::RedirectUnauthorized));
    }

    #[test]
    fn reserved_label_goes_to_platform_root() {
        for s in sessions() {
            for path in PUBLIC.iter().chain(PROTECTED.iter()) {
                assert_eq!(
                    policy().authorize(path, &TenantResolution::Reserved, s.as_ref()),
                    decided(RouteDecision::RedirectTenantHome { tenant_key: None })
                );
            }
        }
    }

    #[test]
    fn institute_admin_on_platform_root_is_forwarded_home() {
        let s = session(&[Role::InstituteAdmin], Some("t-acme"), false);
        let ruling = policy().authorize("/admin/dashboard", &TenantResolution::Platform, Some(&s));
        assert_eq!(
            ruling,
            Ruling::ForwardToHomeTenant {
                tenant_id: "t-acme".to_string()
            }
        );
    }

    // --- ordering details ---

    #[test]
    fn affiliated_super_admin_is_never_forwarded() {
        let s = session(&[Role::SuperAdmin], Some("t-acme"), false);
        let ruling = policy().authorize("/admin/dashboard", &TenantResolution::Platform, Some(&s));
        assert_eq!(ruling, decided(RouteDecision::Allow));
    }

    #[test]
    fn wrong_tenant_beats_wrong_role() {
        // Student of beta on acme's admin area: tenant check fires first.
        let s = session(&[Role::Student], Some("t-beta"), false);
        assert_eq!(
            policy().authorize("/admin", &found("t-acme", "acme"), Some(&s)),
            decided(RouteDecision::RedirectUnauthorized)
        );
        // Same student on its own tenant: role check fires.
        let s = session(&[Role::Student], Some("t-acme"), false);
        assert_eq!(
            policy().authorize("/admin", &found("t-acme", "acme"), Some(&s)),
            decided(RouteDecision::RedirectUnauthorized)
        );
        assert_eq!(
            policy().authorize("/student", &found("t-acme", "acme"), Some(&s)),
            decided(RouteDecision::Allow)
        );
    }

    #[test]
    fn password_change_page_is_exempt_from_forced_change() {
        let s = session(&[Role::Teacher], Some("t-acme"), true);
        assert_eq!(
            policy().authorize("/change-password", &found("t-acme", "acme"), Some(&s)),
            decided(RouteDecision::Allow)
        );
        assert_eq!(
            policy().authorize("/login", &found("t-acme", "acme"), Some(&s)),
            decided(RouteDecision::RedirectPasswordChange)
        );
    }

    #[test]
    fn password_change_page_still_requires_a_session() {
        assert_eq!(
            policy().authorize("/change-password", &found("t-acme", "acme"), None),
            decided(RouteDecision::RedirectLogin {
                return_path: "/change-password".to_string()
            })
        );
    }

    #[test]
    fn traversal_is_judged_on_the_normalized_path() {
        assert_eq!(
            policy().authorize("/login/../admin/dashboard", &found("t-acme", "acme"), None),
            decided(RouteDecision::RedirectLogin {
                return_path: "/admin/dashboard".to_string()
            })
        );
    }

    #[test]
    fn return_path_never_escapes_the_origin() {
        let ruling = policy().authorize("//evil.example/admin", &TenantResolution::Platform, None);
        assert_eq!(
            ruling,
            decided(RouteDecision::RedirectLogin {
                return_path: "/evil.example/admin".to_string()
            })
        );
    }

    #[test]
    fn unprefixed_protected_path_needs_only_a_session() {
        let s = session(&[Role::Student], Some("t-acme"), false);
        assert_eq!(
            policy().authorize("/profile", &found("t-acme", "acme"), Some(&s)),
            decided(RouteDecision::Allow)
        );
    }

    #[test]
    fn platform_user_on_non_tenant_route_gets_role_check() {
        let s = session(&[Role::InstituteAdmin], Some("t-acme"), false);
        assert_eq!(
            policy().authorize("/super-admin", &TenantResolution::Platform, Some(&s)),
            decided(RouteDecision::RedirectUnauthorized)
        );
    }

    // --- properties over the full input grid ---

    #[test]
    fn p1_tenant_isolation() {
        let p = policy();
        for s in sessions().into_iter().flatten() {
            if s.is_super_admin() {
                continue;
            }
            for res in [found("t-acme", "acme"), found("t-beta", "beta")] {
                let tenant = res.tenant().unwrap();
                if s.tenant_id() == Some(tenant.id.as_str()) {
                    continue;
                }
                for path in PROTECTED {
                    assert_ne!(
                        p.authorize(path, &res, Some(&s)),
                        decided(RouteDecision::Allow),
                        "{s:?} reached {path} on {}",
                        tenant.key
                    );
                }
            }
        }
    }

    #[test]
    fn p3_forced_password_change_precedence() {
        let p = policy();
        for s in sessions().into_iter().flatten() {
            if !s.must_change_password() {
                continue;
            }
            for res in [TenantResolution::Platform, found("t-acme", "acme"), found("t-beta", "beta")] {
                for path in PROTECTED.iter().filter(|path| **path != "/change-password") {
                    assert_eq!(
                        p.authorize(path, &res, Some(&s)),
                        decided(RouteDecision::RedirectPasswordChange),
                        "{s:?} on {path}"
                    );
                }
            }
        }
    }

    #[test]
    fn p4_public_paths_reachable() {
        let p = policy();
        for s in sessions() {
            if s.as_ref().is_some_and(Session::must_change_password) {
                continue;
            }
            for res in [TenantResolution::Platform, found("t-acme", "acme"), found("t-beta", "beta")] {
                for path in PUBLIC {
                    assert_eq!(
                        p.authorize(path, &res, s.as_ref()),
                        decided(RouteDecision::Allow),
                        "{s:?} on {path}"
                    );
                }
            }
        }
    }

    #[test]
    fn p5_idempotence() {
        let p = policy();
        for s in sessions() {
            for res in resolutions() {
                for path in PUBLIC.iter().chain(PROTECTED.iter()) {
                    assert_eq!(
                        p.authorize(path, &res, s.as_ref()),
                        p.authorize(path, &res, s.as_ref())
                    );
                }
            }
        }
    }

    #[test]
    fn p6_role_gating() {
        let p = policy();
        for rule in p.routes() {
            let path = format!("{}/page", rule.prefix);
            for role in Role::ALL {
                for res in [found("t-acme", "acme"), TenantResolution::Platform] {
                    let tenant_id = (role != Role::SuperAdmin).then_some("t-acme");
                    let s = session(&[role], tenant_id, false);
                    let ruling = p.authorize(&path, &res, Some(&s));

                    let forwarded = matches!(res, TenantResolution::Platform)
                        && role != Role::SuperAdmin
                        && rule.tenant_scoped;
                    if forwarded {
                        assert!(matches!(ruling, Ruling::ForwardToHomeTenant { .. }));
                    } else if rule.roles.contains(&role) {
                        assert_eq!(ruling, decided(RouteDecision::Allow), "{role} on {path}");
                    } else {
                        assert_eq!(
                            ruling,
                            decided(RouteDecision::RedirectUnauthorized),
                            "{role} on {path}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn anonymous_never_allowed_on_protected_paths() {
        let p = policy();
        for res in resolutions() {
            for path in PROTECTED {
                assert!(!p.authorize(path, &res, None).decision().is_some_and(RouteDecision::is_allow));
            }
        }
    }
}
