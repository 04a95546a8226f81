use campus_api::RouteDecision;

use crate::config::{Pages, PlatformConfig};
use crate::policy::normalize_path;

/// `Location` value for a redirect decision; `None` for [`RouteDecision::Allow`].
///
/// Same-origin redirects stay relative. Redirects that change host (platform
/// root, tenant home, tenant-not-found page) are absolute.
pub fn redirect_location(
    decision: &RouteDecision,
    platform: &PlatformConfig,
    pages: &Pages,
) -> Option<String> {
    let location = match decision {
        RouteDecision::Allow => return None,
        RouteDecision::RedirectLogin { return_path } => {
            // Re-normalized so a crafted `//host` can never become an open redirect.
            let return_path = normalize_path(return_path);
            format!(
                "{}?{}={}",
                pages.login,
                pages.return_param,
                urlencoding::encode(&return_path)
            )
        }
        RouteDecision::RedirectUnauthorized => pages.unauthorized.clone(),
        RouteDecision::RedirectPasswordChange => pages.password_change.clone(),
        RouteDecision::RedirectTenantNotFound => {
            format!("{}{}", platform.origin(None), pages.tenant_not_found)
        }
        RouteDecision::RedirectTenantHome { tenant_key: None } => {
            format!("{}/", platform.origin(None))
        }
        RouteDecision::RedirectTenantHome {
            tenant_key: Some(key),
        } => format!("{}{}", platform.origin(Some(key)), pages.tenant_home),
    };
    Some(location)
}
