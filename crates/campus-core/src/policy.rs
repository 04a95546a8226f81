//! Static access policy: reserved labels, public paths, and the ordered
//! prefix → role table.

use std::collections::BTreeSet;

use campus_api::Role;

/// One protected route prefix and the roles allowed behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub prefix: String,
    pub roles: BTreeSet<Role>,
    /// Pages that only make sense on an institute subdomain.
    pub tenant_scoped: bool,
}

/// How a host label relates to the tenant table before any lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelClass {
    Platform,
    Reserved,
    Candidate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    reserved_subdomains: BTreeSet<String>,
    public_paths: Vec<String>,
    bypass_prefixes: Vec<String>,
    routes: Vec<RouteRule>,
    password_change_path: String,
}

impl AccessPolicy {
    pub fn new(
        reserved_subdomains: impl IntoIterator<Item = String>,
        public_paths: Vec<String>,
        bypass_prefixes: Vec<String>,
        routes: Vec<RouteRule>,
        password_change_path: String,
    ) -> Self {
        Self {
            reserved_subdomains: reserved_subdomains.into_iter().collect(),
            public_paths,
            bypass_prefixes,
            routes,
            password_change_path,
        }
    }

    pub fn reserved_subdomains(&self) -> &BTreeSet<String> {
        &self.reserved_subdomains
    }

    pub fn public_paths(&self) -> &[String] {
        &self.public_paths
    }

    pub fn bypass_prefixes(&self) -> &[String] {
        &self.bypass_prefixes
    }

    pub fn routes(&self) -> &[RouteRule] {
        &self.routes
    }

    pub fn password_change_path(&self) -> &str {
        &self.password_change_path
    }

    /// Classify the parser's output without touching storage.
    pub fn classify(&self, label: Option<&str>) -> LabelClass {
        match label {
            None => LabelClass::Platform,
            Some(l) if self.reserved_subdomains.contains(l) => LabelClass::Reserved,
            Some(l) => LabelClass::Candidate(l.to_string()),
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.is_public_normalized(&normalize_path(path))
    }

    /// Static assets the gate never evaluates.
    pub fn is_bypassed(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.bypass_prefixes
            .iter()
            .any(|p| p != "/" && path_matches(p, &path, false))
    }

    pub fn is_password_change(&self, path: &str) -> bool {
        self.is_password_change_normalized(&normalize_path(path))
    }

    /// First rule, in table order, whose prefix covers `path`.
    ///
    /// Matching is ASCII case-insensitive so `/Admin` cannot slip past `/admin`.
    pub fn route_for(&self, path: &str) -> Option<&RouteRule> {
        self.route_for_normalized(&normalize_path(path))
    }

    // The `_normalized` forms take the output of `normalize_path` and must not
    // decode it again.
    pub(crate) fn is_public_normalized(&self, path: &str) -> bool {
        self.public_paths
            .iter()
            .any(|p| path_matches(p, path, false))
    }

    pub(crate) fn is_password_change_normalized(&self, path: &str) -> bool {
        path_matches(&self.password_change_path, path, false)
    }

    pub(crate) fn route_for_normalized(&self, path: &str) -> Option<&RouteRule> {
        self.routes
            .iter()
            .find(|r| path_matches(&r.prefix, path, true))
    }
}

/// True when `raw` already is the path [`normalize_path`] would judge.
///
/// Every segment must decode to something other than empty, `.` or `..`,
/// with no slash or backslash in it. One trailing slash is fine.
/// Anything else reaches a downstream router in a different shape than the
/// one the policy saw.
pub fn is_canonical_path(raw: &str) -> bool {
    let Some(rest) = raw.strip_prefix('/') else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    rest.split('/').all(|segment| match urlencoding::decode(segment) {
        Ok(decoded) => {
            !matches!(decoded.as_ref(), "" | "." | "..") && !decoded.contains(['/', '\\'])
        }
        Err(_) => false,
    })
}

/// [`normalize_path`] re-encoded segment by segment, ready for a URI.
pub fn canonical_path(raw: &str) -> String {
    let normalized = normalize_path(raw);
    if normalized == "/" {
        return normalized;
    }
    let mut out = String::with_capacity(normalized.len());
    for segment in normalized.split('/').skip(1) {
        out.push('/');
        out.push_str(&urlencoding::encode(segment));
    }
    out
}

/// Segment-aware prefix match; `/` only matches the root itself.
fn path_matches(pattern: &str, path: &str, ignore_case: bool) -> bool {
    let pattern = if pattern == "/" {
        pattern
    } else {
        pattern.trim_end_matches('/')
    };
    if pattern == "/" {
        return path == "/";
    }

    let (pattern, path) = if ignore_case {
        (pattern.to_ascii_lowercase(), path.to_ascii_lowercase())
    } else {
        (pattern.to_string(), path.to_string())
    };

    path == pattern
        || path
            .strip_prefix(pattern.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}
