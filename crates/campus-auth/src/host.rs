//! Tenant label extraction from the `Host` header.

use std::net::Ipv4Addr;

/// Which hosts count as the bare platform domain.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Platform root, e.g. `platform.test`. When unset, any 2-label host is a root.
    pub root_domain: Option<String>,

    /// Development hosts that act as a root (`localhost`, `127.0.0.1`).
    pub local_hosts: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root_domain: None,
            local_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
        }
    }
}

impl HostConfig {
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root_domain: Some(root.into()),
            ..Self::default()
        }
    }
}

/// True for a non-empty DNS label made of `[a-z0-9-]`.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Extract the candidate tenant label from a raw host header.
///
/// Returns `None` for the platform root, local development roots, IP literals,
/// and anything malformed. Reserved labels (`www`, `api`, ...) are returned
/// as-is; deciding what they mean is the caller's job.
pub fn parse_host(raw: &str, cfg: &HostConfig) -> Option<String> {
    let host = raw.trim().to_ascii_lowercase();
    if host.is_empty() || host.starts_with('[') {
        return None;
    }

    let host = match host.rsplit_once(':') {
        // A second colon means an unbracketed IPv6 literal.
        Some((h, _)) if h.contains(':') => return None,
        Some((h, port)) => {
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            h
        }
        None => host.as_str(),
    };

    let host = host.trim_end_matches('.');
    if host.is_empty() || host.parse::<Ipv4Addr>().is_ok() {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if !labels.iter().all(|l| is_valid_label(l)) {
        return None;
    }
    let leftmost = labels[0].to_string();

    for local in &cfg.local_hosts {
        let local = local.trim().to_ascii_lowercase();
        if host == local {
            return None;
        }
        if host.strip_suffix(local.as_str()).is_some_and(|p| p.ends_with('.')) {
            return Some(leftmost);
        }
    }

    if let Some(root) = cfg.root_domain.as_deref() {
        let root = root.trim().trim_start_matches('.').to_ascii_lowercase();
        if host == root {
            return None;
        }
        if host.strip_suffix(root.as_str()).is_some_and(|p| p.ends_with('.')) {
            return Some(leftmost);
        }
    }

    if labels.len() <= 2 {
        return None;
    }
    Some(leftmost)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> HostConfig {
        HostConfig::with_root("platform.test")
    }

    #[test]
    fn subdomain_of_root() {
        assert_eq!(parse_host("acme.platform.test", &root()), Some("acme".to_string()));
        assert_eq!(parse_host("ACME.Platform.Test:8443", &root()), Some("acme".to_string()));
        assert_eq!(parse_host("acme.platform.test.", &root()), Some("acme".to_string()));
        assert_eq!(parse_host("www.platform.test", &root()), Some("www".to_string()));
    }

    #[test]
    fn nested_subdomain_reports_leftmost_label() {
        assert_eq!(
            parse_host("www.acme.platform.test", &root()),
            Some("www".to_string())
        );
    }

    #[test]
    fn bare_roots_have_no_tenant() {
        assert_eq!(parse_host("platform.test", &root()), None);
        assert_eq!(parse_host("platform.test:3000", &root()), None);
        assert_eq!(parse_host("localhost:3000", &root()), None);
        assert_eq!(parse_host("127.0.0.1:3000", &root()), None);
        assert_eq!(parse_host("example.com", &HostConfig::default()), None);
    }

    #[test]
    fn local_development_subdomains() {
        assert_eq!(parse_host("acme.localhost:3000", &root()), Some("acme".to_string()));
    }

    #[test]
    fn unrelated_domain_uses_generic_rule() {
        assert_eq!(
            parse_host("acme.other.example", &root()),
            Some("acme".to_string())
        );
        assert_eq!(parse_host("other.example", &root()), None);
    }

    #[test]
    fn malformed_hosts_are_absent() {
        for raw in [
            "",
            "   ",
            "[::1]:3000",
            "::1",
            "fe80::1",
            "10.0.0.7",
            "acme.platform.test:",
            "acme.platform.test:http",
            "ac_me.platform.test",
            "acme..platform.test",
            ".platform.test",
            "acme platform.test",
        ] {
            assert_eq!(parse_host(raw, &root()), None, "host {raw:?}");
        }
    }
}
