//! Target URL validation.
//!
//! # Responsibilities
//! - Decide whether a caller-supplied target may be contacted at all
//! - Enforce scheme, host and port allow-lists
//! - Refuse targets that point back into private networks
//!
//! # Design Decisions
//! - Consulted before translation; a rejection never reaches the pool
//! - Pluggable: the server holds an `Arc<dyn UrlValidator>`
//! - Hostnames are not resolved here, only literals and `localhost` are judged

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::config::TargetPolicyConfig;

/// Outcome of validating a target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(String),
}

/// Policy deciding which targets the proxy may contact.
pub trait UrlValidator: Send + Sync + fmt::Debug {
    fn validate(&self, url: &Url) -> Verdict;
}

/// Accepts every target. Intended for tests and trusted deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl UrlValidator for AllowAll {
    fn validate(&self, _url: &Url) -> Verdict {
        Verdict::Accept
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    /// `*.example.com` stored as `.example.com`.
    Suffix(String),
}

impl HostPattern {
    fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_prefix('*') {
            Some(suffix) if suffix.starts_with('.') => HostPattern::Suffix(suffix.to_string()),
            _ => HostPattern::Exact(pattern),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(expected) => host == expected,
            HostPattern::Suffix(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

/// Allow-list policy built from `[target_policy]`.
#[derive(Debug, Clone)]
pub struct AllowListValidator {
    schemes: Vec<String>,
    hosts: Vec<HostPattern>,
    ports: Vec<u16>,
    deny_private: bool,
}

impl AllowListValidator {
    pub fn from_config(config: &TargetPolicyConfig) -> Self {
        Self {
            schemes: config
                .allowed_schemes
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            hosts: config.allowed_hosts.iter().map(|h| HostPattern::parse(h)).collect(),
            ports: config.allowed_ports.clone(),
            deny_private: config.deny_private_addresses,
        }
    }
}

impl UrlValidator for AllowListValidator {
    fn validate(&self, url: &Url) -> Verdict {
        if !self.schemes.iter().any(|s| s == url.scheme()) {
            return Verdict::Reject(format!("scheme '{}' is not allowed", url.scheme()));
        }

        let host = match url.host() {
            Some(host) => host,
            None => return Verdict::Reject("target has no host".to_string()),
        };

        if self.deny_private && is_private_host(&host) {
            return Verdict::Reject(format!("host '{}' is a private or loopback address", host));
        }

        if !self.hosts.is_empty() {
            let name = host.to_string().to_ascii_lowercase();
            if !self.hosts.iter().any(|p| p.matches(&name)) {
                return Verdict::Reject(format!("host '{}' is not in the allow-list", name));
            }
        }

        if !self.ports.is_empty() {
            match url.port_or_known_default() {
                Some(port) if self.ports.contains(&port) => {}
                Some(port) => return Verdict::Reject(format!("port {} is not allowed", port)),
                None => return Verdict::Reject("target has no port".to_string()),
            }
        }

        Verdict::Accept
    }
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            name == "localhost" || name.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(hosts: &[&str], ports: &[u16], deny_private: bool) -> AllowListValidator {
        AllowListValidator::from_config(&TargetPolicyConfig {
            allowed_schemes: vec!["http".into(), "https".into()],
            allowed_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            allowed_ports: ports.to_vec(),
            deny_private_addresses: deny_private,
        })
    }

    fn check(v: &AllowListValidator, url: &str) -> Verdict {
        v.validate(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_default_policy_accepts_public_hosts() {
        let v = AllowListValidator::from_config(&TargetPolicyConfig::default());
        assert_eq!(check(&v, "http://example.com/geostore/users"), Verdict::Accept);
        assert_eq!(check(&v, "https://93.184.216.34/"), Verdict::Accept);
    }

    #[test]
    fn test_denies_private_targets() {
        let v = validator(&[], &[], true);
        for url in [
            "http://localhost:8080/",
            "http://api.localhost/",
            "http://127.0.0.1/",
            "http://10.1.2.3/",
            "http://192.168.0.10/",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(matches!(check(&v, url), Verdict::Reject(_)), "{} should be rejected", url);
        }
    }

    #[test]
    fn test_private_allowed_when_disabled() {
        let v = validator(&[], &[], false);
        assert_eq!(check(&v, "http://127.0.0.1:9000/"), Verdict::Accept);
    }

    #[test]
    fn test_host_allow_list() {
        let v = validator(&["geo-solutions.it", "*.example.com"], &[], true);
        assert_eq!(check(&v, "http://geo-solutions.it/"), Verdict::Accept);
        assert_eq!(check(&v, "http://maps.example.com/wms"), Verdict::Accept);
        assert!(matches!(check(&v, "http://example.com/"), Verdict::Reject(_)));
        assert!(matches!(check(&v, "http://evil.com/"), Verdict::Reject(_)));
        assert!(matches!(check(&v, "http://notexample.com/"), Verdict::Reject(_)));
    }

    #[test]
    fn test_port_allow_list() {
        let v = validator(&[], &[80, 8080], false);
        assert_eq!(check(&v, "http://example.com/"), Verdict::Accept);
        assert_eq!(check(&v, "http://example.com:8080/"), Verdict::Accept);
        assert!(matches!(check(&v, "https://example.com/"), Verdict::Reject(_)));
    }

    #[test]
    fn test_scheme_not_allowed() {
        let v = AllowListValidator::from_config(&TargetPolicyConfig {
            allowed_schemes: vec!["https".into()],
            ..TargetPolicyConfig::default()
        });
        assert!(matches!(check(&v, "http://example.com/"), Verdict::Reject(_)));
        assert_eq!(check(&v, "https://example.com/"), Verdict::Accept);
    }

    #[test]
    fn test_allow_all() {
        assert_eq!(AllowAll.validate(&Url::parse("http://127.0.0.1/").unwrap()), Verdict::Accept);
    }
}
