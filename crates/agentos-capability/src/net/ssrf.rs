//! SSRF defense — IP blocklist and resolve-once pinning.
//!
//! Loopback, private, link-local, CGNAT, and multicast destinations are
//! refused. DNS rebinding is defeated by resolving a hostname once,
//! checking the resolved address, and pinning the connection to that
//! address for the actual request.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

/// Whether an IP is a forbidden fetch destination.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()            // 127.0.0.0/8
        || ip.is_private()      // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()   // 169.254/16 (cloud metadata lives here)
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || (octets[0] == 100 && (64..128).contains(&octets[1])) // CGNAT 100.64/10
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    // Mapped v4 inherits the v4 rules.
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_multicast()
        || ip.is_unspecified()
        || (segments[0] & 0xfe00) == 0xfc00 // unique-local fc00::/7
        || (segments[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
}

/// Resolve a URL's host once and return the pinned socket address.
///
/// IP-literal hosts are checked directly; hostnames are resolved and the
/// first address checked. A blocked destination yields `SSRF_BLOCKED`.
pub async fn resolve_pinned(url: &url::Url) -> KernelResult<SocketAddr> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(KernelError::new(
            ErrorCode::SsrfBlocked,
            format!("scheme {:?} is not fetchable", url.scheme()),
        ));
    }
    let host = url
        .host()
        .ok_or_else(|| KernelError::new(ErrorCode::SsrfBlocked, "URL has no host"))?;
    let port = url.port_or_known_default().unwrap_or(80);

    let ip = match host {
        url::Host::Ipv4(ip) => IpAddr::V4(ip),
        url::Host::Ipv6(ip) => IpAddr::V6(ip),
        url::Host::Domain(domain) => {
            let mut addrs = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| {
                    KernelError::new(ErrorCode::SsrfBlocked, format!("resolution failed: {e}"))
                })?;
            addrs
                .next()
                .ok_or_else(|| {
                    KernelError::new(ErrorCode::SsrfBlocked, "host resolved to no addresses")
                })?
                .ip()
        }
    };

    if is_blocked_ip(ip) {
        return Err(KernelError::new(
            ErrorCode::SsrfBlocked,
            format!("destination {ip} is not reachable from this deployment"),
        ));
    }
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(url: &str) -> bool {
        let parsed = url::Url::parse(url).unwrap();
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(resolve_pinned(&parsed))
            .is_err()
    }

    #[test]
    fn test_loopback_blocked() {
        assert!(blocked("http://127.0.0.1/"));
        assert!(blocked("http://127.8.9.10/admin"));
        assert!(blocked("http://[::1]/"));
    }

    #[test]
    fn test_private_ranges_blocked() {
        assert!(blocked("http://10.0.0.1/"));
        assert!(blocked("http://172.16.0.1/"));
        assert!(blocked("http://192.168.1.1/"));
    }

    #[test]
    fn test_link_local_blocked() {
        // The classic cloud metadata endpoint.
        assert!(blocked("http://169.254.169.254/latest/meta-data/"));
    }

    #[test]
    fn test_cgnat_blocked() {
        assert!(is_blocked_ip("100.64.0.1".parse().unwrap()));
        assert!(is_blocked_ip("100.127.255.254".parse().unwrap()));
        assert!(!is_blocked_ip("100.63.0.1".parse().unwrap()));
    }

    #[test]
    fn test_multicast_and_unspecified_blocked() {
        assert!(is_blocked_ip("224.0.0.1".parse().unwrap()));
        assert!(is_blocked_ip("0.0.0.0".parse().unwrap()));
        assert!(is_blocked_ip("ff02::1".parse().unwrap()));
    }

    #[test]
    fn test_v6_local_ranges_blocked() {
        assert!(is_blocked_ip("fc00::1".parse().unwrap()));
        assert!(is_blocked_ip("fd12:3456::1".parse().unwrap()));
        assert!(is_blocked_ip("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_mapped_v4_inherits_rules() {
        assert!(is_blocked_ip("::ffff:127.0.0.1".parse().unwrap()));
        assert!(is_blocked_ip("::ffff:192.168.0.1".parse().unwrap()));
    }

    #[test]
    fn test_public_ips_allowed() {
        assert!(!is_blocked_ip("93.184.216.34".parse().unwrap()));
        assert!(!is_blocked_ip("1.1.1.1".parse().unwrap()));
        assert!(!is_blocked_ip("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn test_non_http_scheme_blocked() {
        assert!(blocked("ftp://example.com/file"));
        assert!(blocked("file:///etc/passwd"));
    }

    #[test]
    fn test_pinned_port_from_url() {
        let url = url::Url::parse("http://93.184.216.34:8080/x").unwrap();
        let addr = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(resolve_pinned(&url))
            .unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
