//! Destination address checks for outbound downloads

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use url::{Host, Url};

use super::FetchError;

/// Whether a download may not connect to `ip`.
///
/// Covers loopback, RFC 1918, link-local, unspecified, multicast, broadcast,
/// CGNAT (`100.64.0.0/10`), `0.0.0.0/8`, unique-local IPv6 and IPv4-mapped
/// forms of all of these.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_blocked_v4(v4);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_broadcast()
        || a == 0
        || (a == 100 && (b & 0xc0) == 64)
}

/// Reject URLs that are not plain http(s) with a host.
pub fn check_url(url: &Url) -> Result<(), FetchError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FetchError::UnsupportedScheme {
                scheme: other.to_string(),
            });
        }
    }
    if url.host().is_none() {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}

/// Resolve the host of `url` and vet every address it maps to.
///
/// Returns the address the request must be pinned to. A host that resolves
/// to any blocked address is refused outright.
pub async fn resolve_vetted(url: &Url, allow_private: bool) -> Result<SocketAddr, FetchError> {
    check_url(url)?;
    let port = url.port_or_known_default().unwrap_or(443);

    let (host, addrs): (String, Vec<SocketAddr>) = match url.host() {
        Some(Host::Ipv4(ip)) => (ip.to_string(), vec![SocketAddr::new(IpAddr::V4(ip), port)]),
        Some(Host::Ipv6(ip)) => (ip.to_string(), vec![SocketAddr::new(IpAddr::V6(ip), port)]),
        Some(Host::Domain(domain)) => {
            let resolved = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| FetchError::Resolve {
                    host: domain.to_string(),
                    reason: e.to_string(),
                })?;
            (domain.to_string(), resolved.collect())
        }
        None => {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            });
        }
    };

    if !allow_private {
        if let Some(blocked) = addrs.iter().find(|a| is_blocked_ip(a.ip())) {
            tracing::warn!(host = %host, addr = %blocked.ip(), "Blocked download to private address");
            return Err(FetchError::BlockedAddress {
                host,
                addr: blocked.ip(),
            });
        }
    }

    addrs.into_iter().next().ok_or_else(|| FetchError::Resolve {
        host,
        reason: "no addresses returned".to_string(),
    })
}
