//! Best-effort discovery of the local origin address

use crate::config::DuoConfig;
use std::net::UdpSocket;

/// Public address used only to pick the outbound interface. Nothing is sent.
const PROBE_ADDR: &str = "8.8.8.8:53";

/// Address of the interface that would route to the public internet
pub fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    // connect() on a datagram socket only fixes the peer; no packet leaves.
    socket.connect(PROBE_ADDR).ok()?;
    let addr = socket.local_addr().ok()?;
    tracing::debug!(addr = %addr.ip(), "discovered local origin");
    Some(addr.ip().to_string())
}

/// Pick the origin for a login: the caller's value if known, else the local
/// address when `fallback_local_ip` is enabled.
pub fn resolve_origin(explicit: Option<&str>, config: &DuoConfig) -> Option<String> {
    match explicit {
        Some(origin) if !origin.is_empty() => Some(origin.to_string()),
        _ if config.local_ip_fallback => local_ip(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_origin_wins() {
        let mut config = DuoConfig::default();
        config.local_ip_fallback = true;
        assert_eq!(
            resolve_origin(Some("10.0.0.5"), &config).as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn test_no_fallback_means_none() {
        let config = DuoConfig::default();
        assert_eq!(resolve_origin(None, &config), None);
        assert_eq!(resolve_origin(Some(""), &config), None);
    }
}
