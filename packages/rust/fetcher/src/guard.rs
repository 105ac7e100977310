//! SSRF protection for outbound requests.

use std::net::IpAddr;

use url::Url;

/// Whether a URL targets something we must not request.
///
/// Blocks non-HTTP schemes, private/loopback addresses, and local hostnames.
pub fn is_blocked_url(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    let Some(host) = url.host_str() else {
        return true;
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }

    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (a == 100 && (b & 0xC0) == 64)
                // 192.0.0.0/24
                || (a == 192 && b == 0 && c == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(s: &str) -> bool {
        is_blocked_url(&Url::parse(s).unwrap())
    }

    #[test]
    fn blocks_non_http_schemes() {
        assert!(blocked("file:///etc/passwd"));
        assert!(blocked("ftp://example.com/file"));
    }

    #[test]
    fn blocks_private_and_loopback() {
        assert!(blocked("http://192.168.1.1/admin"));
        assert!(blocked("http://10.0.0.1/"));
        assert!(blocked("http://127.0.0.1:8080/"));
        assert!(blocked("http://100.64.1.1/"));
        assert!(blocked("http://[::1]/"));
        assert!(blocked("http://[fd00::1]/"));
        assert!(blocked("http://localhost:3000/api"));
        assert!(blocked("http://metadata.internal/"));
    }

    #[test]
    fn allows_public_hosts() {
        assert!(!blocked("https://docs.example.com/page"));
        assert!(!blocked("http://93.184.216.34/"));
    }
}
