//! URL validation for SSRF protection.
//!
//! IdP metadata URLs are supplied by API callers and fetched by the server,
//! so they are checked before every fetch: scheme, host, and every address
//! the host resolves to.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::config::MetadataFetchConfig;

/// Errors from URL validation.
#[derive(Debug, thiserror::Error)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL scheme must be https (or http when allowed)")]
    InvalidScheme,

    #[error("URL must include a hostname")]
    MissingHost,

    #[error("URL resolves to a blocked address")]
    BlockedAddress,
}

/// Which targets an outbound fetch may reach.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboundUrlPolicy {
    pub allow_http: bool,
    /// Allow loopback addresses (127.0.0.0/8, ::1, localhost).
    pub allow_loopback: bool,
    /// Allow private/internal ranges (10/8, 172.16/12, 192.168/16, fc00::/7, link-local).
    pub allow_private: bool,
}

impl From<&MetadataFetchConfig> for OutboundUrlPolicy {
    fn from(config: &MetadataFetchConfig) -> Self {
        Self {
            allow_http: config.allow_http,
            allow_loopback: config.allow_loopback,
            allow_private: config.allow_private,
        }
    }
}

const CLOUD_METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// Whether `ip` must not be contacted under `policy`.
fn is_blocked_ip(ip: IpAddr, policy: OutboundUrlPolicy) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4, policy),
        IpAddr::V6(v6) => is_blocked_v6(v6, policy),
    }
}

fn is_blocked_v4(v4: Ipv4Addr, policy: OutboundUrlPolicy) -> bool {
    // Cloud metadata is never reachable, whatever the policy
    if v4 == CLOUD_METADATA_V4 {
        return true;
    }
    if v4.is_loopback() {
        return !policy.allow_loopback;
    }
    if v4.is_private() || v4.is_link_local() {
        return !policy.allow_private;
    }
    let documentation = matches!(v4.octets(), [192, 0, 2, _] | [198, 51, 100, _] | [203, 0, 113, _]);
    v4.is_broadcast() || v4.is_unspecified() || documentation
}

fn is_blocked_v6(v6: Ipv6Addr, policy: OutboundUrlPolicy) -> bool {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return is_blocked_v4(v4, policy);
    }
    if v6.is_loopback() {
        return !policy.allow_loopback;
    }
    let first = v6.segments()[0];
    let link_local = first & 0xffc0 == 0xfe80;
    let unique_local = first & 0xfe00 == 0xfc00;
    if link_local || unique_local {
        return !policy.allow_private;
    }
    v6.is_unspecified()
}

/// Parse `url` and check scheme and host without resolving DNS.
///
/// Returns the parsed URL and, when the host is an IP literal, that address.
fn check_static(
    url: &str,
    policy: OutboundUrlPolicy,
) -> Result<(::url::Url, Option<IpAddr>), UrlValidationError> {
    let parsed =
        ::url::Url::parse(url).map_err(|e| UrlValidationError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        _ => return Err(UrlValidationError::InvalidScheme),
    }

    let host = match parsed.host() {
        Some(::url::Host::Domain(domain)) => {
            if !policy.allow_loopback
                && (domain.eq_ignore_ascii_case("localhost")
                    || domain.eq_ignore_ascii_case("localhost.localdomain"))
            {
                return Err(UrlValidationError::BlockedAddress);
            }
            None
        }
        Some(::url::Host::Ipv4(v4)) => Some(IpAddr::V4(v4)),
        Some(::url::Host::Ipv6(v6)) => Some(IpAddr::V6(v6)),
        None => return Err(UrlValidationError::MissingHost),
    };

    if let Some(ip) = host
        && is_blocked_ip(ip, policy)
    {
        return Err(UrlValidationError::BlockedAddress);
    }

    Ok((parsed, host))
}

/// Validate a user-supplied URL before the server fetches it.
///
/// Every resolved address must be allowed; a single blocked address rejects
/// the URL so mixed DNS answers cannot be used for rebinding.
pub async fn validate_outbound_url(
    url: &str,
    policy: OutboundUrlPolicy,
) -> Result<(), UrlValidationError> {
    let (parsed, literal) = check_static(url, policy)?;
    if literal.is_some() {
        return Ok(());
    }

    let host = parsed.host_str().ok_or(UrlValidationError::MissingHost)?;
    let port = parsed.port_or_known_default().unwrap_or(443);
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| UrlValidationError::InvalidUrl(format!("DNS resolution failed: {e}")))?
        .map(|a| a.ip())
        .collect();

    if addrs.is_empty() {
        return Err(UrlValidationError::InvalidUrl(
            "Hostname did not resolve to any addresses".to_string(),
        ));
    }

    if let Some(blocked) = addrs.iter().find(|ip| is_blocked_ip(**ip, policy)) {
        tracing::warn!(
            url = %url,
            blocked_ip = %blocked,
            all_resolved = ?addrs,
            "URL blocked by SSRF validation"
        );
        return Err(UrlValidationError::BlockedAddress);
    }

    Ok(())
}
