//! mDNS advertise/browse
//!
//! Optional zero-configuration networking: advertises this instance's HTTP
//! surface over multicast DNS and lets clients browse for peers. Sourced
//! from the wider Rust ecosystem (`mdns-sd`) rather than the corpus — none
//! of the reference repos touch multicast DNS.
//!
//! Failure to advertise is never fatal; it's logged and discovery is simply
//! unavailable for this process.

const SERVICE_TYPE: &str = "_mcp-memory._tcp.local.";

/// A discovered peer, returned by [`browse`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub https: bool,
    pub api_version: String,
    pub requires_auth: bool,
}

#[cfg(feature = "mdns")]
mod imp {
    use super::{DiscoveredService, SERVICE_TYPE};
    use mdns_sd::{ServiceDaemon, ServiceInfo};
    use std::time::Duration;

    /// Advertise this instance's HTTP surface. Returns the daemon handle;
    /// dropping it withdraws the advertisement.
    pub fn advertise(
        service_name: &str,
        port: u16,
        https: bool,
        requires_auth: bool,
        api_version: &str,
    ) -> Option<ServiceDaemon> {
        let daemon = match ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("mDNS daemon failed to start, discovery disabled: {e}");
                return None;
            }
        };

        let hostname = hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "localhost".to_string());
        let host_fqdn = format!("{hostname}.local.");

        let mut properties = std::collections::HashMap::new();
        properties.insert("api_version".to_string(), api_version.to_string());
        properties.insert("https".to_string(), https.to_string());
        properties.insert("auth_required".to_string(), requires_auth.to_string());
        properties.insert("service_name".to_string(), service_name.to_string());

        let info = match ServiceInfo::new(SERVICE_TYPE, service_name, &host_fqdn, "", port, Some(properties)) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!("failed to build mDNS service record, discovery disabled: {e}");
                return None;
            }
        };

        if let Err(e) = daemon.register(info) {
            tracing::warn!("failed to register mDNS advertisement, discovery disabled: {e}");
            return None;
        }

        tracing::info!("advertising {service_name} over mDNS on port {port}");
        Some(daemon)
    }

    /// Browse for peers, collecting responses until `timeout` elapses.
    pub fn browse(timeout: Duration) -> Vec<DiscoveredService> {
        let daemon = match ServiceDaemon::new() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("mDNS daemon failed to start, browse returning empty: {e}");
                return Vec::new();
            }
        };

        let receiver = match daemon.browse(SERVICE_TYPE) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("mDNS browse failed: {e}");
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(mdns_sd::ServiceEvent::ServiceResolved(info)) => {
                    let props = info.get_properties();
                    let api_version = props.get("api_version").map(|p| p.val_str().to_string()).unwrap_or_default();
                    let https = props.get("https").map(|p| p.val_str() == "true").unwrap_or(false);
                    let requires_auth = props.get("auth_required").map(|p| p.val_str() == "true").unwrap_or(false);

                    found.push(DiscoveredService {
                        name: info.get_fullname().to_string(),
                        host: info.get_hostname().to_string(),
                        port: info.get_port(),
                        https,
                        api_version,
                        requires_auth,
                    });
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        found
    }
}

#[cfg(feature = "mdns")]
pub use imp::{advertise, browse};

#[cfg(not(feature = "mdns"))]
pub fn advertise(_service_name: &str, _port: u16, _https: bool, _requires_auth: bool, _api_version: &str) -> Option<()> {
    tracing::debug!("mDNS support not compiled in (enable the `mdns` feature)");
    None
}

#[cfg(not(feature = "mdns"))]
pub fn browse(_timeout: std::time::Duration) -> Vec<DiscoveredService> {
    Vec::new()
}
