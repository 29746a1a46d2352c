//! mDNS/DNS-SD discovery (C3): best-effort bootstrap only.
//!
//! PROFILE broadcasts are the protocol's actual source of truth for peer
//! discovery; this module exists so peers on a quiet subnet find each
//! other faster than the 300 s re-broadcast interval, and its failure (no
//! mDNS responder present, firewalled multicast, ...) must never disable
//! the rest of the system.

use logging::Logger;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::fmt;
use std::net::Ipv4Addr;
use std::thread;

pub const SERVICE_TYPE: &str = "_lsnp._udp.local.";

#[derive(Debug)]
pub enum DiscoveryError {
    DaemonStart(String),
    Register(String),
    Browse(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::DaemonStart(e) => write!(f, "error starting mDNS daemon: {}", e),
            DiscoveryError::Register(e) => write!(f, "error registering mDNS service: {}", e),
            DiscoveryError::Browse(e) => write!(f, "error browsing for mDNS services: {}", e),
        }
    }
}

impl std::error::Error for DiscoveryError {}

/// Turns `alice@10.0.0.2` + its IP into the instance name the spec
/// requires: `<username>_at_<ip-with-dots-as-underscores>`.
pub fn instance_name(username: &str, ip: Ipv4Addr) -> String {
    format!("{}_at_{}", username, ip.to_string().replace('.', "_"))
}

pub struct Discovery {
    daemon: ServiceDaemon,
    logger: Logger,
}

impl Discovery {
    pub fn new(logger: Logger) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::DaemonStart(e.to_string()))?;
        Ok(Discovery { daemon, logger })
    }

    pub fn register(
        &self,
        user_id: &str,
        username: &str,
        display_name: &str,
        ip: Ipv4Addr,
        port: u16,
    ) -> Result<(), DiscoveryError> {
        let mut properties = std::collections::HashMap::new();
        properties.insert("user_id".to_string(), user_id.to_string());
        properties.insert("display_name".to_string(), display_name.to_string());

        let instance = instance_name(username, ip);
        let host_name = format!("{}.local.", instance);

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &instance,
            &host_name,
            ip,
            port,
            Some(properties),
        )
        .map_err(|e| DiscoveryError::Register(e.to_string()))?;

        self.daemon
            .register(info)
            .map_err(|e| DiscoveryError::Register(e.to_string()))?;

        self.logger
            .info(&format!("registered mDNS service as {}", instance));
        Ok(())
    }

    /// Spawns a dedicated thread that browses `SERVICE_TYPE` and invokes
    /// `on_discover(user_id, display_name, ip, port)` for every resolved
    /// instance. Runs for the process lifetime; there is no explicit stop,
    /// matching the "best-effort, never gates correctness" framing.
    pub fn browse<F>(&self, on_discover: F) -> Result<(), DiscoveryError>
    where
        F: Fn(String, String, Ipv4Addr, u16) + Send + 'static,
    {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;
        let logger = self.logger.clone();

        thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                if let ServiceEvent::ServiceResolved(info) = event {
                    let user_id = info
                        .get_property_val_str("user_id")
                        .unwrap_or_default()
                        .to_string();
                    let display_name = info
                        .get_property_val_str("display_name")
                        .unwrap_or_default()
                        .to_string();
                    if user_id.is_empty() {
                        continue;
                    }
                    let port = info.get_port();
                    for addr in info.get_addresses() {
                        if let std::net::IpAddr::V4(ipv4) = addr {
                            on_discover(user_id.clone(), display_name.clone(), *ipv4, port);
                        }
                    }
                }
            }
            logger.warn("mDNS browse channel closed");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_replaces_dots_with_underscores() {
        let name = instance_name("alice", Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(name, "alice_at_10_0_0_2");
    }
}
