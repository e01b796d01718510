//! Built-in tool plugins.

use std::any::Any;
use std::io;
use std::net::IpAddr;

use tracing::debug;

use super::super::catalog::ScanTool;

/// DNS lookup utility for vulnerability probes.
#[derive(Debug, Default)]
pub struct DnsResolver;

impl DnsResolver {
    /// Create the resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve `host` to its addresses using the system resolver.
    pub async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> =
            tokio::net::lookup_host((host, 0u16)).await?.map(|addr| addr.ip()).collect();
        debug!("resolved {} to {} addresses", host, addrs.len());
        Ok(addrs)
    }

    /// Resolve `host` and keep only IPv4 addresses.
    pub async fn resolve_v4(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        Ok(self.resolve(host).await?.into_iter().filter(IpAddr::is_ipv4).collect())
    }
}

impl ScanTool for DnsResolver {
    fn name(&self) -> &'static str {
        "dns_resolver"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
