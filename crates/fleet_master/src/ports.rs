//! Port assignment for new services.

use fleet_protocol::ServiceGroup;

/// Hands out a free port for a new service of `group`.
pub trait PortAllocator: Send + Sync + std::fmt::Debug {
    /// `in_use` lists the ports already taken on the group's node.
    fn allocate(&self, group: &ServiceGroup, in_use: &[u16]) -> Option<u16>;
}

/// Lowest free port in a fixed window, with separate windows for proxies and
/// game servers.
#[derive(Debug, Clone)]
pub struct RangePortAllocator {
    proxy_start: u16,
    server_start: u16,
    range: u16,
}

impl RangePortAllocator {
    pub fn new(proxy_start: u16, server_start: u16, range: u16) -> Self {
        Self {
            proxy_start,
            server_start,
            range,
        }
    }
}

impl PortAllocator for RangePortAllocator {
    fn allocate(&self, group: &ServiceGroup, in_use: &[u16]) -> Option<u16> {
        let start = if group.version.is_proxy() {
            self.proxy_start
        } else {
            self.server_start
        };
        let end = start.saturating_add(self.range);
        (start..end).find(|port| !in_use.contains(port))
    }
}
