use std::fmt;

/// Wildcard CID used when binding a listener
pub const VMADDR_CID_ANY: u32 = 0xFFFFFFFF;
pub const VMADDR_CID_HYPERVISOR: u32 = 0;
/// Loopback CID, reachable when `vsock_loopback` is loaded
pub const VMADDR_CID_LOCAL: u32 = 1;
pub const VMADDR_CID_HOST: u32 = 2;

pub const DEFAULT_PORT: u32 = 5005;

/// A vsock address. Fixed for the lifetime of the socket it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    cid: u32,
    port: u32,
}

impl Endpoint {
    pub fn new(cid: u32, port: u32) -> Self {
        Endpoint { cid, port }
    }

    /// Wildcard endpoint a server binds to.
    pub fn listen_any(port: u32) -> Self {
        Endpoint::new(VMADDR_CID_ANY, port)
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn port(&self) -> u32 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vsock://{}:{}", self.cid, self.port)
    }
}
