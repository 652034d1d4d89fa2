//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::time::Duration;

pub mod dns_server;

/// Static SRV record definition for use in test configurations.
#[derive(Clone, Debug)]
pub struct MockSrv {
    /// The SRV name (e.g., "_http._tcp.example.com")
    pub name: &'static str,
    /// Priority value
    pub priority: u16,
    /// Weight value
    pub weight: u16,
    /// Port number
    pub port: u16,
    /// Target hostname
    pub target: &'static str,
    /// TTL in seconds
    pub ttl: u32,
}

impl MockSrv {
    /// Create a new SRV record.
    pub const fn new(
        name: &'static str,
        priority: u16,
        weight: u16,
        port: u16,
        target: &'static str,
        ttl: u32,
    ) -> Self {
        Self {
            name,
            priority,
            weight,
            port,
            target,
            ttl,
        }
    }
}

/// Address record sent in the additional section for a SRV target.
#[derive(Clone, Debug)]
pub struct MockAddr {
    /// The target hostname.
    pub name: &'static str,
    /// Its address.
    pub ip: IpAddr,
}

impl MockAddr {
    /// Create a new address record.
    pub fn new(name: &'static str, ip: &str) -> Self {
        Self {
            name,
            ip: ip.parse().expect("valid IP literal"),
        }
    }
}

/// Defines how the mock server answers.
#[derive(Clone, Debug, Default)]
pub struct ServerBehavior {
    /// SRV records to serve.
    pub records: Vec<MockSrv>,
    /// Addresses to attach to answers.
    pub addresses: Vec<MockAddr>,
    /// Set the TC bit on every UDP response and send only the first answer.
    pub truncate_udp: bool,
    /// Answer FORMERR to any query carrying EDNS0.
    pub reject_edns: bool,
    /// Wait this long before answering.
    pub delay: Duration,
}

impl ServerBehavior {
    /// Serves `records` and nothing else special.
    pub fn serving(records: &[MockSrv]) -> Self {
        Self {
            records: records.to_vec(),
            ..Self::default()
        }
    }
}

/// Records shared by most tests.
pub static MULTI_RECORDS: &[MockSrv] = &[
    MockSrv::new("_http._tcp.multi.local", 10, 100, 8080, "primary.multi.local", 300),
    MockSrv::new("_http._tcp.multi.local", 20, 50, 8081, "secondary.multi.local", 300),
    MockSrv::new("_http._tcp.multi.local", 10, 25, 8082, "backup.multi.local", 300),
];
