//! SRV records.

use hickory_proto::{
    op::Message,
    rr::{rdata::SRV, Name, RData},
};
use std::{cmp::Reverse, fmt::Display, net::IpAddr};

/// Representation of types that contain the fields of a SRV record.
pub trait SrvRecord {
    /// Type representing the SRV record's target. Must implement `Display` so
    /// it can be formatted into an address.
    type Target: Display + ?Sized;

    /// Gets a SRV record's target.
    fn target(&self) -> &Self::Target;

    /// Gets a SRV record's port.
    fn port(&self) -> u16;

    /// Gets a SRV record's priority.
    fn priority(&self) -> u16;

    /// Gets a SRV record's weight.
    fn weight(&self) -> u16;

    /// Formats a record as `host:port`, bracketing IPv6 hosts. If `port` is
    /// given it replaces the record's own port.
    ///
    /// ```
    /// use srvclient::{ServiceRecord, SrvRecord};
    /// let record = ServiceRecord::new("2607:5300:60:92e7::1", 1001, 0, 0);
    /// assert_eq!(record.address(None), "[2607:5300:60:92e7::1]:1001");
    /// assert_eq!(record.address(Some(9999)), "[2607:5300:60:92e7::1]:9999");
    /// ```
    fn address(&self, port: Option<u16>) -> String {
        join_host_port(&self.target().to_string(), port.unwrap_or(self.port()))
    }

    /// Generates the key `sort_all` orders records by: ascending priority, then
    /// descending weight.
    fn sort_key(&self) -> (u16, Reverse<u16>) {
        (self.priority(), Reverse(self.weight()))
    }
}

/// A single SRV answer, with its target possibly already replaced by an
/// address from the response's additional section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRecord {
    /// Hostname (as sent by the nameserver, trailing dot included) or IP.
    pub target: String,
    /// Port the service listens on.
    pub port: u16,
    /// Lower values are preferred.
    pub priority: u16,
    /// Relative weight within a priority.
    pub weight: u16,
}

impl ServiceRecord {
    /// Creates a record.
    pub fn new(target: impl Into<String>, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            target: target.into(),
            port,
            priority,
            weight,
        }
    }

    /// Copies the fields of any SRV record.
    pub fn from_srv<R: SrvRecord + ?Sized>(record: &R) -> Self {
        Self::new(
            record.target().to_string(),
            record.port(),
            record.priority(),
            record.weight(),
        )
    }
}

impl SrvRecord for ServiceRecord {
    type Target = str;

    fn target(&self) -> &Self::Target {
        &self.target
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    fn weight(&self) -> u16 {
        self.weight
    }
}

impl SrvRecord for SRV {
    type Target = Name;

    fn target(&self) -> &Self::Target {
        self.target()
    }

    fn port(&self) -> u16 {
        self.port()
    }

    fn priority(&self) -> u16 {
        self.priority()
    }

    fn weight(&self) -> u16 {
        self.weight()
    }
}

/// The SRV answers of one response together with the address records the
/// nameserver sent along in the additional section.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSet {
    records: Vec<ServiceRecord>,
    addresses: Vec<(Name, IpAddr)>,
}

impl ResolvedSet {
    /// Collects the SRV answers and A/AAAA additionals of `message`.
    pub fn from_message(message: &Message) -> Self {
        let records = message
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                RData::SRV(srv) => Some(ServiceRecord::from_srv(srv)),
                _ => None,
            })
            .collect();
        let addresses = message
            .additionals()
            .iter()
            .filter_map(|record| match record.data() {
                RData::A(a) => Some((record.name().clone(), IpAddr::V4(a.0))),
                RData::AAAA(aaaa) => Some((record.name().clone(), IpAddr::V6(aaaa.0))),
                _ => None,
            })
            .collect();
        Self { records, addresses }
    }

    /// Number of SRV answers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no SRV answers.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The SRV answers, targets untouched.
    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    /// Copies the SRV answers, replacing each target with its address from
    /// the additional section when one was sent. The first matching address
    /// wins.
    pub fn translated(&self) -> Vec<ServiceRecord> {
        self.records
            .iter()
            .map(|record| {
                let ip = self
                    .addresses
                    .iter()
                    .find(|(name, _)| name.to_string() == record.target)
                    .map(|(_, ip)| ip.to_string());
                match ip {
                    Some(target) => ServiceRecord { target, ..record.clone() },
                    None => record.clone(),
                }
            })
            .collect()
    }

    /// Copies the SRV answers, translated or not.
    pub fn into_records(self, translate: bool) -> Vec<ServiceRecord> {
        if translate {
            self.translated()
        } else {
            self.records
        }
    }
}

/// Joins a host and port, bracketing the host if it contains a colon.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Splits `host:port` or `[host]:port`. Returns `None` when there is no
/// port or the input is ambiguous (e.g. a bare IPv6 address).
pub(crate) fn split_host_port(input: &str) -> Option<(&str, &str)> {
    if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        return (!port.contains(':')).then_some((host, port));
    }
    let (host, port) = input.rsplit_once(':')?;
    if host.contains(':') || host.contains('[') || port.contains(']') {
        return None;
    }
    Some((host, port))
}
