//! Minimal mock DNS server for testing SRV record resolution.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use hickory_proto::{
    op::{Message, MessageType, OpCode, ResponseCode},
    rr::{
        rdata::{SRV, A, AAAA},
        Name, RData, Record, RecordType,
    },
    serialize::binary::{BinDecodable, BinEncodable},
};

use crate::harness::{MockSrv, ServerBehavior};

/// A minimal DNS server that answers SRV queries over UDP and TCP on the same
/// ephemeral loopback port.
struct DnsServer {
    behavior: ServerBehavior,
    counts: Arc<QueryCounts>,
    shutdown_handle: ShutdownHandle,
}

/// Queries seen by the server, per transport.
#[derive(Debug, Default)]
pub struct QueryCounts {
    udp: AtomicUsize,
    tcp: AtomicUsize,
}

impl QueryCounts {
    /// Number of UDP queries answered.
    pub fn udp(&self) -> usize {
        self.udp.load(Ordering::SeqCst)
    }

    /// Number of TCP queries answered.
    pub fn tcp(&self) -> usize {
        self.tcp.load(Ordering::SeqCst)
    }
}

/// Start the server in background threads.
pub fn spawn(behavior: ServerBehavior) -> io::Result<DnsServerHandle> {
    let (socket, listener) = bind_pair()?;
    let addr = socket.local_addr()?;
    socket.set_read_timeout(Some(Duration::from_millis(50)))?;
    listener.set_nonblocking(true)?;

    let shutdown_handle = ShutdownHandle(Arc::new(AtomicBool::new(false)));
    let counts = Arc::new(QueryCounts::default());
    let server = Arc::new(DnsServer {
        behavior,
        counts: counts.clone(),
        shutdown_handle: shutdown_handle.clone(),
    });
    let udp = {
        let server = server.clone();
        std::thread::spawn(move || server.run_udp(socket))
    };
    let tcp = std::thread::spawn(move || server.run_tcp(listener));

    Ok(DnsServerHandle {
        addr,
        counts,
        shutdown_handle,
        join_handles: vec![udp, tcp],
    })
}

/// Binds a UDP socket and a TCP listener to the same free port.
fn bind_pair() -> io::Result<(UdpSocket, TcpListener)> {
    let mut last_err = None;
    for _ in 0..16 {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        match TcpListener::bind(socket.local_addr()?) {
            Ok(listener) => return Ok((socket, listener)),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no free port")))
}

impl DnsServer {
    fn run_udp(&self, socket: UdpSocket) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        while !self.shutdown_handle.is_shutdown() {
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(result) => result,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            self.counts.udp.fetch_add(1, Ordering::SeqCst);
            if let Ok(response) = self.handle_query(&buf[..len], true) {
                let _ = socket.send_to(&response, src);
            }
        }
        Ok(())
    }

    fn run_tcp(&self, listener: TcpListener) -> io::Result<()> {
        while !self.shutdown_handle.is_shutdown() {
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let _ = self.serve_tcp(stream);
        }
        Ok(())
    }

    fn serve_tcp(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_secs(1)))?;
        let mut len = [0u8; 2];
        stream.read_exact(&mut len)?;
        let mut query = vec![0u8; usize::from(u16::from_be_bytes(len))];
        stream.read_exact(&mut query)?;

        self.counts.tcp.fetch_add(1, Ordering::SeqCst);
        let response = self
            .handle_query(&query, false)
            .map_err(|()| io::Error::other("bad query"))?;
        let len = u16::try_from(response.len()).map_err(io::Error::other)?;
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(&response)
    }

    fn handle_query(&self, query_bytes: &[u8], udp: bool) -> Result<Vec<u8>, ()> {
        let query = Message::from_bytes(query_bytes).map_err(|_| ())?;
        assert!(
            query
                .queries()
                .iter()
                .all(|q| q.query_type() == RecordType::SRV),
            "expected only SRV queries in the query",
        );
        std::thread::sleep(self.behavior.delay);

        let mut response = Message::new();
        response.set_id(query.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_authoritative(true);
        response.set_recursion_desired(query.recursion_desired());
        response.set_recursion_available(false);
        response.add_queries(query.queries().to_vec());

        if self.behavior.reject_edns && query.extensions().is_some() {
            response.set_response_code(ResponseCode::FormErr);
            return response.to_bytes().map_err(|_| ());
        }

        for question in query.queries() {
            let qname = normalize_name(&question.name().to_string());
            let mut answers = self
                .behavior
                .records
                .iter()
                .filter(|srv| normalize_name(srv.name) == qname)
                .filter_map(|srv| create_srv_record(srv, question.name().clone()).ok())
                .collect::<Vec<_>>();
            if udp && self.behavior.truncate_udp {
                answers.truncate(1);
                response.set_truncated(true);
            }
            response.add_answers(answers);
        }
        for addr in &self.behavior.addresses {
            let Ok(name) = Name::from_utf8(addr.name) else {
                continue;
            };
            let rdata = match addr.ip {
                std::net::IpAddr::V4(ip) => RData::A(A(ip)),
                std::net::IpAddr::V6(ip) => RData::AAAA(AAAA(ip)),
            };
            response.add_additional(Record::from_rdata(name, 300, rdata));
        }

        if response.answers().is_empty() {
            response.set_response_code(ResponseCode::NXDomain);
        }

        response.to_bytes().map_err(|_| ())
    }
}

/// Normalize a DNS name for comparison (lowercase, no trailing dot).
fn normalize_name(name: &str) -> String {
    name.to_lowercase().trim_end_matches('.').to_string()
}

fn create_srv_record(srv: &MockSrv, name: Name) -> Result<Record, ()> {
    let target = Name::from_utf8(srv.target).map_err(|_| ())?;
    let srv_rdata = SRV::new(srv.priority, srv.weight, srv.port, target);
    let record = Record::from_rdata(name, srv.ttl, RData::SRV(srv_rdata));
    Ok(record)
}

/// Handle for the mock DNS server that shuts it down when dropped.
pub struct DnsServerHandle {
    addr: SocketAddr,
    counts: Arc<QueryCounts>,
    shutdown_handle: ShutdownHandle,
    join_handles: Vec<JoinHandle<io::Result<()>>>,
}

impl DnsServerHandle {
    /// Address the server listens on, for both UDP and TCP.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queries answered so far.
    pub fn counts(&self) -> &QueryCounts {
        &self.counts
    }
}

impl Drop for DnsServerHandle {
    fn drop(&mut self) {
        self.shutdown_handle.shutdown();
        for handle in self.join_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Handle for shutting down a running mock DNS server.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` if a shutdown has been requested.
    fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
