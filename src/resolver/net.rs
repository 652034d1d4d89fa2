//! Exchanger backed by `tokio` sockets.

use super::{ExchangeError, Exchanger, Transport};
use async_trait::async_trait;
use hickory_proto::{
    op::Message,
    serialize::binary::{BinDecodable, BinEncodable},
    ProtoError,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
};

/// Sends queries over real UDP sockets and TCP connections, opening a fresh
/// socket for every exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetExchanger;

#[async_trait]
impl Exchanger for NetExchanger {
    async fn exchange(
        &self,
        request: &Message,
        server: SocketAddr,
        transport: Transport,
    ) -> Result<Message, ExchangeError> {
        match transport {
            Transport::Udp => udp_exchange(request, server).await,
            Transport::Tcp => tcp_exchange(request, server).await,
        }
    }
}

async fn udp_exchange(request: &Message, server: SocketAddr) -> Result<Message, ExchangeError> {
    let bind = match server {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;

    let bytes = request.to_bytes()?;
    let sent = socket.send(&bytes).await?;
    if sent != bytes.len() {
        return Err(ProtoError::from(format!("sent {sent} of {} bytes", bytes.len())).into());
    }

    // A response larger than the advertised payload would arrive truncated.
    let mut buf = vec![0; usize::from(request.max_payload())];
    loop {
        let len = socket.recv(&mut buf).await?;
        match Message::from_bytes(&buf[..len]) {
            Ok(response) if is_response_to(request, &response) => return Ok(response),
            Ok(_) => {}
            Err(_err) => {
                #[cfg(feature = "log")]
                tracing::debug!(%server, error = %_err, "dropping undecodable datagram");
            }
        }
    }
}

async fn tcp_exchange(request: &Message, server: SocketAddr) -> Result<Message, ExchangeError> {
    let mut stream = TcpStream::connect(server).await?;

    let bytes = request.to_bytes()?;
    let len = u16::try_from(bytes.len())
        .map_err(|_| ProtoError::from("query too large for tcp framing"))?;
    let mut framed = Vec::with_capacity(bytes.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&bytes);
    stream.write_all(&framed).await?;

    loop {
        let len = stream.read_u16().await?;
        let mut buf = vec![0; usize::from(len)];
        stream.read_exact(&mut buf).await?;
        let response = Message::from_bytes(&buf)?;
        if is_response_to(request, &response) {
            return Ok(response);
        }
    }
}

fn is_response_to(request: &Message, response: &Message) -> bool {
    response.id() == request.id()
        && response
            .queries()
            .iter()
            .all(|query| request.queries().contains(query))
}
