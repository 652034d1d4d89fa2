//! Nameserver exchanges.

use crate::{client::stats::Counters, Error};
use async_trait::async_trait;
use hickory_proto::{
    op::{Edns, Message, MessageType, OpCode, Query, ResponseCode},
    rr::{Name, RecordType},
    ProtoError,
};
use std::{fmt, io, net::SocketAddr, sync::Arc};

pub mod config;
pub use config::{ConfigError, ConfigSource, ResolvConf, ServerConfig, StaticServers};

mod net;
pub use net::NetExchanger;

#[cfg(test)]
pub(crate) mod mock;

/// Default UDP payload size advertised through EDNS0.
pub const DEFAULT_UDP_SIZE: u16 = 4096;

/// Transport a query is sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// A single datagram each way.
    Udp,
    /// A length-prefixed message over a stream.
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => f.write_str("udp"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

/// Errors produced by a single exchange with a nameserver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    /// No response arrived within the configured timeout.
    #[error("timed out")]
    Timeout,
    /// Socket errors.
    #[error("i/o: {0}")]
    Io(#[source] Arc<io::Error>),
    /// The query could not be encoded or the response could not be decoded.
    #[error("dns message: {0}")]
    Proto(#[source] Arc<ProtoError>),
}

impl From<io::Error> for ExchangeError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<ProtoError> for ExchangeError {
    fn from(err: ProtoError) -> Self {
        Self::Proto(Arc::new(err))
    }
}

/// Represents the ability to send one query to one nameserver and wait for
/// its response.
///
/// Implementations do not need to enforce a timeout; the caller bounds every
/// exchange by the configured one.
#[async_trait]
pub trait Exchanger: Send + Sync + 'static {
    /// Sends `request` to `server` over `transport`, returning the response
    /// whose id matches the request's.
    async fn exchange(
        &self,
        request: &Message,
        server: SocketAddr,
        transport: Transport,
    ) -> Result<Message, ExchangeError>;
}

#[async_trait]
impl<E: Exchanger + ?Sized> Exchanger for Arc<E> {
    async fn exchange(
        &self,
        request: &Message,
        server: SocketAddr,
        transport: Transport,
    ) -> Result<Message, ExchangeError> {
        (**self).exchange(request, server, transport).await
    }
}

/// Hook run on every kept response before it is cached or interpreted.
pub type PreprocessHook = Arc<dyn Fn(&mut Message) + Send + Sync>;

/// Hook run on every failed exchange with the queried name and the server.
pub type ExchangeErrorHook = Arc<dyn Fn(&str, SocketAddr, &ExchangeError) + Send + Sync>;

/// The response a query settled on.
#[derive(Debug, Clone)]
pub(crate) struct Response {
    pub(crate) message: Message,
    /// Set when the response is only a truncated fallback.
    pub(crate) warning: Option<Error>,
}

/// Runs one logical query against an ordered list of nameservers.
pub(crate) struct Executor<E> {
    pub(crate) exchanger: Arc<E>,
    pub(crate) udp_size: u16,
    pub(crate) ignore_truncated: bool,
    pub(crate) preprocess: Option<PreprocessHook>,
    pub(crate) on_exchange_error: Option<ExchangeErrorHook>,
    pub(crate) stats: Arc<Counters>,
}

impl<E> Clone for Executor<E> {
    fn clone(&self) -> Self {
        Self {
            exchanger: self.exchanger.clone(),
            udp_size: self.udp_size,
            ignore_truncated: self.ignore_truncated,
            preprocess: self.preprocess.clone(),
            on_exchange_error: self.on_exchange_error.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<E: Exchanger> Executor<E> {
    pub(crate) fn new(exchanger: E, stats: Arc<Counters>) -> Self {
        Self {
            exchanger: Arc::new(exchanger),
            udp_size: DEFAULT_UDP_SIZE,
            ignore_truncated: false,
            preprocess: None,
            on_exchange_error: None,
            stats,
        }
    }

    /// Queries each server in order until one gives a usable answer.
    pub(crate) async fn run(&self, name: &Name, config: &ServerConfig) -> Result<Response, Error> {
        let mut last_error = None;
        let mut response = None;
        let mut truncated = None;

        for &server in &config.servers {
            self.stats.udp_query();
            let udp = match self.exchange(name, server, Transport::Udp, config).await {
                Ok(udp) => udp,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            };
            if !udp.truncated() {
                response = Some(udp);
                break;
            }

            self.stats.truncated_response();
            #[cfg(feature = "log")]
            tracing::debug!(%name, %server, "truncated response");
            truncated = Some(udp);
            if self.ignore_truncated {
                continue;
            }

            self.stats.tcp_query();
            match self.exchange(name, server, Transport::Tcp, config).await {
                Ok(tcp) => {
                    response = Some(tcp);
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }

        if let Some(preprocess) = &self.preprocess {
            response.iter_mut().chain(truncated.iter_mut()).for_each(|m| preprocess(m));
        }

        match (response, truncated) {
            (Some(response), Some(truncated))
                if response.response_code() != ResponseCode::NoError
                    && truncated.response_code() == ResponseCode::NoError =>
            {
                Ok(Response {
                    message: truncated,
                    warning: Some(Error::Truncated),
                })
            }
            (Some(message), _) => Ok(Response {
                message,
                warning: None,
            }),
            (None, Some(message)) => Ok(Response {
                message,
                warning: Some(last_error.map_or(Error::Truncated, Error::Transport)),
            }),
            (None, None) => Err(last_error.map_or(Error::NoNameservers, Error::Transport)),
        }
    }

    /// Exchanges with one server. UDP queries advertise EDNS0 and are retried
    /// once without it if the server rejects it with FORMERR.
    async fn exchange(
        &self,
        name: &Name,
        server: SocketAddr,
        transport: Transport,
        config: &ServerConfig,
    ) -> Result<Message, ExchangeError> {
        let edns = transport == Transport::Udp && self.udp_size != 0;
        let request = build_request(name, edns.then_some(self.udp_size));
        let response = self.exchange_once(&request, server, transport, config).await?;
        if !edns || response.response_code() != ResponseCode::FormErr {
            return Ok(response);
        }

        #[cfg(feature = "log")]
        tracing::debug!(%name, %server, "FORMERR with EDNS0, retrying without");
        self.stats.udp_query();
        let request = build_request(name, None);
        self.exchange_once(&request, server, transport, config).await
    }

    async fn exchange_once(
        &self,
        request: &Message,
        server: SocketAddr,
        transport: Transport,
        config: &ServerConfig,
    ) -> Result<Message, ExchangeError> {
        let exchange = self.exchanger.exchange(request, server, transport);
        let err = match tokio::time::timeout(config.timeout, exchange).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => err,
            Err(_) => ExchangeError::Timeout,
        };

        self.stats.exchange_error();
        let name = request
            .queries()
            .first()
            .map(|query| query.name().to_string())
            .unwrap_or_default();
        #[cfg(feature = "log")]
        tracing::debug!(%name, %server, %transport, error = %err, "exchange failed");
        if let Some(hook) = &self.on_exchange_error {
            hook(&name, server, &err);
        }
        Err(err)
    }
}

fn build_request(name: &Name, udp_size: Option<u16>) -> Message {
    let mut request = Message::new();
    request
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name.clone(), RecordType::SRV));
    if let Some(size) = udp_size {
        let mut edns = Edns::new();
        edns.set_max_payload(size);
        request.set_edns(edns);
    }
    request
}
