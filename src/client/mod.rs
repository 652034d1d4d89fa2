//! Clients based on SRV lookups.

use crate::{
    record::{split_host_port, ResolvedSet, ServiceRecord, SrvRecord},
    resolver::{
        ConfigError, ConfigSource, ExchangeError, ExchangeErrorHook, Exchanger, Executor,
        NetExchanger, PreprocessHook, ResolvConf, Response, StaticServers,
    },
};
use hickory_proto::{op::Message, rr::Name, ProtoError};
use http::uri::Scheme;
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

mod cache;
use cache::LastGood;

mod cancel;
use cancel::Cancel;

mod inflight;
use inflight::{FlightKey, InFlight};

/// SRV target selection.
pub mod policy;

pub(crate) mod stats;
pub use stats::Stats;

/// Errors encountered during SRV resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The lookup succeeded but produced no SRV records.
    #[error("no SRV records for {0:?}")]
    NotFound(String),
    /// Every exchange failed; holds the most recent failure.
    #[error("nameserver exchange: {0}")]
    Transport(#[source] ExchangeError),
    /// There were no nameservers to ask.
    #[error("no available nameservers")]
    NoNameservers,
    /// The caller's cancellation token fired or its deadline passed.
    #[error("lookup cancelled")]
    Cancelled,
    /// A shared lookup ended without producing a result.
    #[error("shared lookup ended without a result")]
    Interrupted,
    /// Only a truncated response could be obtained.
    #[error("only a truncated response was received")]
    Truncated,
    /// The nameserver configuration could not be read.
    #[error("resolver configuration: {0}")]
    Config(#[from] ConfigError),
    /// The name to look up is not a valid DNS name.
    #[error("invalid name {name:?}: {source}")]
    InvalidName {
        /// The name as given.
        name: String,
        /// Why it was rejected.
        #[source]
        source: Arc<ProtoError>,
    },
    /// The port of a `host:port` input is not a valid port.
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

/// A lookup's value together with a non-fatal warning.
///
/// The warning is set when the value came from the last-known-good cache
/// after the lookup itself failed, or from a truncated response.
#[derive(Debug, Clone)]
pub struct Answer<T> {
    /// The looked up value.
    pub value: T,
    /// What went wrong on the way, if anything.
    pub warning: Option<Error>,
}

impl<T> Answer<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            warning: None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Answer<U> {
        Answer {
            value: f(self.value),
            warning: self.warning,
        }
    }

    /// Drops the warning, logging it first.
    pub fn into_value(self) -> T {
        #[cfg(feature = "log")]
        if let Some(warning) = &self.warning {
            tracing::debug!(%warning, "ignoring lookup warning");
        }
        self.value
    }
}

/// Client for resolving services located by SRV records.
///
/// Clients are cheap to clone; clones share configuration, statistics, the
/// in-flight registry and the last-known-good cache.
pub struct SrvClient<E = NetExchanger> {
    config: Arc<dyn ConfigSource>,
    executor: Executor<E>,
    single_in_flight: bool,
    in_flight: Arc<InFlight>,
    cache_last: Option<Arc<LastGood>>,
}

impl<E> Clone for SrvClient<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            executor: self.executor.clone(),
            single_in_flight: self.single_in_flight,
            in_flight: self.in_flight.clone(),
            cache_last: self.cache_last.clone(),
        }
    }
}

impl<E> fmt::Debug for SrvClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrvClient")
            .field("udp_size", &self.executor.udp_size)
            .field("ignore_truncated", &self.executor.ignore_truncated)
            .field("single_in_flight", &self.single_in_flight)
            .field("cache_last", &self.cache_last.is_some())
            .finish_non_exhaustive()
    }
}

impl SrvClient<NetExchanger> {
    /// Creates a client that asks the nameservers in `/etc/resolv.conf`.
    pub fn new() -> Self {
        Self::new_with_exchanger(NetExchanger)
    }
}

impl Default for SrvClient<NetExchanger> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Exchanger> SrvClient<E> {
    /// Creates a client that sends its queries through `exchanger`.
    pub fn new_with_exchanger(exchanger: E) -> Self {
        Self {
            config: Arc::new(ResolvConf::system()),
            executor: Executor::new(exchanger, Default::default()),
            single_in_flight: false,
            in_flight: Default::default(),
            cache_last: None,
        }
    }

    /// Sets the exchanger of the client.
    pub fn exchanger<X: Exchanger>(self, exchanger: X) -> SrvClient<X> {
        SrvClient {
            config: self.config,
            executor: Executor {
                exchanger: Arc::new(exchanger),
                udp_size: self.executor.udp_size,
                ignore_truncated: self.executor.ignore_truncated,
                preprocess: self.executor.preprocess,
                on_exchange_error: self.executor.on_exchange_error,
                stats: self.executor.stats,
            },
            single_in_flight: self.single_in_flight,
            in_flight: self.in_flight,
            cache_last: self.cache_last,
        }
    }

    /// Sets where the client gets its nameservers from.
    pub fn config_source(self, source: impl ConfigSource + 'static) -> Self {
        Self {
            config: Arc::new(source),
            ..self
        }
    }

    /// Asks exactly these nameservers, in order, instead of the system ones.
    pub fn resolver_addrs(self, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.config_source(StaticServers::new(addrs))
    }

    /// Sets the UDP payload size advertised through EDNS0. Zero sends queries
    /// without EDNS0.
    pub fn udp_size(mut self, udp_size: u16) -> Self {
        self.executor.udp_size = udp_size;
        self
    }

    /// If set, truncated UDP responses are not retried over TCP; the next
    /// nameserver is asked instead.
    pub fn ignore_truncated(mut self, ignore_truncated: bool) -> Self {
        self.executor.ignore_truncated = ignore_truncated;
        self
    }

    /// If set, concurrent lookups of the same name against the same
    /// nameservers share one query.
    pub fn single_in_flight(self, single_in_flight: bool) -> Self {
        Self {
            single_in_flight,
            ..self
        }
    }

    /// If set, a failed lookup is answered with the last successful response
    /// for the same name.
    pub fn cache_last(self, cache_last: bool) -> Self {
        Self {
            cache_last: cache_last.then(Default::default),
            ..self
        }
    }

    /// Runs `preprocess` on every response kept before it is interpreted.
    pub fn preprocess(mut self, preprocess: impl Fn(&mut Message) + Send + Sync + 'static) -> Self {
        self.executor.preprocess = Some(Arc::new(preprocess) as PreprocessHook);
        self
    }

    /// Calls `hook` with the queried name and the nameserver after every
    /// failed exchange.
    pub fn on_exchange_error(
        mut self,
        hook: impl Fn(&str, SocketAddr, &ExchangeError) + Send + Sync + 'static,
    ) -> Self {
        self.executor.on_exchange_error = Some(Arc::new(hook) as ExchangeErrorHook);
        self
    }

    /// Counters of what the client has done so far.
    pub fn stats(&self) -> Stats {
        self.executor.stats.snapshot()
    }

    /// Forgets every last-known-good answer.
    pub fn reset_cache_last(&self) {
        if let Some(cache) = &self.cache_last {
            cache.reset();
        }
    }

    /// Starts building a lookup of `host`, which may be `name`, `name:port`
    /// or `ip:port`.
    pub fn lookup(&self, host: impl Into<String>) -> Lookup<'_, E> {
        Lookup {
            client: self,
            host: host.into(),
            translate: None,
            skip_cache: false,
            cancel: Cancel::default(),
        }
    }

    /// Picks one `host:port` for `host`, translating targets to the addresses
    /// sent along with the answer.
    pub async fn srv(&self, host: &str) -> Result<String, Error> {
        self.lookup(host).one().await.map(Answer::into_value)
    }

    /// Like [`SrvClient::srv`], but keeps targets as hostnames.
    pub async fn srv_no_translate(&self, host: &str) -> Result<String, Error> {
        self.lookup(host)
            .translate(false)
            .one()
            .await
            .map(Answer::into_value)
    }

    /// Like [`SrvClient::srv`], but returns only the host.
    pub async fn srv_no_port(&self, host: &str) -> Result<String, Error> {
        let address = self.srv(host).await?;
        Ok(match split_host_port(&address) {
            Some((host, _)) => host.to_string(),
            None => address,
        })
    }

    /// Every `host:port` for `host`, ordered by priority then weight, with
    /// targets kept as hostnames.
    pub async fn all_srv(&self, host: &str) -> Result<Vec<String>, Error> {
        self.lookup(host).all().await.map(Answer::into_value)
    }

    /// Like [`SrvClient::all_srv`], but translates targets to the addresses
    /// sent along with the answer.
    pub async fn all_srv_translate(&self, host: &str) -> Result<Vec<String>, Error> {
        self.lookup(host)
            .translate(true)
            .all()
            .await
            .map(Answer::into_value)
    }

    /// Resolves `host` unless it already has a port. Any failure returns
    /// `host` unchanged.
    pub async fn maybe_srv(&self, host: &str) -> String {
        if matches!(split_host_port(host), Some((_, port)) if !port.is_empty()) {
            return host.to_string();
        }
        match self.srv(host).await {
            Ok(address) => address,
            Err(_err) => {
                #[cfg(feature = "log")]
                tracing::debug!(host, error = %_err, "using host as given");
                host.to_string()
            }
        }
    }

    /// Like [`SrvClient::maybe_srv`], then prefixes `http://` unless a scheme
    /// is present.
    pub async fn maybe_srv_url(&self, host: &str) -> String {
        self.maybe_srv_url_with_scheme(host, &Scheme::HTTP).await
    }

    /// Like [`SrvClient::maybe_srv_url`] with a different default scheme.
    pub async fn maybe_srv_url_with_scheme(&self, host: &str, scheme: &Scheme) -> String {
        if host.contains("://") {
            return host.to_string();
        }
        format!("{}://{}", scheme, self.maybe_srv(host).await)
    }

    /// Looks `name` up, going through the coalescer and the cache as
    /// configured.
    async fn resolve(
        &self,
        name: &str,
        skip_cache: bool,
        cancel: &Cancel,
    ) -> Result<Answer<ResolvedSet>, Error> {
        let fqdn = if name.ends_with('.') {
            name.to_string()
        } else {
            format!("{name}.")
        };
        let query_name = Name::from_utf8(&fqdn).map_err(|source| Error::InvalidName {
            name: name.to_string(),
            source: Arc::new(source),
        })?;
        let config = self.config.current()?;

        let key = FlightKey {
            name: fqdn.clone(),
            servers: config.servers.clone(),
        };
        let work = {
            let executor = self.executor.clone();
            let cache = self.cache_last.clone();
            let fqdn = fqdn.clone();
            async move {
                let result = executor.run(&query_name, &config).await;
                if let (Some(cache), Ok(response)) = (&cache, &result) {
                    cache.store(&fqdn, &response.message);
                }
                result
            }
        };

        let result = if self.single_in_flight {
            self.in_flight
                .run_deduped(key, work, cancel, &self.executor.stats)
                .await
        } else {
            cancel.race(work).await
        };
        let result: Result<Response, Error> = match &self.cache_last {
            Some(cache) if !skip_cache => cache.substitute(&fqdn, result, &self.executor.stats),
            _ => result,
        };

        let response = result?;
        let set = ResolvedSet::from_message(&response.message);
        if set.is_empty() {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(Answer {
            value: set,
            warning: response.warning,
        })
    }
}

/// A lookup being configured. Finish it with [`Lookup::one`],
/// [`Lookup::all`] or [`Lookup::records`].
#[must_use = "lookups do nothing until finished"]
pub struct Lookup<'a, E> {
    client: &'a SrvClient<E>,
    host: String,
    translate: Option<bool>,
    skip_cache: bool,
    cancel: Cancel,
}

impl<E> fmt::Debug for Lookup<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("host", &self.host)
            .field("translate", &self.translate)
            .field("skip_cache", &self.skip_cache)
            .finish_non_exhaustive()
    }
}

impl<E: Exchanger> Lookup<'_, E> {
    /// Sets whether targets are replaced by the addresses sent along with the
    /// answer. [`Lookup::one`] translates by default; the others do not.
    pub fn translate(self, translate: bool) -> Self {
        Self {
            translate: Some(translate),
            ..self
        }
    }

    /// Reports failures as they are instead of answering from the
    /// last-known-good cache.
    pub fn skip_cache(self) -> Self {
        Self {
            skip_cache: true,
            ..self
        }
    }

    /// Abandons the lookup once `token` is cancelled. A shared query keeps
    /// running for its other callers.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel.token = Some(token);
        self
    }

    /// Abandons the lookup at `deadline`.
    pub fn deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.cancel.deadline = Some(deadline);
        self
    }

    /// Abandons the lookup after `timeout`.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(tokio::time::Instant::now() + timeout)
    }

    /// The port given with the host, if any, and the bare host. `None` if the
    /// host is an IP literal that needs no lookup.
    fn split(&self) -> Result<Option<(&str, Option<u16>)>, Error> {
        match split_host_port(&self.host) {
            Some((host, port)) if !host.is_empty() && !port.is_empty() => {
                if host.parse::<IpAddr>().is_ok() {
                    return Ok(None);
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidPort(self.host.clone()))?;
                Ok(Some((host, Some(port))))
            }
            _ => Ok(Some((&self.host, None))),
        }
    }

    /// The SRV records in the order the nameserver sent them.
    pub async fn records(self) -> Result<Answer<Vec<ServiceRecord>>, Error> {
        let translate = self.translate.unwrap_or(false);
        let name = match split_host_port(&self.host) {
            Some((host, _)) if !host.is_empty() => host,
            _ => &self.host,
        };
        let answer = self
            .client
            .resolve(name, self.skip_cache, &self.cancel)
            .await?;
        Ok(answer.map(|set| set.into_records(translate)))
    }

    /// One `host:port`, picked by priority and weight.
    pub async fn one(self) -> Result<Answer<String>, Error> {
        let Some((name, port)) = self.split()? else {
            return Ok(Answer::new(self.host.clone()));
        };
        let translate = self.translate.unwrap_or(true);
        let answer = self
            .client
            .resolve(name, self.skip_cache, &self.cancel)
            .await?;
        let records = answer.value.into_records(translate);
        let picked = policy::pick(&records).ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Answer {
            value: picked.address(port),
            warning: answer.warning,
        })
    }

    /// Every `host:port`, ordered by priority then weight.
    pub async fn all(self) -> Result<Answer<Vec<String>>, Error> {
        let Some((name, port)) = self.split()? else {
            return Ok(Answer::new(vec![self.host.clone()]));
        };
        let translate = self.translate.unwrap_or(false);
        let answer = self
            .client
            .resolve(name, self.skip_cache, &self.cancel)
            .await?;
        Ok(answer.map(|set| {
            policy::sort_all(&set.into_records(translate))
                .iter()
                .map(|record| record.address(port))
                .collect()
        }))
    }
}
