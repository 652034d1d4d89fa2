//! Nameserver configuration sources.

use arc_swap::ArcSwapOption;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    system_conf,
};
use std::{
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant, SystemTime},
};

/// Timeout used when a source does not specify one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between checks for a changed `resolv.conf`.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// At most this many `nameserver` lines are honored, like the system resolver.
const MAX_NAMESERVERS: usize = 3;

/// `options timeout:` values below this are raised to it.
const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors produced while reading nameserver configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("reading {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The configuration file could not be parsed.
    #[error("parsing {path}: {reason}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// What the parser rejected.
        reason: String,
    },
    /// No configuration has been loaded yet.
    #[error("resolver configuration is unavailable")]
    Unavailable,
}

/// An immutable view of the nameservers to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Nameservers, queried in order.
    pub servers: Vec<SocketAddr>,
    /// Per-exchange timeout.
    pub timeout: Duration,
    /// Increases whenever the source produces a new snapshot.
    pub generation: u64,
}

impl ServerConfig {
    /// Creates a snapshot of generation 0.
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            servers,
            timeout,
            generation: 0,
        }
    }
}

/// Supplies the current nameserver configuration.
pub trait ConfigSource: Send + Sync {
    /// Gets the current snapshot. Called once per logical query.
    fn current(&self) -> Result<Arc<ServerConfig>, ConfigError>;
}

/// A fixed list of nameservers.
#[derive(Debug, Clone)]
pub struct StaticServers(Arc<ServerConfig>);

impl StaticServers {
    /// Uses `servers` with [`DEFAULT_TIMEOUT`].
    pub fn new(servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self(Arc::new(ServerConfig::new(
            servers.into_iter().collect(),
            DEFAULT_TIMEOUT,
        )))
    }

    /// Sets the per-exchange timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        let mut config = Arc::unwrap_or_clone(self.0);
        config.timeout = timeout;
        Self(Arc::new(config))
    }
}

impl ConfigSource for StaticServers {
    fn current(&self) -> Result<Arc<ServerConfig>, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Nameservers read from a `resolv.conf`-style file, re-read when the file
/// changes.
#[derive(Debug)]
pub struct ResolvConf {
    path: PathBuf,
    current: ArcSwapOption<ServerConfig>,
    last_check: Mutex<LastCheck>,
    generation: AtomicU64,
}

#[derive(Debug, Default)]
struct LastCheck {
    at: Option<Instant>,
    modified: Option<SystemTime>,
}

impl ResolvConf {
    /// The system resolver configuration file.
    pub const SYSTEM_PATH: &'static str = "/etc/resolv.conf";

    /// Uses `/etc/resolv.conf`, read on first use.
    pub fn system() -> Self {
        Self::new(Self::SYSTEM_PATH)
    }

    /// Uses the file at `path`, read on first use.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            current: ArcSwapOption::empty(),
            last_check: Mutex::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Reads the file at `path` now.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let this = Self::new(path);
        this.reload_if_modified()?;
        Ok(this)
    }

    /// Re-reads the file unless its modification time is unchanged since the
    /// last load. Returns whether a new snapshot was stored.
    pub fn reload_if_modified(&self) -> Result<bool, ConfigError> {
        let Ok(mut last_check) = self.last_check.lock() else {
            return Ok(false);
        };
        last_check.at = Some(Instant::now());
        let modified = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|source| self.read_error(source))?;
        if self.current.load().is_some() && last_check.modified == Some(modified) {
            return Ok(false);
        }

        let mut config = read_config(&self.path)?;
        config.generation = self.generation.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "log")]
        tracing::debug!(
            path = %self.path.display(),
            servers = ?config.servers,
            generation = config.generation,
            "loaded resolver configuration"
        );
        self.current.store(Some(Arc::new(config)));
        last_check.modified = Some(modified);
        Ok(true)
    }

    fn due_for_check(&self) -> bool {
        // A held lock means another caller is already reloading.
        self.last_check
            .try_lock()
            .map(|last_check| {
                last_check
                    .at
                    .map_or(true, |at| at.elapsed() >= RELOAD_INTERVAL)
            })
            .unwrap_or(false)
    }

    fn read_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Read {
            path: self.path.clone(),
            source: Arc::new(source),
        }
    }
}

impl ConfigSource for ResolvConf {
    fn current(&self) -> Result<Arc<ServerConfig>, ConfigError> {
        if self.current.load().is_none() || self.due_for_check() {
            match self.reload_if_modified() {
                Err(err) if self.current.load().is_none() => return Err(err),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    tracing::warn!(error = %_err, "keeping previous resolver configuration");
                }
                Ok(_) => {}
            }
        }
        self.current.load_full().ok_or(ConfigError::Unavailable)
    }
}

fn read_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let contents = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })?;
    let (resolver, opts) =
        system_conf::parse_resolv_conf(contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    Ok(server_config(&resolver, &opts))
}

/// Reduces a parsed resolver configuration to the nameservers and timeout.
/// Each nameserver is listed once per protocol by the parser; only the first
/// occurrence of an address is kept.
fn server_config(resolver: &ResolverConfig, opts: &ResolverOpts) -> ServerConfig {
    let mut servers = Vec::with_capacity(MAX_NAMESERVERS);
    for name_server in resolver.name_servers() {
        if servers.len() == MAX_NAMESERVERS {
            break;
        }
        if !servers.contains(&name_server.socket_addr) {
            servers.push(name_server.socket_addr);
        }
    }
    ServerConfig::new(servers, opts.timeout.max(MIN_TIMEOUT))
}
