use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::net::{Builder, Listener as NetListener, Result};
#[cfg(feature = "tls")]
use crate::net::TlsFiles;
use crate::utils::{deserialize_addr, deserialize_duration};

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// The `[listener.tcp.<name>]` and `[listener.tls.<name>]` tables.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Listeners {
    #[serde(rename = "tcp")]
    #[serde(default)]
    _tcps: HashMap<String, ListenerInner>,

    #[serde(rename = "tls")]
    #[serde(default)]
    _tlss: HashMap<String, ListenerInner>,

    /// Enabled tcp listeners, ordered by port.
    #[serde(default, skip)]
    pub tcps: Vec<Listener>,
    #[serde(default, skip)]
    pub tlss: Vec<Listener>,
}

impl Listeners {
    pub(crate) fn init(&mut self) {
        self.tcps = Self::enabled(&mut self._tcps, "tcp");
        self.tlss = Self::enabled(&mut self._tlss, "tls");
    }

    fn enabled(tables: &mut HashMap<String, ListenerInner>, typ: &str) -> Vec<Listener> {
        let mut listeners = tables
            .drain()
            .filter(|(_, inner)| inner.enable)
            .map(|(name, mut inner)| {
                inner.name = format!("{name}/{typ}");
                Listener::new(inner)
            })
            .collect::<Vec<_>>();
        listeners.sort_by_key(|l| l.addr.port());
        listeners
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tcps.is_empty() && self.tlss.is_empty()
    }

    pub(crate) fn set_default(&mut self) {
        self.tcps.push(Listener::default());
    }
}

#[derive(Debug, Clone, Default)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    #[inline]
    fn new(inner: ListenerInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// Socket and session options of this listener, without TLS.
    pub fn builder(&self) -> Builder {
        Builder {
            name: self.name.clone(),
            laddr: self.addr,
            backlog: self.backlog,
            nodelay: self.nodelay,
            reuseaddr: self.reuseaddr,
            reuseport: self.reuseport,
            max_connections: self.max_connections,
            login_timeout: self.login_timeout,
            idle_interval: self.idle_interval,
            idle_timeout: self.idle_timeout,
            send_timeout: self.send_timeout,
            tls: None,
        }
    }

    /// Binds a plain TCP listener.
    pub fn bind_tcp(&self) -> Result<NetListener> {
        self.builder().bind()
    }

    /// Binds a TLS listener; `cert` and `key` are required.
    #[cfg(feature = "tls")]
    pub fn bind_tls(&self) -> Result<NetListener> {
        let (Some(cert), Some(key)) = (self.cert.clone(), self.key.clone()) else {
            return Err(anyhow::anyhow!("{}: cert and key are required", self.name));
        };
        self.builder().tls(TlsFiles { cert, key, client_ca: self.client_ca.clone() }).bind()
    }
}

impl Deref for Listener {
    type Target = ListenerInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerInner {
    #[serde(default)]
    pub name: String,
    #[serde(default = "ListenerInner::enable_default")]
    pub enable: bool,
    #[serde(deserialize_with = "deserialize_addr")]
    pub addr: SocketAddr,
    #[serde(default = "ListenerInner::max_connections_default")]
    pub max_connections: usize,
    #[serde(default = "ListenerInner::backlog_default")]
    pub backlog: i32,
    #[serde(default = "ListenerInner::nodelay_default")]
    pub nodelay: bool,
    #[serde(default = "ListenerInner::reuseaddr_default")]
    pub reuseaddr: Option<bool>,
    #[serde(default)]
    pub reuseport: Option<bool>,
    /// From accept to a complete LOGIN, TLS handshake included.
    #[serde(default = "ListenerInner::login_timeout_default", deserialize_with = "deserialize_duration")]
    pub login_timeout: Duration,
    // PING after this much silence
    #[serde(default = "ListenerInner::idle_interval_default", deserialize_with = "deserialize_duration")]
    pub idle_interval: Duration,
    #[serde(default = "ListenerInner::idle_timeout_default", deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    #[serde(default = "ListenerInner::send_timeout_default", deserialize_with = "deserialize_duration")]
    pub send_timeout: Duration,

    pub cert: Option<String>,
    pub key: Option<String>,
    /// CA bundle for client certificates; unset means none are requested.
    pub client_ca: Option<String>,
}

impl Default for ListenerInner {
    fn default() -> Self {
        Self {
            name: "external/tcp".into(),
            enable: ListenerInner::enable_default(),
            addr: ListenerInner::addr_default(),
            max_connections: ListenerInner::max_connections_default(),
            backlog: ListenerInner::backlog_default(),
            nodelay: ListenerInner::nodelay_default(),
            reuseaddr: ListenerInner::reuseaddr_default(),
            reuseport: None,
            login_timeout: ListenerInner::login_timeout_default(),
            idle_interval: ListenerInner::idle_interval_default(),
            idle_timeout: ListenerInner::idle_timeout_default(),
            send_timeout: ListenerInner::send_timeout_default(),
            cert: None,
            key: None,
            client_ca: None,
        }
    }
}

impl ListenerInner {
    fn enable_default() -> bool {
        true
    }
    #[inline]
    fn addr_default() -> SocketAddr {
        ([0, 0, 0, 0], 2222).into()
    }
    #[inline]
    fn max_connections_default() -> usize {
        1_000_000
    }
    #[inline]
    fn backlog_default() -> i32 {
        1024
    }
    #[inline]
    fn nodelay_default() -> bool {
        true
    }
    #[inline]
    fn reuseaddr_default() -> Option<bool> {
        Some(true)
    }
    #[inline]
    fn login_timeout_default() -> Duration {
        Duration::from_secs(30)
    }
    #[inline]
    fn idle_interval_default() -> Duration {
        Duration::from_secs(30)
    }
    #[inline]
    fn idle_timeout_default() -> Duration {
        Duration::from_secs(60)
    }
    #[inline]
    fn send_timeout_default() -> Duration {
        Duration::from_secs(10)
    }
}
