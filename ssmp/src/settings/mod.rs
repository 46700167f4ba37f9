//! Broker settings
//!
//! Loaded once per process from, in increasing priority: `/etc/ssmp/ssmp.*`,
//! `ssmp.*` in the working directory, the `-f/--config` file and `SSMP_*`
//! environment variables (`SSMP_LOG__LEVEL=debug` sets `log.level`).

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::anyhow;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, File};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::auth::StaticAuthenticator;
use crate::codec::Identifier;
use crate::Result;

use self::listener::Listeners;
use self::log::Log;

pub use self::listener::Listener;
pub use self::options::Options;

pub mod listener;
pub mod log;
pub mod options;

type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub log: Log,
    #[serde(rename = "listener")]
    #[serde(default)]
    pub listeners: Listeners,
    /// Every login is accepted when the table is absent.
    #[serde(default)]
    pub auth: Option<Auth>,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/ssmp/ssmp").required(false))
            .add_source(File::with_name("ssmp").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg));
        }

        Self::load(builder, opts)
    }

    fn load(builder: ConfigBuilder<DefaultState>, opts: Options) -> Result<Self> {
        let env = config::Environment::with_prefix("ssmp").prefix_separator("_").separator("__").try_parsing(true);
        let builder = builder.add_source(env);
        let mut inner: Inner = builder.build()?.try_deserialize()?;

        inner.listeners.init();
        if inner.listeners.is_empty() {
            inner.listeners.set_default();
        }

        //Command line configuration overriding file configuration
        if let Some(level) = opts.log_level {
            inner.log.level = level;
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() -> Result<()> {
        let cfg = Self::instance();
        ::log::debug!("Config info is {:?}", cfg.0);
        ::log::info!("log config is {:?}", cfg.log);
        for l in cfg.listeners.tcps.iter().chain(cfg.listeners.tlss.iter()) {
            ::log::info!("listener {} on {}, max_connections: {}", l.name, l.addr, l.max_connections);
        }
        match cfg.auth.as_ref() {
            Some(auth) => ::log::info!("auth scheme is {}, {} user(s)", auth.scheme, auth.users.len()),
            None => ::log::warn!("no [auth] table, every login is accepted"),
        }
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

/// The `[auth]` table.
#[derive(Clone, Deserialize)]
pub struct Auth {
    #[serde(default = "Auth::scheme_default")]
    pub scheme: String,
    /// identity = secret
    #[serde(default)]
    pub users: HashMap<String, String>,
    #[serde(default)]
    pub allow_anonymous: bool,
}

impl Auth {
    fn scheme_default() -> String {
        "basic".into()
    }

    pub fn authenticator(&self) -> Result<StaticAuthenticator> {
        let scheme = Identifier::new(self.scheme.clone())
            .map_err(|e| anyhow!("auth.scheme {:?} is not an identifier, {}", self.scheme, e))?;
        let mut auth = StaticAuthenticator::new(scheme).allow_anonymous(self.allow_anonymous);
        for (id, secret) in self.users.iter() {
            let id = Identifier::new(id.clone()).map_err(|e| anyhow!("auth.users {:?}, {}", id, e))?;
            auth = auth.user(id, secret.clone());
        }
        Ok(auth)
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Auth")
            .field("scheme", &self.scheme)
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .field("allow_anonymous", &self.allow_anonymous)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use config::FileFormat;

    use super::*;
    use crate::auth::Authenticator;

    fn load(toml: &str, opts: Options) -> Settings {
        Settings::load(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)), opts)
            .expect("Settings creation failed")
    }

    #[test]
    fn test_defaults() {
        let s = load("", Options::default());
        assert_eq!(s.log.to, crate::settings::log::To::Console);
        assert_eq!(s.log.level.inner(), slog::Level::Info);
        assert_eq!(s.log.filename(), "/var/log/ssmp/ssmp.log");
        assert!(s.auth.is_none());
        assert_eq!(s.listeners.tcps.len(), 1);
        let l = &s.listeners.tcps[0];
        assert_eq!(l.addr, SocketAddr::from(([0, 0, 0, 0], 2222)));
        assert_eq!(l.idle_interval, Duration::from_secs(30));
        assert_eq!(l.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_listeners() {
        let s = load(
            r#"
            [listener.tcp.internal]
            addr = "127.0.0.1:3333"
            idle_interval = "10s"
            idle_timeout = "1m"
            max_connections = 8

            [listener.tcp.external]
            addr = "0.0.0.0:2222"
            login_timeout = "500ms"

            [listener.tcp.disabled]
            enable = false
            addr = "0.0.0.0:4444"
            "#,
            Options::default(),
        );
        let names = s.listeners.tcps.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["external/tcp", "internal/tcp"]);
        assert!(s.listeners.tlss.is_empty());

        let b = s.listeners.tcps[1].builder();
        assert_eq!(b.name, "internal/tcp");
        assert_eq!(b.laddr, SocketAddr::from(([127, 0, 0, 1], 3333)));
        assert_eq!(b.max_connections, 8);
        assert_eq!(b.idle_interval, Duration::from_secs(10));
        assert_eq!(b.idle_timeout, Duration::from_secs(60));
        assert_eq!(s.listeners.tcps[0].login_timeout, Duration::from_millis(500));
        assert_eq!(s.listeners.tcps[0].builder().login_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_log_level_override() {
        let opts = Options { log_level: Some("debug".parse().unwrap()), ..Default::default() };
        let s = load("[log]\nlevel = \"warn\"\nto = \"both\"\n", opts);
        assert_eq!(s.log.level.inner(), slog::Level::Debug);
        assert!(s.log.to.file() && s.log.to.console());

        let s = load("[log]\nlevel = \"warn\"\nto = \"off\"\n", Options::default());
        assert_eq!(s.log.level.inner(), slog::Level::Warning);
        assert!(s.log.to.off());
    }

    #[test]
    fn test_bad_log_target() {
        let res = Settings::load(
            Config::builder().add_source(File::from_str("[log]\nto = \"syslog\"\n", FileFormat::Toml)),
            Options::default(),
        );
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_auth() {
        let s = load(
            r#"
            [auth]
            scheme = "basic"
            users = { alice = "pw", bob = "secret" }
            "#,
            Options::default(),
        );
        let auth = s.auth.as_ref().unwrap().authenticator().unwrap();
        let basic = Identifier::from_static("basic");
        assert!(auth.authenticate(&Identifier::from_static("alice"), &basic, b"pw").await);
        assert!(auth.authenticate(&Identifier::from_static("bob"), &basic, b"secret").await);
        assert!(!auth.authenticate(&Identifier::from_static("bob"), &basic, b"pw").await);
        assert!(!auth.authenticate(&Identifier::anonymous(), &basic, b"").await);

        let s = load("[auth]\nusers = { \"bad name\" = \"pw\" }\n", Options::default());
        assert!(s.auth.as_ref().unwrap().authenticator().is_err());
    }
}
