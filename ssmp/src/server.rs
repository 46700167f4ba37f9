//! SSMP server
//!
//! Runs the accept loop of every configured listener and spawns one task per
//! connection, which drives [`session::process`](crate::session::process).
//! Each listener enforces its own `max_connections`: a socket accepted beyond
//! the limit is dropped at once.
//!
//! ```rust,no_run
//! use ssmp::context::ServerContext;
//! use ssmp::net::{Builder, Result};
//! use ssmp::server::SsmpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scx = ServerContext::new().build();
//!     SsmpServer::new(scx)
//!         .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 2222).into()).bind()?)
//!         .build()
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use itertools::Itertools;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::context::ServerContext;
use crate::net::{Listener, Result};
use crate::session;

pub struct SsmpServerBuilder {
    scx: ServerContext,
    listeners: Vec<Listener>,
}

impl SsmpServerBuilder {
    fn new(scx: ServerContext) -> Self {
        Self { scx, listeners: Vec::default() }
    }

    pub fn listener(mut self, listen: Listener) -> Self {
        self.listeners.push(listen);
        self
    }

    pub fn build(self) -> SsmpServer {
        let local_addrs = self.listeners.iter().map(|l| l.local_addr()).collect();
        let (shutdown, _) = watch::channel(false);
        SsmpServer {
            inner: Arc::new(SsmpServerInner {
                scx: self.scx,
                listeners: Mutex::new(self.listeners),
                local_addrs,
                shutdown,
            }),
        }
    }
}

#[derive(Clone)]
pub struct SsmpServer {
    inner: Arc<SsmpServerInner>,
}

pub struct SsmpServerInner {
    pub scx: ServerContext,
    listeners: Mutex<Vec<Listener>>,
    local_addrs: Vec<SocketAddr>,
    shutdown: watch::Sender<bool>,
}

impl Deref for SsmpServer {
    type Target = SsmpServerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl SsmpServer {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(scx: ServerContext) -> SsmpServerBuilder {
        SsmpServerBuilder::new(scx)
    }

    /// Addresses of the listeners, in the order they were added.
    #[inline]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Runs the server in a background task.
    pub fn start(&self) {
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                log::error!("Failed to start the SSMP server! {e}");
            }
        });
    }

    /// Stops accepting and closes every registered connection.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        self.scx.broker.close_all();
        log::info!("SSMP server stopped, {:?}", self.scx);
    }

    /// Accepts connections until [`stop`](Self::stop) is called. The listeners
    /// are released on return, so a server runs once.
    pub async fn run(&self) -> Result<()> {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        if listeners.is_empty() {
            return Err(anyhow!("no listener to run, or the server is already running"));
        }
        let shutdown = self.shutdown.subscribe();

        let accepts =
            futures::future::join_all(listeners.iter().map(|l| listen(self.scx.clone(), l)).collect_vec());

        tokio::select! {
            _ = accepts => {},
            _ = stopped(shutdown) => {
                log::debug!("shutting down {} listener(s)", listeners.len());
            }
        }
        Ok(())
    }
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Counts the live connections of one listener.
#[derive(Clone, Default)]
struct Active(Arc<AtomicUsize>);

impl Active {
    fn acquire(&self, max: usize) -> bool {
        if self.0.fetch_add(1, Ordering::SeqCst) >= max {
            self.0.fetch_sub(1, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    fn release(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn listen(scx: ServerContext, l: &Listener) {
    let transport = if l.is_tls() { "TLS" } else { "TCP" };
    let active = Active::default();
    loop {
        let accept = match l.accept().await {
            Ok(accept) => accept,
            Err(e) => {
                log::info!("{} listener error: {e:?}", transport);
                tokio::time::sleep(Duration::from_millis(1000)).await;
                continue;
            }
        };
        if !active.acquire(l.cfg.max_connections) {
            log::warn!(
                "{:?} Connection Refused, {} reached max connections {}",
                accept.remote_addr,
                l.cfg.name,
                l.cfg.max_connections
            );
            continue;
        }

        let scx = scx.clone();
        let active = active.clone();
        tokio::spawn(async move {
            scopeguard::defer! { active.release() }
            let remote_addr = accept.remote_addr;
            log::debug!("{} connection from {}", transport, remote_addr);

            let dispatcher = match accept.handshake().await {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("{:?} {} handshake error: {e:?}", remote_addr, transport);
                    return;
                }
            };
            if let Err(e) = session::process(scx, dispatcher.ssmp()).await {
                log::info!("SSMP processing error: {e:?}");
            }
        });
    }
}
