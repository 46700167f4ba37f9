use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

#[cfg(not(feature = "tls"))]
use anyhow::anyhow;
use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use crate::stream::Dispatcher;
use crate::Result;

/// Options of one listener, shared by every connection it accepts.
#[derive(Clone, Debug)]
pub struct Builder {
    pub name: String,
    pub laddr: SocketAddr,
    /// Length of the pending connection queue.
    pub backlog: i32,
    /// TCP_NODELAY on accepted sockets.
    pub nodelay: bool,
    /// SO_REUSEADDR, left to the OS when unset.
    pub reuseaddr: Option<bool>,
    /// SO_REUSEPORT, ignored where the platform lacks it.
    pub reuseport: Option<bool>,
    pub max_connections: usize,
    /// Budget from accept to a complete LOGIN frame. A TLS handshake is paid
    /// out of the same budget.
    pub login_timeout: Duration,
    /// Silence after which the server probes the client with a PING.
    pub idle_interval: Duration,
    /// Silence after which the connection is closed.
    pub idle_timeout: Duration,
    /// Zero means unbounded.
    pub send_timeout: Duration,
    /// Serve TLS with these files instead of plain TCP.
    pub tls: Option<TlsFiles>,
}

/// PEM files of a TLS listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: String,
    pub key: String,
    /// Clients must present a certificate issued by this CA bundle; when
    /// unset, no client certificate is asked for.
    pub client_ca: Option<String>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            name: String::new(),
            laddr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 2222)),
            backlog: 512,
            nodelay: false,
            reuseaddr: None,
            reuseport: None,
            max_connections: 1_000_000,
            login_timeout: Duration::from_secs(30),
            idle_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            send_timeout: Duration::from_secs(10),
            tls: None,
        }
    }

    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    pub fn laddr(mut self, laddr: SocketAddr) -> Self {
        self.laddr = laddr;
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn login_timeout(mut self, login_timeout: Duration) -> Self {
        self.login_timeout = login_timeout;
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn tls(mut self, files: TlsFiles) -> Self {
        self.tls = Some(files);
        self
    }

    /// Binds the listening socket. With `tls` set the certificates are loaded
    /// here, so a bad file fails the bind instead of every handshake.
    pub fn bind(self) -> Result<Listener> {
        #[cfg(feature = "tls")]
        let tls = self.tls.as_ref().map(tls::acceptor).transpose()?;
        #[cfg(not(feature = "tls"))]
        if self.tls.is_some() {
            return Err(anyhow!("{}: TLS requested but built without the tls feature", self.name));
        }

        let tcp = TcpListener::from_std(self.socket()?.into())?;
        let local_addr = tcp.local_addr()?;
        log::info!("SSMP listener {} on {}", self.name, local_addr);
        Ok(Listener {
            cfg: Arc::new(self),
            local_addr,
            tcp,
            #[cfg(feature = "tls")]
            tls,
        })
    }

    fn socket(&self) -> Result<Socket> {
        let socket = Socket::new(Domain::for_address(self.laddr), Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        if let Some(on) = self.reuseaddr {
            socket.set_reuse_address(on)?;
        }
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        if let Some(on) = self.reuseport {
            socket.set_reuse_port(on)?;
        }
        socket.bind(&SockAddr::from(self.laddr))?;
        socket.listen(self.backlog)?;
        Ok(socket)
    }
}

pub struct Listener {
    pub cfg: Arc<Builder>,
    local_addr: SocketAddr,
    tcp: TcpListener,
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsAcceptor>,
}

impl Listener {
    #[inline]
    pub fn is_tls(&self) -> bool {
        #[cfg(feature = "tls")]
        return self.tls.is_some();
        #[cfg(not(feature = "tls"))]
        false
    }

    /// The bound address, with the actual port when `laddr` asked for port 0.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts a socket. Its login budget starts now.
    pub async fn accept(&self) -> Result<Acceptor> {
        let (socket, remote_addr) = self.tcp.accept().await?;
        socket.set_nodelay(self.cfg.nodelay)?;
        Ok(Acceptor {
            socket,
            remote_addr,
            login_deadline: Instant::now() + self.cfg.login_timeout,
            cfg: self.cfg.clone(),
            #[cfg(feature = "tls")]
            tls: self.tls.clone(),
        })
    }
}

/// An accepted socket that has not spoken SSMP yet.
pub struct Acceptor {
    socket: TcpStream,
    pub remote_addr: SocketAddr,
    pub login_deadline: Instant,
    pub cfg: Arc<Builder>,
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsAcceptor>,
}

impl Acceptor {
    /// Completes the TLS handshake on TLS listeners, before the login deadline.
    pub async fn handshake(self) -> Result<Dispatcher<Transport>> {
        #[cfg(feature = "tls")]
        if let Some(tls) = self.tls {
            let stream = match tokio::time::timeout_at(self.login_deadline, tls.accept(self.socket)).await {
                Ok(stream) => stream?,
                Err(_) => return Err(crate::SsmpError::ReadTimeout.into()),
            };
            let io = Transport::Tls(Box::new(stream));
            return Ok(Dispatcher::new(io, self.remote_addr, self.cfg, self.login_deadline));
        }
        Ok(Dispatcher::new(Transport::Tcp(self.socket), self.remote_addr, self.cfg, self.login_deadline))
    }
}

/// The byte stream under an accepted connection.
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use anyhow::anyhow;
    #[cfg(not(target_os = "windows"))]
    use rustls::crypto::aws_lc_rs as provider;
    #[cfg(target_os = "windows")]
    use rustls::crypto::ring as provider;
    use rustls::pki_types::pem::PemObject;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};
    use rustls::server::WebPkiClientVerifier;
    use rustls::{RootCertStore, ServerConfig};
    use tokio_rustls::TlsAcceptor;

    use super::TlsFiles;
    use crate::Result;

    pub(super) fn acceptor(files: &TlsFiles) -> Result<TlsAcceptor> {
        let certs = certs(&files.cert)?;
        let key = PrivateKeyDer::from_pem_file(&files.key).map_err(|e| anyhow!("{}: {:?}", files.key, e))?;
        let provider = Arc::new(provider::default_provider());

        let verifier = match files.client_ca.as_ref() {
            Some(ca) => {
                let mut roots = RootCertStore::empty();
                for cert in certs_of(ca)? {
                    roots.add(cert).map_err(|e| anyhow!("{}: {}", ca, e))?;
                }
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(|e| anyhow!("{}: {}", ca, e))?
            }
            None => WebPkiClientVerifier::no_client_auth(),
        };

        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!(e))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| anyhow!("bad certificate or private key, {}", e))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    fn certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
        let certs = certs_of(path)?;
        if certs.is_empty() {
            return Err(anyhow!("{}: no certificate found", path));
        }
        Ok(certs)
    }

    fn certs_of(path: &str) -> Result<Vec<CertificateDer<'static>>> {
        CertificateDer::pem_file_iter(path)
            .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
            .map_err(|e| anyhow!("{}: {:?}", path, e))
    }
}
