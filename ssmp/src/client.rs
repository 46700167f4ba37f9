//! SSMP client
//!
//! Responses carry no request id, so a connection correlates them by position:
//! every request is queued at write time and every response completes the
//! oldest queued request. One task owns the stream and the queue; callers only
//! talk to it through a channel, which keeps write order and queue order equal.
//!
//! ```rust,no_run
//! use ssmp::client::SsmpClient;
//! use ssmp::codec::{Identifier, Payload, Request, SubscriptionFlag};
//! use ssmp::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (tx, mut events) = futures::channel::mpsc::unbounded();
//!     let login = Request::login(Identifier::from_static("alice"), Identifier::from_static("basic"), b"pw")?;
//!     let client = SsmpClient::connect("127.0.0.1:2222", login, tx).await?;
//!
//!     client.request(Request::subscribe(Identifier::from_static("room1"), SubscriptionFlag::None)).await?;
//!     client.request(Request::mcast(Identifier::from_static("room1"), Payload::text("hello")?)).await?;
//!     if let Some(ev) = futures::StreamExt::next(&mut events).await {
//!         println!("{:?}", ev);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::time::Instant;

use crate::codec::client::Packet;
use crate::codec::{Event, EventVerb, RequestVerb};
use crate::codec::{Request, Response};
use crate::net::client::SsmpStream;
use crate::net::SsmpError;
use crate::Result;

/// Receives the events pushed by the broker.
pub trait EventHandler: Send + Sync + 'static {
    fn on_event(&self, ev: Event);

    /// Called once, after the connection closed and every pending request failed.
    fn disconnected(&self) {}
}

impl EventHandler for mpsc::UnboundedSender<Event> {
    fn on_event(&self, ev: Event) {
        if let Err(e) = self.unbounded_send(ev) {
            log::debug!("event dropped, {:?}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    /// Silence after which a PING is sent.
    pub idle_interval: Duration,
    /// Silence after which the connection is closed.
    pub idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            idle_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

type ResponseTx = oneshot::Sender<Result<Response>>;

enum Command {
    Request(Request, ResponseTx),
    Close,
}

struct ClientInner {
    tx: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct SsmpClient {
    inner: Arc<ClientInner>,
}

impl SsmpClient {
    /// Connects over TCP and logs in. Resolves once the LOGIN response is 200.
    pub async fn connect<A, H>(addr: A, login: Request, handler: H) -> Result<SsmpClient>
    where
        A: ToSocketAddrs,
        H: EventHandler,
    {
        Self::connect_with(addr, login, handler, ClientConfig::default()).await
    }

    pub async fn connect_with<A, H>(addr: A, login: Request, handler: H, cfg: ClientConfig) -> Result<SsmpClient>
    where
        A: ToSocketAddrs,
        H: EventHandler,
    {
        let stream = SsmpStream::connect(addr, cfg.connect_timeout, cfg.send_timeout).await?;
        log::debug!("connected to {:?}", stream.peer_addr());
        Self::start(stream, login, Arc::new(handler), cfg).await
    }

    /// Logs in over an already established transport.
    pub async fn with_io<Io, H>(io: Io, login: Request, handler: H, cfg: ClientConfig) -> Result<SsmpClient>
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        H: EventHandler,
    {
        let stream = SsmpStream::new(io, cfg.send_timeout);
        Self::start(stream, login, Arc::new(handler), cfg).await
    }

    async fn start<Io>(
        stream: SsmpStream<Io>,
        login: Request,
        handler: Arc<dyn EventHandler>,
        cfg: ClientConfig,
    ) -> Result<SsmpClient>
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if login.verb != RequestVerb::Login {
            return Err(SsmpError::InvalidProtocol.into());
        }
        let (tx, rx) = mpsc::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let client = SsmpClient { inner: Arc::new(ClientInner { tx, closed: closed.clone() }) };

        let login = client.send(login);
        tokio::spawn(run(stream, rx, handler, cfg, closed));

        let resp = login.await?;
        if !resp.is_ok() {
            client.disconnect();
            return Err(SsmpError::LoginRejected(resp.code).into());
        }
        Ok(client)
    }

    /// Queues a request and returns the future of its response.
    ///
    /// The request is written whether or not the future is awaited. PING and
    /// PONG get no response and are refused here.
    pub fn request(&self, req: Request) -> impl Future<Output = Result<Response>> + Send + 'static {
        let res = if req.expects_response() { Ok(self.send(req)) } else { Err(SsmpError::NoResponseExpected(req.verb)) };
        async move { res?.await }
    }

    fn send(&self, req: Request) -> impl Future<Output = Result<Response>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let queued = self.inner.tx.unbounded_send(Command::Request(req, tx)).is_ok();
        async move {
            if !queued {
                return Err(SsmpError::ConnectionClosed.into());
            }
            match rx.await {
                Ok(res) => res,
                Err(_) => Err(SsmpError::ConnectionClosed.into()),
            }
        }
    }

    /// Closes the connection; pending requests fail with `ConnectionClosed`.
    pub fn disconnect(&self) {
        let _ = self.inner.tx.unbounded_send(Command::Close);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.tx.is_closed()
    }
}

async fn run<Io>(
    mut stream: SsmpStream<Io>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    handler: Arc<dyn EventHandler>,
    cfg: ClientConfig,
    closed: Arc<AtomicBool>,
) where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending: VecDeque<ResponseTx> = VecDeque::new();
    let res = run_loop(&mut stream, &mut rx, handler.as_ref(), &cfg, &mut pending).await;
    log::debug!("client exit, pending: {}, {:?}", pending.len(), res);

    closed.store(true, Ordering::SeqCst);
    rx.close();
    let _ = stream.close().await;

    for tx in pending.drain(..) {
        let _ = tx.send(Err(SsmpError::ConnectionClosed.into()));
    }
    while let Ok(Some(cmd)) = rx.try_next() {
        if let Command::Request(_, tx) = cmd {
            let _ = tx.send(Err(SsmpError::ConnectionClosed.into()));
        }
    }
    handler.disconnected();
}

async fn run_loop<Io>(
    stream: &mut SsmpStream<Io>,
    rx: &mut mpsc::UnboundedReceiver<Command>,
    handler: &dyn EventHandler,
    cfg: &ClientConfig,
    pending: &mut VecDeque<ResponseTx>,
) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let idle_timeout = cfg.idle_timeout;
    let idle_interval = cfg.idle_interval.min(idle_timeout);
    let mut last_active = Instant::now();
    let idle_delay = tokio::time::sleep(idle_interval);
    tokio::pin!(idle_delay);

    loop {
        tokio::select! {
            _ = &mut idle_delay => {
                last_active = last_active.max(stream.last_read());
                let now = Instant::now();
                let idle = now.duration_since(last_active);
                if idle >= idle_timeout {
                    return Err(SsmpError::ReadTimeout.into());
                }
                if idle >= idle_interval {
                    stream.send_ping().await?;
                    idle_delay.as_mut().reset((now + idle_interval).min(last_active + idle_timeout));
                } else {
                    idle_delay.as_mut().reset(last_active + idle_interval);
                }
            },

            cmd = rx.next() => match cmd {
                Some(Command::Request(req, tx)) => match req.check() {
                    Ok(()) => {
                        pending.push_back(tx);
                        stream.send(req).await?;
                    }
                    Err(e) => {
                        log::debug!("refusing {} request, {}", req.verb, e);
                        let _ = tx.send(Err(SsmpError::Encode(e).into()));
                    }
                },
                Some(Command::Close) | None => return Ok(()),
            },

            pkt = stream.next() => {
                last_active = Instant::now();
                idle_delay.as_mut().reset(last_active + idle_interval);
                match pkt {
                    Some(Ok(Packet::Response(resp))) => match pending.pop_front() {
                        Some(tx) => {
                            let _ = tx.send(Ok(resp));
                        }
                        None => log::warn!("unsolicited response {:?}", resp),
                    },
                    Some(Ok(Packet::Event(ev))) => match ev.verb {
                        EventVerb::Ping => stream.send_pong().await?,
                        EventVerb::Pong => {}
                        _ => handler.on_event(ev),
                    },
                    Some(Ok(Packet::Unknown { from, verb })) => {
                        log::debug!("ignoring unknown event {} from {}", verb, from);
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::codec::{EncodeError, Identifier, Payload, SubscriptionFlag};

    fn id(s: &'static str) -> Identifier {
        Identifier::from_static(s)
    }

    fn login(name: &'static str) -> Request {
        Request::login(id(name), id("basic"), b"pw").unwrap()
    }

    /// A scripted broker on the far side of a duplex pipe.
    struct Script {
        reader: BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
        writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    }

    impl Script {
        async fn expect(&mut self, line: &str) {
            let mut buf = String::new();
            self.reader.read_line(&mut buf).await.unwrap();
            assert_eq!(buf, line);
        }

        async fn write(&mut self, data: &[u8]) {
            self.writer.write_all(data).await.unwrap();
        }
    }

    async fn connected(
        handler: mpsc::UnboundedSender<Event>,
        cfg: ClientConfig,
    ) -> (SsmpClient, Script) {
        let (io, server) = tokio::io::duplex(8192);
        let (r, w) = tokio::io::split(server);
        let mut script = Script { reader: BufReader::new(r), writer: w };
        let client = tokio::spawn(SsmpClient::with_io(io, login("alice"), handler, cfg));
        script.expect("LOGIN alice basic pw\n").await;
        script.write(b"200\n").await;
        (client.await.unwrap().unwrap(), script)
    }

    #[tokio::test]
    async fn test_responses_complete_in_fifo_order() {
        let (tx, mut events) = mpsc::unbounded();
        let (client, mut script) = connected(tx, ClientConfig::default()).await;

        let r1 = client.request(Request::subscribe(id("room1"), SubscriptionFlag::None));
        let r2 = client.request(Request::subscribe(id("room1"), SubscriptionFlag::None));
        let r3 = client.request(Request::ucast(id("nobody"), Payload::text("hi").unwrap()));
        script.expect("SUBSCRIBE room1\n").await;
        script.expect("SUBSCRIBE room1\n").await;
        script.expect("UCAST nobody hi\n").await;
        script.write(b"200\n000 bob MCAST room1 x\n409\n000 . PING\n404 no such user\n").await;
        script.expect("PONG\n").await;

        assert_eq!(r1.await.unwrap().code, Response::OK);
        assert_eq!(r2.await.unwrap().code, Response::CONFLICT);
        let r3 = r3.await.unwrap();
        assert_eq!(r3.code, Response::NOT_FOUND);
        assert_eq!(r3.payload.unwrap().as_bytes(), b"no such user");

        let ev = events.next().await.unwrap();
        assert_eq!(ev, Event::new(id("bob"), EventVerb::Mcast, Some(id("room1")), Some(Payload::text("x").unwrap())));
    }

    #[tokio::test]
    async fn test_pending_requests_fail_on_close() {
        let (tx, _events) = mpsc::unbounded();
        let (client, mut script) = connected(tx, ClientConfig::default()).await;
        let r1 = client.request(Request::bcast(Payload::text("a").unwrap()));
        let r2 = client.request(Request::bcast(Payload::text("b").unwrap()));
        script.expect("BCAST a\n").await;
        script.expect("BCAST b\n").await;
        drop(script);

        for r in [r1.await, r2.await] {
            let err = r.unwrap_err();
            assert!(err.downcast_ref::<SsmpError>().map(|e| e.is_closed()).unwrap_or(false));
        }
        assert!(client.is_closed());
        let err = client.request(Request::close()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SsmpError>(), Some(SsmpError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_malformed_request_fails_alone() {
        let (tx, _events) = mpsc::unbounded();
        let (client, mut script) = connected(tx, ClientConfig::default()).await;

        let bad = Request { verb: RequestVerb::Ucast, to: Some(id("bob")), payload: None };
        let err = client.request(bad).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SsmpError>(), Some(SsmpError::Encode(EncodeError::MissingField))));
        assert!(!client.is_closed());

        let r = client.request(Request::bcast(Payload::text("x").unwrap()));
        script.expect("BCAST x\n").await;
        script.write(b"200\n").await;
        assert_eq!(r.await.unwrap().code, Response::OK);
    }

    #[tokio::test]
    async fn test_keepalive_requests_are_refused() {
        let (tx, _events) = mpsc::unbounded();
        let (client, _script) = connected(tx, ClientConfig::default()).await;
        let err = client.request(Request::ping()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SsmpError>(), Some(SsmpError::NoResponseExpected(RequestVerb::Ping))));
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let (tx, _events) = mpsc::unbounded();
        let (io, server) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(server);
        let mut script = Script { reader: BufReader::new(r), writer: w };
        let client = tokio::spawn(SsmpClient::with_io(io, login("alice"), tx, ClientConfig::default()));
        script.expect("LOGIN alice basic pw\n").await;
        script.write(b"401\n").await;
        let err = client.await.unwrap().err().unwrap();
        assert!(matches!(err.downcast_ref::<SsmpError>(), Some(SsmpError::LoginRejected(401))));
    }

    #[tokio::test]
    async fn test_disconnected_notification() {
        struct Flag(Arc<AtomicBool>);
        impl EventHandler for Flag {
            fn on_event(&self, _ev: Event) {}
            fn disconnected(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let flag = Arc::new(AtomicBool::new(false));
        let (io, server) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(server);
        let mut script = Script { reader: BufReader::new(r), writer: w };
        let client =
            tokio::spawn(SsmpClient::with_io(io, login("alice"), Flag(flag.clone()), ClientConfig::default()));
        script.expect("LOGIN alice basic pw\n").await;
        script.write(b"200\n").await;
        let client = client.await.unwrap().unwrap();

        client.disconnect();
        let mut buf = String::new();
        assert_eq!(script.reader.read_line(&mut buf).await.unwrap(), 0);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !flag.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_frame_counts_as_activity() {
        let (tx, mut events) = mpsc::unbounded();
        let (_client, mut script) = connected(tx, ClientConfig::default()).await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        script.write(b"000 bob MCAST room1 hel").await;
        let start = Instant::now();
        script.expect("PING\n").await;
        assert!(start.elapsed() >= Duration::from_secs(29));

        script.write(b"lo\n").await;
        let ev = events.next().await.unwrap();
        assert_eq!(ev.payload, Some(Payload::text("hello").unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_keepalive() {
        let (tx, _events) = mpsc::unbounded();
        let (client, mut script) = connected(tx, ClientConfig::default()).await;
        let start = Instant::now();
        script.expect("PING\n").await;
        assert!(start.elapsed() >= Duration::from_secs(30));
        script.write(b"000 . PONG\n").await;
        script.expect("PING\n").await;
        assert!(start.elapsed() >= Duration::from_secs(60));

        let mut buf = String::new();
        assert_eq!(script.reader.read_line(&mut buf).await.unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_secs(90));
        assert!(client.is_closed());
    }
}
