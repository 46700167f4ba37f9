use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;
use tokio_util::codec::{Encoder, Framed};

use ssmp_codec::error::EncodeError;

use crate::error::SsmpError;
use crate::{Builder, Result};

pub struct Dispatcher<Io> {
    pub(crate) io: Io,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
    pub login_deadline: Instant,
}

impl<Io> Dispatcher<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>, login_deadline: Instant) -> Self {
        Dispatcher { io, remote_addr, cfg, login_deadline }
    }

    /// Hands the transport over to the SSMP server stream, awaiting LOGIN
    /// within what is left of the login budget.
    #[inline]
    pub fn ssmp(self) -> server::SsmpStream<Io> {
        let mut stream = server::SsmpStream::new(self.io, self.remote_addr, self.cfg);
        stream.login_deadline = self.login_deadline;
        stream
    }
}

/// Remembers when bytes last arrived, complete frame or not.
pub struct Tracked<Io> {
    io: Io,
    last_read: Instant,
}

impl<Io> Tracked<Io> {
    fn new(io: Io) -> Self {
        Tracked { io, last_read: Instant::now() }
    }

    #[inline]
    pub fn get_ref(&self) -> &Io {
        &self.io
    }

    #[inline]
    pub fn last_read(&self) -> Instant {
        self.last_read
    }
}

impl<Io: AsyncRead + Unpin> AsyncRead for Tracked<Io> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let filled = buf.filled().len();
        let res = Pin::new(&mut this.io).poll_read(cx, buf);
        if buf.filled().len() > filled {
            this.last_read = Instant::now();
        }
        res
    }
}

impl<Io: AsyncWrite + Unpin> AsyncWrite for Tracked<Io> {
    #[inline]
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

pub mod server {
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::time::Instant;
    use tokio_util::codec::Framed;

    use ssmp_codec::server::{Codec, Packet, Reply, State};
    use ssmp_codec::{Event, Login, Response};

    use super::Tracked;
    use crate::error::SsmpError;
    use crate::{Builder, Error, Result};

    pub struct SsmpStream<Io> {
        pub io: Framed<Tracked<Io>, Codec>,
        pub remote_addr: SocketAddr,
        pub cfg: Arc<Builder>,
        /// LOGIN must be complete by then.
        pub login_deadline: Instant,
    }

    impl<Io> SsmpStream<Io>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        /// Wraps a transport awaiting LOGIN; the login budget starts now.
        pub fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
            let login_deadline = Instant::now() + cfg.login_timeout;
            SsmpStream { io: Framed::new(Tracked::new(io), Codec::new()), remote_addr, cfg, login_deadline }
        }

        /// When bytes last arrived, including those of a frame still incomplete.
        #[inline]
        pub fn last_read(&self) -> Instant {
            self.io.get_ref().last_read()
        }

        #[inline]
        pub async fn send_response(&mut self, resp: Response) -> Result<()> {
            self.send(Reply::Response(resp)).await
        }

        #[inline]
        pub async fn send_event(&mut self, ev: Event) -> Result<()> {
            self.send(Reply::Event(ev)).await
        }

        #[inline]
        pub async fn send_raw(&mut self, raw: Bytes) -> Result<()> {
            self.send(Reply::Raw(raw)).await
        }

        #[inline]
        pub async fn send_ping(&mut self) -> Result<()> {
            self.send_event(Event::ping()).await
        }

        #[inline]
        pub async fn send_pong(&mut self) -> Result<()> {
            self.send_event(Event::pong()).await
        }

        #[inline]
        pub async fn send(&mut self, reply: Reply) -> Result<()> {
            super::send(&mut self.io, reply, self.cfg.send_timeout).await
        }

        #[inline]
        pub async fn flush(&mut self) -> Result<()> {
            super::flush::<_, _, Reply>(&mut self.io, self.cfg.send_timeout).await
        }

        #[inline]
        pub async fn close(&mut self) -> Result<()> {
            self.set_state(State::Closed);
            super::close::<_, _, Reply>(&mut self.io, self.cfg.send_timeout).await
        }

        #[inline]
        pub fn state(&self) -> State {
            self.io.codec().state()
        }

        #[inline]
        pub fn set_state(&mut self, state: State) {
            self.io.codec().set_state(state);
        }

        /// Lifts the LOGIN-only restriction once the broker accepted the login.
        #[inline]
        pub fn set_authenticated(&mut self) {
            self.set_state(State::Authenticated);
        }

        #[inline]
        pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
            match tokio::time::timeout(tm, self.next()).await {
                Ok(Some(Ok(msg))) => Ok(Some(msg)),
                Ok(Some(Err(e))) => Err(e),
                Ok(None) => Ok(None),
                Err(_) => Err(SsmpError::ReadTimeout.into()),
            }
        }

        /// Waits for the LOGIN frame, the only one accepted before
        /// authentication, until the login deadline.
        pub async fn recv_login(&mut self) -> Result<Option<Login>> {
            let pkt = match tokio::time::timeout_at(self.login_deadline, self.next()).await {
                Ok(Some(pkt)) => pkt?,
                Ok(None) => return Ok(None),
                Err(_) => return Err(SsmpError::ReadTimeout.into()),
            };
            match pkt {
                Packet::Login(login) => Ok(Some(login)),
                _ => Err(SsmpError::InvalidProtocol.into()),
            }
        }
    }

    impl<Io> futures::Stream for SsmpStream<Io>
    where
        Io: AsyncRead + Unpin,
    {
        type Item = Result<Packet>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let next = Pin::new(&mut self.io).poll_next(cx);
            Poll::Ready(match futures::ready!(next) {
                Some(Ok(packet)) => Some(Ok(packet)),
                Some(Err(e)) => Some(Err(Error::from(SsmpError::Decode(e)))),
                None => None,
            })
        }
    }
}

pub mod client {
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::{TcpStream, ToSocketAddrs};
    use tokio_util::codec::Framed;

    use tokio::time::Instant;

    use ssmp_codec::client::{Codec, Packet};
    use ssmp_codec::Request;

    use super::Tracked;
    use crate::error::SsmpError;
    use crate::{Error, Result};

    pub struct SsmpStream<Io> {
        pub io: Framed<Tracked<Io>, Codec>,
        pub send_timeout: Duration,
    }

    impl SsmpStream<TcpStream> {
        /// Opens a TCP connection to a broker.
        pub async fn connect<A: ToSocketAddrs>(
            addr: A,
            connect_timeout: Duration,
            send_timeout: Duration,
        ) -> Result<Self> {
            let socket = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(socket)) => socket,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(SsmpError::ConnectTimeout.into()),
            };
            socket.set_nodelay(true)?;
            Ok(Self::new(socket, send_timeout))
        }

        #[inline]
        pub fn peer_addr(&self) -> Result<SocketAddr> {
            Ok(self.io.get_ref().get_ref().peer_addr()?)
        }
    }

    impl<Io> SsmpStream<Io>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        pub fn new(io: Io, send_timeout: Duration) -> Self {
            SsmpStream { io: Framed::new(Tracked::new(io), Codec::new()), send_timeout }
        }

        /// When bytes last arrived, including those of a frame still incomplete.
        #[inline]
        pub fn last_read(&self) -> Instant {
            self.io.get_ref().last_read()
        }

        #[inline]
        pub async fn send(&mut self, req: Request) -> Result<()> {
            super::send(&mut self.io, req, self.send_timeout).await
        }

        #[inline]
        pub async fn send_ping(&mut self) -> Result<()> {
            self.send(Request::ping()).await
        }

        #[inline]
        pub async fn send_pong(&mut self) -> Result<()> {
            self.send(Request::pong()).await
        }

        #[inline]
        pub async fn close(&mut self) -> Result<()> {
            super::close::<_, _, Request>(&mut self.io, self.send_timeout).await
        }

        #[inline]
        pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
            match tokio::time::timeout(tm, self.next()).await {
                Ok(Some(Ok(msg))) => Ok(Some(msg)),
                Ok(Some(Err(e))) => Err(e),
                Ok(None) => Ok(None),
                Err(_) => Err(SsmpError::ReadTimeout.into()),
            }
        }
    }

    impl<Io> futures::Stream for SsmpStream<Io>
    where
        Io: AsyncRead + Unpin,
    {
        type Item = Result<Packet>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let next = Pin::new(&mut self.io).poll_next(cx);
            Poll::Ready(match futures::ready!(next) {
                Some(Ok(packet)) => Some(Ok(packet)),
                Some(Err(e)) => Some(Err(Error::from(SsmpError::Decode(e)))),
                None => None,
            })
        }
    }
}

#[inline]
async fn send<Io, C, T>(io: &mut Framed<Io, C>, item: T, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
    C: Encoder<T, Error = EncodeError>,
{
    if send_timeout.is_zero() {
        io.send(item).await.map_err(SsmpError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, io.send(item)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SsmpError::Encode(e)),
            Err(_) => Err(SsmpError::WriteTimeout),
        }?;
        Ok(())
    }
}

#[inline]
async fn flush<Io, C, T>(io: &mut Framed<Io, C>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
    C: Encoder<T, Error = EncodeError>,
{
    if send_timeout.is_zero() {
        SinkExt::<T>::flush(io).await.map_err(SsmpError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<T>::flush(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SsmpError::Encode(e)),
            Err(_) => Err(SsmpError::FlushTimeout),
        }?;
        Ok(())
    }
}

#[inline]
async fn close<Io, C, T>(io: &mut Framed<Io, C>, send_timeout: Duration) -> Result<()>
where
    Io: AsyncWrite + Unpin,
    C: Encoder<T, Error = EncodeError>,
{
    if send_timeout.is_zero() {
        SinkExt::<T>::close(io).await.map_err(SsmpError::Encode)?;
        Ok(())
    } else {
        match tokio::time::timeout(send_timeout, SinkExt::<T>::close(io)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SsmpError::Encode(e)),
            Err(_) => Err(SsmpError::CloseTimeout),
        }?;
        Ok(())
    }
}
