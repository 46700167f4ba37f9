//! Server side state machine of one connection
//!
//! `AWAITING_LOGIN`: only LOGIN is read, before the login deadline set at
//! accept time. A rejected login gets the authenticator's rejection frame,
//! anything else gets 400, and the connection is closed either way.
//!
//! `AUTHENTICATED`: PING and PONG are answered here, other requests are
//! dispatched to the broker while queued events are written out. Any inbound
//! byte counts as activity. Silence for `idle_interval` sends a PING, silence
//! for `idle_timeout` closes the connection.

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::broker::{Connection, ConnectionRef, Message, Outcome, Rx};
use crate::codec::server::Packet;
use crate::codec::{RequestVerb, Response};
use crate::context::ServerContext;
use crate::net::server::SsmpStream;
use crate::net::SsmpError;
use crate::Result;

pub async fn process<Io>(scx: ServerContext, mut stream: SsmpStream<Io>) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let remote_addr = stream.remote_addr;

    let login = match stream.recv_login().await {
        Ok(Some(login)) => login,
        Ok(None) => {
            log::debug!("{:?} closed before LOGIN", remote_addr);
            return Ok(());
        }
        Err(e) => {
            if let Some(SsmpError::ReadTimeout) = e.downcast_ref::<SsmpError>() {
                log::info!("{:?} no LOGIN within {:?}", remote_addr, stream.cfg.login_timeout);
            } else {
                log::info!("{:?} Connection Refused, handshake error, reason: {}", remote_addr, e);
                let _ = stream.send_response(Response::new(Response::BAD_REQUEST)).await;
            }
            let _ = stream.close().await;
            return Err(e);
        }
    };

    if !scx.authenticator.authenticate(&login.id, &login.scheme, &login.credential).await {
        log::info!(
            "{:?} Connection Refused, login rejected, id: {}, scheme: {}",
            remote_addr,
            login.id,
            login.scheme
        );
        let _ = stream.send_raw(scx.authenticator.unauthorized()).await;
        let _ = stream.close().await;
        return Ok(());
    }

    let (conn, rx) = Connection::new(login.id, Some(remote_addr));
    stream.set_authenticated();
    scx.broker.register(&conn);
    scopeguard::defer! {
        scx.broker.disconnect(&conn);
    }
    log::debug!("{:?} logged in, scheme: {}", conn, login.scheme);

    stream.send_response(Response::ok()).await?;
    let res = run_loop(&scx, &conn, &mut stream, rx).await;
    let _ = stream.close().await;
    log::debug!("{:?} exit, {:?}", conn, res);
    res
}

async fn run_loop<Io>(scx: &ServerContext, conn: &ConnectionRef, stream: &mut SsmpStream<Io>, mut rx: Rx) -> Result<()>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    let idle_timeout = stream.cfg.idle_timeout;
    let idle_interval = stream.cfg.idle_interval.min(idle_timeout);
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
                    log::info!("{:?} idle timeout, nothing received for {:?}", conn, idle_timeout);
                    return Ok(());
                }
                if idle >= idle_interval {
                    log::debug!("{:?} idle, probing with PING", conn);
                    stream.send_ping().await?;
                    idle_delay.as_mut().reset((now + idle_interval).min(last_active + idle_timeout));
                } else {
                    // part of a frame arrived meanwhile
                    idle_delay.as_mut().reset(last_active + idle_interval);
                }
            },

            msg = rx.next() => match msg {
                Some(Message::Event(ev)) => stream.send_event(ev).await?,
                Some(Message::Close) | None => {
                    log::info!("{:?} closed by the broker", conn);
                    return Ok(());
                }
            },

            pkt = stream.next() => {
                last_active = Instant::now();
                idle_delay.as_mut().reset(last_active + idle_interval);
                match pkt {
                    Some(Ok(Packet::Request(req))) => match req.verb {
                        RequestVerb::Ping => stream.send_pong().await?,
                        RequestVerb::Pong => {}
                        _ => match scx.broker.dispatch(conn, req) {
                            Outcome::Reply(reply) => stream.send(reply).await?,
                            Outcome::ReplyAndClose(resp) => {
                                stream.send_response(resp).await?;
                                return Ok(());
                            }
                        },
                    },
                    Some(Ok(Packet::Login(login))) => {
                        log::info!("{:?} LOGIN as {} after authentication", conn, login.id);
                        stream.send_response(Response::new(Response::NOT_ALLOWED)).await?;
                        return Ok(());
                    }
                    Some(Ok(Packet::Unknown(verb))) => {
                        log::debug!("{:?} unknown verb {}", conn, verb);
                        stream.send_response(Response::new(Response::NOT_IMPLEMENTED)).await?;
                    }
                    Some(Err(e)) => {
                        log::info!("{:?} malformed frame, {}", conn, e);
                        let _ = stream.send_response(Response::new(Response::BAD_REQUEST)).await;
                        return Err(e);
                    }
                    None => {
                        log::debug!("{:?} closed by peer", conn);
                        return Ok(());
                    }
                }
            }
        }
    }
}
