#![deny(unsafe_code)]

//! Transport layer of the SSMP broker and client
//!
//! - [`Builder`]: listener socket options, keepalive and timeout settings
//! - [`Listener`]/[`Acceptor`]: TCP, or TLS with the `tls` feature, both
//!   handed over as a [`Transport`] once the handshake is done
//! - [`server::SsmpStream`]/[`client::SsmpStream`]: framed SSMP streams with
//!   bounded send and receive operations

mod builder;
mod error;
mod stream;

pub use builder::{Acceptor, Builder, Listener, TlsFiles, Transport};
pub use error::SsmpError;
pub use stream::{client, server, Dispatcher, Tracked};

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;
