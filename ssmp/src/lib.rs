#![deny(unsafe_code)] // Enforce memory safety across the entire crate

//! # SSMP broker and client
//!
//! A line oriented publish/subscribe broker. Clients log in once, then
//! subscribe to topics and exchange unicast, multicast and broadcast messages;
//! responses come back in request order.
//!
//! ```rust,no_run
//! use ssmp::context::ServerContext;
//! use ssmp::net::{Builder, Result};
//! use ssmp::server::SsmpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scx = ServerContext::new().build();
//!
//!     SsmpServer::new(scx)
//!         .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 2222).into()).bind()?)
//!         .listener(Builder::new().name("internal/tcp").laddr(([127, 0, 0, 1], 12222).into()).bind()?)
//!         .build()
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod auth; // Login authentication
pub mod broker; // Registries, topics and request dispatch
pub mod client; // Client with positional response correlation
pub mod context; // State shared by every connection
pub mod logger; // log -> slog bridge
pub mod server; // Accept loops and server lifecycle
pub mod session; // Server side connection state machine
pub mod settings; // Configuration loading
pub mod utils;

pub use net::{Error, Result};
pub use ssmp_codec as codec;
pub use ssmp_net as net;
