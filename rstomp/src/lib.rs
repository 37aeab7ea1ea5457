#![deny(unsafe_code)] // Enforce memory safety across the entire crate

//! # Overall Example
//! ```rust,no_run
//!
//! use rstomp::context::ServerContext;
//! use rstomp::net::{Builder, Result};
//! use rstomp::server::StompServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!
//!    let scx = ServerContext::new();
//!
//!    StompServer::new(scx)
//!       .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 7777).into()).bind()?)
//!       .build()
//!       .run()
//!       .await?;
//!       Ok(())
//! }
//!
//! ```

/// Core Broker Components
pub mod context; // Shared execution context
pub mod logger; // Process-wide logger setup
pub mod registry; // Connection & subscription registry
pub mod server; // Server lifecycle management
pub mod session; // Client session handling
pub mod stats; // Runtime counters
pub mod stomp; // Protocol engine
pub mod types; // Common data types

/// External Crate Re-exports
pub use net::{Error, Result};

pub use rstomp_codec as codec;
pub use rstomp_net as net;
