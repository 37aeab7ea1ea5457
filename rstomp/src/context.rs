use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::registry::Registry;
use crate::stats::Stats;
use crate::types::ConnectionId;

/// Shared state handed to every connection's engine.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

pub struct ServerContextInner {
    pub registry: Registry,
    pub stats: Stats,
    conn_id_seq: AtomicU64,
    message_id_seq: AtomicU64,
}

impl Deref for ServerContext {
    type Target = ServerContextInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerContext {
    pub fn new() -> Self {
        ServerContext {
            inner: Arc::new(ServerContextInner {
                registry: Registry::new(),
                stats: Stats::new(),
                conn_id_seq: AtomicU64::new(0),
                message_id_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Next connection identifier.
    #[inline]
    pub fn next_conn_id(&self) -> ConnectionId {
        self.conn_id_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next globally unique, monotonically increasing message id.
    ///
    /// One shared counter serializes allocation across all connections;
    /// every delivered MESSAGE frame gets its own id.
    #[inline]
    pub fn next_message_id(&self) -> u64 {
        self.message_id_seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServerContext ...")?;
        Ok(())
    }
}
