use std::fmt;
use std::net::SocketAddr;

use bytestring::ByteString;
use futures::channel::mpsc;

use rstomp_codec::Frame;

/// Concurrent map seeded with the broker-wide hasher.
pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

/// Connection identifier, unique for the process lifetime.
pub type ConnectionId = u64;

pub type Login = ByteString;
pub type Passcode = ByteString;
pub type Destination = ByteString;
pub type SubscriptionId = ByteString;

/// Human-readable cause attached to a failed delivery.
pub type Reason = ByteString;

/// Messages handed to a connection's event loop by other connections.
#[derive(Debug)]
pub enum Message {
    /// A frame to forward to this connection's peer.
    Forward(Frame),
}

pub type Tx = mpsc::UnboundedSender<Message>;
pub type Rx = mpsc::UnboundedReceiver<Message>;

/// Identity of one client connection, used throughout the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Id {
    pub conn_id: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
}

impl Id {
    #[inline]
    pub fn new(conn_id: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        Id { conn_id, remote_addr }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_addr {
            Some(addr) => write!(f, "{}@{}", self.conn_id, addr),
            None => write!(f, "{}", self.conn_id),
        }
    }
}
