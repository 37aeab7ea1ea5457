use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::stream::FrameStream;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct Builder {
    /// The name of the listener.
    pub name: String,
    ///The local address the server listens on.
    pub laddr: SocketAddr,
    ///The maximum length of the TCP connection queue.
    ///It indicates the maximum number of TCP connection queues that are being handshaked three times in the system
    pub backlog: i32,
    ///Sets the value of the TCP_NODELAY option on this socket.
    pub nodelay: bool,
    ///Whether to enable the SO_REUSEADDR option.
    pub reuseaddr: Option<bool>,
    ///Whether to enable the SO_REUSEPORT option.
    pub reuseport: Option<bool>,
    ///The maximum number of concurrent connections allowed by the listener.
    pub max_connections: usize,
    ///Maximum allowed frame length. 0 means unlimited, default: 1M
    pub max_frame_size: u32,
    ///Send timeout. Zero disables the deadline.
    pub send_timeout: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            name: Default::default(),
            laddr: SocketAddr::from(SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 7777)),
            backlog: 512,
            nodelay: false,
            reuseaddr: None,
            reuseport: None,
            max_connections: 1_000_000,
            max_frame_size: 1024 * 1024, //"1M"
            send_timeout: Duration::from_secs(10),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.into();
        self
    }

    pub fn laddr(mut self, laddr: SocketAddr) -> Self {
        self.laddr = laddr;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn nodelay(mut self) -> Self {
        self.nodelay = true;
        self
    }

    pub fn reuseaddr(mut self) -> Self {
        self.reuseaddr = Some(true);
        self
    }

    pub fn reuseport(mut self) -> Self {
        self.reuseport = Some(true);
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn bind(self) -> Result<Listener> {
        let builder = match self.laddr {
            SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
            SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
        };

        builder.set_nonblocking(true)?;

        if let Some(reuseaddr) = self.reuseaddr {
            builder.set_reuse_address(reuseaddr)?;
        }

        #[cfg(not(windows))]
        if let Some(reuseport) = self.reuseport {
            builder.set_reuse_port(reuseport)?;
        }

        builder.bind(&SockAddr::from(self.laddr))?;
        builder.listen(self.backlog)?;
        let l = TcpListener::from_std(std::net::TcpListener::from(builder))?;
        log::info!("Starting {} Listening on {}", self.name, self.laddr);
        Ok(Listener { cfg: Arc::new(self), l })
    }
}

pub struct Listener {
    pub cfg: Arc<Builder>,
    l: TcpListener,
}

impl Listener {
    pub async fn accept(&self) -> Result<Acceptor<TcpStream>> {
        let (socket, remote_addr) = self.l.accept().await?;
        if let Err(e) = socket.set_nodelay(self.cfg.nodelay) {
            return Err(Error::from(e));
        }
        Ok(Acceptor { socket, remote_addr, cfg: self.cfg.clone() })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.l.local_addr()?)
    }
}

pub struct Acceptor<S> {
    pub(crate) socket: S,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<S> Acceptor<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps the accepted socket into a frame stream.
    #[inline]
    pub fn frames(self) -> FrameStream<S> {
        FrameStream::new(self.socket, self.remote_addr, self.cfg)
    }
}

impl Acceptor<TcpStream> {
    /// Hands the raw socket back, for running the connection on a
    /// dedicated-thread runtime.
    pub fn into_std(self) -> Result<(std::net::TcpStream, SocketAddr, Arc<Builder>)> {
        let socket = self.socket.into_std()?;
        Ok((socket, self.remote_addr, self.cfg))
    }
}
