//! Server assembly: listeners, accept loops and connection scheduling.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use tokio::net::TcpStream;

use rstomp_net::{Acceptor, FrameStream, Listener};

use crate::context::ServerContext;
use crate::session::SessionState;
use crate::types::Id;
use crate::Result;

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenMode {
    /// One dedicated OS thread, with its own current-thread runtime, per
    /// connection.
    ThreadPerConnection,
    /// All connections multiplexed on the shared runtime.
    #[default]
    Reactor,
}

impl FromStr for ListenMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tpc" | "thread-per-connection" => Ok(ListenMode::ThreadPerConnection),
            "reactor" => Ok(ListenMode::Reactor),
            _ => Err(anyhow!("unknown mode: {s:?}, expected thread-per-connection or reactor")),
        }
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenMode::ThreadPerConnection => f.write_str("thread-per-connection"),
            ListenMode::Reactor => f.write_str("reactor"),
        }
    }
}

/// Builder for configuring and constructing a broker instance
pub struct StompServerBuilder {
    scx: ServerContext,
    mode: ListenMode,
    listeners: Vec<Listener>,
}

impl StompServerBuilder {
    fn new(scx: ServerContext) -> Self {
        Self { scx, mode: ListenMode::default(), listeners: Vec::default() }
    }

    /// Adds a network listener.
    pub fn listener(mut self, listen: Listener) -> Self {
        self.listeners.push(listen);
        self
    }

    /// Sets the connection scheduling mode.
    pub fn mode(mut self, mode: ListenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Constructs the broker instance
    pub fn build(self) -> StompServer {
        StompServer {
            inner: Arc::new(StompServerInner { scx: self.scx, mode: self.mode, listeners: self.listeners }),
        }
    }
}

/// The broker: every listener's accept loop plus the shared context.
#[derive(Clone)]
pub struct StompServer {
    inner: Arc<StompServerInner>,
}

pub struct StompServerInner {
    scx: ServerContext,
    mode: ListenMode,
    listeners: Vec<Listener>,
}

impl Deref for StompServer {
    type Target = StompServerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl StompServer {
    /// Creates a new server builder instance
    #[allow(clippy::new_ret_no_self)]
    pub fn new(scx: ServerContext) -> StompServerBuilder {
        StompServerBuilder::new(scx)
    }

    /// Starts the server in a background Tokio task
    pub fn start(self) {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                log::error!("Failed to start the STOMP server! {e}");
                std::process::exit(1);
            }
        });
    }

    /// Main server execution loop handling all listeners
    pub async fn run(self) -> Result<()> {
        futures::future::join_all(
            self.listeners.iter().map(|l| listen_tcp(self.scx.clone(), l, self.mode).boxed()),
        )
        .await;
        Ok(())
    }
}

/// Handles incoming TCP connections
async fn listen_tcp(scx: ServerContext, l: &Listener, mode: ListenMode) {
    loop {
        match l.accept().await {
            Ok(accept) => {
                let scx = scx.clone();
                match mode {
                    ListenMode::Reactor => {
                        tokio::spawn(async move {
                            if let Err(e) = serve(scx, accept).await {
                                log::info!("connection processing error: {e:?}");
                            }
                        });
                    }
                    ListenMode::ThreadPerConnection => {
                        if let Err(e) = serve_on_thread(scx, accept) {
                            log::warn!("failed to spawn connection thread: {e:?}");
                        }
                    }
                }
            }
            Err(e) => {
                log::info!("TCP listener error: {e:?}");
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
        }
    }
}

async fn serve(scx: ServerContext, accept: Acceptor<TcpStream>) -> Result<()> {
    log::debug!("TCP connection from {}", accept.remote_addr);
    let id = Id::new(scx.next_conn_id(), Some(accept.remote_addr));
    SessionState::new(scx, id).run(accept.frames()).await
}

fn serve_on_thread(scx: ServerContext, accept: Acceptor<TcpStream>) -> Result<()> {
    log::debug!("TCP connection from {}", accept.remote_addr);
    let (socket, remote_addr, cfg) = accept.into_std()?;
    let id = Id::new(scx.next_conn_id(), Some(remote_addr));

    std::thread::Builder::new().name(format!("conn-{}", id.conn_id)).spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("{:?} connection runtime build failed: {e:?}", id);
                return;
            }
        };
        rt.block_on(async move {
            let socket = match TcpStream::from_std(socket) {
                Ok(socket) => socket,
                Err(e) => {
                    log::error!("{:?} socket registration failed: {e:?}", id);
                    return;
                }
            };
            let sink = FrameStream::new(socket, remote_addr, cfg);
            if let Err(e) = SessionState::new(scx, id).run(sink).await {
                log::info!("connection processing error: {e:?}");
            }
        });
    })?;
    Ok(())
}
