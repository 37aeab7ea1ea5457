use futures::channel::mpsc;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};

use rstomp_net::FrameStream;

use crate::context::ServerContext;
use crate::stomp;
use crate::types::{Id, Login, Message, Rx, Tx};
use crate::Result;

/// Per-connection protocol state and event loop.
///
/// Owned exclusively by the connection's own task; everything shared with
/// other connections goes through the registry.
pub struct SessionState {
    pub scx: ServerContext,
    pub id: Id,
    pub(crate) login: Option<Login>,
    pub(crate) terminated: bool,
    tx: Tx,
    rx: Rx,
}

impl SessionState {
    pub fn new(scx: ServerContext, id: Id) -> Self {
        let (tx, rx) = mpsc::unbounded();
        SessionState { scx, id, login: None, terminated: false, tx, rx }
    }

    #[inline]
    pub fn tx(&self) -> &Tx {
        &self.tx
    }

    /// Drives the connection until DISCONNECT, a protocol error or
    /// transport EOF. Registry state is attached on entry and torn down
    /// on every exit path; the last outbound frame is flushed before the
    /// transport closes.
    pub async fn run<Io>(mut self, mut sink: FrameStream<Io>) -> Result<()>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        self.scx.registry.register(self.id.conn_id, self.tx.clone());
        self.scx.stats.connections.inc();

        let res = self.run_loop(&mut sink).await;
        match &res {
            Ok(()) => log::info!("{:?} exit ...", self.id),
            Err(e) => log::info!("{:?} exit, reason: {e}", self.id),
        }

        self.scx.stats.connections.dec();
        self.scx.registry.deregister(self.id.conn_id);
        let _ = sink.flush().await;
        let _ = sink.close().await;
        res
    }

    async fn run_loop<Io>(&mut self, sink: &mut FrameStream<Io>) -> Result<()>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                msg = self.rx.next() => {
                    log::debug!("{:?} msg: {:?}", self.id, msg);
                    match msg {
                        Some(Message::Forward(frame)) => sink.send(frame).await?,
                        None => return Ok(()),
                    }
                }

                frame = sink.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            stomp::process_frame(self, sink, frame).await?;
                        }
                        Some(Err(e)) => {
                            // undecodable input is fatal for the connection
                            stomp::fail(self, sink, None, format!("malformed frame: {e}")).await?;
                        }
                        None => return Ok(()),
                    }
                    if self.terminated {
                        return Ok(());
                    }
                }
            }
        }
    }
}
