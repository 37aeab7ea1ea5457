use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use rstomp_codec::{Codec, Frame};

use crate::error::StompError;
use crate::{Builder, Error, Result};

/// Frame-level view of one client connection.
pub struct FrameStream<Io> {
    pub io: Framed<Io, Codec>,
    pub remote_addr: SocketAddr,
    pub cfg: Arc<Builder>,
}

impl<Io> FrameStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: Io, remote_addr: SocketAddr, cfg: Arc<Builder>) -> Self {
        FrameStream { io: Framed::new(io, Codec::new(cfg.max_frame_size)), remote_addr, cfg }
    }

    #[inline]
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.cfg.send_timeout.is_zero() {
            self.io.send(frame).await?;
            Ok(())
        } else {
            match tokio::time::timeout(self.cfg.send_timeout, self.io.send(frame)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(StompError::Encode(e).into()),
                Err(_) => Err(StompError::WriteTimeout.into()),
            }
        }
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        if self.cfg.send_timeout.is_zero() {
            self.io.flush().await?;
            Ok(())
        } else {
            match tokio::time::timeout(self.cfg.send_timeout, self.io.flush()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(StompError::Encode(e).into()),
                Err(_) => Err(StompError::FlushTimeout.into()),
            }
        }
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        if self.cfg.send_timeout.is_zero() {
            self.io.close().await?;
            Ok(())
        } else {
            match tokio::time::timeout(self.cfg.send_timeout, self.io.close()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(StompError::Encode(e).into()),
                Err(_) => Err(StompError::CloseTimeout.into()),
            }
        }
    }

    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Frame>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(StompError::ReadTimeout.into()),
        }
    }
}

impl<Io> futures::Stream for FrameStream<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.io).poll_next(cx);
        Poll::Ready(match futures::ready!(next) {
            Some(Ok(frame)) => Some(Ok(frame)),
            Some(Err(e)) => Some(Err(Error::from(StompError::Decode(e)))),
            None => None,
        })
    }
}
