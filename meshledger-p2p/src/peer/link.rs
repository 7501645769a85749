//! A message channel to one peer.
//!
//! A `PeerLink` owns the two framed halves of its TCP stream and a
//! cancellation scope. The halves live in an `Option` that `close` takes, so
//! the socket is released exactly once whichever path ends the link.
//! Dropping the link cancels its scope and drops the socket.
//!
//! Reading and writing are independent, so a link can keep draining what the
//! peer sends while its own write is still in flight.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectError, P2pResult, ReceiveError, SendError};
use crate::peer::info::{ConnectionDirection, PeerId, PeerInfo};
use crate::protocol::{ChainMessage, FrameCodec, FrameError};

/// Upper bound on the graceful shutdown of a closing socket.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

struct LinkIo {
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
}

/// A bidirectional message channel to one peer.
pub struct PeerLink {
    id: PeerId,
    addr: SocketAddr,
    direction: ConnectionDirection,
    io: Option<LinkIo>,
    scope: CancellationToken,
}

impl PeerLink {
    /// Open an outbound link, failing if `addr` does not accept within
    /// `timeout`.
    pub async fn connect(
        id: PeerId,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        tracing::debug!(peer = %id, addr = %addr, "Connecting to peer");

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectError::Unreachable { addr, source }),
            Err(_) => return Err(ConnectError::Timeout { addr }),
        };

        Ok(Self::from_stream(
            id,
            addr,
            ConnectionDirection::Outbound,
            stream,
        ))
    }

    /// Wrap an established stream.
    pub fn from_stream(
        id: PeerId,
        addr: SocketAddr,
        direction: ConnectionDirection,
        stream: TcpStream,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(peer = %id, addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        Self {
            id,
            addr,
            direction,
            io: Some(LinkIo {
                reader: FramedRead::new(read_half, FrameCodec::new()),
                writer: FramedWrite::new(write_half, FrameCodec::new()),
            }),
            scope: CancellationToken::new(),
        }
    }

    /// Make this link's scope a child of `parent`, so cancelling the parent
    /// cancels the link.
    pub fn with_parent_scope(mut self, parent: &CancellationToken) -> Self {
        self.scope = parent.child_token();
        self
    }

    /// Peer identifier.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection direction.
    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// Fresh peer info describing this link.
    pub fn info(&self) -> PeerInfo {
        PeerInfo::new(self.id, self.addr, self.direction)
    }

    /// The link's cancellation scope.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Check if the link has been closed.
    pub fn is_closed(&self) -> bool {
        self.io.is_none()
    }

    /// Serialize and send a chain message.
    pub async fn send(&mut self, message: &ChainMessage, timeout: Duration) -> Result<(), SendError> {
        let body = message.encode()?;
        self.send_encoded(body, Instant::now() + timeout).await
    }

    /// Send an already encoded message body, failing at `deadline`.
    pub async fn send_encoded(&mut self, body: Bytes, deadline: Instant) -> Result<(), SendError> {
        let io = self.io.as_mut().ok_or(SendError::Closed)?;

        tokio::select! {
            _ = self.scope.cancelled() => Err(SendError::Closed),
            result = timeout_at(deadline, io.writer.send(body)) => send_result(result),
        }
    }

    /// Send `body` while reading from the peer, failing at `deadline`.
    ///
    /// Returns the first message that arrived before the send finished, if
    /// any. Two peers writing large messages to each other at the same time
    /// would otherwise both block on full socket buffers.
    pub async fn send_draining(&mut self, body: Bytes, deadline: Instant) -> P2pResult<Option<Bytes>> {
        let io = self.io.as_mut().ok_or(SendError::Closed)?;
        let LinkIo { reader, writer } = io;

        let send = timeout_at(deadline, writer.send(body));
        tokio::pin!(send);
        let mut early = None;

        loop {
            tokio::select! {
                _ = self.scope.cancelled() => return Err(SendError::Closed.into()),
                result = &mut send => {
                    send_result(result)?;
                    return Ok(early);
                }
                next = reader.next(), if early.is_none() => {
                    early = Some(frame_result(next)?);
                }
            }
        }
    }

    /// Wait up to `timeout` for the next message body.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Bytes, ReceiveError> {
        self.receive_by(Instant::now() + timeout).await
    }

    /// Wait until `deadline` for the next message body.
    pub async fn receive_by(&mut self, deadline: Instant) -> Result<Bytes, ReceiveError> {
        match timeout_at(deadline, self.next_message()).await {
            Ok(result) => result,
            Err(_) => Err(ReceiveError::Timeout),
        }
    }

    /// Wait for the next message body with no deadline.
    ///
    /// Cancel-safe: a message is never lost if this future is dropped.
    pub async fn next_message(&mut self) -> Result<Bytes, ReceiveError> {
        let io = self.io.as_mut().ok_or(ReceiveError::Closed)?;

        tokio::select! {
            _ = self.scope.cancelled() => Err(ReceiveError::Cancelled),
            next = io.reader.next() => frame_result(next),
        }
    }

    /// Close the link. Safe to call any number of times.
    pub async fn close(&mut self, reason: &str) {
        self.scope.cancel();

        let Some(io) = self.io.take() else {
            return;
        };

        tracing::debug!(peer = %self.id, addr = %self.addr, reason, "Closing peer link");

        let mut writer = io.writer.into_inner();
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::trace!(peer = %self.id, error = %e, "Socket shutdown failed");
            }
            Err(_) => {
                tracing::trace!(peer = %self.id, "Socket shutdown timed out");
            }
        }
    }
}

fn send_result(
    result: Result<Result<(), FrameError>, tokio::time::error::Elapsed>,
) -> Result<(), SendError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(FrameError::Io(e))) => Err(SendError::Io(e)),
        Ok(Err(FrameError::TooLarge { size, max })) => Err(SendError::TooLarge { size, max }),
        Err(_) => Err(SendError::Timeout),
    }
}

fn frame_result(next: Option<Result<Bytes, FrameError>>) -> Result<Bytes, ReceiveError> {
    match next {
        Some(Ok(body)) => Ok(body),
        Some(Err(FrameError::Io(e))) => Err(ReceiveError::Io(e)),
        Some(Err(e @ FrameError::TooLarge { .. })) => Err(ReceiveError::Framing(e.to_string())),
        None => Err(ReceiveError::Closed),
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}
