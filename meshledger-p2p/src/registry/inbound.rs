//! Inbound connection listener.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{P2pError, P2pResult};

/// Inbound connection listener.
pub struct InboundListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl InboundListener {
    /// Bind the listener.
    pub async fn bind(addr: SocketAddr) -> P2pResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr().map_err(P2pError::Io)?;
        tracing::info!(addr = %local_addr, "Listening for inbound connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the local address we're listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the next inbound connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        tracing::debug!(addr = %addr, "Accepted inbound connection");
        Ok((stream, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_port_zero() {
        let listener = InboundListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_, remote) = accepted.unwrap();
        assert_eq!(remote, client.unwrap().local_addr().unwrap());
    }
}
