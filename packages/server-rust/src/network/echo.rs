//! Echo processor: a backend that answers every request with its own payload.
//!
//! Serves either family; the request type is read as its wire name and
//! otherwise ignored. Used by the `echo-processor` binary and by tests.

use std::io;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use eventmux_core::ResponseEnvelope;

use super::codec::BackendCodec;

/// How the echo processor answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoMode {
    /// Reply with the request payload as content.
    #[default]
    Content,
    /// Reply `Consumed` without content.
    Consume,
}

/// TCP server answering processor-stream requests.
#[derive(Debug)]
pub struct EchoProcessor {
    listener: TcpListener,
    mode: EchoMode,
}

impl EchoProcessor {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            mode: EchoMode::default(),
        })
    }

    #[must_use]
    pub fn with_mode(mut self, mode: EchoMode) -> Self {
        self.mode = mode;
        self
    }

    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns the accept error that stopped the loop.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), mode = ?self.mode, "echo processor listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            debug!(%peer, "gateway connected");
            let mode = self.mode;
            tokio::spawn(async move {
                match serve_connection(stream, mode).await {
                    Ok(answered) => debug!(%peer, answered, "gateway disconnected"),
                    Err(e) => warn!(%peer, error = %e, "echo connection failed"),
                }
            });
        }
    }
}

/// Answers requests on one processor stream until it ends.
///
/// Returns the number of requests answered.
///
/// # Errors
///
/// Returns the first framing or I/O error.
pub async fn serve_connection<S>(io: S, mode: EchoMode) -> Result<u64, super::codec::CodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, BackendCodec::<String>::new());
    let mut answered = 0u64;
    while let Some(frame) = framed.next().await {
        let envelope = frame?;
        debug!(id = %envelope.id, kind = %envelope.request.kind, "echoing request");
        let reply = match mode {
            EchoMode::Content => ResponseEnvelope::content(envelope.id, envelope.request.payload),
            EchoMode::Consume => ResponseEnvelope::consumed(envelope.id),
        };
        framed.send(reply).await?;
        answered += 1;
    }
    Ok(answered)
}
