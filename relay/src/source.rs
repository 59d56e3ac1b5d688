//! Connection source seam
//!
//! The wire protocol server lives outside this crate: whatever accepts
//! sockets, performs handshakes, and frames records implements these two
//! traits. The engine only ever sees an opaque [`Connection`] yielding
//! [`Record`]s until it ends.
//!
//! [`ChannelSource`] is the in-memory reference implementation, used by
//! the integration tests and handy for embedding the relay behind an
//! existing server.

use async_trait::async_trait;
use sulku_core::{Record, StageError};
use tokio::sync::{mpsc, Mutex};

/// Produces accepted connections
///
/// `accept` blocks with no timeout; if the source never yields a
/// connection the acceptor simply parks there, bounded only by the
/// shutdown token.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    /// The connection type this source yields
    type Conn: Connection;

    /// Wait for and return the next connection
    async fn accept(&self) -> Result<Self::Conn, StageError>;
}

/// One accepted connection, owned by the worker serving it
///
/// Dropped when the worker's run loop ends, normally or on error.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Identifier for logs and event metadata
    fn id(&self) -> &str;

    /// Next framed record; `None` when the connection has ended
    async fn next_record(&mut self) -> Result<Option<Record>, StageError>;
}

/// In-memory connection source backed by an mpsc channel
///
/// External code opens connections with [`ChannelSourceHandle::connect`]
/// and feeds them records; the acceptor sees them exactly as it would
/// see socket-backed ones.
pub struct ChannelSource {
    incoming: Mutex<mpsc::UnboundedReceiver<ChannelConnection>>,
}

/// Handle for opening connections on a [`ChannelSource`]
#[derive(Clone)]
pub struct ChannelSourceHandle {
    tx: mpsc::UnboundedSender<ChannelConnection>,
}

impl ChannelSource {
    /// Create a source and the handle used to open connections on it
    pub fn new() -> (Self, ChannelSourceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: Mutex::new(rx),
            },
            ChannelSourceHandle { tx },
        )
    }
}

impl ChannelSourceHandle {
    /// Open a new connection; the returned sender feeds it records.
    ///
    /// Dropping the sender ends the connection.
    pub fn connect(&self, id: impl Into<String>) -> Result<mpsc::UnboundedSender<Record>, StageError> {
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let conn = ChannelConnection {
            id: id.into(),
            records: record_rx,
        };
        self.tx
            .send(conn)
            .map_err(|_| StageError::Connection("source closed".to_string()))?;
        Ok(record_tx)
    }
}

/// Connection backed by an mpsc record channel
pub struct ChannelConnection {
    id: String,
    records: mpsc::UnboundedReceiver<Record>,
}

#[async_trait]
impl ConnectionSource for ChannelSource {
    type Conn = ChannelConnection;

    async fn accept(&self) -> Result<Self::Conn, StageError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| StageError::Connection("source closed".to_string()))
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn next_record(&mut self) -> Result<Option<Record>, StageError> {
        Ok(self.records.recv().await)
    }
}
