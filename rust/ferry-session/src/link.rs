use std::future::Future;
use std::io;

use ferry_types::Message;
use tokio::sync::mpsc;

/// Bidirectional message transport.
///
/// TCP and the in-memory link implement this. A link carries whole
/// [`Message`]s in order; framing and encoding are its business.
pub trait Link: Send + 'static {
    type Tx: LinkTx;
    type Rx: LinkRx;

    fn split(self) -> (Self::Tx, Self::Rx);
}

/// Sending half of a [`Link`].
///
/// `send` is the backpressure point: it suspends until the transport can take
/// the message.
pub trait LinkTx: Send + 'static {
    fn send(&mut self, msg: Message) -> impl Future<Output = io::Result<()>> + Send + '_;

    /// Graceful close of the outbound direction.
    fn close(self) -> impl Future<Output = io::Result<()>> + Send
    where
        Self: Sized;
}

/// Receiving half of a [`Link`].
pub trait LinkRx: Send + 'static {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the link. Must be cancel-safe:
    /// the session driver polls it inside `select!`.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Message>>> + Send + '_;
}

/// In-process [`Link`] backed by tokio mpsc channels.
///
/// Messages are moved, never encoded. Useful for exercising sessions without
/// real networking.
pub struct MemoryLink {
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
}

/// Create a pair of connected [`MemoryLink`]s.
///
/// Returns `(a, b)` where sending on `a` delivers to `b` and vice versa.
pub fn memory_link_pair(buffer: usize) -> (MemoryLink, MemoryLink) {
    let (tx_a, rx_b) = mpsc::channel(buffer);
    let (tx_b, rx_a) = mpsc::channel(buffer);

    (
        MemoryLink { tx: tx_a, rx: rx_a },
        MemoryLink { tx: tx_b, rx: rx_b },
    )
}

impl Link for MemoryLink {
    type Tx = MemoryLinkTx;
    type Rx = MemoryLinkRx;

    fn split(self) -> (Self::Tx, Self::Rx) {
        (MemoryLinkTx { tx: self.tx }, MemoryLinkRx { rx: self.rx })
    }
}

/// Sending half of a [`MemoryLink`].
pub struct MemoryLinkTx {
    tx: mpsc::Sender<Message>,
}

impl LinkTx for MemoryLinkTx {
    async fn send(&mut self, msg: Message) -> io::Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionReset, "receiver dropped"))
    }

    async fn close(self) -> io::Result<()> {
        // Dropping the sender closes the channel.
        drop(self.tx);
        Ok(())
    }
}

/// Receiving half of a [`MemoryLink`].
pub struct MemoryLinkRx {
    rx: mpsc::Receiver<Message>,
}

impl LinkRx for MemoryLinkRx {
    async fn recv(&mut self) -> io::Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }
}
