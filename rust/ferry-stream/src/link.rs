//! [`Link`] over async byte streams.

use std::io;

use ferry_session::{Link, LinkRx, LinkTx, SessionConfig, SessionError, SessionHandle, initiate};
use ferry_types::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::framing::{FramedReader, FramedWriter};

/// A [`Link`] made of a byte-stream reader and writer.
pub struct StreamLink<R, W> {
    reader: FramedReader<R>,
    writer: FramedWriter<W>,
}

impl<R, W> StreamLink<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedReader::new(reader),
            writer: FramedWriter::new(writer),
        }
    }

    /// Reject incoming frames larger than `max_frame_size` bytes.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.reader = self.reader.with_max_frame_size(max_frame_size);
        self
    }
}

impl<R, W> Link for StreamLink<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Tx = StreamLinkTx<W>;
    type Rx = StreamLinkRx<R>;

    fn split(self) -> (Self::Tx, Self::Rx) {
        (
            StreamLinkTx {
                writer: self.writer,
            },
            StreamLinkRx {
                reader: self.reader,
            },
        )
    }
}

/// Sending half of a [`StreamLink`].
pub struct StreamLinkTx<W> {
    writer: FramedWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> LinkTx for StreamLinkTx<W> {
    async fn send(&mut self, msg: Message) -> io::Result<()> {
        self.writer.send(&msg).await
    }

    async fn close(mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Receiving half of a [`StreamLink`].
pub struct StreamLinkRx<R> {
    reader: FramedReader<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> LinkRx for StreamLinkRx<R> {
    async fn recv(&mut self) -> io::Result<Option<Message>> {
        self.reader.recv().await
    }
}

/// A TCP link.
pub type TcpLink = StreamLink<OwnedReadHalf, OwnedWriteHalf>;

/// Wrap a connected socket, with Nagle's algorithm disabled.
pub fn tcp_link(stream: TcpStream) -> io::Result<TcpLink> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok(StreamLink::new(reader, writer))
}

/// Connect to a ferry server and establish a session as the initiator.
///
/// The session driver is spawned; its handle resolves when the session ends.
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    config: SessionConfig,
) -> Result<(SessionHandle, JoinHandle<Result<(), SessionError>>), SessionError> {
    let stream = TcpStream::connect(addr).await?;
    let peer = stream.peer_addr()?;
    let (handle, driver) = initiate(tcp_link(stream)?, config, None).await?;
    debug!(%peer, "connected");
    Ok((handle, tokio::spawn(driver.run())))
}
