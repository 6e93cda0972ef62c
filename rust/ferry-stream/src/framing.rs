//! Length-prefixed framing for async byte streams.
//!
//! Each frame is a 4-byte little-endian length followed by one postcard-encoded
//! [`Message`]. Reader and writer are separate so a link can be split between
//! the session driver's reader and writer tasks.

use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use ferry_types::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Enable wire-level message logging for debugging.
/// Set FERRY_WIRE_SPY=1 to enable.
static WIRE_SPY_ENABLED: AtomicBool = AtomicBool::new(false);

static WIRE_SPY_INIT: OnceLock<()> = OnceLock::new();

fn wire_spy_enabled() -> bool {
    WIRE_SPY_INIT.get_or_init(|| {
        if std::env::var("FERRY_WIRE_SPY").is_ok() {
            WIRE_SPY_ENABLED.store(true, Ordering::Relaxed);
        }
    });

    WIRE_SPY_ENABLED.load(Ordering::Relaxed)
}

fn wire_spy_log(direction: &str, msg: &Message) {
    if wire_spy_enabled() {
        eprintln!("[WIRE] {direction} {msg:?}");
    }
}

/// Largest frame accepted by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const RECV_BUF_COMPACT_THRESHOLD: usize = 64 * 1024;
const FRAME_LEN_PREFIX_SIZE: usize = 4;
const READ_CHUNK: usize = 8 * 1024;

fn compact_recv_buffer(buf: &mut Vec<u8>, unread_start: &mut usize) {
    if *unread_start == buf.len() {
        buf.clear();
        *unread_start = 0;
        return;
    }

    if *unread_start >= RECV_BUF_COMPACT_THRESHOLD && *unread_start >= buf.len() / 2 {
        buf.drain(..*unread_start);
        *unread_start = 0;
    }
}

/// Decode one frame from the unread part of `buf`, if a whole one is there.
fn try_decode_one(
    buf: &mut Vec<u8>,
    unread_start: &mut usize,
    max_frame_size: usize,
) -> io::Result<Option<Message>> {
    let unread = &buf[*unread_start..];
    if unread.len() < FRAME_LEN_PREFIX_SIZE {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([unread[0], unread[1], unread[2], unread[3]]) as usize;
    if frame_len > max_frame_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {frame_len} bytes exceeds the {max_frame_size} byte limit"),
        ));
    }
    let frame_start = *unread_start + FRAME_LEN_PREFIX_SIZE;
    let frame_end = frame_start + frame_len;
    if frame_end > buf.len() {
        return Ok(None);
    }

    let decoded = postcard::from_bytes::<Message>(&buf[frame_start..frame_end]);
    *unread_start = frame_end;
    compact_recv_buffer(buf, unread_start);

    let msg = decoded.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    wire_spy_log("<--", &msg);
    Ok(Some(msg))
}

/// Reading half of a framed byte stream.
pub struct FramedReader<R> {
    reader: R,
    buf: Vec<u8>,
    unread_start: usize,
    max_frame_size: usize,
}

impl<R> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            unread_start: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames. Cancel-safe: bytes
    /// already read stay buffered for the next call.
    pub async fn recv(&mut self) -> io::Result<Option<Message>> {
        loop {
            let decoded = try_decode_one(&mut self.buf, &mut self.unread_start, self.max_frame_size)?;
            if let Some(msg) = decoded {
                return Ok(Some(msg));
            }

            let mut tmp = [0u8; READ_CHUNK];
            let n = self.reader.read(&mut tmp).await?;
            if n == 0 {
                let trailing = self.buf.len() - self.unread_start;
                if wire_spy_enabled() {
                    eprintln!("[WIRE] <-- EOF");
                }
                if trailing != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof with {trailing} trailing bytes and no complete frame"),
                    ));
                }
                return Ok(None);
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

/// Writing half of a framed byte stream.
pub struct FramedWriter<W> {
    writer: W,
    /// Reused between frames; holds the length prefix and the body.
    encode_buf: Vec<u8>,
}

impl<W> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            encode_buf: Vec::with_capacity(1024),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    /// Send one message and flush it.
    pub async fn send(&mut self, msg: &Message) -> io::Result<()> {
        wire_spy_log("-->", msg);

        self.encode_buf.clear();
        self.encode_buf.extend_from_slice(&[0; FRAME_LEN_PREFIX_SIZE]);
        let encoded = postcard::to_extend(msg, std::mem::take(&mut self.encode_buf))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        self.encode_buf = encoded;

        let body_len = self.encode_buf.len() - FRAME_LEN_PREFIX_SIZE;
        let frame_len = u32::try_from(body_len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "message too large for u32 length prefix",
            )
        })?;
        self.encode_buf[..FRAME_LEN_PREFIX_SIZE].copy_from_slice(&frame_len.to_le_bytes());

        self.writer.write_all(&self.encode_buf).await?;
        self.writer.flush().await
    }

    /// Flush and shut down the write direction.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::{ChannelId, Shape};

    fn open() -> Message {
        Message::Open {
            channel_id: ChannelId(1),
            method: "calculator.CalculatorService/Sum".to_string(),
            shape: Shape::Unary,
        }
    }

    async fn encode(msgs: &[Message]) -> Vec<u8> {
        let mut writer = FramedWriter::new(Vec::new());
        for msg in msgs {
            writer.send(msg).await.unwrap();
        }
        writer.into_inner()
    }

    #[tokio::test]
    async fn frames_carry_a_little_endian_length() {
        let bytes = encode(&[Message::Close {
            channel_id: ChannelId(3),
        }])
        .await;
        let len = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(len, bytes.len() - 4);
    }

    #[tokio::test]
    async fn reads_back_several_frames() {
        let msgs = vec![
            open(),
            Message::Data {
                channel_id: ChannelId(1),
                payload: vec![1, 2, 3],
            },
            Message::Close {
                channel_id: ChannelId(1),
            },
        ];
        let bytes = encode(&msgs).await;

        let mut reader = FramedReader::new(&bytes[..]);
        for msg in &msgs {
            assert_eq!(reader.recv().await.unwrap().as_ref(), Some(msg));
        }
        assert_eq!(reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let bytes = encode(&[open()]).await;
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = FramedReader::new(client);

        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(3) {
                server.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            server
        });

        assert_eq!(reader.recv().await.unwrap(), Some(open()));
        drop(writer.await.unwrap());
        assert_eq!(reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_a_frame_is_an_error() {
        let bytes = encode(&[open()]).await;
        let truncated = &bytes[..bytes.len() - 2];
        let mut reader = FramedReader::new(truncated);
        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversize_frames_are_rejected() {
        let bytes = encode(&[Message::Data {
            channel_id: ChannelId(1),
            payload: vec![0; 100],
        }])
        .await;
        let mut reader = FramedReader::new(&bytes[..]).with_max_frame_size(32);
        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn garbage_frames_are_invalid_data() {
        let mut bytes = 3u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
        let mut reader = FramedReader::new(&bytes[..]);
        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn compaction_drops_consumed_bytes() {
        let mut buf = vec![0u8; RECV_BUF_COMPACT_THRESHOLD + 10];
        let mut unread_start = RECV_BUF_COMPACT_THRESHOLD;
        compact_recv_buffer(&mut buf, &mut unread_start);
        assert_eq!(unread_start, 0);
        assert_eq!(buf.len(), 10);

        let mut buf = vec![0u8; 10];
        let mut unread_start = 10;
        compact_recv_buffer(&mut buf, &mut unread_start);
        assert!(buf.is_empty());
    }
}
