#![deny(unsafe_code)]

//! Byte-stream transport for ferry.
//!
//! Frames every [`Message`](ferry_types::Message) with a 4-byte little-endian
//! length prefix, so sessions can run over TCP or any other async byte stream.
//!
//! ```ignore
//! use ferry_stream::{Server, ServerConfig, connect};
//!
//! let server = Server::new(router, ServerConfig::from_env());
//! let listener = server.bind().await?;
//! tokio::spawn(async move { server.serve(listener).await });
//!
//! let (handle, _driver) = connect("127.0.0.1:50051", SessionConfig::default()).await?;
//! let sum = handle.unary(&SUM, &request).await?;
//! ```

mod framing;
mod link;
mod server;

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FramedReader, FramedWriter};
pub use link::{StreamLink, StreamLinkRx, StreamLinkTx, TcpLink, connect, tcp_link};
pub use server::{Server, ServerConfig};
