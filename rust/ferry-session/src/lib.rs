#![deny(unsafe_code)]

//! Stream coordination for ferry.
//!
//! A [`SessionHandle`] opens logical streams on a link; a [`Router`] serves the
//! streams the peer opens. Each stream has one of four shapes, and each shape
//! has exactly one coordinator on each side:
//!
//! | Shape | Caller | Responder |
//! |-------|--------|-----------|
//! | unary | [`SessionHandle::unary`] | [`Router::unary`] |
//! | server-streaming | [`ServerStreamingCall`] | [`Router::server_streaming`] |
//! | client-streaming | [`ClientStreamingCall`] | [`Router::client_streaming`] |
//! | bidirectional | [`BidiCall`] | [`Router::bidi`] |
//!
//! ```ignore
//! let (a, b) = memory_link_pair(64);
//! let server = tokio::spawn(async move {
//!     let (_handle, driver) = accept(b, SessionConfig::default(), Some(router)).await?;
//!     driver.run().await
//! });
//! let (handle, driver) = initiate(a, SessionConfig::default(), None).await?;
//! tokio::spawn(driver.run());
//! let sum = handle.unary(&SUM, &(2, 3)).await?;
//! ```

mod call;
mod channel;
mod config;
mod link;
mod router;
mod session;
mod types;

pub use call::{BidiCall, ClientStreamingCall, ServerStreamingCall};
pub use channel::{CancelHandle, Rx, Tx};
pub use config::{SessionConfig, env_parse};
pub use link::{Link, LinkRx, LinkTx, MemoryLink, MemoryLinkRx, MemoryLinkTx, memory_link_pair};
pub use router::{RegisterError, Router};
pub use session::{Driver, SessionError, SessionHandle, accept, initiate};
pub use types::{ChannelError, ChannelIdAllocator, Role};

pub use ferry_types::{Item, Method, RpcError};
