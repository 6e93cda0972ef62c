#![deny(unsafe_code)]

//! Wire vocabulary shared by every ferry crate.
//!
//! Nothing in here does IO. The session crate drives these types over a
//! link; the payload crates declare their operations with [`Method`].

macro_rules! declare_u64_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(::serde::Serialize, ::serde::Deserialize, PartialEq, Eq, Hash, Debug, Clone, Copy, PartialOrd, Ord)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub u64);

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

declare_u64_id! {
    /// Identifies one logical stream on a session.
    ///
    /// The connection initiator allocates odd ids, the acceptor even ids, so
    /// both peers can open streams without coordinating. `0` is never used.
    ChannelId
}

mod error;
pub use error::*;

mod item;
pub use item::*;

mod message;
pub use message::*;

mod shape;
pub use shape::*;
