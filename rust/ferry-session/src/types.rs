use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ferry_types::{ChannelId, RpcError};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::AbortHandle;

// ============================================================================
// Roles and channel ids
// ============================================================================

/// Which end of the link we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the link. Allocates odd channel ids.
    Initiator,
    /// Accepted the link. Allocates even channel ids.
    Acceptor,
}

impl Role {
    /// Whether `id` was allocated by the peer in this role's session.
    pub(crate) fn is_peer_allocated(self, id: ChannelId) -> bool {
        match self {
            Role::Initiator => id.0 != 0 && id.0 % 2 == 0,
            Role::Acceptor => id.0 % 2 == 1,
        }
    }
}

/// Allocates unique channel ids with the role's parity.
pub struct ChannelIdAllocator {
    next: AtomicU64,
}

impl ChannelIdAllocator {
    pub fn new(role: Role) -> Self {
        let start = match role {
            Role::Initiator => 1, // odd: 1, 3, 5, ...
            Role::Acceptor => 2,  // even: 2, 4, 6, ...
        };
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn next(&self) -> ChannelId {
        ChannelId(self.next.fetch_add(2, Ordering::Relaxed))
    }
}

// ============================================================================
// Terminal status
// ============================================================================

pub(crate) type Outcome = Result<(), RpcError>;

/// A stream's terminal status. Set exactly once, observable by any number of
/// waiters.
#[derive(Clone)]
pub(crate) struct StatusCell {
    inner: Arc<watch::Sender<Option<Outcome>>>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(tx),
        }
    }

    /// Returns `true` if this call set the status, `false` if it was already set.
    pub(crate) fn set(&self, outcome: Outcome) -> bool {
        self.inner.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub(crate) fn get(&self) -> Option<Outcome> {
        self.inner.borrow().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner.borrow().is_some()
    }

    /// Wait until the status is set, whatever it is.
    pub(crate) async fn wait(&self) -> Outcome {
        let mut rx = self.inner.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(RpcError::unavailable("stream state dropped")))
    }

    /// Resolve once the status is set to a failure. Never resolves on success.
    pub(crate) async fn failed(&self) -> RpcError {
        let mut rx = self.inner.subscribe();
        let failure = match rx.wait_for(|slot| matches!(slot, Some(Err(_)))).await {
            Ok(slot) => match &*slot {
                Some(Err(e)) => Some(e.clone()),
                _ => None,
            },
            Err(_) => None,
        };
        match failure {
            Some(e) => e,
            None => std::future::pending().await,
        }
    }
}

// ============================================================================
// Channel registry
// ============================================================================

/// Which role this session plays on a given stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Caller,
    Responder,
}

/// Error when routing stream frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Channel id not found in registry.
    Unknown,
    /// Data or a second `Close` received after the peer half-closed.
    DataAfterClose,
    /// Data beyond the credit we granted.
    CreditOverrun,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Unknown => write!(f, "unknown channel"),
            ChannelError::DataAfterClose => write!(f, "frame after end-of-stream"),
            ChannelError::CreditOverrun => write!(f, "data beyond granted credit"),
        }
    }
}

impl std::error::Error for ChannelError {}

pub(crate) struct ChannelEntry {
    /// Feeds the local receive-half. `None` once the peer half-closed.
    pub(crate) inbound: Option<mpsc::Sender<Vec<u8>>>,
    pub(crate) status: StatusCell,
    pub(crate) side: Side,
    /// Responder task, aborted when the peer cancels.
    pub(crate) handler: Option<AbortHandle>,
    /// `Data` frames the peer may still send us.
    incoming_credit: u32,
    /// `Data` frames we may still send the peer, one permit each.
    outgoing_credit: Arc<Semaphore>,
}

impl ChannelEntry {
    /// `inbound` must hold at least `initial_credit` messages.
    pub(crate) fn new(
        inbound: mpsc::Sender<Vec<u8>>,
        status: StatusCell,
        side: Side,
        initial_credit: u32,
        outgoing_credit: Arc<Semaphore>,
    ) -> Self {
        Self {
            inbound: Some(inbound),
            status,
            side,
            handler: None,
            incoming_credit: initial_credit,
            outgoing_credit,
        }
    }
}

/// Live streams of one session, keyed by channel id.
///
/// Only the session driver routes into it; halves and callers register and
/// remove entries.
#[derive(Default)]
pub(crate) struct ChannelRegistry {
    entries: HashMap<ChannelId, ChannelEntry>,
    /// Set once the session is gone; no new streams after that.
    closed: Option<RpcError>,
}

impl ChannelRegistry {
    pub(crate) fn register(&mut self, id: ChannelId, entry: ChannelEntry) -> Result<(), RpcError> {
        if let Some(reason) = &self.closed {
            return Err(reason.clone());
        }
        if self.entries.contains_key(&id) {
            return Err(RpcError::protocol(format!("channel {id} already in use")));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    pub(crate) fn contains(&self, id: ChannelId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn side(&self, id: ChannelId) -> Option<Side> {
        self.entries.get(&id).map(|e| e.side)
    }

    pub(crate) fn set_handler(&mut self, id: ChannelId, handler: AbortHandle) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.handler = Some(handler);
        }
    }

    /// Where to deliver a `Data` frame for `id`. Spends one credit.
    pub(crate) fn route(&mut self, id: ChannelId) -> Result<mpsc::Sender<Vec<u8>>, ChannelError> {
        let entry = self.entries.get_mut(&id).ok_or(ChannelError::Unknown)?;
        let inbound = entry.inbound.clone().ok_or(ChannelError::DataAfterClose)?;
        if entry.incoming_credit == 0 {
            return Err(ChannelError::CreditOverrun);
        }
        entry.incoming_credit -= 1;
        Ok(inbound)
    }

    /// Record `messages` more credit granted to the peer on `id`.
    ///
    /// Returns `false` when nothing more can arrive on `id`, in which case no
    /// `Credit` frame should be sent.
    pub(crate) fn grant(&mut self, id: ChannelId, messages: u32) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.inbound.is_some() => {
                entry.incoming_credit = entry.incoming_credit.saturating_add(messages);
                true
            }
            _ => false,
        }
    }

    /// The peer granted us `messages` more credit on `id`.
    pub(crate) fn receive_credit(&self, id: ChannelId, messages: u32) -> Result<(), ChannelError> {
        let entry = self.entries.get(&id).ok_or(ChannelError::Unknown)?;
        let available = entry.outgoing_credit.available_permits();
        if messages as usize > Semaphore::MAX_PERMITS - available {
            return Err(ChannelError::CreditOverrun);
        }
        entry.outgoing_credit.add_permits(messages as usize);
        Ok(())
    }

    /// The peer half-closed `id`. Buffered data stays readable.
    pub(crate) fn close_inbound(&mut self, id: ChannelId) -> Result<(), ChannelError> {
        let entry = self.entries.get_mut(&id).ok_or(ChannelError::Unknown)?;
        entry.inbound.take().ok_or(ChannelError::DataAfterClose)?;
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: ChannelId) -> Option<ChannelEntry> {
        self.entries.remove(&id)
    }

    /// Fail every stream and refuse new ones.
    pub(crate) fn close_all(&mut self, reason: RpcError) {
        for (_, entry) in self.entries.drain() {
            entry.status.set(Err(reason.clone()));
            if let Some(handler) = entry.handler {
                handler.abort();
            }
        }
        self.closed.get_or_insert(reason);
    }
}
