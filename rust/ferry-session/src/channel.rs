//! Typed halves of a logical stream.
//!
//! Both peers use the same two types: a caller holds `Tx<Req>` and
//! `Rx<Resp>`, a responder holds `Rx<Req>` and `Tx<Resp>`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use ferry_types::{ChannelId, Item, Message, RpcError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::trace;

use crate::session::StreamCtl;
use crate::types::{Outcome, Side};

/// Send-half of a stream.
///
/// `send` takes `&mut self`, so there is exactly one writer. `close` consumes
/// the half: once half-closed it cannot be reopened. Dropping a caller's `Tx`
/// without closing it half-closes it as well; a responder's send-half is
/// closed when its handler completes successfully.
pub struct Tx<T> {
    ctl: Arc<StreamCtl>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Tx<T> {
    pub(crate) fn new(ctl: Arc<StreamCtl>) -> Self {
        Self {
            ctl,
            _marker: PhantomData,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.ctl.channel_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.ctl))
    }

    /// Half-close this direction. The peer observes end-of-stream after every
    /// message sent before it.
    pub async fn close(self) -> Result<(), RpcError> {
        self.ctl.close_send().await
    }

    /// End the stream locally with `err` and tell the peer. Returns `false`
    /// if the stream had already ended.
    pub(crate) fn fail(&self, err: RpcError) -> bool {
        self.ctl.fail(err)
    }
}

impl<T: Serialize> Tx<T> {
    /// Send one message.
    ///
    /// Suspends until the peer has room for the message on this stream, then
    /// while the session's outgoing queue is full. Fails with the stream's
    /// terminal status if the stream ended, including when it is cancelled
    /// while this call is suspended.
    pub async fn send(&mut self, value: &T) -> Result<(), RpcError> {
        match self.ctl.status.get() {
            Some(Err(e)) => return Err(e),
            Some(Ok(())) => return Err(RpcError::failed_precondition("stream already completed")),
            None => {}
        }

        let payload = postcard::to_allocvec(value)
            .map_err(|e| RpcError::internal(format!("failed to encode message: {e}")))?;
        let limit = self.ctl.session.max_payload_size;
        if payload.len() > limit {
            return Err(RpcError::invalid_argument(format!(
                "message of {} bytes exceeds the {limit} byte limit",
                payload.len()
            )));
        }

        self.ctl.acquire_credit().await?;
        self.ctl
            .send_frame(Message::Data {
                channel_id: self.ctl.channel_id,
                payload,
            })
            .await
    }
}

impl<T> Drop for Tx<T> {
    fn drop(&mut self) {
        if self.ctl.side == Side::Responder
            || self.ctl.status.is_set()
            || self.ctl.send_closed.swap(true, Ordering::AcqRel)
        {
            return;
        }
        trace!(channel_id = %self.ctl.channel_id, "send-half dropped, half-closing");
        self.ctl.session.send_control(Message::Close {
            channel_id: self.ctl.channel_id,
        });
    }
}

/// Receive-half of a stream.
///
/// `recv` takes `&mut self`, so there is exactly one reader. After it yields
/// `EndOfStream` or `Failure` it keeps yielding the same outcome.
///
/// On the calling side, end-of-stream is only reported once the responder's
/// terminal status arrived, so `EndOfStream` there means the whole stream
/// completed successfully. Dropping a caller's `Rx` before that cancels the
/// stream.
pub struct Rx<T> {
    ctl: Arc<StreamCtl>,
    inbound: mpsc::Receiver<Vec<u8>>,
    terminal: Option<Outcome>,
    /// Messages consumed since credit was last granted.
    unacked: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Rx<T> {
    pub(crate) fn new(ctl: Arc<StreamCtl>, inbound: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            ctl,
            inbound,
            terminal: None,
            unacked: 0,
            _marker: PhantomData,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.ctl.channel_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.ctl))
    }

    pub(crate) fn side(&self) -> Side {
        self.ctl.side
    }

    /// End the stream locally with `err` and tell the peer.
    pub(crate) fn fail(&self, err: RpcError) {
        self.ctl.fail(err);
    }

    /// One message left the queue; hand its slot back to the peer, batched.
    fn consumed(&mut self) {
        self.unacked += 1;
        if self.unacked >= self.ctl.session.credit_batch() {
            self.ctl.grant_credit(self.unacked);
            self.unacked = 0;
        }
    }

    fn end(&mut self, outcome: Outcome) -> Item<T> {
        self.terminal = Some(outcome.clone());
        match outcome {
            Ok(()) => Item::EndOfStream,
            Err(e) => Item::Failure(e),
        }
    }
}

impl<T: DeserializeOwned> Rx<T> {
    /// Receive the next message, end-of-stream, or the stream's failure.
    pub async fn recv(&mut self) -> Item<T> {
        if let Some(outcome) = self.terminal.clone() {
            return self.end(outcome);
        }

        // Cancellation is observed at once; any other failure only after the
        // messages that preceded it.
        if let Some(Err(e)) = self.ctl.status.get() {
            if e.is_cancelled() {
                return self.end(Err(e));
            }
        }

        let next = tokio::select! {
            biased;
            next = self.inbound.recv() => Ok(next),
            err = self.ctl.status.failed() => Err(err),
        };

        match next {
            Err(e) => self.end(Err(e)),
            Ok(Some(bytes)) => match postcard::from_bytes::<T>(&bytes) {
                Ok(value) => {
                    self.consumed();
                    Item::Message(value)
                }
                Err(e) => {
                    let err = RpcError::protocol(format!("undecodable message: {e}"));
                    self.fail(err.clone());
                    self.end(Err(err))
                }
            },
            Ok(None) => {
                let outcome = match self.ctl.side {
                    Side::Caller => self.ctl.status.wait().await,
                    Side::Responder => match self.ctl.status.get() {
                        Some(Err(e)) => Err(e),
                        _ => Ok(()),
                    },
                };
                self.end(outcome)
            }
        }
    }
}

impl<T> Drop for Rx<T> {
    fn drop(&mut self) {
        if self.ctl.side == Side::Caller && !self.ctl.status.is_set() {
            self.ctl.cancel();
        }
    }
}

/// Cancels a stream from anywhere, without waiting for the peer.
///
/// Any `send` or `recv` suspended on the stream wakes up with a `Cancelled`
/// failure.
#[derive(Clone)]
pub struct CancelHandle {
    ctl: Arc<StreamCtl>,
}

impl CancelHandle {
    pub(crate) fn new(ctl: Arc<StreamCtl>) -> Self {
        Self { ctl }
    }

    pub fn cancel(&self) {
        self.ctl.cancel();
    }

    /// Whether the stream already has its terminal status.
    pub fn is_finished(&self) -> bool {
        self.ctl.status.is_set()
    }

    /// Wait for the stream's terminal status.
    pub async fn finished(&self) -> Result<(), RpcError> {
        self.ctl.status.wait().await
    }
}
