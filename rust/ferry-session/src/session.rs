//! Session establishment and the driver that owns the link.
//!
//! The driver is the only reader of the link. It routes every frame to the
//! stream it belongs to and never waits on a single stream: per-stream
//! credit guarantees a `Data` frame always finds room in its queue. All
//! outgoing frames go through one bounded queue drained by a writer task.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ferry_types::{ChannelId, ErrorCode, Message, PROTOCOL_VERSION, RpcError, Shape, WireStatus};
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::router::{self, Router};
use crate::types::{ChannelEntry, ChannelRegistry, Outcome, Side, StatusCell};
use crate::{ChannelError, ChannelIdAllocator, Link, LinkRx, LinkTx, Role, SessionConfig};

// ============================================================================
// Errors
// ============================================================================

/// Why a session could not be established or stopped running.
#[derive(Debug)]
pub enum SessionError {
    /// The link failed.
    Io(io::Error),
    /// The peer's first frame was not a usable `Hello`.
    Handshake(String),
    /// The peer did not say `Hello` in time.
    HandshakeTimeout,
    /// The peer speaks another protocol version.
    VersionMismatch { ours: u32, theirs: u32 },
    /// The peer broke a session-level rule; we said `Goodbye`.
    Protocol(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Io(e) => write!(f, "io error: {e}"),
            SessionError::Handshake(msg) => write!(f, "handshake failed: {msg}"),
            SessionError::HandshakeTimeout => write!(f, "handshake timed out"),
            SessionError::VersionMismatch { ours, theirs } => {
                write!(f, "protocol version mismatch: ours {ours}, theirs {theirs}")
            }
            SessionError::Protocol(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

// ============================================================================
// Shared session state
// ============================================================================

pub(crate) struct Shared {
    pub(crate) role: Role,
    pub(crate) channel_ids: ChannelIdAllocator,
    pub(crate) registry: Mutex<ChannelRegistry>,
    pub(crate) outgoing: mpsc::Sender<Message>,
    pub(crate) router: Option<Arc<Router>>,
    pub(crate) channel_buffer: usize,
    /// Negotiated during the handshake.
    pub(crate) max_payload_size: usize,
    /// Negotiated during the handshake; never above `channel_buffer`.
    pub(crate) initial_credit: u32,
    pub(crate) shutdown: Notify,
}

impl Shared {
    /// Register stream `id` and build its control block and inbound queue.
    pub(crate) fn register_stream(
        self: &Arc<Self>,
        id: ChannelId,
        side: Side,
    ) -> Result<(Arc<StreamCtl>, mpsc::Receiver<Vec<u8>>), RpcError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.channel_buffer);
        let status = StatusCell::new();
        let credit = Arc::new(Semaphore::new(self.initial_credit as usize));
        self.registry.lock().register(
            id,
            ChannelEntry::new(
                inbound_tx,
                status.clone(),
                side,
                self.initial_credit,
                Arc::clone(&credit),
            ),
        )?;
        let ctl = StreamCtl::new(id, side, status, credit, Arc::clone(self));
        Ok((Arc::new(ctl), inbound_rx))
    }

    /// How many consumed messages a receive-half batches into one `Credit`.
    pub(crate) fn credit_batch(&self) -> u32 {
        (self.initial_credit / 2).max(1)
    }

    /// Queue a frame without waiting. Falls back to a spawned send when the
    /// queue is full; drops the frame if the session is gone.
    pub(crate) fn send_control(&self, msg: Message) {
        match self.outgoing.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                let outgoing = self.outgoing.clone();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let _ = outgoing.send(msg).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// End stream `id` with `err` unless it already ended, and tell the peer.
    ///
    /// A stream we called is cancelled; a stream we serve gets an error
    /// status. Never waits for the peer.
    pub(crate) fn fail_stream(
        &self,
        id: ChannelId,
        side: Side,
        status: &StatusCell,
        err: RpcError,
    ) -> bool {
        if !status.set(Err(err.clone())) {
            return false;
        }
        let entry = self.registry.lock().remove(id);
        drop(entry);
        let frame = match side {
            Side::Responder if !err.is_cancelled() => {
                let outcome: Outcome = Err(err);
                Message::Status {
                    channel_id: id,
                    status: WireStatus::from(&outcome),
                }
            }
            _ => Message::Cancel { channel_id: id },
        };
        self.send_control(frame);
        true
    }

    /// The peer broke the protocol on stream `id`. Only that stream ends.
    pub(crate) fn violation(&self, id: ChannelId, reason: impl Into<String>) {
        let reason = reason.into();
        let entry = self.registry.lock().remove(id);
        let Some(entry) = entry else {
            debug!(channel_id = %id, %reason, "protocol violation on unknown channel");
            return;
        };
        warn!(channel_id = %id, %reason, "protocol violation, failing stream");
        if let Some(handler) = &entry.handler {
            handler.abort();
        }
        self.fail_stream(id, entry.side, &entry.status, RpcError::protocol(reason));
    }
}

// ============================================================================
// Per-stream control block
// ============================================================================

/// State shared by the halves of one stream and its cancel handles.
pub(crate) struct StreamCtl {
    pub(crate) channel_id: ChannelId,
    pub(crate) side: Side,
    pub(crate) status: StatusCell,
    pub(crate) send_closed: AtomicBool,
    /// One permit per `Data` frame the peer lets us send.
    outgoing_credit: Arc<Semaphore>,
    pub(crate) session: Arc<Shared>,
}

impl StreamCtl {
    pub(crate) fn new(
        channel_id: ChannelId,
        side: Side,
        status: StatusCell,
        outgoing_credit: Arc<Semaphore>,
        session: Arc<Shared>,
    ) -> Self {
        Self {
            channel_id,
            side,
            status,
            send_closed: AtomicBool::new(false),
            outgoing_credit,
            session,
        }
    }

    /// Wait until the peer lets us send one more `Data` frame, and spend it.
    pub(crate) async fn acquire_credit(&self) -> Result<(), RpcError> {
        tokio::select! {
            biased;
            err = self.status.failed() => Err(err),
            permit = self.outgoing_credit.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(RpcError::unavailable("session closed")),
            },
        }
    }

    /// Let the peer send `messages` more `Data` frames.
    pub(crate) fn grant_credit(&self, messages: u32) {
        if self.status.is_set() {
            return;
        }
        let granted = self.session.registry.lock().grant(self.channel_id, messages);
        if granted {
            trace!(channel_id = %self.channel_id, messages, "granting credit");
            self.session.send_control(Message::Credit {
                channel_id: self.channel_id,
                messages,
            });
        }
    }

    pub(crate) fn fail(&self, err: RpcError) -> bool {
        self.session
            .fail_stream(self.channel_id, self.side, &self.status, err)
    }

    pub(crate) fn cancel(&self) {
        if self.fail(RpcError::cancelled()) {
            debug!(channel_id = %self.channel_id, "stream cancelled");
        }
    }

    /// Queue a frame for this stream, giving up as soon as the stream fails.
    pub(crate) async fn send_frame(&self, msg: Message) -> Result<(), RpcError> {
        tokio::select! {
            biased;
            err = self.status.failed() => Err(err),
            sent = self.session.outgoing.send(msg) => {
                sent.map_err(|_| RpcError::unavailable("session closed"))
            }
        }
    }

    /// Half-close our direction. Idempotent.
    pub(crate) async fn close_send(&self) -> Result<(), RpcError> {
        if self.send_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(Err(e)) = self.status.get() {
            return Err(e);
        }
        trace!(channel_id = %self.channel_id, "half-closing");
        self.send_frame(Message::Close {
            channel_id: self.channel_id,
        })
        .await
    }

    /// Responder side: attach the terminal status and retire the stream.
    pub(crate) async fn finish(&self, outcome: Outcome) {
        if outcome.is_ok() {
            if let Err(e) = self.close_send().await {
                debug!(channel_id = %self.channel_id, error = %e, "stream ended before completion");
                return;
            }
        }
        if !self.status.set(outcome.clone()) {
            return;
        }
        let entry = self.session.registry.lock().remove(self.channel_id);
        drop(entry);
        let frame = Message::Status {
            channel_id: self.channel_id,
            status: WireStatus::from(&outcome),
        };
        if self.session.outgoing.send(frame).await.is_err() {
            debug!(channel_id = %self.channel_id, "session closed before status was sent");
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Handle for opening streams on a session.
///
/// Cheap to clone and usable from any task. The [`Driver`] returned next to
/// it must be spawned for anything to happen.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Largest payload either side accepts, as negotiated.
    pub fn max_payload_size(&self) -> usize {
        self.shared.max_payload_size
    }

    /// Number of streams currently registered on this session.
    pub fn open_streams(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Tell the peer goodbye and stop the driver. Open streams fail with
    /// `Unavailable`.
    pub fn close(&self, reason: impl Into<String>) {
        self.shared.send_control(Message::Goodbye {
            reason: reason.into(),
        });
        self.shared.shutdown.notify_one();
    }

    /// Register a new caller-side stream and send its `Open` frame.
    pub(crate) async fn open_stream(
        &self,
        method: &'static str,
        shape: Shape,
    ) -> Result<(Arc<StreamCtl>, mpsc::Receiver<Vec<u8>>), RpcError> {
        let shared = &self.shared;
        let channel_id = shared.channel_ids.next();
        let (ctl, inbound_rx) = shared.register_stream(channel_id, Side::Caller)?;
        let open = Message::Open {
            channel_id,
            method: method.to_string(),
            shape,
        };
        if let Err(e) = ctl.send_frame(open).await {
            let entry = shared.registry.lock().remove(channel_id);
            drop(entry);
            return Err(e);
        }
        debug!(%channel_id, method, %shape, "opened stream");
        Ok((ctl, inbound_rx))
    }
}

// ============================================================================
// Establishment
// ============================================================================

/// Establish a session as the side that opened the link.
pub async fn initiate<L: Link>(
    link: L,
    config: SessionConfig,
    router: Option<Arc<Router>>,
) -> Result<(SessionHandle, Driver<L::Tx, L::Rx>), SessionError> {
    establish(link, Role::Initiator, config, router).await
}

/// Establish a session as the side that accepted the link.
pub async fn accept<L: Link>(
    link: L,
    config: SessionConfig,
    router: Option<Arc<Router>>,
) -> Result<(SessionHandle, Driver<L::Tx, L::Rx>), SessionError> {
    establish(link, Role::Acceptor, config, router).await
}

async fn establish<L: Link>(
    link: L,
    role: Role,
    config: SessionConfig,
    router: Option<Arc<Router>>,
) -> Result<(SessionHandle, Driver<L::Tx, L::Rx>), SessionError> {
    let (mut link_tx, mut link_rx) = link.split();

    link_tx
        .send(Message::Hello {
            version: PROTOCOL_VERSION,
            max_payload_size: config.max_payload_size,
            initial_credit: advertised_credit(&config),
        })
        .await?;

    let first = tokio::time::timeout(config.handshake_timeout, link_rx.recv())
        .await
        .map_err(|_| SessionError::HandshakeTimeout)??;

    let (peer_max, peer_credit) = match first {
        Some(Message::Hello {
            version,
            max_payload_size,
            initial_credit,
        }) if version == PROTOCOL_VERSION => (max_payload_size, initial_credit),
        Some(Message::Hello { version, .. }) => {
            let _ = link_tx
                .send(Message::Goodbye {
                    reason: format!("unsupported protocol version {version}"),
                })
                .await;
            return Err(SessionError::VersionMismatch {
                ours: PROTOCOL_VERSION,
                theirs: version,
            });
        }
        Some(other) => {
            return Err(SessionError::Handshake(format!(
                "expected Hello, got {other:?}"
            )));
        }
        None => {
            return Err(SessionError::Handshake(
                "link closed before Hello".to_string(),
            ));
        }
    };

    let max_payload_size = config.max_payload_size.min(peer_max) as usize;
    let initial_credit = advertised_credit(&config).min(peer_credit).max(1);
    let (outgoing_tx, outgoing_rx) = mpsc::channel(config.outgoing_buffer);
    let shared = Arc::new(Shared {
        role,
        channel_ids: ChannelIdAllocator::new(role),
        registry: Mutex::new(ChannelRegistry::default()),
        outgoing: outgoing_tx,
        router,
        channel_buffer: config.channel_buffer,
        max_payload_size,
        initial_credit,
        shutdown: Notify::new(),
    });

    debug!(?role, max_payload_size, initial_credit, "session established");

    let handle = SessionHandle {
        shared: Arc::clone(&shared),
    };
    let driver = Driver {
        shared,
        link_tx,
        link_rx,
        outgoing: outgoing_rx,
    };
    Ok((handle, driver))
}

/// Per-stream window we offer the peer: whatever our inbound queues hold.
fn advertised_credit(config: &SessionConfig) -> u32 {
    u32::try_from(config.channel_buffer).unwrap_or(u32::MAX)
}

// ============================================================================
// Driver
// ============================================================================

/// Drives one session: reads and routes frames, writes queued frames.
///
/// Must be spawned (or awaited) for the session's handle to make progress.
pub struct Driver<T: LinkTx, R: LinkRx> {
    shared: Arc<Shared>,
    link_tx: T,
    link_rx: R,
    outgoing: mpsc::Receiver<Message>,
}

enum Flow {
    Continue,
    Stop,
}

impl<T: LinkTx, R: LinkRx> Driver<T, R> {
    /// Run until the peer closes the link, says goodbye, the handle closes the
    /// session, or the link fails. Every stream still open afterwards fails
    /// with `Unavailable`.
    pub async fn run(self) -> Result<(), SessionError> {
        let Driver {
            shared,
            link_tx,
            mut link_rx,
            outgoing,
        } = self;

        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(Arc::clone(&shared), link_tx, outgoing, stop_rx));

        let result = read_loop(&shared, &mut link_rx).await;

        let reason = match &result {
            Ok(()) => RpcError::unavailable("session closed"),
            Err(e) => RpcError::unavailable(e.to_string()),
        };
        shared.registry.lock().close_all(reason);

        let _ = stop_tx.send(());
        let write_result = match writer.await {
            Ok(r) => r,
            Err(e) => Err(io::Error::other(format!("writer task failed: {e}"))),
        };

        match (&result, write_result) {
            (Ok(()), Err(e)) => {
                warn!(error = %e, "session ended with a write failure");
                Err(SessionError::Io(e))
            }
            _ => {
                info!(ok = result.is_ok(), "session ended");
                result
            }
        }
    }
}

async fn write_loop<T: LinkTx>(
    shared: Arc<Shared>,
    mut link_tx: T,
    mut outgoing: mpsc::Receiver<Message>,
    mut stop: oneshot::Receiver<()>,
) -> io::Result<()> {
    loop {
        let msg = tokio::select! {
            biased;
            msg = outgoing.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = &mut stop => break,
        };
        trace!(channel_id = ?msg.channel_id(), "--> frame");
        if let Err(e) = link_tx.send(msg).await {
            warn!(error = %e, "link write failed");
            shared.shutdown.notify_one();
            return Err(e);
        }
    }
    link_tx.close().await
}

async fn read_loop<R: LinkRx>(shared: &Arc<Shared>, link_rx: &mut R) -> Result<(), SessionError> {
    loop {
        let msg = tokio::select! {
            biased;
            _ = shared.shutdown.notified() => {
                debug!("session shut down locally");
                return Ok(());
            }
            msg = link_rx.recv() => msg?,
        };
        let Some(msg) = msg else {
            debug!("link closed by peer");
            return Ok(());
        };
        trace!(channel_id = ?msg.channel_id(), "<-- frame");

        match handle_message(shared, msg) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => return Ok(()),
            Err(SessionError::Protocol(reason)) => {
                warn!(%reason, "peer broke the session protocol, saying goodbye");
                shared.send_control(Message::Goodbye {
                    reason: reason.clone(),
                });
                return Err(SessionError::Protocol(reason));
            }
            Err(e) => return Err(e),
        }
    }
}

fn handle_message(shared: &Arc<Shared>, msg: Message) -> Result<Flow, SessionError> {
    match msg {
        Message::Hello { .. } => {
            warn!("ignoring Hello after handshake");
        }
        Message::Goodbye { reason } => {
            info!(%reason, "peer said goodbye");
            return Ok(Flow::Stop);
        }
        Message::Open {
            channel_id,
            method,
            shape,
        } => {
            if !shared.role.is_peer_allocated(channel_id) {
                return Err(SessionError::Protocol(format!(
                    "peer opened channel {channel_id} with our parity"
                )));
            }
            if shared.registry.lock().contains(channel_id) {
                return Err(SessionError::Protocol(format!(
                    "peer reopened live channel {channel_id}"
                )));
            }
            router::dispatch(shared, channel_id, method, shape);
        }
        Message::Data {
            channel_id,
            payload,
        } => route_data(shared, channel_id, payload),
        Message::Close { channel_id } => {
            let closed = shared.registry.lock().close_inbound(channel_id);
            match closed {
                Ok(()) => trace!(%channel_id, "peer half-closed"),
                Err(ChannelError::Unknown) => {
                    debug!(%channel_id, "close for unknown channel dropped");
                }
                Err(ChannelError::DataAfterClose) => {
                    shared.violation(channel_id, "second close on stream");
                }
                Err(ChannelError::CreditOverrun) => {
                    unreachable!("close_inbound never reports credit overrun")
                }
            }
        }
        Message::Status { channel_id, status } => {
            let side = shared.registry.lock().side(channel_id);
            match side {
                Some(Side::Caller) => {
                    let entry = shared.registry.lock().remove(channel_id);
                    if let Some(entry) = entry {
                        let outcome: Outcome = status.into();
                        debug!(%channel_id, ok = outcome.is_ok(), "stream completed");
                        entry.status.set(outcome);
                    }
                }
                Some(Side::Responder) => {
                    shared.violation(channel_id, "status sent by the calling peer");
                }
                None => debug!(%channel_id, "status for unknown channel dropped"),
            }
        }
        Message::Cancel { channel_id } => {
            let entry = shared.registry.lock().remove(channel_id);
            if let Some(entry) = entry {
                debug!(%channel_id, "peer cancelled stream");
                entry
                    .status
                    .set(Err(RpcError::new(ErrorCode::Cancelled, "cancelled by peer")));
                if let Some(handler) = entry.handler {
                    handler.abort();
                }
            }
        }
        Message::Credit {
            channel_id,
            messages,
        } => {
            let received = shared.registry.lock().receive_credit(channel_id, messages);
            match received {
                Ok(()) => trace!(%channel_id, messages, "credit received"),
                Err(ChannelError::Unknown) => {
                    debug!(%channel_id, "credit for unknown channel dropped");
                }
                Err(_) => shared.violation(channel_id, "credit beyond any sendable amount"),
            }
        }
    }
    Ok(Flow::Continue)
}

fn route_data(shared: &Arc<Shared>, channel_id: ChannelId, payload: Vec<u8>) {
    if payload.len() > shared.max_payload_size {
        shared.violation(
            channel_id,
            format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                shared.max_payload_size
            ),
        );
        return;
    }

    let routed = shared.registry.lock().route(channel_id);
    match routed {
        // Credit keeps the queue from filling, so this never waits.
        Ok(inbound) => match inbound.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                shared.violation(channel_id, "inbound queue overrun");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(%channel_id, "receive-half gone, data dropped");
            }
        },
        Err(ChannelError::Unknown) => debug!(%channel_id, "data for unknown channel dropped"),
        Err(ChannelError::DataAfterClose) => {
            shared.violation(channel_id, "data after end-of-stream");
        }
        Err(ChannelError::CreditOverrun) => {
            shared.violation(channel_id, "data beyond granted credit");
        }
    }
}
