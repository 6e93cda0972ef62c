//! Responder side: operation registration and per-shape coordinators.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ferry_types::{
    Bidirectional, ChannelId, ClientStreaming, ErrorCode, Message, Method, RpcError,
    ServerStreaming, Shape, Unary, WireStatus,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::call::recv_single;
use crate::session::{Shared, StreamCtl};
use crate::types::{Outcome, Side};
use crate::{Rx, Tx};

/// What a registered handler is given for one incoming stream.
pub(crate) struct StreamParts {
    ctl: Arc<StreamCtl>,
    inbound: mpsc::Receiver<Vec<u8>>,
}

impl StreamParts {
    fn into_halves<Req, Resp>(self) -> (Rx<Req>, Tx<Resp>) {
        (Rx::new(Arc::clone(&self.ctl), self.inbound), Tx::new(self.ctl))
    }
}

type BoxedHandler = Box<dyn Fn(StreamParts) -> BoxFuture<'static, Outcome> + Send + Sync>;

struct Route {
    shape: Shape,
    handler: BoxedHandler,
}

/// Registering an operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// An operation with this name is already registered.
    Duplicate(&'static str),
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::Duplicate(name) => write!(f, "operation {name} registered twice"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Maps operation names to handlers.
///
/// Each name is bound exactly once, to a handler whose signature matches the
/// operation's shape. The router is shared by every session a server accepts.
#[derive(Default)]
pub struct Router {
    routes: HashMap<&'static str, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all registered operations, sorted.
    pub fn operations(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.routes.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn shape_of(&self, name: &str) -> Option<Shape> {
        self.routes.get(name).map(|r| r.shape)
    }

    fn insert(
        &mut self,
        name: &'static str,
        shape: Shape,
        handler: BoxedHandler,
    ) -> Result<&mut Self, RegisterError> {
        if self.routes.contains_key(name) {
            return Err(RegisterError::Duplicate(name));
        }
        self.routes.insert(name, Route { shape, handler });
        Ok(self)
    }

    /// Move every operation of `other` into this router.
    pub fn merge(&mut self, other: Router) -> Result<&mut Self, RegisterError> {
        for (name, route) in other.routes {
            self.insert(name, route.shape, route.handler)?;
        }
        Ok(self)
    }

    /// Bind a unary operation. The handler sees the request only after the
    /// caller half-closed; its response is sent, then the stream completes.
    pub fn unary<Req, Resp, F, Fut>(
        &mut self,
        method: Method<Unary, Req, Resp>,
        handler: F,
    ) -> Result<&mut Self, RegisterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method.name(),
            Shape::Unary,
            Box::new(move |parts: StreamParts| {
                let handler = Arc::clone(&handler);
                async move {
                    let (mut rx, mut tx) = parts.into_halves::<Req, Resp>();
                    let request = recv_single(&mut rx, "request").await?;
                    let response = (*handler)(request).await?;
                    tx.send(&response).await?;
                    tx.close().await
                }
                .boxed()
            }),
        )
    }

    /// Bind a server-streaming operation. The handler pushes responses into
    /// the given send-half; returning `Ok` completes the stream, returning
    /// `Err` ends it early with that failure.
    pub fn server_streaming<Req, Resp, F, Fut>(
        &mut self,
        method: Method<ServerStreaming, Req, Resp>,
        handler: F,
    ) -> Result<&mut Self, RegisterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req, Tx<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method.name(),
            Shape::ServerStreaming,
            Box::new(move |parts: StreamParts| {
                let handler = Arc::clone(&handler);
                async move {
                    let (mut rx, tx) = parts.into_halves::<Req, Resp>();
                    let request = recv_single(&mut rx, "request").await?;
                    (*handler)(request, tx).await
                }
                .boxed()
            }),
        )
    }

    /// Bind a client-streaming operation. The handler drains the requests
    /// until end-of-stream and returns the single response.
    pub fn client_streaming<Req, Resp, F, Fut>(
        &mut self,
        method: Method<ClientStreaming, Req, Resp>,
        handler: F,
    ) -> Result<&mut Self, RegisterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + Sync + 'static,
        F: Fn(Rx<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method.name(),
            Shape::ClientStreaming,
            Box::new(move |parts: StreamParts| {
                let handler = Arc::clone(&handler);
                async move {
                    let (rx, mut tx) = parts.into_halves::<Req, Resp>();
                    let response = (*handler)(rx).await?;
                    tx.send(&response).await?;
                    tx.close().await
                }
                .boxed()
            }),
        )
    }

    /// Bind a bidirectional operation. The handler owns both halves and
    /// drives them however it likes; the send-half is closed for it when it
    /// returns `Ok`.
    pub fn bidi<Req, Resp, F, Fut>(
        &mut self,
        method: Method<Bidirectional, Req, Resp>,
        handler: F,
    ) -> Result<&mut Self, RegisterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Rx<Req>, Tx<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            method.name(),
            Shape::Bidirectional,
            Box::new(move |parts: StreamParts| {
                let handler = Arc::clone(&handler);
                async move {
                    let (rx, tx) = parts.into_halves::<Req, Resp>();
                    (*handler)(rx, tx).await
                }
                .boxed()
            }),
        )
    }
}

fn reject(shared: &Shared, channel_id: ChannelId, err: RpcError) {
    let outcome: Outcome = Err(err);
    shared.send_control(Message::Status {
        channel_id,
        status: WireStatus::from(&outcome),
    });
}

/// Start serving a stream the peer just opened.
///
/// The handler runs on its own task; a failure or panic there ends only this
/// stream.
pub(crate) fn dispatch(shared: &Arc<Shared>, channel_id: ChannelId, method: String, shape: Shape) {
    let route = shared
        .router
        .as_ref()
        .and_then(|router| router.routes.get(method.as_str()));
    let Some(route) = route else {
        warn!(%channel_id, %method, "no such operation");
        reject(shared, channel_id, RpcError::not_found(&method));
        return;
    };
    if route.shape != shape {
        warn!(%channel_id, %method, expected = %route.shape, got = %shape, "shape mismatch");
        reject(
            shared,
            channel_id,
            RpcError::new(
                ErrorCode::Unimplemented,
                format!("{method} is {}, not {shape}", route.shape),
            ),
        );
        return;
    }

    let (ctl, inbound_rx) = match shared.register_stream(channel_id, Side::Responder) {
        Ok(parts) => parts,
        Err(e) => {
            debug!(%channel_id, error = %e, "not serving stream");
            return;
        }
    };
    let fut = (route.handler)(StreamParts {
        ctl: Arc::clone(&ctl),
        inbound: inbound_rx,
    });
    debug!(%channel_id, %method, %shape, "serving stream");

    let task = tokio::spawn(async move {
        let outcome = AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(RpcError::internal("handler panicked")));
        if let Err(e) = &outcome {
            if !e.is_cancelled() {
                warn!(%channel_id, %method, error = %e, "stream failed");
            }
        }
        ctl.finish(outcome).await;
    });
    shared
        .registry
        .lock()
        .set_handler(channel_id, task.abort_handle());
}
