//! Caller-side coordinators, one per stream shape.

use std::sync::Arc;

use ferry_types::{
    Bidirectional, ClientStreaming, Item, Method, RpcError, ServerStreaming, ShapeKind, Unary,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::Side;
use crate::{CancelHandle, Rx, SessionHandle, Tx};

impl SessionHandle {
    async fn open<S: ShapeKind, Req, Resp>(
        &self,
        method: &Method<S, Req, Resp>,
    ) -> Result<(Tx<Req>, Rx<Resp>), RpcError> {
        let (ctl, inbound) = self.open_stream(method.name(), method.shape()).await?;
        Ok((Tx::new(Arc::clone(&ctl)), Rx::new(ctl, inbound)))
    }

    /// Send one request and wait for exactly one response or one failure.
    pub async fn unary<Req, Resp>(
        &self,
        method: &Method<Unary, Req, Resp>,
        request: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (mut tx, mut rx) = self.open(method).await?;
        tx.send(request).await?;
        tx.close().await?;
        recv_single(&mut rx, "response").await
    }

    /// Send one request, half-close, and hand back the response sequence.
    pub async fn server_streaming<Req, Resp>(
        &self,
        method: &Method<ServerStreaming, Req, Resp>,
        request: &Req,
    ) -> Result<ServerStreamingCall<Resp>, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (mut tx, rx) = self.open(method).await?;
        tx.send(request).await?;
        tx.close().await?;
        Ok(ServerStreamingCall { rx })
    }

    /// Open a stream of requests answered by a single response.
    pub async fn client_streaming<Req, Resp>(
        &self,
        method: &Method<ClientStreaming, Req, Resp>,
    ) -> Result<ClientStreamingCall<Req, Resp>, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (tx, rx) = self.open(method).await?;
        Ok(ClientStreamingCall { tx, rx })
    }

    /// Open a stream with independent request and response directions.
    pub async fn bidi<Req, Resp>(
        &self,
        method: &Method<Bidirectional, Req, Resp>,
    ) -> Result<BidiCall<Req, Resp>, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (tx, rx) = self.open(method).await?;
        Ok(BidiCall { tx, rx })
    }
}

/// Read exactly one message followed by end-of-stream.
///
/// Used for the single request of unary and server-streaming responders and
/// the single response of unary and client-streaming callers.
pub(crate) async fn recv_single<T: DeserializeOwned>(
    rx: &mut Rx<T>,
    what: &str,
) -> Result<T, RpcError> {
    let value = match rx.recv().await {
        Item::Message(value) => value,
        Item::Failure(e) => return Err(e),
        Item::EndOfStream => {
            return Err(match rx.side() {
                Side::Responder => {
                    RpcError::invalid_argument(format!("stream ended before the {what}"))
                }
                Side::Caller => RpcError::protocol(format!("stream completed without a {what}")),
            });
        }
    };
    match rx.recv().await {
        Item::EndOfStream => Ok(value),
        Item::Failure(e) => Err(e),
        Item::Message(_) => {
            let err = RpcError::protocol(format!("more than one {what}"));
            rx.fail(err.clone());
            Err(err)
        }
    }
}

/// A server-streaming invocation in progress.
///
/// The responses form a lazy, finite, non-restartable sequence. Dropping the
/// call before the end cancels the stream.
pub struct ServerStreamingCall<Resp> {
    rx: Rx<Resp>,
}

impl<Resp: DeserializeOwned> ServerStreamingCall<Resp> {
    /// Next response, `EndOfStream` once the responder completed, or the
    /// failure that ended the stream early.
    pub async fn recv(&mut self) -> Item<Resp> {
        self.rx.recv().await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.rx.cancel_handle()
    }

    /// Drain the sequence. Responses received before a failure are discarded.
    pub async fn collect(mut self) -> Result<Vec<Resp>, RpcError> {
        let mut out = Vec::new();
        while let Some(value) = self.rx.recv().await.into_result()? {
            out.push(value);
        }
        Ok(out)
    }

    /// The sequence as a [`Stream`]. A failure is yielded once as the last item.
    pub fn into_stream(self) -> impl Stream<Item = Result<Resp, RpcError>> + Send
    where
        Resp: Send + 'static,
    {
        futures::stream::unfold(Some(self.rx), |rx| async move {
            let mut rx = rx?;
            match rx.recv().await {
                Item::Message(value) => Some((Ok(value), Some(rx))),
                Item::EndOfStream => None,
                Item::Failure(e) => Some((Err(e), None)),
            }
        })
    }
}

/// A client-streaming invocation in progress.
pub struct ClientStreamingCall<Req, Resp> {
    tx: Tx<Req>,
    rx: Rx<Resp>,
}

impl<Req: Serialize, Resp: DeserializeOwned> ClientStreamingCall<Req, Resp> {
    pub async fn send(&mut self, request: &Req) -> Result<(), RpcError> {
        self.tx.send(request).await
    }

    /// Half-close the request direction and wait for the single response.
    pub async fn close_and_recv(self) -> Result<Resp, RpcError> {
        let ClientStreamingCall { tx, mut rx } = self;
        tx.close().await?;
        recv_single(&mut rx, "response").await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.rx.cancel_handle()
    }
}

/// A bidirectional invocation in progress.
///
/// Sending and receiving must make progress concurrently: either use
/// [`BidiCall::run`], or [`split`](BidiCall::split) the halves and drive them
/// from separate tasks.
pub struct BidiCall<Req, Resp> {
    tx: Tx<Req>,
    rx: Rx<Resp>,
}

impl<Req, Resp> BidiCall<Req, Resp> {
    pub fn split(self) -> (Tx<Req>, Rx<Resp>) {
        (self.tx, self.rx)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.rx.cancel_handle()
    }
}

impl<Req, Resp> BidiCall<Req, Resp>
where
    Req: Serialize + Send + Sync + 'static,
    Resp: DeserializeOwned,
{
    /// Drive both directions to completion.
    ///
    /// The send flow runs on its own task, pushing `requests` until the
    /// source is exhausted and then half-closing. The receive flow runs here,
    /// handing every response to `on_response` until end-of-stream. Returns
    /// only after the receive flow finished and the send flow was joined; if
    /// the receive flow fails, the send flow is stopped.
    ///
    /// A request that cannot be sent (too large, say) cancels the stream and
    /// its error is returned. Requests still pending when the responder
    /// completes successfully are dropped.
    pub async fn run<S, F>(self, requests: S, mut on_response: F) -> Result<(), RpcError>
    where
        S: Stream<Item = Req> + Send + 'static,
        F: FnMut(Resp),
    {
        let cancel = self.cancel_handle();
        let (mut tx, mut rx) = self.split();
        let channel_id = tx.channel_id();

        let send_flow = tokio::spawn(async move {
            let mut requests = std::pin::pin!(requests);
            while let Some(request) = requests.next().await {
                if let Err(e) = tx.send(&request).await {
                    if tx.fail(e.clone()) {
                        return Err(e);
                    }
                    // Already ended; the receive flow reports how.
                    debug!(%channel_id, error = %e, "stream ended with requests left unsent");
                    return Ok(());
                }
            }
            tx.close().await
        });

        let received = loop {
            match rx.recv().await {
                Item::Message(response) => on_response(response),
                Item::EndOfStream => break Ok(()),
                Item::Failure(e) => break Err(e),
            }
        };

        if let Err(e) = received {
            cancel.cancel();
            send_flow.abort();
            debug!(%channel_id, error = %e, "bidi stream failed");
            return Err(e);
        }

        match send_flow.await {
            Ok(result) => result,
            Err(e) => Err(RpcError::internal(format!("send flow failed: {e}"))),
        }
    }
}
