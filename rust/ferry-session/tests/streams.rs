//! End-to-end tests of the four stream shapes over an in-memory link.

use std::sync::Arc;
use std::time::Duration;

use ferry_session::{
    Item, Method, Router, RpcError, Rx, SessionConfig, SessionHandle, Tx, accept, initiate,
    memory_link_pair,
};
use ferry_types::{Bidirectional, ClientStreaming, ErrorCode, ServerStreaming, Unary};
use futures::StreamExt;

const DOUBLE: Method<Unary, u32, u32> = Method::new("test.Numbers/Double");
const SHOUT: Method<Unary, String, String> = Method::new("test.Numbers/Shout");
const COUNT: Method<ServerStreaming, u32, u32> = Method::new("test.Numbers/Count");
const HANG: Method<ServerStreaming, u32, u32> = Method::new("test.Numbers/Hang");
const TOTAL: Method<ClientStreaming, u32, u64> = Method::new("test.Numbers/Total");
const ECHO: Method<Bidirectional, String, String> = Method::new("test.Numbers/Echo");
const FLOOD: Method<ServerStreaming, u32, u32> = Method::new("test.Numbers/Flood");
const IGNORE: Method<ClientStreaming, u32, u64> = Method::new("test.Numbers/Ignore");

const MISSING: Method<Unary, u32, u32> = Method::new("test.Numbers/Missing");
const DOUBLE_AS_STREAM: Method<ServerStreaming, u32, u32> = Method::new("test.Numbers/Double");

fn numbers() -> Router {
    let mut router = Router::new();
    router
        .unary(DOUBLE, |n: u32| async move {
            if n == 0 {
                panic!("refusing to double zero");
            }
            n.checked_mul(2)
                .ok_or_else(|| RpcError::out_of_range(format!("{n} is too large to double")))
        })
        .unwrap()
        .unary(SHOUT, |s: String| async move {
            Ok::<_, RpcError>(s.to_uppercase())
        })
        .unwrap()
        .server_streaming(COUNT, |n: u32, mut tx: Tx<u32>| async move {
            for i in 0..n.min(3) {
                tx.send(&i).await?;
            }
            if n > 10 {
                return Err(RpcError::out_of_range("count too large"));
            }
            for i in 3..n {
                tx.send(&i).await?;
            }
            Ok::<_, RpcError>(())
        })
        .unwrap()
        .server_streaming(HANG, |n: u32, mut tx: Tx<u32>| async move {
            tx.send(&n).await?;
            std::future::pending::<()>().await;
            Ok::<_, RpcError>(())
        })
        .unwrap()
        .client_streaming(TOTAL, |mut rx: Rx<u32>| async move {
            let mut total = 0u64;
            while let Some(n) = rx.recv().await.into_result()? {
                total += u64::from(n);
            }
            Ok::<_, RpcError>(total)
        })
        .unwrap()
        .bidi(ECHO, |mut rx: Rx<String>, mut tx: Tx<String>| async move {
            while let Some(s) = rx.recv().await.into_result()? {
                tx.send(&format!("echo {s}")).await?;
            }
            Ok::<_, RpcError>(())
        })
        .unwrap()
        .server_streaming(FLOOD, |n: u32, mut tx: Tx<u32>| async move {
            for i in 0..n {
                tx.send(&i).await?;
            }
            Ok::<_, RpcError>(())
        })
        .unwrap()
        .client_streaming(IGNORE, |_rx: Rx<u32>| async move {
            std::future::pending::<()>().await;
            Ok::<_, RpcError>(0)
        })
        .unwrap();
    router
}

async fn connect_with(
    router: Router,
    client_config: SessionConfig,
) -> (SessionHandle, SessionHandle) {
    let (a, b) = memory_link_pair(64);
    let router = Arc::new(router);
    let server = tokio::spawn(async move {
        let (handle, driver) = accept(b, SessionConfig::default(), Some(router))
            .await
            .unwrap();
        tokio::spawn(driver.run());
        handle
    });
    let (client, driver) = initiate(a, client_config, None).await.unwrap();
    tokio::spawn(driver.run());
    (client, server.await.unwrap())
}

async fn connect() -> (SessionHandle, SessionHandle) {
    connect_with(numbers(), SessionConfig::default()).await
}

async fn wait_until_idle(session: &SessionHandle) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while session.open_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("streams were never released");
}

// ============================================================================
// Unary
// ============================================================================

#[tokio::test]
async fn unary_round_trip() {
    let (client, server) = connect().await;
    assert_eq!(client.unary(&DOUBLE, &21).await.unwrap(), 42);
    assert_eq!(client.open_streams(), 0);
    wait_until_idle(&server).await;
}

#[tokio::test]
async fn unary_handler_error_reaches_caller() {
    let (client, _server) = connect().await;
    let err = client.unary(&DOUBLE, &u32::MAX).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::OutOfRange);
    assert!(err.message.contains("too large"));
}

#[tokio::test]
async fn handler_panic_fails_only_its_stream() {
    let (client, _server) = connect().await;
    let err = client.unary(&DOUBLE, &0).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);

    assert_eq!(client.unary(&DOUBLE, &5).await.unwrap(), 10);
}

#[tokio::test]
async fn concurrent_streams_share_one_session() {
    let (client, _server) = connect().await;
    let calls = (1..=20u32).map(|n| {
        let client = client.clone();
        async move { client.unary(&DOUBLE, &n).await }
    });
    let results = futures::future::join_all(calls).await;
    for (n, result) in (1..=20u32).zip(results) {
        assert_eq!(result.unwrap(), n * 2);
    }
    assert_eq!(client.open_streams(), 0);
}

// ============================================================================
// Server streaming
// ============================================================================

#[tokio::test]
async fn server_stream_yields_in_order_then_ends() {
    let (client, _server) = connect().await;
    let call = client.server_streaming(&COUNT, &5).await.unwrap();
    assert_eq!(call.collect().await.unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn server_stream_may_be_empty() {
    let (client, _server) = connect().await;
    let mut call = client.server_streaming(&COUNT, &0).await.unwrap();
    assert_eq!(call.recv().await, Item::EndOfStream);
    assert_eq!(call.recv().await, Item::EndOfStream);
}

#[tokio::test]
async fn server_stream_failure_ends_sequence_early() {
    let (client, _server) = connect().await;
    let mut call = client.server_streaming(&COUNT, &50).await.unwrap();
    assert_eq!(call.recv().await, Item::Message(0));
    assert_eq!(call.recv().await, Item::Message(1));
    assert_eq!(call.recv().await, Item::Message(2));
    match call.recv().await {
        Item::Failure(e) => assert_eq!(e.code, ErrorCode::OutOfRange),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(call.recv().await.is_terminal());
}

#[tokio::test]
async fn server_stream_as_stream() {
    let (client, _server) = connect().await;
    let call = client.server_streaming(&COUNT, &3).await.unwrap();
    let items: Vec<_> = call.into_stream().collect().await;
    assert_eq!(items, vec![Ok(0), Ok(1), Ok(2)]);
}

#[tokio::test]
async fn unread_stream_does_not_stall_the_session() {
    let config = SessionConfig::default().with_channel_buffer(4);
    let (client, _server) = connect_with(numbers(), config).await;

    let flood = client.server_streaming(&FLOOD, &500).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let doubled = tokio::time::timeout(Duration::from_secs(1), client.unary(&DOUBLE, &21))
        .await
        .expect("unary call starved by an unread stream");
    assert_eq!(doubled.unwrap(), 42);

    // Nothing was lost while the stream was held back.
    let all = flood.collect().await.unwrap();
    assert_eq!(all, (0..500).collect::<Vec<_>>());
}

#[tokio::test]
async fn slow_reader_holds_back_only_its_own_stream() {
    let config = SessionConfig::default().with_channel_buffer(2);
    let (client, _server) = connect_with(numbers(), config).await;

    let mut slow = client.server_streaming(&FLOOD, &20).await.unwrap();
    let fast = client.server_streaming(&FLOOD, &20).await.unwrap();

    assert_eq!(slow.recv().await, Item::Message(0));
    assert_eq!(fast.collect().await.unwrap(), (0..20).collect::<Vec<_>>());
    for i in 1..20 {
        assert_eq!(slow.recv().await, Item::Message(i));
    }
    assert_eq!(slow.recv().await, Item::EndOfStream);
}

// ============================================================================
// Client streaming
// ============================================================================

#[tokio::test]
async fn client_stream_accumulates_until_close() {
    let (client, _server) = connect().await;
    let mut call = client.client_streaming(&TOTAL).await.unwrap();
    for n in 1..=4 {
        call.send(&n).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(call.close_and_recv().await.unwrap(), 10);
}

#[tokio::test]
async fn client_stream_with_no_requests() {
    let (client, _server) = connect().await;
    let call = client.client_streaming(&TOTAL).await.unwrap();
    assert_eq!(call.close_and_recv().await.unwrap(), 0);
}

#[tokio::test]
async fn accumulators_do_not_leak_between_streams() {
    let (client, server) = connect().await;

    let mut first = client.client_streaming(&TOTAL).await.unwrap();
    first.send(&100).await.unwrap();
    first.cancel_handle().cancel();
    drop(first);

    let mut second = client.client_streaming(&TOTAL).await.unwrap();
    second.send(&7).await.unwrap();
    assert_eq!(second.close_and_recv().await.unwrap(), 7);

    assert_eq!(client.open_streams(), 0);
    wait_until_idle(&server).await;
}

// ============================================================================
// Bidirectional
// ============================================================================

#[tokio::test]
async fn bidi_echoes_every_request() {
    let (client, _server) = connect().await;
    let call = client.bidi(&ECHO).await.unwrap();
    let names: Vec<String> = ["ada", "grace", "barbara", "frances"]
        .into_iter()
        .map(String::from)
        .collect();

    let mut responses = Vec::new();
    call.run(futures::stream::iter(names), |r| responses.push(r))
        .await
        .unwrap();

    assert_eq!(
        responses,
        vec!["echo ada", "echo grace", "echo barbara", "echo frances"]
    );
    assert_eq!(client.open_streams(), 0);
}

#[tokio::test]
async fn bidi_with_paced_requests() {
    let (client, _server) = connect().await;
    let call = client.bidi(&ECHO).await.unwrap();
    let requests = futures::stream::iter(0..5).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(3)).await;
        format!("#{i}")
    });

    let mut count = 0;
    call.run(requests, |_| count += 1).await.unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn bidi_split_halves_on_separate_tasks() {
    let (client, _server) = connect().await;
    let (mut tx, mut rx) = client.bidi(&ECHO).await.unwrap().split();

    let sender = tokio::spawn(async move {
        for word in ["x", "y"] {
            tx.send(&word.to_string()).await?;
        }
        tx.close().await
    });

    assert_eq!(rx.recv().await, Item::Message("echo x".to_string()));
    assert_eq!(rx.recv().await, Item::Message("echo y".to_string()));
    assert_eq!(rx.recv().await, Item::EndOfStream);
    sender.await.unwrap().unwrap();
}

#[tokio::test]
async fn bidi_run_reports_a_request_that_could_not_be_sent() {
    let config = SessionConfig::default().with_max_payload_size(64);
    let (client, server) = connect_with(numbers(), config).await;
    let call = client.bidi(&ECHO).await.unwrap();
    let requests = vec!["a".to_string(), "x".repeat(1000), "c".to_string()];

    let mut responses = Vec::new();
    let err = call
        .run(futures::stream::iter(requests), |r| responses.push(r))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
    assert!(responses.len() <= 1, "got {responses:?}");
    assert!(!responses.contains(&"echo c".to_string()));

    assert_eq!(client.open_streams(), 0);
    wait_until_idle(&server).await;
    assert_eq!(client.unary(&DOUBLE, &4).await.unwrap(), 8);
}

// ============================================================================
// Cancellation and failures
// ============================================================================

#[tokio::test]
async fn cancel_unblocks_a_pending_recv() {
    let (client, server) = connect().await;
    let mut call = client.server_streaming(&HANG, &7).await.unwrap();
    assert_eq!(call.recv().await, Item::Message(7));

    let cancel = call.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let item = tokio::time::timeout(Duration::from_secs(1), call.recv())
        .await
        .expect("recv stayed blocked after cancel");
    match item {
        Item::Failure(e) => assert!(e.is_cancelled()),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(call.cancel_handle().is_finished());
    wait_until_idle(&server).await;
}

#[tokio::test]
async fn cancel_unblocks_a_pending_send() {
    let config = SessionConfig::default().with_channel_buffer(2);
    let (client, server) = connect_with(numbers(), config).await;
    let mut call = client.client_streaming(&IGNORE).await.unwrap();

    // The responder never reads, so the third send waits for credit.
    call.send(&1).await.unwrap();
    call.send(&2).await.unwrap();

    let cancel = call.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let sent = tokio::time::timeout(Duration::from_secs(1), call.send(&3))
        .await
        .expect("send stayed blocked after cancel");
    assert!(sent.unwrap_err().is_cancelled());
    assert_eq!(client.open_streams(), 0);
    wait_until_idle(&server).await;
}

#[tokio::test]
async fn dropping_a_call_cancels_it() {
    let (client, server) = connect().await;
    let mut call = client.server_streaming(&HANG, &1).await.unwrap();
    assert_eq!(call.recv().await, Item::Message(1));
    drop(call);

    assert_eq!(client.open_streams(), 0);
    wait_until_idle(&server).await;
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let (client, _server) = connect().await;
    let err = client.unary(&MISSING, &1).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(err.message.contains("test.Numbers/Missing"));
}

#[tokio::test]
async fn shape_mismatch_is_unimplemented() {
    let (client, _server) = connect().await;
    let mut call = client
        .server_streaming(&DOUBLE_AS_STREAM, &1)
        .await
        .unwrap();
    match call.recv().await {
        Item::Failure(e) => assert_eq!(e.code, ErrorCode::Unimplemented),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn oversize_message_is_refused_before_sending() {
    let config = SessionConfig::default().with_max_payload_size(16);
    let (client, server) = connect_with(numbers(), config).await;
    assert_eq!(client.max_payload_size(), 16);
    assert_eq!(server.max_payload_size(), 16);

    let err = client.unary(&SHOUT, &"a".repeat(100)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    assert_eq!(client.unary(&SHOUT, &"hi".to_string()).await.unwrap(), "HI");
}

#[tokio::test]
async fn closing_the_session_fails_open_streams() {
    let (client, server) = connect().await;
    let mut call = client.server_streaming(&HANG, &3).await.unwrap();
    assert_eq!(call.recv().await, Item::Message(3));

    client.close("test over");

    match call.recv().await {
        Item::Failure(e) => assert_eq!(e.code, ErrorCode::Unavailable),
        other => panic!("expected failure, got {other:?}"),
    }
    let err = client.unary(&DOUBLE, &1).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unavailable);
    wait_until_idle(&server).await;
}

#[test]
fn operations_register_once() {
    let mut router = numbers();
    assert!(router.unary(DOUBLE, |n: u32| async move { Ok::<_, RpcError>(n) }).is_err());
    assert_eq!(router.shape_of("test.Numbers/Echo"), Some(ferry_types::Shape::Bidirectional));
    assert_eq!(router.operations().len(), 8);
}
