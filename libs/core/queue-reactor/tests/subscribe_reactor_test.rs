//! Subscribe and reply reactors against a scripted adapter.

use queue_reactor::{
    Handler, HandlerSet, HealthCheckingService, ProcessingMode, QueueConfig, Reactor,
    ReactorConfig, ReactorError, ReactorKind, ReactorParts, ReactorState, SubscribeReactor,
};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{
    AsyncRecordingHandler, EchoReplyHandler, Outcome, RecordingHandler, ScriptedAdapter,
    ShoutingReplyHandler, TestDataBuilder, wait_until,
};

const WAIT: Duration = Duration::from_secs(3);
const RECONNECT: Duration = Duration::from_millis(50);

fn config() -> ReactorConfig {
    ReactorConfig::default()
        .with_reconnect_timeout(RECONNECT)
        .with_stop_timeout(Duration::from_secs(1))
}

fn adapter(builder: &TestDataBuilder, mode: ProcessingMode) -> ScriptedAdapter {
    ScriptedAdapter::new(QueueConfig::new(builder.queue_id("events")).with_processing_mode(mode))
        .subscribable()
}

fn parts(adapter: ScriptedAdapter, handlers: Vec<Handler>) -> ReactorParts {
    ReactorParts::new(Box::new(adapter), HandlerSet::new(handlers)).with_config(config())
}

#[tokio::test]
async fn test_subscribe_retries_until_handshake_succeeds() {
    let builder = TestDataBuilder::from_test_name("test_subscribe_retries_until_handshake_succeeds");
    let adapter = adapter(&builder, ProcessingMode::Subscribe).with_subscribe_failures([
        ReactorError::timeout("subscribe"),
        ReactorError::timeout("subscribe"),
        ReactorError::timeout("subscribe"),
    ]);
    let monitor = adapter.monitor();

    let reactor = SubscribeReactor::new(parts(adapter, Vec::new())).unwrap();
    assert!(reactor.start_processing().await);

    let attempts = monitor.subscribe_attempts();
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= RECONNECT - Duration::from_millis(5));
    }
    assert!(monitor.is_subscribed());
    assert_eq!(reactor.error_count(), 0);
    assert_eq!(reactor.state(), ReactorState::Listening);
    assert_eq!(reactor.kind(), ReactorKind::Subscribe);

    reactor.stop().await;
    assert!(!monitor.is_subscribed());
    assert!(!monitor.is_connected());
}

#[tokio::test]
async fn test_non_retryable_subscribe_failure() {
    let builder = TestDataBuilder::from_test_name("test_non_retryable_subscribe_failure");
    let adapter = adapter(&builder, ProcessingMode::Subscribe)
        .with_subscribe_failures([ReactorError::Authentication("denied".to_string())]);
    let monitor = adapter.monitor();

    let reactor = SubscribeReactor::new(parts(adapter, Vec::new())).unwrap();
    assert!(!reactor.start_processing().await);
    assert_eq!(reactor.state(), ReactorState::Stopped);
    assert_eq!(monitor.subscribe_attempts().len(), 1);
    assert!(!monitor.is_connected());
}

#[tokio::test]
async fn test_stop_cancels_pending_start() {
    let builder = TestDataBuilder::from_test_name("test_stop_cancels_pending_start");
    let adapter = adapter(&builder, ProcessingMode::Subscribe)
        .with_subscribe_failures((0..100).map(|_| ReactorError::timeout("subscribe")));

    let reactor = Arc::new(
        SubscribeReactor::new(
            parts(adapter, Vec::new())
                .with_config(config().with_reconnect_timeout(Duration::from_secs(30))),
        )
        .unwrap(),
    );

    let starting = tokio::spawn({
        let reactor = reactor.clone();
        async move { reactor.start_processing().await }
    });
    assert!(wait_until(WAIT, || reactor.state() == ReactorState::Backoff).await);

    tokio::time::timeout(WAIT, reactor.stop())
        .await
        .expect("stop returns while start is retrying");
    assert!(!starting.await.unwrap());
    assert_eq!(reactor.state(), ReactorState::Stopped);
}

#[tokio::test]
async fn test_deliveries_reach_handlers() {
    let builder = TestDataBuilder::from_test_name("test_deliveries_reach_handlers");
    let adapter = adapter(&builder, ProcessingMode::Subscribe);
    let monitor = adapter.monitor();
    let declining = Arc::new(AsyncRecordingHandler::<()>::declining());
    let claiming = Arc::new(RecordingHandler::<()>::claiming());

    let reactor = SubscribeReactor::new(parts(
        adapter,
        vec![
            Handler::from_sync(claiming.clone()),
            Handler::from_async(declining.clone()),
        ],
    ))
    .unwrap();
    assert!(reactor.start_processing().await);

    monitor.deliver(builder.message(1)).await.unwrap();
    assert_eq!(declining.calls(), 1);
    assert_eq!(claiming.calls(), 1);

    reactor.stop().await;
}

#[tokio::test]
async fn test_handler_failures_stay_inside_reactor() {
    let builder = TestDataBuilder::from_test_name("test_handler_failures_stay_inside_reactor");
    let adapter = adapter(&builder, ProcessingMode::Subscribe);
    let monitor = adapter.monitor();
    let handler = Arc::new(
        RecordingHandler::<()>::claiming()
            .with_outcomes([Outcome::Fail(ReactorError::handler("bad event")), Outcome::Panic]),
    );

    let reactor =
        SubscribeReactor::new(parts(adapter, vec![Handler::from_sync(handler.clone())])).unwrap();
    assert!(reactor.start_processing().await);

    assert!(monitor.deliver(builder.message(1)).await.is_ok());
    assert!(monitor.deliver(builder.message(2)).await.is_ok());
    assert!(monitor.deliver(builder.message(3)).await.is_ok());
    assert_eq!(handler.calls(), 3);
    assert_eq!(reactor.state(), ReactorState::Listening);

    reactor.stop().await;
}

#[tokio::test]
async fn test_concurrent_deliveries_are_serialized() {
    let builder = TestDataBuilder::from_test_name("test_concurrent_deliveries_are_serialized");
    let adapter = adapter(&builder, ProcessingMode::Subscribe);
    let monitor = adapter.monitor();
    let handler =
        Arc::new(AsyncRecordingHandler::<()>::claiming().with_delay(Duration::from_millis(10)));

    let reactor =
        SubscribeReactor::new(parts(adapter, vec![Handler::from_async(handler.clone())])).unwrap();
    assert!(reactor.start_processing().await);

    let (a, b, c, d) = tokio::join!(
        monitor.deliver(builder.message(1)),
        monitor.deliver(builder.message(2)),
        monitor.deliver(builder.message(3)),
        monitor.deliver(builder.message(4)),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
    assert_eq!(handler.calls(), 4);
    assert_eq!(handler.max_concurrency(), 1);

    reactor.stop().await;
}

#[tokio::test]
async fn test_deliveries_after_stop_are_ignored() {
    let builder = TestDataBuilder::from_test_name("test_deliveries_after_stop_are_ignored");
    let adapter = adapter(&builder, ProcessingMode::Subscribe);
    let handler = Arc::new(RecordingHandler::<()>::claiming());

    let reactor =
        SubscribeReactor::new(parts(adapter, vec![Handler::from_sync(handler.clone())])).unwrap();
    assert!(reactor.start_processing().await);
    reactor.stop().await;

    assert!(reactor.on_message(builder.message(1)).await.is_ok());
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_health_check_resubscribes_after_disconnect() {
    let builder = TestDataBuilder::from_test_name("test_health_check_resubscribes_after_disconnect");
    let adapter = adapter(&builder, ProcessingMode::Subscribe);
    let monitor = adapter.monitor();

    let reactor = SubscribeReactor::new(parts(adapter, Vec::new())).unwrap();
    let mut reconnects = reactor.need_reconnect();
    assert!(reactor.start_processing().await);
    assert_eq!(monitor.subscribe_attempts().len(), 1);

    monitor.drop_connection();

    let event = tokio::time::timeout(WAIT, reconnects.recv())
        .await
        .expect("need-reconnect event")
        .unwrap();
    assert_eq!(event.error_count, 1);
    assert_eq!(event.delay, RECONNECT);

    assert!(wait_until(WAIT, || monitor.subscribe_attempts().len() == 2).await);
    assert!(wait_until(WAIT, || reactor.error_count() == 0).await);
    assert!(monitor.is_connected());
    assert_eq!(reactor.state(), ReactorState::Listening);

    reactor.dispose().await;
    assert_eq!(reactor.state(), ReactorState::Disposed);
    assert_eq!(monitor.disposes(), 1);
}

#[tokio::test]
async fn test_failing_diagnostics_delay_handshake() {
    let builder = TestDataBuilder::from_test_name("test_failing_diagnostics_delay_handshake");
    let health = Arc::new(HealthCheckingService::new());
    health.report_failed();

    let adapter = ScriptedAdapter::new(
        QueueConfig::new(builder.queue_id("events"))
            .with_processing_mode(ProcessingMode::Subscribe)
            .with_health_dependent(true),
    )
    .subscribable();
    let monitor = adapter.monitor();

    let reactor = Arc::new(
        SubscribeReactor::new(parts(adapter, Vec::new()).with_health(health.clone())).unwrap(),
    );
    let starting = tokio::spawn({
        let reactor = reactor.clone();
        async move { reactor.start_processing().await }
    });

    tokio::time::sleep(RECONNECT * 3).await;
    assert!(monitor.subscribe_attempts().is_empty());
    assert_eq!(reactor.state(), ReactorState::Backoff);

    health.report_passed();
    assert!(starting.await.unwrap());
    assert!(monitor.is_subscribed());

    reactor.stop().await;
}

#[tokio::test]
async fn test_reply_reaches_requester() {
    let builder = TestDataBuilder::from_test_name("test_reply_reaches_requester");
    let adapter = adapter(&builder, ProcessingMode::SubscribeAndReply).repliable();
    let monitor = adapter.monitor();
    let handler = Arc::new(EchoReplyHandler::<()>::claiming());

    let reactor = SubscribeReactor::with_reply(parts(
        adapter,
        vec![Handler::from_sync_reply(handler.clone())],
    ))
    .unwrap();
    assert_eq!(reactor.kind(), ReactorKind::SubscribeAndReply);
    assert!(reactor.start_processing().await);

    let request = builder.request(1, "replies.events");
    monitor.deliver(request.clone()).await.unwrap();

    let replies = monitor.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].body, request.body);
    assert_eq!(replies[0].reply_to.as_deref(), Some("replies.events"));
    assert_eq!(replies[0].correlation_id, request.correlation_id);

    reactor.stop().await;
}

#[tokio::test]
async fn test_async_reply_handler() {
    let builder = TestDataBuilder::from_test_name("test_async_reply_handler");
    let adapter = adapter(&builder, ProcessingMode::SubscribeAndReply).repliable();
    let monitor = adapter.monitor();
    let handler = Arc::new(ShoutingReplyHandler::<()>::claiming());

    let reactor = SubscribeReactor::with_reply(parts(
        adapter,
        vec![Handler::from_async_reply(handler.clone())],
    ))
    .unwrap();
    assert!(reactor.start_processing().await);

    let request = builder.request(1, "replies.events");
    monitor.deliver(request.clone()).await.unwrap();

    let replies = monitor.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].text().unwrap(), "PAYLOAD-1");
    assert_eq!(handler.calls(), 1);

    reactor.stop().await;
}

#[tokio::test]
async fn test_reply_failure_is_surfaced() {
    let builder = TestDataBuilder::from_test_name("test_reply_failure_is_surfaced");
    let adapter = adapter(&builder, ProcessingMode::SubscribeAndReply)
        .repliable()
        .with_reply_failures([ReactorError::connection("reply channel closed")]);
    let monitor = adapter.monitor();
    let handler = Arc::new(EchoReplyHandler::<()>::claiming());

    let reactor = SubscribeReactor::with_reply(parts(
        adapter,
        vec![Handler::from_sync_reply(handler.clone())],
    ))
    .unwrap();
    assert!(reactor.start_processing().await);

    let err = monitor
        .deliver(builder.request(1, "replies.events"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReactorError::Reply(_)));
    assert!(err.to_string().contains("reply channel closed"));

    // A request without a reply destination cannot be answered.
    let err = monitor.deliver(builder.message(2)).await.unwrap_err();
    assert!(matches!(err, ReactorError::Reply(_)));

    assert!(monitor.deliver(builder.request(3, "replies.events")).await.is_ok());
    assert_eq!(monitor.replies().len(), 1);

    reactor.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_reply() {
    let builder = TestDataBuilder::from_test_name("test_stop_waits_for_in_flight_reply");
    let adapter = adapter(&builder, ProcessingMode::SubscribeAndReply)
        .repliable()
        .draining_unsubscribe();
    let monitor = adapter.monitor();
    let handler =
        Arc::new(ShoutingReplyHandler::<()>::claiming().with_delay(Duration::from_millis(100)));

    let reactor = SubscribeReactor::with_reply(parts(
        adapter,
        vec![Handler::from_async_reply(handler.clone())],
    ))
    .unwrap();
    assert!(reactor.start_processing().await);

    let delivery = tokio::spawn({
        let monitor = monitor.clone();
        let request = builder.request(1, "replies.events");
        async move { monitor.deliver(request).await }
    });
    assert!(wait_until(WAIT, || handler.calls() == 1).await);

    tokio::time::timeout(WAIT, reactor.stop())
        .await
        .expect("stop returns once the in-flight reply went out");
    assert!(delivery.await.unwrap().is_ok());
    assert_eq!(monitor.replies().len(), 1);
    assert_eq!(monitor.replies()[0].text().unwrap(), "PAYLOAD-1");
    assert_eq!(monitor.unsubscribes(), 1);
    assert_eq!(reactor.state(), ReactorState::Stopped);
}

#[tokio::test]
async fn test_prefetched_requests_are_answered_during_subscribe() {
    let builder =
        TestDataBuilder::from_test_name("test_prefetched_requests_are_answered_during_subscribe");
    let adapter = adapter(&builder, ProcessingMode::SubscribeAndReply)
        .repliable()
        .with_prefetched([
            builder.request(1, "replies.events"),
            builder.request(2, "replies.events"),
        ]);
    let monitor = adapter.monitor();
    let handler = Arc::new(EchoReplyHandler::<()>::claiming());

    let reactor = SubscribeReactor::with_reply(parts(
        adapter,
        vec![Handler::from_sync_reply(handler.clone())],
    ))
    .unwrap();

    let started = tokio::time::timeout(WAIT, reactor.start_processing())
        .await
        .expect("handshake completes while the adapter flushes its prefetch");
    assert!(started);
    assert_eq!(handler.calls(), 2);
    assert_eq!(monitor.replies().len(), 2);

    reactor.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_start_waiting_behind_another() {
    let builder = TestDataBuilder::from_test_name("test_stop_cancels_start_waiting_behind_another");
    let adapter = adapter(&builder, ProcessingMode::Subscribe)
        .with_subscribe_failures((0..100).map(|_| ReactorError::timeout("subscribe")));
    let monitor = adapter.monitor();

    let reactor = Arc::new(
        SubscribeReactor::new(
            parts(adapter, Vec::new())
                .with_config(config().with_reconnect_timeout(Duration::from_secs(30))),
        )
        .unwrap(),
    );

    let first = tokio::spawn({
        let reactor = reactor.clone();
        async move { reactor.start_processing().await }
    });
    assert!(wait_until(WAIT, || reactor.state() == ReactorState::Backoff).await);

    let second = tokio::spawn({
        let reactor = reactor.clone();
        async move { reactor.start_processing().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(WAIT, reactor.stop())
        .await
        .expect("stop cancels the running start and the queued one");
    assert!(!first.await.unwrap());
    assert!(!second.await.unwrap());
    assert_eq!(monitor.subscribe_attempts().len(), 1);
    assert_eq!(reactor.state(), ReactorState::Stopped);
}

#[tokio::test]
async fn test_reply_requires_capability() {
    let builder = TestDataBuilder::from_test_name("test_reply_requires_capability");
    let adapter = adapter(&builder, ProcessingMode::SubscribeAndReply);

    let err = SubscribeReactor::with_reply(parts(adapter, Vec::new()))
        .err()
        .unwrap();
    assert!(matches!(err, ReactorError::Unsupported(_)));
}
