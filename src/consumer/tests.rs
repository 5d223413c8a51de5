use super::*;
use crate::bus::{BrokerProducer, ChannelBroker, MockConsumer, OutboundRecord};
use crate::message::Message;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

/// Handler that records every envelope it sees and fails its first calls.
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<Message>>,
    failures_left: AtomicUsize,
}

impl RecordingHandler {
    fn failing() -> Self {
        Self::failing_times(usize::MAX)
    }

    fn failing_times(count: usize) -> Self {
        let handler = Self::default();
        handler.failures_left.store(count, Ordering::SeqCst);
        handler
    }

    fn seen(&self) -> Vec<Message> {
        self.seen.lock().unwrap().clone()
    }
}

impl EnvelopeHandler<Message> for RecordingHandler {
    fn handle(&self, envelope: Arc<Envelope<Message>>) -> BoxFuture<'static, Result<(), HandlerError>> {
        self.seen.lock().unwrap().push(envelope.payload().clone());
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        Box::pin(async move {
            if fail {
                Err(HandlerError::Other("handler refused".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

fn inbound(offset: i64, payload: Vec<u8>) -> InboundRecord {
    InboundRecord {
        topic: "events-to-process".to_string(),
        partition: 0,
        offset,
        key: None,
        payload,
    }
}

fn encoded(message: &Message) -> Vec<u8> {
    Envelope::wrap(message.clone()).to_bytes().unwrap()
}

async fn publish(broker: &ChannelBroker, message: &Message) {
    broker
        .producer()
        .send(OutboundRecord {
            topic: "events-to-process".to_string(),
            key: message.id.clone(),
            payload: encoded(message),
        })
        .await
        .unwrap();
}

/// Run `consume_loop` until `done` holds, then cancel and join it.
async fn run_until(
    consume_loop: ConsumeLoop<Message>,
    done: impl Fn(&ConsumeStats) -> bool,
) -> Arc<ConsumeStats> {
    let stats = consume_loop.stats();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(consume_loop.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(2), async {
        while !done(&stats) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consume loop did not reach the expected state");

    cancel.cancel();
    task.await.unwrap();
    stats
}

#[tokio::test]
async fn test_success_commits_record() {
    let broker = ChannelBroker::new();
    let message = Message::new("user-1", "hello");
    publish(&broker, &message).await;

    let handler = Arc::new(RecordingHandler::default());
    let consume_loop = ConsumeLoop::<Message>::new(
        "test",
        Box::new(broker.consumer("events-to-process", "group")),
        handler.clone(),
    );

    let stats = run_until(consume_loop, |s| s.processed() == 1).await;

    assert_eq!(stats.processed(), 1);
    assert_eq!(handler.seen(), vec![message]);
    assert_eq!(broker.committed_offset("events-to-process", "group"), Some(1));
}

#[tokio::test]
async fn test_handler_failure_leaves_record_for_redelivery() {
    let broker = ChannelBroker::new();
    let message = Message::new("user-1", "retry me");
    publish(&broker, &message).await;

    let failing = Arc::new(RecordingHandler::failing());
    let first = ConsumeLoop::<Message>::new(
        "failing",
        Box::new(broker.consumer("events-to-process", "group")),
        failing.clone(),
    )
    .with_retry_backoff(Duration::from_secs(60));
    let stats = run_until(first, |s| s.handler_failures() == 1).await;

    assert_eq!(stats.processed(), 0);
    assert_eq!(broker.committed_offset("events-to-process", "group"), None);

    let healthy = Arc::new(RecordingHandler::default());
    let second = ConsumeLoop::<Message>::new(
        "healthy",
        Box::new(broker.consumer("events-to-process", "group")),
        healthy.clone(),
    );
    run_until(second, |s| s.processed() == 1).await;

    assert_eq!(failing.seen(), vec![message.clone()]);
    assert_eq!(healthy.seen(), vec![message]);
    assert_eq!(broker.committed_offset("events-to-process", "group"), Some(1));
}

#[tokio::test]
async fn test_failed_record_is_retried_before_later_records() {
    let broker = ChannelBroker::new();
    let first = Message::new("user-1", "fails once");
    let second = Message::new("user-2", "after the failure");
    publish(&broker, &first).await;
    publish(&broker, &second).await;

    let handler = Arc::new(RecordingHandler::failing_times(1));
    let consume_loop = ConsumeLoop::<Message>::new(
        "test",
        Box::new(broker.consumer("events-to-process", "group")),
        handler.clone(),
    )
    .with_retry_backoff(Duration::from_millis(10));

    let stats = run_until(consume_loop, |s| s.processed() == 2).await;

    assert_eq!(stats.handler_failures(), 1);
    assert_eq!(handler.seen(), vec![first.clone(), first, second]);
    assert_eq!(broker.committed_offset("events-to-process", "group"), Some(2));
}

#[tokio::test]
async fn test_failed_record_holds_back_commit_position() {
    let broker = ChannelBroker::new();
    let first = Message::new("user-1", "fails");
    let second = Message::new("user-2", "queued behind it");
    publish(&broker, &first).await;
    publish(&broker, &second).await;

    let failing = Arc::new(RecordingHandler::failing_times(1));
    let consume_loop = ConsumeLoop::<Message>::new(
        "failing",
        Box::new(broker.consumer("events-to-process", "group")),
        failing.clone(),
    )
    .with_retry_backoff(Duration::from_secs(60));
    let stats = consume_loop.stats();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(consume_loop.run(cancel.clone()));

    while stats.handler_failures() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Still waiting to retry the first record; the second was never handled.
    assert_eq!(failing.seen(), vec![first.clone()]);
    assert_eq!(broker.committed_offset("events-to-process", "group"), None);

    cancel.cancel();
    task.await.unwrap();

    let healthy = Arc::new(RecordingHandler::default());
    let next = ConsumeLoop::<Message>::new(
        "healthy",
        Box::new(broker.consumer("events-to-process", "group")),
        healthy.clone(),
    );
    run_until(next, |s| s.processed() == 2).await;

    assert_eq!(healthy.seen(), vec![first, second]);
    assert_eq!(broker.committed_offset("events-to-process", "group"), Some(2));
}

#[tokio::test]
async fn test_failed_record_is_rewound_and_committed_in_order() {
    let first = Message::new("user-1", "fails once");
    let second = Message::new("user-2", "after the failure");
    let consumer = MockConsumer::new(vec![
        Ok(inbound(0, encoded(&first))),
        Ok(inbound(1, encoded(&second))),
    ]);
    let commits = consumer.commits();
    let rewinds = consumer.rewinds();
    let handler = Arc::new(RecordingHandler::failing_times(1));

    let stats = run_until(
        ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone())
            .with_retry_backoff(Duration::from_millis(10)),
        |s| s.processed() == 2,
    )
    .await;

    assert_eq!(stats.handler_failures(), 1);
    assert_eq!(*rewinds.lock().unwrap(), vec![0]);
    assert_eq!(*commits.lock().unwrap(), vec![0, 1]);
    assert_eq!(handler.seen(), vec![first.clone(), first, second]);
}

#[tokio::test]
async fn test_failed_rewind_is_retried_before_fetching_on() {
    let first = Message::new("user-1", "fails once");
    let second = Message::new("user-2", "after the failure");
    let consumer = MockConsumer::new(vec![
        Ok(inbound(0, encoded(&first))),
        Ok(inbound(1, encoded(&second))),
    ])
    .with_failing_rewinds(2);
    let commits = consumer.commits();
    let handler = Arc::new(RecordingHandler::failing_times(1));

    run_until(
        ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone())
            .with_retry_backoff(Duration::from_millis(5)),
        |s| s.processed() == 2,
    )
    .await;

    assert_eq!(*commits.lock().unwrap(), vec![0, 1]);
    assert_eq!(handler.seen(), vec![first.clone(), first, second]);
}

#[tokio::test]
async fn test_cancel_during_retry_wait_stops_loop() {
    let message = Message::new("user-1", "always fails");
    let consumer = MockConsumer::new(vec![Ok(inbound(0, encoded(&message)))]);
    let commits = consumer.commits();
    let consume_loop = ConsumeLoop::<Message>::new(
        "test",
        Box::new(consumer),
        Arc::new(RecordingHandler::failing()) as Arc<dyn EnvelopeHandler<Message>>,
    )
    .with_retry_backoff(Duration::from_secs(60));
    let stats = consume_loop.stats();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(consume_loop.run(cancel.clone()));
    while stats.handler_failures() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop should stop without waiting out the retry backoff")
        .unwrap();
    assert!(commits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_poison_record_is_committed_once_and_skipped() {
    let broker = ChannelBroker::new();
    broker.append_raw("events-to-process", "junk", b"not json".to_vec());
    let message = Message::new("user-2", "after poison");
    publish(&broker, &message).await;

    let handler = Arc::new(RecordingHandler::default());
    let consumer = broker.consumer("events-to-process", "group");
    let consume_loop = ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone());

    let stats = run_until(consume_loop, |s| s.processed() == 1).await;

    assert_eq!(stats.poison(), 1);
    assert_eq!(handler.seen(), vec![message]);
    assert_eq!(broker.committed_offset("events-to-process", "group"), Some(2));
}

#[tokio::test]
async fn test_payload_mismatch_is_poison() {
    let payload = br#"{"id":"e1","event_type":"message","timestamp":"2026-01-01T00:00:00Z","version":"1.0","data":{"unexpected":true}}"#;
    let consumer = MockConsumer::new(vec![Ok(inbound(7, payload.to_vec()))]);
    let commits = consumer.commits();
    let handler = Arc::new(RecordingHandler::default());

    let stats = run_until(
        ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone()),
        |s| s.poison() == 1,
    )
    .await;

    assert_eq!(stats.processed(), 0);
    assert!(handler.seen().is_empty());
    assert_eq!(*commits.lock().unwrap(), vec![7]);
}

#[tokio::test]
async fn test_foreign_kind_is_poison() {
    let message = Message::new("user-1", "wrong tag");
    let payload = serde_json::json!({
        "id": "e2",
        "event_type": "notice",
        "timestamp": "2026-01-01T00:00:00Z",
        "version": "1.0",
        "data": message,
    });
    let consumer = MockConsumer::new(vec![Ok(inbound(3, payload.to_string().into_bytes()))]);
    let commits = consumer.commits();
    let handler = Arc::new(RecordingHandler::default());

    let stats = run_until(
        ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone()),
        |s| s.poison() == 1,
    )
    .await;

    assert_eq!(stats.processed(), 0);
    assert!(handler.seen().is_empty());
    assert_eq!(*commits.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn test_fetch_error_is_retried_immediately() {
    let message = Message::new("user-1", "after error");
    let consumer = MockConsumer::new(vec![
        Err(BusError::Fetch("broker hiccup".to_string())),
        Ok(inbound(0, encoded(&message))),
    ]);
    let commits = consumer.commits();
    let handler = Arc::new(RecordingHandler::default());

    let stats = run_until(
        ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone())
            // A long backoff would time the test out if applied to plain fetch errors.
            .with_coordinator_backoff(Duration::from_secs(60)),
        |s| s.processed() == 1,
    )
    .await;

    assert_eq!(stats.fetch_errors(), 1);
    assert_eq!(*commits.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn test_coordinator_error_backs_off_then_resumes() {
    let message = Message::new("user-1", "after rebalance");
    let consumer = MockConsumer::new(vec![
        Err(BusError::CoordinatorUnavailable("moving".to_string())),
        Ok(inbound(0, encoded(&message))),
    ]);
    let handler = Arc::new(RecordingHandler::default());

    let started = tokio::time::Instant::now();
    let stats = run_until(
        ConsumeLoop::<Message>::new("test", Box::new(consumer), handler.clone())
            .with_coordinator_backoff(Duration::from_millis(50)),
        |s| s.processed() == 1,
    )
    .await;

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(stats.fetch_errors(), 1);
    assert_eq!(handler.seen(), vec![message]);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_loop() {
    let consumer = MockConsumer::new(vec![Err(BusError::CoordinatorUnavailable(
        "moving".to_string(),
    ))]);
    let consume_loop = ConsumeLoop::<Message>::new(
        "test",
        Box::new(consumer),
        Arc::new(RecordingHandler::default()) as Arc<dyn EnvelopeHandler<Message>>,
    )
    .with_coordinator_backoff(Duration::from_secs(60));
    let stats = consume_loop.stats();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(consume_loop.run(cancel.clone()));
    while stats.fetch_errors() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop should stop without waiting out the backoff")
        .unwrap();
}

#[tokio::test]
async fn test_cancel_while_idle_stops_loop() {
    let consume_loop = ConsumeLoop::<Message>::new(
        "idle",
        Box::new(MockConsumer::new(Vec::new())),
        Arc::new(RecordingHandler::default()) as Arc<dyn EnvelopeHandler<Message>>,
    );
    let cancel = CancellationToken::new();
    let task = tokio::spawn(consume_loop.run(cancel.clone()));

    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("idle loop should observe cancellation")
        .unwrap();
}
