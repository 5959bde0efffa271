use std::sync::Arc;
use std::time::Duration;

use harvester_core::{config::BatchDefaults, ChannelTask, HarvesterError, TaskMessage};
use harvester_infrastructure::ReconnectPolicy;
use harvester_testing_utils::{
    BatchMessageBuilder, MockChannelParser, MockProgressStore, MockReleaseNotifier,
    MockTaskSubscriber, ScriptedConnection, TestEnv,
};
use harvester_worker::{BatchRunner, TaskConsumer, TaskHandler};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const QUEUE: &str = "parser_instagram";

struct Fixture {
    subscriber: MockTaskSubscriber,
    parser: MockChannelParser,
    notifier: MockReleaseNotifier,
    shutdown: broadcast::Sender<()>,
}

impl Fixture {
    fn new(parser: MockChannelParser) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            subscriber: MockTaskSubscriber::new(),
            parser,
            notifier: MockReleaseNotifier::new(),
            shutdown,
        }
    }

    fn consumer(&self, policy: ReconnectPolicy) -> TaskConsumer {
        let runner = Arc::new(BatchRunner::new(
            Arc::new(self.parser.clone()),
            Arc::new(MockProgressStore::new()),
            None,
            Arc::new(self.notifier.clone()),
        ));
        let handler = Arc::new(TaskHandler::new(
            Arc::new(self.parser.clone()),
            runner,
            BatchDefaults::default(),
        ));
        TaskConsumer::new(
            Arc::new(self.subscriber.clone()),
            handler,
            QUEUE,
            "worker-test",
            policy,
        )
    }

    fn start(&self, policy: ReconnectPolicy) -> JoinHandle<harvester_core::Result<()>> {
        let consumer = self.consumer(policy);
        let receiver = self.shutdown.subscribe();
        tokio::spawn(async move { consumer.run(receiver).await })
    }

    async fn wait_settled(&self, count: usize) -> bool {
        let log = self.subscriber.ack_log();
        TestEnv::wait_for(|| log.settled() >= count, Duration::from_secs(5)).await
    }

    async fn stop(&self, handle: JoinHandle<harvester_core::Result<()>>) {
        let _ = self.shutdown.send(());
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..Default::default()
    }
    .without_jitter()
}

fn channel_message(channel_id: i64) -> TaskMessage {
    TaskMessage::channel(
        &ChannelTask::new(channel_id, format!("https://www.instagram.com/c{channel_id}/")),
        vec!["acc1".to_string()],
        vec![],
    )
}

#[tokio::test]
async fn test_channel_task_is_parsed_and_acked() {
    let fixture = Fixture::new(MockChannelParser::new());
    fixture.subscriber.push_messages(&[channel_message(1)]);

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(1).await);

    assert_eq!(fixture.subscriber.ack_log().acked(), vec![1]);
    assert_eq!(fixture.parser.attempts(), vec![1]);
    assert_eq!(fixture.subscriber.subscribed_queues()[0], QUEUE);
    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_messages_are_processed_in_order() {
    let fixture = Fixture::new(MockChannelParser::new());
    fixture
        .subscriber
        .push_messages(&[channel_message(3), channel_message(1), channel_message(2)]);

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(3).await);

    assert_eq!(fixture.parser.attempts(), vec![3, 1, 2]);
    assert_eq!(fixture.subscriber.ack_log().acked(), vec![1, 2, 3]);
    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_undecodable_messages_are_acked_and_dropped() {
    let fixture = Fixture::new(MockChannelParser::new());
    fixture.subscriber.push_connection(ScriptedConnection::Deliver(vec![
        b"not json at all".to_vec(),
        br#"{"type":"channel","url":"https://www.instagram.com/x/"}"#.to_vec(),
        br#"{"type":"youtube_batch","batch_id":"y1"}"#.to_vec(),
    ]));

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(3).await);

    let log = fixture.subscriber.ack_log();
    assert_eq!(log.acked(), vec![1, 2, 3]);
    assert!(log.nacked().is_empty());
    assert!(fixture.parser.attempts().is_empty());
    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_failed_task_is_still_acked() {
    let fixture = Fixture::new(MockChannelParser::new().always_fail(8));
    let mut message = channel_message(8);
    message.max_retries = Some(2);
    fixture.subscriber.push_messages(&[message]);

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(1).await);

    assert_eq!(fixture.parser.attempts_for(8), 2);
    assert_eq!(fixture.subscriber.ack_log().acked(), vec![1]);
    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_panicking_handler_is_nacked_without_requeue() {
    let fixture = Fixture::new(MockChannelParser::new().panic_on(5));
    fixture
        .subscriber
        .push_messages(&[channel_message(5), channel_message(6)]);

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(2).await);

    let log = fixture.subscriber.ack_log();
    assert_eq!(log.nacked(), vec![(1, false)]);
    assert_eq!(log.acked(), vec![2]);
    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_batch_task_is_dispatched_to_runner() {
    let fixture = Fixture::new(MockChannelParser::new());
    let batch = BatchMessageBuilder::new("b9")
        .with_channel_ids(&[1, 2])
        .pause_between_waves(0)
        .build();
    fixture.subscriber.push_messages(&[batch]);

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(1).await);

    assert_eq!(fixture.notifier.released(), vec!["b9".to_string()]);
    assert_eq!(fixture.parser.attempted_channels().len(), 2);
    fixture.stop(handle).await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_backoff_after_failures() {
    let fixture = Fixture::new(MockChannelParser::new());
    fixture
        .subscriber
        .push_connection(ScriptedConnection::Fail("connection refused".to_string()));
    fixture
        .subscriber
        .push_connection(ScriptedConnection::Fail("connection refused".to_string()));
    fixture.subscriber.push_messages(&[channel_message(1)]);

    let policy = ReconnectPolicy {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        ..Default::default()
    }
    .without_jitter();

    let started = Instant::now();
    let handle = fixture.start(policy);
    assert!(fixture.wait_settled(1).await);

    // 1秒 + 2秒
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(fixture.subscriber.subscription_count() >= 3);
    assert_eq!(fixture.parser.attempts(), vec![1]);
    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_stream_end_triggers_resubscribe() {
    let fixture = Fixture::new(MockChannelParser::new());
    fixture.subscriber.push_messages(&[channel_message(1)]);
    fixture.subscriber.push_messages(&[channel_message(2)]);

    let handle = fixture.start(fast_policy());
    assert!(fixture.wait_settled(2).await);

    assert_eq!(fixture.parser.attempts(), vec![1, 2]);
    assert!(fixture.subscriber.subscription_count() >= 2);
    fixture.stop(handle).await;
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_reconnect_attempts() {
    let fixture = Fixture::new(MockChannelParser::new());
    for _ in 0..3 {
        fixture
            .subscriber
            .push_connection(ScriptedConnection::Fail("broker down".to_string()));
    }

    let policy = ReconnectPolicy {
        max_attempts: Some(3),
        ..fast_policy()
    };
    let result = fixture.start(policy).await.unwrap();

    assert!(matches!(result, Err(HarvesterError::MessageQueue(_))));
    assert_eq!(fixture.subscriber.subscription_count(), 3);
}

#[tokio::test]
async fn test_shutdown_stops_idle_consumer() {
    let fixture = Fixture::new(MockChannelParser::new());

    let handle = fixture.start(fast_policy());
    let subscriber = fixture.subscriber.clone();
    assert!(TestEnv::wait_for(|| subscriber.subscription_count() == 1, Duration::from_secs(5)).await);

    fixture.stop(handle).await;
}

#[tokio::test]
async fn test_single_channel_retries_until_success() {
    let fixture = Fixture::new(MockChannelParser::new().fail_times(7, 2));
    let handler = TaskHandler::new(
        Arc::new(fixture.parser.clone()),
        Arc::new(BatchRunner::new(
            Arc::new(fixture.parser.clone()),
            Arc::new(MockProgressStore::new()),
            None,
            Arc::new(fixture.notifier.clone()),
        )),
        BatchDefaults::default(),
    );

    handler.handle(channel_message(7)).await.unwrap();

    assert_eq!(fixture.parser.attempts_for(7), 3);
    assert_eq!(fixture.parser.refresh_count(), 0);
}
