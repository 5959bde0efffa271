use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use harvester_core::{config::BatchDefaults, BatchSettings, HarvesterError, ProgressStore};
use harvester_infrastructure::FileProgressStore;
use harvester_testing_utils::{
    channel_tasks, BatchMessageBuilder, MockChannelLister, MockChannelParser,
    MockProgressStore, MockReleaseNotifier,
};
use harvester_worker::{BatchRequest, BatchRunner};
use tempfile::TempDir;
use tokio::time::Instant;

struct Harness {
    parser: MockChannelParser,
    progress: MockProgressStore,
    notifier: MockReleaseNotifier,
    lister: Option<MockChannelLister>,
}

impl Harness {
    fn new(parser: MockChannelParser) -> Self {
        Self {
            parser,
            progress: MockProgressStore::new(),
            notifier: MockReleaseNotifier::new(),
            lister: None,
        }
    }

    fn runner(&self) -> BatchRunner {
        BatchRunner::new(
            Arc::new(self.parser.clone()),
            Arc::new(self.progress.clone()),
            self.lister
                .clone()
                .map(|lister| Arc::new(lister) as Arc<dyn harvester_core::ChannelLister>),
            Arc::new(self.notifier.clone()),
        )
    }
}

fn request(builder: BatchMessageBuilder) -> BatchRequest {
    BatchRequest::from_message(&builder.build(), &BatchDefaults::default())
}

#[tokio::test]
async fn test_failing_channel_does_not_block_batch() {
    let harness = Harness::new(MockChannelParser::new().always_fail(2));

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("b1")
                .with_channel_ids(&[1, 2, 3])
                .channels_per_wave(2)
                .retries_per_channel(1)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.waves, vec![vec![1, 2], vec![3]]);
    assert_eq!(report.succeeded, vec![1, 3]);
    assert_eq!(report.failed, vec![2]);
    assert_eq!(harness.parser.attempts_for(2), 2);
    assert_eq!(harness.parser.attempts_for(1), 1);
    assert_eq!(harness.parser.attempts_for(3), 1);
    assert_eq!(harness.parser.refresh_count(), 1);

    let mut marked = harness.progress.marked("b1");
    marked.sort();
    assert_eq!(marked, vec![1, 3]);

    assert_eq!(harness.notifier.released(), vec!["b1".to_string()]);
    assert_eq!(harness.progress.cleared(), vec!["b1".to_string()]);
    assert!(harness.progress.load("b1").await.is_empty());
    assert!(report.progress_cleared);
}

#[tokio::test]
async fn test_restart_only_attempts_remaining_channels() {
    let dir = TempDir::new().unwrap();
    let progress = Arc::new(FileProgressStore::new(dir.path()));
    progress.mark_processed("b1", 1).await.unwrap();

    let parser = MockChannelParser::new();
    let notifier = MockReleaseNotifier::new();
    let runner = BatchRunner::new(
        Arc::new(parser.clone()),
        progress.clone(),
        None,
        Arc::new(notifier.clone()),
    );

    let report = runner
        .run(request(
            BatchMessageBuilder::new("b1")
                .with_channel_ids(&[1, 2, 3])
                .channels_per_wave(2)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(parser.attempted_channels(), HashSet::from([2, 3]));
    assert_eq!(report.skipped, vec![1]);
    assert_eq!(report.waves, vec![vec![2, 3]]);
    assert!(progress.load("b1").await.is_empty());
    assert!(!progress.file_path("b1").exists());
}

#[tokio::test]
async fn test_resume_after_partial_run_attempts_exactly_the_rest() {
    let ids: Vec<i64> = (1..=8).collect();
    let harness = Harness {
        progress: MockProgressStore::with_processed("resume", &[2, 4, 5]),
        ..Harness::new(MockChannelParser::new())
    };

    harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("resume")
                .with_channel_ids(&ids)
                .channels_per_wave(3)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    let attempts = harness.parser.attempts();
    assert_eq!(attempts.len(), 5);
    assert_eq!(
        attempts.iter().copied().collect::<HashSet<_>>(),
        HashSet::from([1, 3, 6, 7, 8])
    );
}

#[tokio::test]
async fn test_wave_sizing() {
    let harness = Harness::new(MockChannelParser::new());
    let ids: Vec<i64> = (1..=7).collect();

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("waves")
                .with_channel_ids(&ids)
                .channels_per_wave(3)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    let sizes: Vec<usize> = report.waves.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(report.waves.concat(), ids);
}

#[tokio::test(start_paused = true)]
async fn test_waves_run_concurrently_and_pause_between() {
    let harness = Harness::new(MockChannelParser::new().with_delay(Duration::from_secs(10)));
    let started = Instant::now();

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("paced")
                .with_channel_ids(&[1, 2, 3, 4, 5, 6])
                .channels_per_wave(3)
                .pause_between_waves(300),
        ))
        .await
        .unwrap();

    // 两波各10秒，中间暂停一次，最后一波之后不暂停
    assert_eq!(report.waves.len(), 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(320));
    assert!(elapsed < Duration::from_secs(321));
}

#[tokio::test]
async fn test_notification_failure_still_clears_progress() {
    let harness = Harness {
        notifier: MockReleaseNotifier::failing(),
        ..Harness::new(MockChannelParser::new().always_fail(1))
    };

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("b2")
                .with_channel_ids(&[1, 2])
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.failed, vec![1]);
    assert_eq!(harness.notifier.released(), vec!["b2".to_string()]);
    assert!(harness.progress.load("b2").await.is_empty());
    assert_eq!(harness.progress.cleared(), vec!["b2".to_string()]);
}

#[tokio::test]
async fn test_channels_fetched_when_message_has_none() {
    let mut harness = Harness::new(MockChannelParser::new());
    harness.lister = Some(MockChannelLister::with_channels(channel_tasks(&[10, 11])));

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("fetched")
                .without_channels()
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(harness.lister.as_ref().unwrap().call_count(), 1);
    assert_eq!(report.succeeded, vec![10, 11]);
}

#[tokio::test]
async fn test_listing_failure_aborts_before_any_work() {
    let mut harness = Harness::new(MockChannelParser::new());
    harness.lister = Some(MockChannelLister::failing("401 Unauthorized"));

    let result = harness
        .runner()
        .run(request(BatchMessageBuilder::new("nolist").without_channels()))
        .await;

    assert!(matches!(result, Err(HarvesterError::ChannelListing(_))));
    assert!(harness.parser.attempts().is_empty());
    assert!(harness.progress.cleared().is_empty());
    assert_eq!(harness.notifier.released(), vec!["nolist".to_string()]);
}

#[tokio::test]
async fn test_missing_lister_is_listing_failure() {
    let harness = Harness::new(MockChannelParser::new());

    let result = harness
        .runner()
        .run(request(BatchMessageBuilder::new("nolister").without_channels()))
        .await;

    assert!(matches!(result, Err(HarvesterError::ChannelListing(_))));
}

#[tokio::test]
async fn test_panicking_lister_still_releases_batch() {
    let mut harness = Harness::new(MockChannelParser::new());
    harness.lister = Some(MockChannelLister::panicking());

    let result = harness
        .runner()
        .run(request(BatchMessageBuilder::new("crash").without_channels()))
        .await;

    assert!(matches!(result, Err(HarvesterError::Internal(_))));
    assert!(harness.parser.attempts().is_empty());
    assert!(harness.progress.cleared().is_empty());
    assert_eq!(harness.notifier.released(), vec!["crash".to_string()]);
}

#[tokio::test]
async fn test_progress_write_is_retried_once() {
    let harness = Harness::new(MockChannelParser::new());
    harness.progress.fail_next_writes(1);

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("flaky")
                .with_channel_ids(&[1])
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![1]);
    assert_eq!(harness.progress.write_calls(), 2);
    assert_eq!(harness.progress.marked("flaky"), vec![1]);
}

#[tokio::test]
async fn test_persistent_progress_failure_does_not_crash_runner() {
    let harness = Harness::new(MockChannelParser::new());
    harness.progress.fail_next_writes(10);

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("broken")
                .with_channel_ids(&[1, 2])
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![1, 2]);
    assert_eq!(harness.progress.write_calls(), 4);
    assert!(harness.progress.marked("broken").is_empty());
}

#[tokio::test]
async fn test_session_refresh_can_be_disabled() {
    let harness = Harness::new(MockChannelParser::new().fail_times(1, 2));

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("norefresh")
                .with_channel_ids(&[1])
                .retries_per_channel(2)
                .session_refresh(false)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![1]);
    assert_eq!(harness.parser.attempts_for(1), 3);
    assert_eq!(harness.parser.refresh_count(), 0);
}

#[tokio::test]
async fn test_panicking_channel_is_isolated() {
    let harness = Harness::new(MockChannelParser::new().panic_on(2));

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("panic")
                .with_channel_ids(&[1, 2, 3])
                .channels_per_wave(3)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![1, 3]);
    assert_eq!(report.failed, vec![2]);
    assert_eq!(harness.notifier.released(), vec!["panic".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_huge_pause_is_capped_and_batch_completes() {
    let harness = Harness::new(MockChannelParser::new());
    let started = Instant::now();

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("huge-pause")
                .with_channel_ids(&[1, 2])
                .channels_per_wave(1)
                .pause_between_waves(u64::MAX),
        ))
        .await
        .unwrap();

    assert_eq!(report.waves, vec![vec![1], vec![2]]);
    assert_eq!(report.succeeded, vec![1, 2]);
    assert!(started.elapsed() >= BatchSettings::MAX_WAIT);
    assert!(report.progress_cleared);
    assert_eq!(harness.notifier.released(), vec!["huge-pause".to_string()]);
    assert_eq!(harness.progress.cleared(), vec!["huge-pause".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_huge_timeout_behaves_like_no_deadline() {
    let harness = Harness::new(MockChannelParser::new());

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("huge-timeout")
                .with_channel_ids(&[1, 2])
                .channels_per_wave(1)
                .pause_between_waves(0)
                .batch_timeout(u64::MAX),
        ))
        .await
        .unwrap();

    assert!(!report.timed_out);
    assert_eq!(report.succeeded, vec![1, 2]);
    assert_eq!(harness.progress.marked("huge-timeout"), vec![1, 2]);
    assert_eq!(harness.notifier.released(), vec!["huge-timeout".to_string()]);
    assert_eq!(harness.progress.cleared(), vec!["huge-timeout".to_string()]);
}

#[tokio::test]
async fn test_session_refresh_applies_only_to_failing_channel() {
    let harness = Harness::new(MockChannelParser::new().fail_times(2, 1));

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("refresh")
                .with_channel_ids(&[1, 2, 3])
                .channels_per_wave(3)
                .retries_per_channel(1)
                .pause_between_waves(0),
        ))
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![1, 2, 3]);
    assert_eq!(harness.parser.refreshed_channels(), vec![2]);

    let first_attempts: Vec<bool> = harness
        .parser
        .requests()
        .iter()
        .filter(|request| request.channel.channel_id != 2)
        .map(|request| request.refresh_session)
        .collect();
    assert_eq!(first_attempts, vec![false, false]);
}

#[tokio::test(start_paused = true)]
async fn test_batch_timeout_keeps_progress() {
    let harness = Harness::new(MockChannelParser::new());

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("slow")
                .with_channel_ids(&[1, 2, 3])
                .channels_per_wave(1)
                .pause_between_waves(100)
                .batch_timeout(150),
        ))
        .await
        .unwrap();

    assert!(report.timed_out);
    assert!(!report.progress_cleared);
    assert_eq!(report.waves, vec![vec![1], vec![2]]);
    assert_eq!(harness.progress.load("slow").await, HashSet::from([1, 2]));
    assert!(harness.progress.cleared().is_empty());
    assert_eq!(harness.notifier.released(), vec!["slow".to_string()]);
}

#[tokio::test]
async fn test_accounts_proxies_and_start_time_reach_parser() {
    let harness = Harness::new(MockChannelParser::new());
    let message = BatchMessageBuilder::new("ctx")
        .with_channel_ids(&[1])
        .with_accounts(&["acc1", "acc2"])
        .with_proxies(&["http://p1"])
        .pause_between_waves(0)
        .build()
        .with_parse_started_at("2025-01-01T20:00:00+03:00");

    harness
        .runner()
        .run(BatchRequest::from_message(&message, &BatchDefaults::default()))
        .await
        .unwrap();

    assert_eq!(
        harness.parser.prepared_accounts(),
        vec![vec!["acc1".to_string(), "acc2".to_string()]]
    );
    assert_eq!(
        harness.parser.configured_proxies(),
        vec![vec!["http://p1".to_string()]]
    );
    let requests = harness.parser.requests();
    assert_eq!(
        requests[0].channel.parse_started_at.as_deref(),
        Some("2025-01-01T20:00:00+03:00")
    );
    assert_eq!(requests[0].collect_attempts, 3);
}

#[tokio::test]
async fn test_fully_processed_batch_is_closed_without_parsing() {
    let harness = Harness {
        progress: MockProgressStore::with_processed("done", &[1, 2]),
        ..Harness::new(MockChannelParser::new())
    };

    let report = harness
        .runner()
        .run(request(
            BatchMessageBuilder::new("done").with_channel_ids(&[1, 2]),
        ))
        .await
        .unwrap();

    assert!(report.waves.is_empty());
    assert!(harness.parser.attempts().is_empty());
    assert!(harness.parser.prepared_accounts().is_empty());
    assert_eq!(harness.progress.cleared(), vec!["done".to_string()]);
}

#[test]
fn test_missing_batch_id_gets_generated() {
    let mut message = BatchMessageBuilder::new("x").with_channel_ids(&[1]).build();
    message.batch_id = None;

    let request = BatchRequest::from_message(&message, &BatchDefaults::default());
    assert!(request.batch_id.starts_with("adhoc-"));
}
