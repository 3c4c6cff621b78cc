#[cfg(test)]
mod tests {
    use crate::support::{
        SOURCE, SimTransport, TARGET, max_calls_in_window, open_store, start_engine, text_of,
    };
    use engine_config::settings::EngineConfig;
    use engine_runtime::NewTask;
    use model::{
        events::UnitFailed,
        task::{
            record::{IdRange, Total},
            status::TaskStatus,
        },
    };
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::{sync::mpsc, time::Instant};
    use tracing_test::traced_test;

    fn backfill(start: i64, end: Option<i64>) -> NewTask {
        NewTask::Backfill {
            owner: "alice".into(),
            source: SOURCE.into(),
            target: TARGET.into(),
            range: IdRange::new(start, end),
        }
    }

    // Scenario: ids 100..=149 with 110..=114 deleted and 140..=145 posted as one album.
    // Expected: 39 single sends plus one group send, in source order, and every
    // examined id accounted for.
    #[traced_test]
    #[tokio::test]
    async fn range_with_gap_and_album_is_copied_in_order() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, (100..=109).chain(115..=139).chain(146..=149));
        transport.post_group(SOURCE, "album", 140..=145);

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let task = engine
            .create_task(backfill(100, Some(149)))
            .await
            .expect("create");
        assert_eq!(task.progress.total, Total::Exact(50));

        engine.start_task(&task.id).await.expect("start");
        let done = engine.wait(&task.id).await.expect("wait");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress.processed_count, 50);
        assert_eq!(done.progress.failed_count, 0);
        assert_eq!(done.progress.sent_items, 45);
        assert_eq!(done.progress.sent_units, 40);
        assert_eq!(done.progress.last_checkpoint_id, Some(149));

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 40);
        assert!(delivered.iter().all(|d| d.target.as_str() == TARGET));

        let singles = delivered
            .iter()
            .filter(|d| d.items == 1)
            .map(|d| d.text.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        let expected = (100..=109)
            .chain(115..=139)
            .chain(146..=149)
            .map(|id| text_of(SOURCE, id))
            .collect::<Vec<_>>();
        assert_eq!(singles, expected);

        let album = delivered
            .iter()
            .position(|d| d.items == 6)
            .expect("album sent as one group");
        assert_eq!(album, 35);

        engine.shutdown().await;
        assert!(logs_contain("Task status changed"));
    }

    // Scenario: the platform demands a 1250s cool-down on item 77.
    // Expected: no call at all during the cool-down, item 77 sent exactly once
    // afterwards and the task completes.
    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn mandated_wait_suspends_every_call() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, 1..=100);
        transport.throttle_once(&text_of(SOURCE, 77), Duration::from_secs(1250));

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let task = engine
            .create_task(backfill(1, Some(100)))
            .await
            .expect("create");
        let started = Instant::now();
        engine.start_task(&task.id).await.expect("start");
        let done = engine.wait(&task.id).await.expect("wait");

        assert_eq!(done.status, TaskStatus::Completed);
        assert!(started.elapsed() >= Duration::from_secs(1250));

        let texts = transport.texts();
        assert_eq!(texts.len(), 100);
        assert_eq!(
            texts.iter().filter(|t| **t == text_of(SOURCE, 77)).count(),
            1
        );

        let delivered = transport.delivered();
        let gap = delivered[76].at.duration_since(delivered[75].at);
        assert!(gap >= Duration::from_secs(1250));

        let metrics = engine.metrics();
        assert_eq!(metrics.throttle_count, 1);
        assert_eq!(metrics.throttle_wait_secs, 1250);

        engine.shutdown().await;
    }

    // Scenario: 5 calls per 10s window, 20 items.
    // Expected: no 10s span ever sees more than 5 platform calls.
    #[tokio::test(start_paused = true)]
    async fn call_rate_stays_within_window() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, 1..=20);

        let mut config = EngineConfig::default();
        config.rate.window = Duration::from_secs(10);
        config.rate.max_calls = 5;

        let engine = start_engine(config, transport.clone(), open_store(dir.path()));
        let task = engine
            .create_task(backfill(1, Some(20)))
            .await
            .expect("create");
        engine.start_task(&task.id).await.expect("start");
        let done = engine.wait(&task.id).await.expect("wait");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(transport.texts().len(), 20);
        assert!(max_calls_in_window(&transport.calls(), Duration::from_secs(10)) <= 5);

        engine.shutdown().await;
    }

    // Scenario: the target refuses item 5 permanently.
    // Expected: item 5 is counted failed and reported, the rest is copied.
    #[tokio::test]
    async fn refused_item_fails_alone() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, 1..=10);
        transport.reject(&text_of(SOURCE, 5));

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let (tx, mut rx) = mpsc::channel(8);
        engine.events().subscribe::<UnitFailed>(tx).await;

        let task = engine
            .create_task(backfill(1, Some(10)))
            .await
            .expect("create");
        engine.start_task(&task.id).await.expect("start");
        let done = engine.wait(&task.id).await.expect("wait");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress.failed_count, 1);
        assert_eq!(done.progress.processed_count, 9);
        assert_eq!(transport.texts().len(), 9);

        let failed = rx.recv().await.expect("unit failed event");
        assert_eq!((failed.first_id, failed.last_id), (5, 5));

        engine.shutdown().await;
    }

    // Scenario: open range starting at 21 over a source whose newest id is 30.
    // Expected: the range is pinned to 21..=30 and exactly those are copied.
    #[tokio::test]
    async fn open_range_copies_up_to_newest() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, 1..=30);

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let task = engine.create_task(backfill(21, None)).await.expect("create");
        assert_eq!(task.progress.total, Total::Unknown);

        engine.start_task(&task.id).await.expect("start");
        let done = engine.wait(&task.id).await.expect("wait");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.range(), Some(IdRange::bounded(21, 30)));
        assert_eq!(
            transport.texts(),
            (21..=30).map(|id| text_of(SOURCE, id)).collect::<Vec<_>>()
        );

        engine.shutdown().await;
    }
}
