#[cfg(test)]
mod tests {
    use crate::support::{SOURCE, SimTransport, TARGET, open_store, start_engine, text_of};
    use engine_config::settings::EngineConfig;
    use engine_runtime::NewTask;
    use model::{
        core::identifiers::StreamId, records::message::Message, task::status::TaskStatus,
    };
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::{Instant, sleep};

    fn tail(extra: &[&str]) -> NewTask {
        NewTask::Tail {
            owner: "alice".into(),
            source: SOURCE.into(),
            target: TARGET.into(),
            extra_sources: extra.iter().map(|s| StreamId::from(*s)).collect(),
        }
    }

    // Scenario: a source with history is tailed; new posts arrive by polling
    // and one by push.
    // Expected: history is never forwarded, every new post is forwarded once.
    #[tokio::test(start_paused = true)]
    async fn new_posts_are_forwarded_exactly_once() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, 1..=5);

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let task = engine.create_task(tail(&[])).await.expect("create");
        engine.start_task(&task.id).await.expect("start");

        sleep(Duration::from_secs(6)).await;
        assert!(transport.texts().is_empty());

        transport.post_text(SOURCE, [6, 7]);
        sleep(Duration::from_secs(5)).await;
        assert_eq!(
            transport.texts(),
            vec![text_of(SOURCE, 6), text_of(SOURCE, 7)]
        );

        let pushed = Message::text(SOURCE, 8, text_of(SOURCE, 8));
        transport.post(pushed.clone());
        engine.deliver(pushed).await.expect("deliver");
        transport.wait_for_deliveries(3).await;

        sleep(Duration::from_secs(12)).await;
        let done = engine.stop_tail(&task.id).await.expect("stop");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(
            transport.texts(),
            (6..=8).map(|id| text_of(SOURCE, id)).collect::<Vec<_>>()
        );
        assert_eq!(done.progress.sent_items, 3);

        engine.shutdown().await;
    }

    // Scenario: an album is still being posted when the first listing sees it.
    // Expected: it goes out as one group, after its membership stops changing.
    #[tokio::test(start_paused = true)]
    async fn album_posted_across_polls_is_sent_whole() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET]);
        transport.post_text(SOURCE, [1]);

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let task = engine.create_task(tail(&[])).await.expect("create");
        engine.start_task(&task.id).await.expect("start");
        sleep(Duration::from_secs(6)).await;

        transport.post_group(SOURCE, "album", [2, 3]);
        sleep(Duration::from_secs(5)).await;
        transport.post_group(SOURCE, "album", [4]);
        sleep(Duration::from_secs(15)).await;

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].items, 3);

        engine.stop_tail(&task.id).await.expect("stop");
        engine.shutdown().await;
    }

    // Scenario: the engine shuts down while tailing and starts again later,
    // with a post made while it was down.
    // Expected: the stored cursor is reused; the missed post is forwarded and
    // nothing older is.
    #[tokio::test(start_paused = true)]
    async fn cursor_survives_restart() {
        let dir = tempdir().expect("state dir");
        let store = open_store(dir.path());

        let transport = SimTransport::new(&[SOURCE, TARGET, "side"]);
        transport.post_text(SOURCE, 1..=3);
        transport.post_text("side", 1..=2);

        let engine = start_engine(EngineConfig::default(), transport.clone(), store.clone());
        let task = engine.create_task(tail(&["side"])).await.expect("create");
        engine.start_task(&task.id).await.expect("start");

        sleep(Duration::from_secs(6)).await;
        transport.post_text(SOURCE, [4]);
        sleep(Duration::from_secs(5)).await;
        engine.shutdown().await;
        drop(engine);

        let stopped = engine_snapshot(&store, &task.id).await;
        assert_eq!(stopped.status, TaskStatus::Paused);
        assert_eq!(
            stopped
                .tail_cursors
                .get(&StreamId::from(SOURCE))
                .and_then(|c| c.last_seen_id),
            Some(4)
        );
        assert_eq!(
            stopped
                .tail_cursors
                .get(&StreamId::from("side"))
                .and_then(|c| c.last_seen_id),
            Some(2)
        );

        transport.post_text(SOURCE, [5]);
        transport.post_text("side", [3]);

        let engine = start_engine(EngineConfig::default(), transport.clone(), store.clone());
        let resumed = engine.resume_interrupted().await.expect("resume");
        assert_eq!(resumed.len(), 1);
        sleep(Duration::from_secs(11)).await;

        let mut texts = transport.texts();
        texts.sort();
        assert_eq!(
            texts,
            vec![
                text_of("side", 3),
                text_of(SOURCE, 4),
                text_of(SOURCE, 5)
            ]
        );

        engine.stop_tail(&task.id).await.expect("stop");
        engine.shutdown().await;
    }

    // Scenario: one tail task's send is stuck at the platform while another
    // tail task is stopped.
    // Expected: the stop completes at once; the stuck send finishes later.
    #[tokio::test(start_paused = true)]
    async fn stopping_a_tail_does_not_wait_for_another_tasks_send() {
        let dir = tempdir().expect("state dir");
        let transport = SimTransport::new(&[SOURCE, TARGET, "side"]);
        transport.post_text(SOURCE, [1]);
        transport.post_text("side", [1]);

        let engine = start_engine(
            EngineConfig::default(),
            transport.clone(),
            open_store(dir.path()),
        );
        let busy = engine.create_task(tail(&[])).await.expect("create");
        let idle = engine
            .create_task(NewTask::Tail {
                owner: "bob".into(),
                source: "side".into(),
                target: TARGET.into(),
                extra_sources: Vec::new(),
            })
            .await
            .expect("create");
        engine.start_task(&busy.id).await.expect("start");
        engine.start_task(&idle.id).await.expect("start");
        sleep(Duration::from_secs(6)).await;

        transport.close_gate(0);
        transport.post_text(SOURCE, [2]);
        sleep(Duration::from_secs(6)).await;
        assert!(transport.delivered().is_empty());

        let before = Instant::now();
        let stopped = engine.stop_tail(&idle.id).await.expect("stop");
        assert_eq!(stopped.status, TaskStatus::Completed);
        assert!(before.elapsed() < Duration::from_secs(30));
        assert!(transport.delivered().is_empty());

        transport.open_gate();
        transport.wait_for_deliveries(1).await;
        let done = engine.stop_tail(&busy.id).await.expect("stop");
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(transport.texts(), vec![text_of(SOURCE, 2)]);

        engine.shutdown().await;
    }

    // Scenario: a tail follows two sources; one send of the second source is
    // rejected by the target.
    // Expected: counters are kept per source and stored with the task.
    #[tokio::test(start_paused = true)]
    async fn counters_are_split_by_source() {
        let dir = tempdir().expect("state dir");
        let store = open_store(dir.path());
        let transport = SimTransport::new(&[SOURCE, TARGET, "side"]);
        transport.post_text(SOURCE, [1]);
        transport.post_text("side", [1]);
        transport.reject(&text_of("side", 3));

        let engine = start_engine(EngineConfig::default(), transport.clone(), store.clone());
        let task = engine.create_task(tail(&["side"])).await.expect("create");
        engine.start_task(&task.id).await.expect("start");
        sleep(Duration::from_secs(6)).await;

        transport.post_text(SOURCE, [2, 3]);
        transport.post_text("side", [2, 3]);
        sleep(Duration::from_secs(11)).await;
        let done = engine.stop_tail(&task.id).await.expect("stop");

        assert_eq!(done.progress.sent_items, 3);
        assert_eq!(done.progress.failed_count, 1);
        let primary = &done.progress.by_source[&StreamId::from(SOURCE)];
        assert_eq!((primary.processed, primary.sent_items, primary.failed), (2, 2, 0));
        let side = &done.progress.by_source[&StreamId::from("side")];
        assert_eq!((side.processed, side.sent_items, side.failed), (1, 1, 1));

        let stored = engine_snapshot(&store, &task.id).await;
        assert_eq!(stored.progress.by_source, done.progress.by_source);

        engine.shutdown().await;
    }

    async fn engine_snapshot(
        store: &std::sync::Arc<engine_core::state::sled_store::SledTaskStore>,
        id: &model::core::identifiers::TaskId,
    ) -> model::task::record::TaskRecord {
        use engine_core::state::TaskStore;
        store
            .load_task(id)
            .await
            .expect("load")
            .expect("task stored")
    }
}
