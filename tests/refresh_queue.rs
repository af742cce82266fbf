mod common;

use common::{refresh_post, Call, Journal, JournalQueue, JournalSink, JournalStore};
use refresh_sync::prelude::*;
use refresh_sync::replay::ScriptedReplayer;
use refresh_sync::telemetry::names;
use refresh_sync::{InstantSleeper, ManualClock, TrackingSleeper};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn offline() -> Result<u16, ReplayError> {
    Err(ReplayError::network("Failed to fetch"))
}

fn controller(
    replayer: ScriptedReplayer,
    journal: &Journal,
) -> RefreshQueueController<ScriptedReplayer, JournalSink> {
    RefreshQueueController::builder(replayer, JournalSink::new(journal.clone()))
        .store(JournalStore::new(journal.clone()))
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap()
}

#[tokio::test]
async fn fifo_is_preserved_when_an_entry_fails() {
    let journal = Journal::new();
    // a and b deliver, c fails every attempt.
    let replayer = ScriptedReplayer::new([Ok(200), Ok(200)]).with_fallback(offline());
    let controller = controller(replayer.clone(), &journal);
    let queue = JournalQueue::new("refresh-queue", journal.clone());

    for name in ["a", "b", "c", "d", "e"] {
        let url = format!("https://app.test/api/refresh?item={name}");
        controller.enqueue_failed(&queue, refresh_post(&url, None)).await.unwrap();
    }

    let err = controller.process_refresh_queue(&queue).await.unwrap_err();
    assert!(err.is_exhausted());

    assert_eq!(
        queue.urls().await,
        vec![
            "https://app.test/api/refresh?item=c",
            "https://app.test/api/refresh?item=d",
            "https://app.test/api/refresh?item=e",
        ]
    );
    assert_eq!(journal.push_to_heads(), 1);
    // d and e were never attempted in this drain.
    assert_eq!(replayer.calls(), 2 + 3);
}

#[tokio::test]
async fn failed_entry_is_first_in_the_next_drain() {
    let journal = Journal::new();
    let replayer = ScriptedReplayer::new([Ok(503), Ok(503), Ok(503)]);
    let controller = controller(replayer.clone(), &journal);
    let queue = JournalQueue::new("refresh-queue", journal.clone());

    for name in ["first", "second"] {
        let url = format!("https://app.test/api/refresh?item={name}");
        controller.enqueue_failed(&queue, refresh_post(&url, None)).await.unwrap();
    }

    assert!(controller.process_refresh_queue(&queue).await.is_err());
    assert_eq!(controller.process_refresh_queue(&queue).await.unwrap(), 2);

    let replayed: Vec<_> = replayer.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(
        replayed[3..],
        [
            "https://app.test/api/refresh?item=first".to_string(),
            "https://app.test/api/refresh?item=second".to_string(),
        ]
    );
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn attempt_ceiling_is_three() {
    let journal = Journal::new();
    let controller = controller(ScriptedReplayer::always(Ok(500)), &journal);
    let queue = JournalQueue::new("refresh-queue", journal.clone());
    controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", None))
        .await
        .unwrap();

    let err = controller.process_refresh_queue(&queue).await.unwrap_err();
    assert_eq!(err.replay_error(), Some(&ReplayError::Server { status: 500 }));
    assert_eq!(err.replay_error().unwrap().to_string(), "Server error: 500");

    assert_eq!(journal.attempts(), 3);
    assert_eq!(journal.failures().len(), 1);
    assert_eq!(journal.successes(), 0);
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn exhaustion_restores_then_records_then_reports() {
    let journal = Journal::new();
    let controller = controller(ScriptedReplayer::always(offline()), &journal);
    let queue = JournalQueue::new("refresh-queue", journal.clone());
    let entry = controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", Some("req-9")))
        .await
        .unwrap();

    controller.process_refresh_queue(&queue).await.unwrap_err();

    let calls = journal.calls();
    let tail: Vec<_> = calls.iter().rev().take(3).rev().collect();
    let id = entry.id().map(str::to_string);
    assert!(matches!(tail[0], Call::PushToHead { id: pushed } if *pushed == id));
    assert!(matches!(tail[1], Call::Failure { .. }));
    assert_eq!(
        tail[2],
        &Call::Telemetry { name: names::SYNC_FAILED.into(), correlation_id: Some("req-9".into()) }
    );
}

#[tokio::test]
async fn exhaustion_telemetry_payload() {
    let sink = MemorySink::new();
    let controller = RefreshQueueController::builder(ScriptedReplayer::always(offline()), sink.clone())
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let queue = InMemoryRetryQueue::new("refresh-queue");
    controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", Some("req-3")))
        .await
        .unwrap();

    controller.process_refresh_queue(&queue).await.unwrap_err();

    let failed = sink.named(names::SYNC_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].field("attempt"), Some(&json!(3)));
    assert_eq!(failed[0].field("queue"), Some(&json!("refresh-queue")));

    let retries: Vec<_> =
        sink.named(names::SYNC_RETRY).into_iter().map(|e| e.field("attempt").cloned()).collect();
    assert_eq!(retries, vec![Some(json!(2)), Some(json!(3))]);
}

#[tokio::test]
async fn success_emits_once_and_never_requeues() {
    for status in [200, 204, 301, 404, 499] {
        let journal = Journal::new();
        let sink = MemorySink::new();
        let controller = RefreshQueueController::builder(ScriptedReplayer::new([Ok(status)]), sink.clone())
            .store(JournalStore::new(journal.clone()))
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap();
        let queue = JournalQueue::new("refresh-queue", journal.clone());
        controller
            .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", None))
            .await
            .unwrap();

        assert_eq!(controller.process_refresh_queue(&queue).await.unwrap(), 1, "status {status}");
        assert_eq!(journal.successes(), 1);
        assert_eq!(journal.push_to_heads(), 0);
        assert_eq!(sink.named(names::SYNC_SUCCEEDED).len(), 1);
        assert!(sink.named(names::SYNC_FAILED).is_empty());
    }
}

#[tokio::test]
async fn correlation_id_follows_x_request_id() {
    let sink = MemorySink::new();
    let controller = RefreshQueueController::builder(ScriptedReplayer::always(offline()), sink.clone())
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let queue = InMemoryRetryQueue::new("refresh-queue");
    controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", Some("req-42")))
        .await
        .unwrap();
    controller.process_refresh_queue(&queue).await.unwrap_err();

    let events = sink.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.correlation_id.as_deref() == Some("req-42")));

    // Without the header no event carries a correlation id.
    let queue = InMemoryRetryQueue::new("refresh-queue");
    sink.clear();
    controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", None))
        .await
        .unwrap();
    controller.process_refresh_queue(&queue).await.unwrap_err();
    assert!(!sink.is_empty());
    assert!(sink.events().iter().all(|e| e.correlation_id.is_none()));
}

#[tokio::test]
async fn empty_drain_is_a_no_op() {
    let journal = Journal::new();
    let replayer = ScriptedReplayer::new([]);
    let controller = controller(replayer.clone(), &journal);
    let queue = JournalQueue::new("refresh-queue", journal.clone());

    assert_eq!(controller.process_refresh_queue(&queue).await.unwrap(), 0);
    assert_eq!(controller.process_refresh_queue(&queue).await.unwrap(), 0);
    assert!(journal.calls().is_empty());
    assert_eq!(replayer.calls(), 0);
}

#[tokio::test]
async fn three_network_rejections() {
    let journal = Journal::new();
    let clock = ManualClock::new(1_700_000_000_000);
    let controller = RefreshQueueController::builder(
        ScriptedReplayer::always(offline()),
        JournalSink::new(journal.clone()),
    )
    .store(JournalStore::new(journal.clone()))
    .with_clock(clock.clone())
    .with_sleeper(InstantSleeper)
    .build()
    .unwrap();
    let queue = JournalQueue::new("refresh-queue", journal.clone());

    let entry = controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/data", Some("req-1")))
        .await
        .unwrap();
    let id = entry.id().unwrap().to_string();
    clock.advance(30_000);

    let err = controller.process_refresh_queue(&queue).await.unwrap_err();
    assert_eq!(err.replay_error(), Some(&ReplayError::network("Failed to fetch")));

    assert_eq!(journal.count(|c| matches!(c, Call::Enqueue { .. })), 1);
    assert_eq!(journal.attempts(), 3);
    assert_eq!(
        journal.failures(),
        vec![Call::Failure {
            id: id.clone(),
            error: ReplayError::network("Failed to fetch"),
            timestamp: 1_700_000_030_000,
        }]
    );
    assert_eq!(journal.push_to_heads(), 1);
}

#[tokio::test]
async fn one_successful_replay() {
    let journal = Journal::new();
    let sink = MemorySink::new();
    let controller = RefreshQueueController::builder(ScriptedReplayer::new([Ok(204)]), sink.clone())
        .store(JournalStore::new(journal.clone()))
        .with_sleeper(InstantSleeper)
        .build()
        .unwrap();
    let queue = JournalQueue::new("refresh-queue", journal.clone());

    let entry = controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/data", Some("req-2")))
        .await
        .unwrap();
    let id = entry.id().unwrap().to_string();

    controller.process_refresh_queue(&queue).await.unwrap();

    assert_eq!(journal.attempts(), 1);
    assert_eq!(journal.count(|c| *c == Call::Success { id: id.clone() }), 1);
    assert_eq!(journal.push_to_heads(), 0);

    let succeeded = sink.named(names::SYNC_SUCCEEDED);
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].field("queue"), Some(&json!("refresh-queue")));
    assert_eq!(succeeded[0].correlation_id.as_deref(), Some("req-2"));
}

#[tokio::test]
async fn store_failures_do_not_change_the_outcome() {
    let journal = Journal::new();
    let controller = RefreshQueueController::builder(
        ScriptedReplayer::new([offline(), Ok(200)]),
        JournalSink::new(journal.clone()),
    )
    .store(JournalStore::failing(journal.clone()))
    .with_sleeper(InstantSleeper)
    .build()
    .unwrap();
    let queue = JournalQueue::new("refresh-queue", journal.clone());
    controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", None))
        .await
        .unwrap();

    assert_eq!(controller.process_refresh_queue(&queue).await.unwrap(), 1);
    assert_eq!(journal.attempts(), 2);
    assert_eq!(journal.successes(), 1);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn backoff_is_applied_between_attempts() {
    let sleeper = TrackingSleeper::new();
    let controller =
        RefreshQueueController::builder(ScriptedReplayer::always(Ok(502)), MemorySink::new())
            .backoff(Backoff::constant(Duration::from_millis(50)))
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();
    let queue = InMemoryRetryQueue::new("refresh-queue");
    controller
        .enqueue_failed(&queue, refresh_post("https://app.test/api/refresh", None))
        .await
        .unwrap();

    controller.process_refresh_queue(&queue).await.unwrap_err();
    // No sleep after the final attempt.
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(50); 2]);
}

#[tokio::test]
async fn concurrent_drains_do_not_lose_entries() {
    let replayer = ScriptedReplayer::always(Ok(200));
    let controller = Arc::new(
        RefreshQueueController::builder(replayer.clone(), MemorySink::new())
            .with_sleeper(InstantSleeper)
            .build()
            .unwrap(),
    );
    let queue = Arc::new(InMemoryRetryQueue::new("refresh-queue"));
    for n in 0..20 {
        let url = format!("https://app.test/api/refresh?n={n}");
        controller.enqueue_failed(&*queue, refresh_post(&url, None)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let controller = controller.clone();
        let queue = queue.clone();
        handles.push(tokio::spawn(async move { controller.process_refresh_queue(&*queue).await }));
    }
    let mut delivered = 0;
    for handle in handles {
        delivered += handle.await.unwrap().unwrap();
    }

    assert_eq!(delivered, 20);
    assert_eq!(replayer.calls(), 20);
    let order: Vec<_> = replayer.requests().into_iter().map(|r| r.url).collect();
    let expected: Vec<_> = (0..20).map(|n| format!("https://app.test/api/refresh?n={n}")).collect();
    assert_eq!(order, expected);
}
