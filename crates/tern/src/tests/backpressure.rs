//! A failing broker holds the head of the queue.

use super::harness::{wait_until, HarnessOptions, TestHarness};
use crate::message::Topic;

#[tokio::test]
async fn failed_head_is_retried_not_skipped() {
    let mut h = TestHarness::start(HarnessOptions::default()).await;
    h.broker.set_down(true);

    h.emit(Topic::Event, b"head").await.unwrap();
    h.emit(Topic::Event, b"next").await.unwrap();

    // Several rounds of three attempts each, all on the head.
    let broker = h.broker.clone();
    assert!(wait_until(|| broker.attempts() >= 7).await);
    assert_eq!(h.broker.published_count(), 0);
    assert_eq!(h.files_on_disk(), 2);

    h.broker.set_down(false);
    assert!(wait_until(|| broker.published_count() == 2).await);
    assert_eq!(
        h.broker.published_payloads(),
        vec![b"head".to_vec(), b"next".to_vec()]
    );

    h.shutdown().await;
}

#[tokio::test]
async fn transient_failures_are_absorbed_by_retries() {
    let mut h = TestHarness::start(HarnessOptions::default()).await;
    h.broker.fail_next(2);

    h.emit(Topic::Event, b"x").await.unwrap();

    let broker = h.broker.clone();
    assert!(wait_until(|| broker.published_count() == 1).await);
    assert_eq!(h.broker.attempts(), 3);
    assert!(wait_until(|| h.files_on_disk() == 0).await);

    h.shutdown().await;
}

#[tokio::test]
async fn sources_keep_persisting_while_the_broker_is_down() {
    let mut h = TestHarness::start(HarnessOptions::default()).await;
    h.broker.set_down(true);

    let emitting = async {
        for i in 0..50u8 {
            h.emit(Topic::Event, &[i]).await.unwrap();
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(2), emitting)
        .await
        .expect("queue should absorb messages while the head is stuck");
    assert_eq!(h.files_on_disk(), 50);

    h.broker.set_down(false);
    let broker = h.broker.clone();
    assert!(wait_until(|| broker.published_count() == 50).await);
    assert!(wait_until(|| h.files_on_disk() == 0).await);

    h.shutdown().await;
}

#[tokio::test]
async fn broker_is_closed_on_shutdown() {
    let mut h = TestHarness::start(HarnessOptions::default()).await;
    h.emit(Topic::Log, b"bye").await.unwrap();

    let broker = h.broker.clone();
    assert!(wait_until(|| broker.published_count() == 1).await);
    assert!(!h.broker.is_closed());

    h.shutdown().await;
    assert!(h.broker.is_closed());
}
