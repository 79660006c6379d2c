use std::time::Duration;

use common::random_str;
use futures::StreamExt;
use rust_etcd_coordinator::WatchEvent;

mod common;

const DELIVERY_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn it_should_deliver_put_then_absent_on_delete() {
    let coordinator = common::get_coordinator().await;
    let key = random_str(10);

    let mut session = coordinator.watch(&key).await.expect("failed to watch");

    coordinator.kv_put(&key, "v1").await.expect("failed to put");
    let event = tokio::time::timeout(DELIVERY_DEADLINE, session.recv())
        .await
        .expect("no put event")
        .expect("session ended")
        .expect("watch failed");
    assert_eq!(event, WatchEvent::Put("v1".to_string()));

    coordinator.kv_delete(&key).await.expect("failed to delete");
    let event = tokio::time::timeout(DELIVERY_DEADLINE, session.next())
        .await
        .expect("no delete event")
        .expect("session ended")
        .expect("watch failed");
    assert_eq!(event, WatchEvent::Absent);

    session.end().await.expect("failed to end session");
}

#[tokio::test]
async fn each_put_should_be_delivered_exactly_once() {
    let coordinator = common::get_coordinator().await;
    let key = random_str(10);

    let mut session = coordinator.watch(&key).await.expect("failed to watch");

    for i in 0..3 {
        coordinator
            .kv_put(&key, &format!("v{i}"))
            .await
            .expect("failed to put");
    }
    for i in 0..3 {
        let event = tokio::time::timeout(DELIVERY_DEADLINE, session.recv())
            .await
            .expect("missing event")
            .expect("session ended")
            .expect("watch failed");
        assert_eq!(event, WatchEvent::Put(format!("v{i}")));
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(300), session.recv())
            .await
            .is_err(),
        "unexpected extra event"
    );

    session.end().await.expect("failed to end session");
    coordinator.kv_delete(&key).await.expect("failed to delete");
}

#[tokio::test]
async fn ending_a_session_right_after_opening_it_should_not_fail() {
    let coordinator = common::get_coordinator().await;
    let key = random_str(10);

    let session = coordinator.watch(&key).await.expect("failed to watch");
    let watch_id = session.watch_id();
    assert!(watch_id >= 0);
    // The cancel for the acknowledged id goes out even though no event was seen.
    session.end().await.expect("failed to end session");
}

#[tokio::test]
async fn dropping_a_session_should_not_affect_other_sessions() {
    let coordinator = common::get_coordinator().await;
    let key = random_str(10);

    let dropped = coordinator.watch(&key).await.expect("failed to watch");
    let mut kept = coordinator.watch(&key).await.expect("failed to watch");
    drop(dropped);
    tokio::time::sleep(Duration::from_millis(200)).await;

    coordinator.kv_put(&key, "still here").await.expect("failed to put");
    let event = tokio::time::timeout(DELIVERY_DEADLINE, kept.recv())
        .await
        .expect("no put event")
        .expect("session ended")
        .expect("watch failed");
    assert_eq!(event.value(), Some("still here"));

    kept.end().await.expect("failed to end session");
    coordinator.kv_delete(&key).await.expect("failed to delete");
}
