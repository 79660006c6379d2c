use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use etcd_client::LeaseGrantOptions;
use rand::Rng;
use rust_etcd_coordinator::{
    allocator::{LeaseIdAllocator, MAX_SAFE_LEASE_ID, MIN_LEASE_ID},
    endpoint::EndpointPool,
    lease::LeaseManager,
    Error, ScopeError,
};

mod common;

async fn lease_is_gone(etcd: &mut etcd_client::Client, lease_id: i64) -> bool {
    match etcd.lease_time_to_live(lease_id, None).await {
        Ok(resp) => resp.ttl() <= 0,
        Err(_) => true,
    }
}

#[tokio::test]
async fn it_should_automatically_refresh_lease() {
    let coordinator = common::get_coordinator().await;

    let lease = coordinator
        .acquire_lease(Duration::from_secs(2))
        .await
        .expect("failed to create lease");
    let lease_expire_notify = lease.get_lease_expire_notify();

    tokio::select! {
        _ = lease_expire_notify.recv() => {
            panic!("lease expired before the lease duration");
        }
        _ = tokio::time::sleep(Duration::from_secs(6)) => {}
    }
    assert!(lease.is_alive().await.expect("failed to query lease"));
    lease.release().await.expect("failed to release lease");
}

#[tokio::test]
async fn lease_id_should_stay_within_safe_bounds() {
    let coordinator = common::get_coordinator().await;

    let lease = coordinator
        .acquire_lease(Duration::from_secs(5))
        .await
        .expect("failed to create lease");
    assert!(lease.lease_id() >= MIN_LEASE_ID);
    assert!(lease.lease_id() < MAX_SAFE_LEASE_ID);
    lease.release().await.expect("failed to release lease");
}

#[tokio::test]
async fn released_lease_should_be_revoked() {
    let coordinator = common::get_coordinator().await;
    let mut etcd = common::get_etcd_client().await;

    let lease = coordinator
        .acquire_lease(Duration::from_secs(10))
        .await
        .expect("failed to create lease");
    let lease_id = lease.lease_id();
    let lease_expire_notify = lease.get_lease_expire_notify();

    lease.release().await.expect("failed to release lease");

    let _ = lease_expire_notify.recv().await;
    assert!(lease_is_gone(&mut etcd, lease_id).await);
}

#[tokio::test]
async fn dropped_lease_should_be_revoked_in_the_background() {
    let coordinator = common::get_coordinator().await;
    let mut etcd = common::get_etcd_client().await;

    let lease = coordinator
        .acquire_lease(Duration::from_secs(10))
        .await
        .expect("failed to create lease");
    let lease_id = lease.lease_id();
    let lease_expire_notify = lease.get_lease_expire_notify();
    let lease_expire_notify_clone = lease_expire_notify.clone();

    drop(lease);

    let _ = lease_expire_notify.recv().await;
    let _ = lease_expire_notify_clone.recv().await;
    assert!(lease_is_gone(&mut etcd, lease_id).await);
}

#[tokio::test]
async fn revoke_after_lost_keep_alive_should_report_the_keep_alive_failure() {
    let coordinator = common::get_coordinator().await;
    let mut etcd = common::get_etcd_client().await;

    let lease = coordinator
        .acquire_lease(Duration::from_secs(2))
        .await
        .expect("failed to create lease");
    let lease_expire_notify = lease.get_lease_expire_notify();

    etcd.lease_revoke(lease.lease_id())
        .await
        .expect("failed to revoke lease");

    let _ = lease_expire_notify.recv().await;
    assert!(!lease.is_alive().await.expect("failed to query lease"));

    let result = lease.release().await;
    assert!(matches!(result, Err(Error::KeepAliveStreamFailure { .. })));
}

#[tokio::test]
async fn with_lease_should_return_the_work_value_and_revoke() {
    let coordinator = common::get_coordinator().await;
    let mut etcd = common::get_etcd_client().await;

    let seen = Arc::new(AtomicI64::new(0));
    let seen2 = Arc::clone(&seen);
    let value = coordinator
        .with_lease(Duration::from_secs(5), |lease_id| async move {
            seen2.store(lease_id, Ordering::SeqCst);
            Ok::<_, std::io::Error>("done")
        })
        .await
        .expect("with_lease failed");

    assert_eq!(value, "done");
    assert!(lease_is_gone(&mut etcd, seen.load(Ordering::SeqCst)).await);
}

#[tokio::test]
async fn with_lease_should_revoke_even_if_the_work_fails() {
    let coordinator = common::get_coordinator().await;
    let mut etcd = common::get_etcd_client().await;

    let seen = Arc::new(AtomicI64::new(0));
    let seen2 = Arc::clone(&seen);
    let result: Result<(), _> = coordinator
        .with_lease(Duration::from_secs(5), |lease_id| async move {
            seen2.store(lease_id, Ordering::SeqCst);
            Err(std::io::Error::other("work failed"))
        })
        .await;

    match result {
        Err(ScopeError::Work { source, teardown }) => {
            assert_eq!(source.to_string(), "work failed");
            assert!(teardown.is_empty());
        }
        _ => panic!("expected the work error"),
    }
    assert!(lease_is_gone(&mut etcd, seen.load(Ordering::SeqCst)).await);
}

#[tokio::test]
async fn sub_second_ttl_should_be_rejected() {
    let coordinator = common::get_coordinator().await;

    let result = coordinator
        .acquire_lease(Duration::from_millis(500))
        .await;
    assert!(matches!(result, Err(Error::InvalidTtl(_))));
}

#[tokio::test]
async fn colliding_lease_id_should_be_retried_under_the_next_candidate() {
    let mut etcd = common::get_etcd_client().await;

    let taken = rand::thread_rng().gen_range(MIN_LEASE_ID..MAX_SAFE_LEASE_ID / 2);
    etcd.lease_grant(30, Some(LeaseGrantOptions::new().with_id(taken)))
        .await
        .expect("failed to grant lease");

    let pool = EndpointPool::from_clients(vec![("http://localhost:2379".to_string(), etcd.clone())])
        .expect("failed to build pool");

    let single_attempt = LeaseManager::new(
        pool.clone(),
        Arc::new(LeaseIdAllocator::starting_at(taken, MIN_LEASE_ID)),
    )
    .with_retry_count(1);
    let result = single_attempt.acquire(Duration::from_secs(5)).await;
    assert!(matches!(
        result,
        Err(Error::LeaseAcquisitionExhausted { attempts: 1, .. })
    ));

    let two_attempts = LeaseManager::new(
        pool,
        Arc::new(LeaseIdAllocator::starting_at(taken, MIN_LEASE_ID)),
    )
    .with_retry_count(2);
    let lease = two_attempts
        .acquire(Duration::from_secs(5))
        .await
        .expect("failed to create lease");
    assert_eq!(lease.lease_id(), taken + 1);

    lease.release().await.expect("failed to release lease");
    etcd.lease_revoke(taken).await.expect("failed to revoke lease");
}

#[tokio::test]
async fn ttl_beyond_i64_seconds_should_be_rejected_without_granting() {
    let coordinator = common::get_coordinator().await;

    let result = coordinator
        .acquire_lease(Duration::from_secs(u64::MAX))
        .await;
    assert!(matches!(result, Err(Error::InvalidTtl(_))));
}
