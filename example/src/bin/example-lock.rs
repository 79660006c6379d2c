use core::time::Duration;

use rust_etcd_coordinator::{CoordinatorConfig, EtcdCoordinator, LockOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let coordinator = EtcdCoordinator::connect(CoordinatorConfig::new(["http://localhost:2379"]))
        .await
        .expect("failed to connect to etcd");

    let lease_duration = Duration::from_secs(2);
    let lock_name = "example-lock";

    let coordinator2 = coordinator.clone();
    let h = tokio::spawn(async move {
        // Give the main task a head start so it grabs the lock first.
        tokio::time::sleep(Duration::from_millis(100)).await;
        coordinator2
            .with_lock(lock_name, || async {
                println!("Lock acquired in task 2!");
                Ok::<_, std::io::Error>(())
            })
            .await
            .expect("task 2 failed to lock");
    });

    coordinator
        .with_lock(
            LockOptions::new(lock_name).with_ttl(lease_duration),
            || async {
                println!("Lock acquired in main task!");
                println!("Sleeping for 5 second...");
                for i in 1..=5 {
                    println!("{}...", i);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                println!("Releasing lock!");
                Ok::<_, std::io::Error>(())
            },
        )
        .await
        .expect("failed to lock");

    println!("Waiting for task 2 to acquire lock...");
    h.await.expect("task 2 failed to acquire lock");
    println!("Finished!");
}
