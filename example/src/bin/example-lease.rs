use core::time::Duration;

use rust_etcd_coordinator::{CoordinatorConfig, EtcdCoordinator};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let coordinator = EtcdCoordinator::connect(CoordinatorConfig::new(["http://localhost:2379"]))
        .await
        .expect("failed to connect to etcd");

    // The lease is renewed every second in the background, so it outlives its 2 second ttl
    // until the work below returns.
    let result = coordinator
        .with_lease(Duration::from_secs(2), |lease_id| async move {
            println!("Holding lease {lease_id}");
            let now = tokio::time::Instant::now();
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = async {
                    loop {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        println!("Lease {lease_id} still held after {:?}", now.elapsed());
                    }
                } => {}
            }
            Ok::<_, std::io::Error>(lease_id)
        })
        .await;

    match result {
        Ok(lease_id) => println!("Lease {lease_id} revoked!"),
        Err(e) => eprintln!("lease scope failed: {e}"),
    }
}
