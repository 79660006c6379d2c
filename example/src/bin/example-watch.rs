use futures::StreamExt;
use rust_etcd_coordinator::{CoordinatorConfig, EtcdCoordinator, WatchEvent};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let coordinator = EtcdCoordinator::connect(CoordinatorConfig::new(["http://localhost:2379"]))
        .await
        .expect("failed to connect to etcd");

    let key = "example-watch";
    let mut session = coordinator.watch(key).await.expect("failed to watch");

    println!("Watching `{key}`, try `etcdctl put {key} hello`. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = session.next() => {
                match event {
                    Some(Ok(WatchEvent::Put(value))) => println!("{key} = {value}"),
                    Some(Ok(WatchEvent::Absent)) => println!("{key} deleted"),
                    Some(Err(e)) => {
                        eprintln!("watch failed: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    session.end().await.expect("failed to end watch session");
    println!("Finished!");
}
