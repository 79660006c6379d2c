use rust_etcd_coordinator::{CoordinatorConfig, EtcdCoordinator};

pub async fn get_coordinator() -> EtcdCoordinator {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    EtcdCoordinator::connect(CoordinatorConfig::new(["http://localhost:2379"]))
        .await
        .expect("failed to connect to etcd")
}

#[allow(dead_code)]
pub async fn get_etcd_client() -> etcd_client::Client {
    etcd_client::Client::connect(["http://localhost:2379"], None)
        .await
        .expect("failed to connect to etcd")
}

#[allow(dead_code)]
pub fn random_str(len: usize) -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};
    let mut rng = thread_rng();
    (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
