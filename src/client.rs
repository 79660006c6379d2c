use {
    crate::{
        allocator::LeaseIdAllocator,
        config::CoordinatorConfig,
        endpoint::EndpointPool,
        error::{Error, ScopeError},
        kv::KvClient,
        lease::{Lease, LeaseManager},
        lock::{LockCoordinator, LockOptions},
        watcher::WatchSession,
        LeaseId,
    },
    serde::{de::DeserializeOwned, Serialize},
    std::{future::Future, sync::Arc, time::Duration},
};

///
/// Leases, locks, key-value operations and watches over one or more etcd endpoints.
///
/// Cloning is cheap and every clone shares the same lease id allocator.
///
/// Examples
///
/// ```no_run
/// use rust_etcd_coordinator::{CoordinatorConfig, EtcdCoordinator};
///
/// # async fn run() -> Result<(), rust_etcd_coordinator::Error> {
/// let coordinator = EtcdCoordinator::connect(CoordinatorConfig::new(["http://localhost:2379"])).await?;
///
/// coordinator.kv_put("greeting", "hello").await?;
/// assert_eq!(coordinator.kv_get("greeting").await?.as_deref(), Some("hello"));
/// # Ok(())
/// # }
/// ```
///
#[derive(Clone)]
pub struct EtcdCoordinator {
    endpoints: EndpointPool,
    leases: LeaseManager,
    locks: LockCoordinator,
    kv: KvClient,
}

impl EtcdCoordinator {
    ///
    /// Connects to every configured host.
    ///
    pub async fn connect(config: CoordinatorConfig) -> Result<Self, Error> {
        config.validate()?;
        let endpoints = EndpointPool::connect(&config.hosts, config.connect_options()).await?;
        Ok(Self::with_endpoints(endpoints, &config))
    }

    ///
    /// Builds a coordinator over already connected endpoints.
    ///
    pub fn with_endpoints(endpoints: EndpointPool, config: &CoordinatorConfig) -> Self {
        let allocator = Arc::new(LeaseIdAllocator::new(config.min_lease_id));
        let leases = LeaseManager::new(endpoints.clone(), allocator)
            .with_retry_count(config.lease_retry_count);
        let locks = LockCoordinator::new(endpoints.clone(), leases.clone())
            .with_default_ttl(config.default_lock_ttl());
        let kv = KvClient::new(endpoints.clone());
        Self {
            endpoints,
            leases,
            locks,
            kv,
        }
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn kv(&self) -> &KvClient {
        &self.kv
    }

    pub fn endpoints(&self) -> &EndpointPool {
        &self.endpoints
    }

    pub async fn acquire_lease(&self, ttl: Duration) -> Result<Lease, Error> {
        self.leases.acquire(ttl).await
    }

    ///
    /// See [`LeaseManager::with_lease`].
    ///
    pub async fn with_lease<T, E, F, Fut>(&self, ttl: Duration, f: F) -> Result<T, ScopeError<E>>
    where
        F: FnOnce(LeaseId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.leases.with_lease(ttl, f).await
    }

    ///
    /// See [`LockCoordinator::with_lock`].
    ///
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        options: impl Into<LockOptions>,
        f: F,
    ) -> Result<T, ScopeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.locks.with_lock(options, f).await
    }

    pub async fn kv_put(&self, key: &str, value: &str) -> Result<(), Error> {
        self.kv.put(key, value).await
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, Error> {
        self.kv.get(key).await
    }

    pub async fn kv_delete(&self, key: &str) -> Result<Option<String>, Error> {
        self.kv.delete(key).await
    }

    pub async fn kv_put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        self.kv.put_json(key, value).await
    }

    pub async fn kv_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.kv.get_json(key).await
    }

    ///
    /// Opens a [`WatchSession`] on `key`, on a randomly picked endpoint.
    ///
    pub async fn watch(&self, key: &str) -> Result<WatchSession, Error> {
        WatchSession::open(self.endpoints.pick(), key).await
    }
}
