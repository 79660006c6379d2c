use {
    super::{
        endpoint::EndpointPool,
        error::{Error, RemoteCall, ScopeError},
        lease::LeaseManager,
        LeaseId,
    },
    crate::config::DEFAULT_LOCK_TTL_SECS,
    std::{future::Future, time::Duration},
    tracing::{info, trace, warn},
};

///
/// Name and lease ttl of a lock.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    pub name: String,
    pub ttl: Option<Duration>,
}

impl LockOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl From<&str> for LockOptions {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for LockOptions {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

///
/// Opaque key of a granted lock, needed to unlock it.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey(Vec<u8>);

impl LockKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

///
/// Named mutual exclusion on top of [`LeaseManager`] leases.
///
/// A lock is only valid as long as its lease: if the lease expires, etcd forfeits the lock even if
/// the holder did not notice yet.
///
/// Examples
///
/// ```no_run
/// use rust_etcd_coordinator::{CoordinatorConfig, EtcdCoordinator, LockOptions};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let coordinator = EtcdCoordinator::connect(CoordinatorConfig::new(["http://localhost:2379"])).await?;
///
/// let value = coordinator
///     .locks()
///     .with_lock(LockOptions::new("my-lock").with_ttl(Duration::from_secs(5)), || async {
///         Ok::<_, std::io::Error>(42)
///     })
///     .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
///
#[derive(Clone)]
pub struct LockCoordinator {
    endpoints: EndpointPool,
    lease_manager: LeaseManager,
    default_ttl: Duration,
}

impl LockCoordinator {
    pub fn new(endpoints: EndpointPool, lease_manager: LeaseManager) -> Self {
        Self {
            endpoints,
            lease_manager,
            default_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    ///
    /// Blocks until the lock `name` is granted to `lease_id`.
    ///
    /// etcd queues waiters fairly, there is no client-side polling nor deadline.
    ///
    pub async fn lock(&self, name: &str, lease_id: LeaseId) -> Result<LockKey, Error> {
        trace!("waiting for lock {name} with lease {lease_id:?}");
        let resp = self
            .endpoints
            .pick()
            .lock(
                name,
                Some(etcd_client::LockOptions::new().with_lease(lease_id)),
            )
            .await
            .map_err(Error::remote(RemoteCall::Lock))?;
        info!("acquired lock {name} with lease {lease_id:?}");
        Ok(LockKey(resp.key().to_vec()))
    }

    pub async fn unlock(&self, key: LockKey) -> Result<(), Error> {
        self.endpoints
            .pick()
            .unlock(key.0)
            .await
            .map_err(Error::remote(RemoteCall::Unlock))?;
        Ok(())
    }

    ///
    /// Runs `f` while holding the lock.
    ///
    /// A lease is acquired first, then the lock is requested under it. Once `f` finishes, the
    /// lock is unlocked and the lease released, in that order and whatever the outcome.
    /// A failed unlock never prevents the lease from being released, so a double failure leaves
    /// the lock held for at most the lease's remaining ttl.
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
        let LockOptions { name, ttl } = options.into();
        let ttl = ttl.unwrap_or(self.default_ttl);

        let lease = self
            .lease_manager
            .acquire(ttl)
            .await
            .map_err(|source| ScopeError::Setup {
                source,
                teardown: vec![],
            })?;

        let mut teardown = vec![];
        let outcome = match self.lock(&name, lease.lease_id()).await {
            Ok(key) => {
                let outcome = f().await;
                if let Err(e) = self.unlock(key).await {
                    // Expected when the lease died while the lock was held.
                    warn!("failed to unlock {name}: {e}");
                    teardown.push(e);
                }
                Ok(outcome)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = lease.release().await {
            teardown.push(e);
        }

        match outcome {
            Ok(outcome) => ScopeError::finish(outcome, teardown),
            Err(source) => Err(ScopeError::Setup { source, teardown }),
        }
    }
}
