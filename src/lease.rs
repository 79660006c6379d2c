use {
    crate::{
        allocator::LeaseIdAllocator,
        config::DEFAULT_LEASE_RETRY_COUNT,
        endpoint::EndpointPool,
        error::{Error, RemoteCall, ScopeError},
        retry::{is_not_found, retry_with_strategy},
        LeaseId,
    },
    etcd_client::{LeaseGrantOptions, LeaseKeepAliveStream, LeaseKeeper},
    futures::StreamExt,
    retry::delay::NoDelay,
    std::{future::Future, sync::Arc, time::Duration},
    tokio::{
        sync::{broadcast, oneshot},
        task::JoinHandle,
        time::Instant,
    },
    tracing::{error, info, trace, warn},
};

// Jiffy is interval between system timer interrupts, typically 10ms for linux systems.
const AT_LEAST_10_JIFFIES: Duration = Duration::from_millis(100);

///
/// How the renewal task of a [`Lease`] ended.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeepAliveOutcome {
    /// Stopped by [`Lease::release`].
    Stopped,
    /// The keep alive stream failed or the store reported the lease expired.
    /// The lease is considered lost from that point on.
    Dead(String),
    /// The [`Lease`] was dropped without being released, the renewal task revoked it.
    Orphaned,
}

///
/// A granted lease kept alive by a background task until it is released.
///
/// Call [`Lease::release`] to stop the renewal and revoke the lease. Dropping a `Lease` instead
/// makes the renewal task revoke it in the background, any failure is only logged.
///
pub struct Lease {
    etcd: etcd_client::Client,
    lease_id: LeaseId,
    ttl: Duration,
    tx_terminate: Option<oneshot::Sender<()>>,
    keep_alive_handle: Option<JoinHandle<KeepAliveOutcome>>,
    rx_lease_expire: broadcast::Receiver<()>,
}

///
/// Notify when the lease renewal has stopped, for whatever reason.
///
pub struct LeaseExpiredNotify {
    inner: broadcast::Receiver<()>,
}

impl LeaseExpiredNotify {
    ///
    /// Wait until the lease is no longer renewed.
    ///
    pub async fn recv(mut self) {
        let _ = self.inner.recv().await;
    }
}

impl Clone for LeaseExpiredNotify {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.resubscribe(),
        }
    }
}

impl Lease {
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_lease_expire_notify(&self) -> LeaseExpiredNotify {
        LeaseExpiredNotify {
            inner: self.rx_lease_expire.resubscribe(),
        }
    }

    ///
    /// Asks the store whether the lease still has time left.
    ///
    pub async fn is_alive(&self) -> Result<bool, Error> {
        match self
            .etcd
            .lease_client()
            .time_to_live(self.lease_id, None)
            .await
        {
            Ok(resp) => Ok(resp.ttl() > 0),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::remote(RemoteCall::TimeToLive)(e)),
        }
    }

    ///
    /// Stops the renewal loop, waits for it to exit and revokes the lease.
    ///
    /// Stopping is idempotent: a renewal loop that already died is fine.
    /// A failed revoke is returned as is and never retried, the lease then expires on its own
    /// within its ttl.
    ///
    pub async fn release(mut self) -> Result<(), Error> {
        let lease_id = self.lease_id;
        if let Some(tx) = self.tx_terminate.take() {
            let _ = tx.send(());
        }
        let outcome = match self.keep_alive_handle.take() {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => KeepAliveOutcome::Dead(format!("keep alive task failed: {e}")),
            },
            None => KeepAliveOutcome::Stopped,
        };
        trace!("keep alive for lease {lease_id:?} ended with {outcome:?}, revoking");

        match self.etcd.lease_revoke(lease_id).await {
            Ok(_) => {
                info!("revoked lease {lease_id:?}");
                Ok(())
            }
            Err(source) => {
                error!("failed to revoke lease {lease_id:?}, got {source:?}");
                match outcome {
                    KeepAliveOutcome::Dead(reason) => Err(Error::KeepAliveStreamFailure {
                        lease_id,
                        reason,
                        source,
                    }),
                    _ => Err(Error::remote(RemoteCall::Revoke)(source)),
                }
            }
        }
    }
}

///
/// Grants leases under client-chosen ids and keeps them alive.
///
/// Cloning is cheap, every clone shares the same id allocator.
///
#[derive(Clone)]
pub struct LeaseManager {
    endpoints: EndpointPool,
    allocator: Arc<LeaseIdAllocator>,
    retry_count: usize,
}

impl LeaseManager {
    pub fn new(endpoints: EndpointPool, allocator: Arc<LeaseIdAllocator>) -> Self {
        Self {
            endpoints,
            allocator,
            retry_count: DEFAULT_LEASE_RETRY_COUNT,
        }
    }

    ///
    /// Sets the number of grant attempts, at least one attempt is always made.
    ///
    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    pub fn allocator(&self) -> &LeaseIdAllocator {
        &self.allocator
    }

    ///
    /// Grants a new lease with the given ttl and starts renewing it every `ttl / 2`.
    ///
    /// Two clients could pick the same candidate id, so a failed grant is retried under the
    /// next candidate until `retry_count` attempts have been made.
    ///
    /// Arguments:
    ///
    /// * `ttl` - The time-to-live for the lease, at least one second. Sub-second precision is dropped.
    ///
    pub async fn acquire(&self, ttl: Duration) -> Result<Lease, Error> {
        let ttl_secs = ttl_secs(ttl)?;
        let ttl = Duration::from_secs(ttl.as_secs());
        let etcd = self.endpoints.pick();

        let grant = retry_with_strategy(NoDelay.take(self.retry_count - 1), |attempt| {
            let candidate = self.allocator.next_candidate();
            let mut etcd = etcd.clone();
            async move {
                trace!("granting lease {candidate:?} (attempt {attempt})");
                etcd.lease_grant(ttl_secs, Some(LeaseGrantOptions::new().with_id(candidate)))
                    .await
            }
        })
        .await;

        let lease_id = match grant {
            Ok(resp) => resp.id(),
            Err((attempts, source)) => {
                return Err(Error::LeaseAcquisitionExhausted { attempts, source })
            }
        };
        info!("granted lease {lease_id:?} with ttl {ttl_secs}s");

        let (tx_terminate, rx_terminate) = oneshot::channel();
        let (tx_expired, rx_expired) = broadcast::channel(1);
        let handle = tokio::spawn(keep_alive(
            etcd.clone(),
            lease_id,
            ttl,
            ttl_secs,
            rx_terminate,
            tx_expired,
        ));

        Ok(Lease {
            etcd,
            lease_id,
            ttl,
            tx_terminate: Some(tx_terminate),
            keep_alive_handle: Some(handle),
            rx_lease_expire: rx_expired,
        })
    }

    pub async fn release(&self, lease: Lease) -> Result<(), Error> {
        lease.release().await
    }

    ///
    /// Runs `f` while holding a fresh lease.
    ///
    /// The lease is acquired before `f` starts and released once it finishes, whatever the outcome.
    /// `f` receives the lease id and its value is returned to the caller.
    ///
    pub async fn with_lease<T, E, F, Fut>(&self, ttl: Duration, f: F) -> Result<T, ScopeError<E>>
    where
        F: FnOnce(LeaseId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lease = self
            .acquire(ttl)
            .await
            .map_err(|source| ScopeError::Setup {
                source,
                teardown: vec![],
            })?;
        let outcome = f(lease.lease_id()).await;
        let teardown = lease.release().await.err().into_iter().collect();
        ScopeError::finish(outcome, teardown)
    }
}

///
/// Whole seconds of `ttl` as etcd expects them, rejecting anything below one second or beyond
/// what etcd can represent.
///
fn ttl_secs(ttl: Duration) -> Result<i64, Error> {
    match i64::try_from(ttl.as_secs()) {
        Ok(secs) if secs >= 1 => Ok(secs),
        _ => Err(Error::InvalidTtl(ttl)),
    }
}

async fn renew_once(
    keeper: &mut LeaseKeeper,
    stream: &mut LeaseKeepAliveStream,
    at: Instant,
) -> Result<i64, String> {
    tokio::time::sleep_until(at).await;
    keeper
        .keep_alive()
        .await
        .map_err(|e| format!("failed to send keep alive: {e}"))?;
    match stream.next().await {
        Some(Ok(resp)) => Ok(resp.ttl()),
        Some(Err(e)) => Err(format!("keep alive stream errored: {e}")),
        None => Err("keep alive stream ended".to_string()),
    }
}

async fn keep_alive(
    mut etcd: etcd_client::Client,
    lease_id: LeaseId,
    ttl: Duration,
    ttl_secs: i64,
    mut rx_terminate: oneshot::Receiver<()>,
    tx_expired: broadcast::Sender<()>,
) -> KeepAliveOutcome {
    let keepalive_interval = ttl / 2;

    let outcome = match etcd.lease_keep_alive(lease_id).await {
        Ok((mut keeper, mut stream)) => {
            let mut next_renewal = Instant::now();
            let mut last_keep_alive: Option<Instant> = None;
            'renewal: loop {
                tokio::select! {
                    stop = &mut rx_terminate => {
                        break 'renewal match stop {
                            Ok(()) => KeepAliveOutcome::Stopped,
                            Err(_) => KeepAliveOutcome::Orphaned,
                        };
                    }
                    result = renew_once(&mut keeper, &mut stream, next_renewal) => {
                        match result {
                            Ok(0) => {
                                error!("lease {lease_id:?} expired");
                                break 'renewal KeepAliveOutcome::Dead("lease expired".to_string());
                            }
                            Ok(remaining) => {
                                if let Some(last) = last_keep_alive {
                                    let since_last_keep_alive = last.elapsed();
                                    if since_last_keep_alive > keepalive_interval {
                                        let dt = since_last_keep_alive - keepalive_interval;
                                        if dt >= AT_LEAST_10_JIFFIES {
                                            warn!("last keep alive was {dt:?} late");
                                        }
                                    }
                                }
                                if remaining < ttl_secs {
                                    warn!("lease {lease_id:?} ttl reduced to {remaining}");
                                }
                                trace!("keep alive lease {lease_id:?}, ttl {remaining}");
                                let now = Instant::now();
                                last_keep_alive = Some(now);
                                next_renewal = now + keepalive_interval;
                            }
                            Err(reason) => {
                                warn!("keep alive for lease {lease_id:?} died: {reason}");
                                break 'renewal KeepAliveOutcome::Dead(reason);
                            }
                        }
                    }
                }
            }
        }
        Err(e) => {
            error!("failed to open keep alive stream for lease {lease_id:?}, got {e:?}");
            KeepAliveOutcome::Dead(format!("failed to open keep alive stream: {e}"))
        }
    };

    if outcome == KeepAliveOutcome::Orphaned {
        info!("lease {lease_id:?} dropped without release, revoking");
        match etcd.lease_revoke(lease_id).await {
            Ok(_) => {}
            Err(e) if is_not_found(&e) => warn!("lease {lease_id:?} was already deleted"),
            Err(e) => error!("failed to revoke orphaned lease {lease_id:?}, got {e:?}"),
        }
    }
    let _ = tx_expired.send(());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_should_be_truncated_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_millis(2500)).unwrap(), 2);
        assert_eq!(ttl_secs(Duration::from_secs(1)).unwrap(), 1);
    }

    #[test]
    fn sub_second_ttl_should_be_invalid() {
        assert!(matches!(
            ttl_secs(Duration::from_millis(999)),
            Err(Error::InvalidTtl(_))
        ));
    }

    #[test]
    fn ttl_beyond_i64_seconds_should_be_invalid() {
        let ttl = Duration::from_secs(i64::MAX as u64 + 1);
        assert!(matches!(ttl_secs(ttl), Err(Error::InvalidTtl(t)) if t == ttl));
        assert!(matches!(
            ttl_secs(Duration::from_secs(u64::MAX)),
            Err(Error::InvalidTtl(_))
        ));
    }
}
