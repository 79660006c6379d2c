use {
    crate::{allocator::MIN_LEASE_ID, error::Error, LeaseId},
    serde::Deserialize,
    std::time::Duration,
};

pub const DEFAULT_LEASE_RETRY_COUNT: usize = 1000;
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;

///
/// Configuration of an [`crate::EtcdCoordinator`].
///
/// Every field but `hosts` has a default, so the smallest valid json document is
/// `{"hosts": ["http://localhost:2379"]}`.
///
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordinatorConfig {
    /// etcd endpoints, one is picked at random for every top-level operation.
    pub hosts: Vec<String>,

    /// Number of lease grant attempts, each under a fresh candidate id.
    #[serde(default = "default_lease_retry_count")]
    pub lease_retry_count: usize,

    /// Smallest candidate lease id handed out by the allocator.
    #[serde(default = "default_min_lease_id")]
    pub min_lease_id: LeaseId,

    /// Lease ttl for locks whose options do not name one.
    #[serde(default = "default_lock_ttl_secs")]
    pub default_lock_ttl_secs: u64,

    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

fn default_lease_retry_count() -> usize {
    DEFAULT_LEASE_RETRY_COUNT
}

fn default_min_lease_id() -> LeaseId {
    MIN_LEASE_ID
}

fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}

impl CoordinatorConfig {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            lease_retry_count: DEFAULT_LEASE_RETRY_COUNT,
            min_lease_id: MIN_LEASE_ID,
            default_lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            connect_timeout_ms: None,
            request_timeout_ms: None,
        }
    }

    ///
    /// Parses and validates a json configuration document.
    ///
    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.hosts.is_empty() {
            return Err(Error::NoEndpoints);
        }
        if self.lease_retry_count == 0 {
            return Err(Error::Config(
                "lease_retry_count must be at least 1".to_string(),
            ));
        }
        if self.min_lease_id <= 0 {
            return Err(Error::Config("min_lease_id must be positive".to_string()));
        }
        if self.default_lock_ttl_secs == 0 {
            return Err(Error::InvalidTtl(Duration::ZERO));
        }
        Ok(())
    }

    pub fn default_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.default_lock_ttl_secs)
    }

    pub fn connect_options(&self) -> Option<etcd_client::ConnectOptions> {
        if self.connect_timeout_ms.is_none() && self.request_timeout_ms.is_none() {
            return None;
        }
        let mut opts = etcd_client::ConnectOptions::new();
        if let Some(ms) = self.connect_timeout_ms {
            opts = opts.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.request_timeout_ms {
            opts = opts.with_timeout(Duration::from_millis(ms));
        }
        Some(opts)
    }
}
