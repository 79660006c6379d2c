///
/// Client-local lease identifier allocation
///
pub mod allocator;

///
/// Entry point wiring leases, locks, kv and watches over a pool of etcd endpoints
///
pub mod client;

///
/// Configuration for [`client::EtcdCoordinator`]
pub mod config;

///
/// Pool of connected etcd endpoints with random selection
pub mod endpoint;

///
/// Error types shared by every module
pub mod error;

///
/// Plain key-value operations with UTF-8 conversion at the edge
///
pub mod kv;

///
/// Provides an API over "managed" lease
///
pub mod lease;

///
/// Provides an API over lease-backed locks
///
pub mod lock;

///
/// Utility function to manage various transient errors.
pub mod retry;

///
/// Watch sessions over a single key
pub mod watcher;

///
/// Alias for an etcd lease identifier
pub type LeaseId = i64;

pub use {
    client::EtcdCoordinator,
    config::CoordinatorConfig,
    error::{Error, RemoteCall, ScopeError},
    lock::LockOptions,
    watcher::{WatchEvent, WatchSession},
};
