use {
    crate::{retry::is_transient, LeaseId},
    core::fmt,
    std::time::Duration,
    thiserror::Error,
};

///
/// Names the remote call that failed in [`Error::RemoteCall`].
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    Grant,
    KeepAlive,
    Revoke,
    TimeToLive,
    Lock,
    Unlock,
    Put,
    Range,
    DeleteRange,
    WatchCreate,
    WatchCancel,
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Grant => "lease grant",
            Self::KeepAlive => "lease keep alive",
            Self::Revoke => "lease revoke",
            Self::TimeToLive => "lease time to live",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Put => "put",
            Self::Range => "range",
            Self::DeleteRange => "delete range",
            Self::WatchCreate => "watch create",
            Self::WatchCancel => "watch cancel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to grant a lease after {attempts} attempts")]
    LeaseAcquisitionExhausted {
        attempts: usize,
        #[source]
        source: etcd_client::Error,
    },
    #[error("{call} failed")]
    RemoteCall {
        call: RemoteCall,
        #[source]
        source: etcd_client::Error,
    },
    #[error("keep alive for lease {lease_id} died ({reason}) and the lease could not be revoked")]
    KeepAliveStreamFailure {
        lease_id: LeaseId,
        reason: String,
        #[source]
        source: etcd_client::Error,
    },
    #[error("watch stream failed")]
    WatchStreamFailure(#[source] etcd_client::Error),
    #[error("watch {watch_id} was canceled by the server")]
    WatchCanceled { watch_id: i64 },
    #[error("invalid lease ttl {0:?}, must be at least one second")]
    InvalidTtl(Duration),
    #[error("no etcd endpoint configured")]
    NoEndpoints,
    #[error("failed to connect to {host}")]
    Connect {
        host: String,
        #[source]
        source: etcd_client::Error,
    },
    #[error("failed to encode or decode json value")]
    Codec(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn remote(call: RemoteCall) -> impl FnOnce(etcd_client::Error) -> Self {
        move |source| Self::RemoteCall { call, source }
    }

    ///
    /// The underlying etcd error, if any.
    ///
    pub fn etcd_error(&self) -> Option<&etcd_client::Error> {
        match self {
            Self::LeaseAcquisitionExhausted { source, .. }
            | Self::RemoteCall { source, .. }
            | Self::KeepAliveStreamFailure { source, .. }
            | Self::WatchStreamFailure(source)
            | Self::Connect { source, .. } => Some(source),
            _ => None,
        }
    }

    ///
    /// Returns true if the error was caused by "outside" forces such as a network partition.
    ///
    /// Nothing in this crate reconnects on its own; callers use this to decide whether opening
    /// a fresh lease or watch session is worth it.
    pub fn is_transient(&self) -> bool {
        self.etcd_error().is_some_and(is_transient)
    }
}

///
/// Error returned by scoped operations such as [`crate::lease::LeaseManager::with_lease`]
/// and [`crate::lock::LockCoordinator::with_lock`].
///
/// Teardown always runs to completion, every teardown step that failed is listed in `teardown`.
///
#[derive(Debug)]
pub enum ScopeError<E> {
    /// The lease or the lock could not be obtained, the work never ran.
    Setup { source: Error, teardown: Vec<Error> },
    /// The work itself failed.
    Work { source: E, teardown: Vec<Error> },
    /// The work succeeded but tearing down the lock or lease did not.
    Teardown(Vec<Error>),
}

impl<E> ScopeError<E> {
    ///
    /// Teardown failures, regardless of how the work ended.
    ///
    pub fn teardown_errors(&self) -> &[Error] {
        match self {
            Self::Setup { teardown, .. } | Self::Work { teardown, .. } => teardown,
            Self::Teardown(errors) => errors,
        }
    }

    pub fn into_work_error(self) -> Option<E> {
        match self {
            Self::Work { source, .. } => Some(source),
            _ => None,
        }
    }

    ///
    /// Combines the outcome of the work with the teardown failures.
    ///
    pub(crate) fn finish<T>(outcome: Result<T, E>, teardown: Vec<Error>) -> Result<T, Self> {
        match outcome {
            Ok(value) if teardown.is_empty() => Ok(value),
            Ok(_) => Err(Self::Teardown(teardown)),
            Err(source) => Err(Self::Work { source, teardown }),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ScopeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup { source, teardown } => {
                write!(f, "setup failed: {source}")?;
                write_teardown(f, teardown)
            }
            Self::Work { source, teardown } => {
                write!(f, "scoped work failed: {source}")?;
                write_teardown(f, teardown)
            }
            Self::Teardown(errors) => {
                f.write_str("teardown failed")?;
                write_teardown(f, errors)
            }
        }
    }
}

fn write_teardown(f: &mut fmt::Formatter<'_>, teardown: &[Error]) -> fmt::Result {
    for e in teardown {
        write!(f, "; {e}")?;
    }
    Ok(())
}

impl<E> std::error::Error for ScopeError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Setup { source, .. } => Some(source),
            Self::Work { source, .. } => Some(source),
            Self::Teardown(errors) => errors
                .first()
                .map(|e| e as &(dyn std::error::Error + 'static)),
        }
    }
}
