use {
    std::{error::Error, future::Future, time::Duration},
    tracing::warn,
};

pub fn is_transient(err: &etcd_client::Error) -> bool {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            tonic::Code::Ok => false,
            tonic::Code::Cancelled => false,
            tonic::Code::Unknown => status.source().is_none(),
            tonic::Code::InvalidArgument => false,
            tonic::Code::DeadlineExceeded => true,
            tonic::Code::NotFound => false,
            tonic::Code::AlreadyExists => false,
            tonic::Code::PermissionDenied => false,
            tonic::Code::ResourceExhausted => true,
            tonic::Code::FailedPrecondition => false,
            tonic::Code::Aborted => false,
            tonic::Code::OutOfRange => false,
            tonic::Code::Unimplemented => false,
            tonic::Code::Internal => true,
            tonic::Code::Unavailable => true,
            tonic::Code::DataLoss => true,
            tonic::Code::Unauthenticated => false,
        },
        etcd_client::Error::TransportError(_) => true,
        _ => false,
    }
}

pub fn is_not_found(err: &etcd_client::Error) -> bool {
    matches!(err, etcd_client::Error::GRpcStatus(status) if status.code() == tonic::Code::NotFound)
}

///
/// Retries `f` on every error, sleeping according to `retry_strategy` between attempts.
///
/// Unlike a transient-only retry, this is meant for operations where any failure may be fixed by
/// trying again with different input, such as granting a lease under a fresh candidate id.
/// `f` receives the zero-based attempt number. Once the strategy is exhausted, the last error is
/// returned together with the number of attempts made.
///
pub async fn retry_with_strategy<T, E, F, Fut>(
    retry_strategy: impl IntoIterator<Item = Duration>,
    mut f: F,
) -> Result<T, (usize, E)>
where
    Fut: Future<Output = Result<T, E>>,
    F: FnMut(usize) -> Fut,
    E: std::fmt::Debug,
{
    let mut retry_strategy = retry_strategy.into_iter();
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Ok(o) => return Ok(o),
            Err(e) => {
                attempt += 1;
                match retry_strategy.next() {
                    Some(duration) => {
                        tracing::debug!("attempt {attempt} failed with {e:?}, retrying");
                        if !duration.is_zero() {
                            tokio::time::sleep(duration).await;
                        }
                    }
                    None => {
                        warn!("giving up after {attempt} attempts, last error: {e:?}");
                        return Err((attempt, e));
                    }
                }
            }
        }
    }
}
