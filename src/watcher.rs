use {
    crate::{
        error::{Error, RemoteCall},
        kv::decode_value,
    },
    etcd_client::{EventType, WatchResponse, WatchStream, Watcher},
    futures::Stream,
    std::{
        pin::Pin,
        task::{Context, Poll},
    },
    tokio::{
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_stream::StreamExt,
    tracing::{error, trace, warn},
};

///
/// A change of the watched key.
///
/// Deletions and any event type other than put are reported as [`WatchEvent::Absent`],
/// a single channel where only the presence of a value tells puts and deletes apart.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put(String),
    Absent,
}

impl WatchEvent {
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Put(value) => Some(value),
            Self::Absent => None,
        }
    }
}

pub(crate) fn decode_event(event_type: EventType, value: Option<&[u8]>) -> WatchEvent {
    match event_type {
        EventType::Put => value
            .map(|raw| WatchEvent::Put(decode_value(raw)))
            .unwrap_or(WatchEvent::Absent),
        _ => WatchEvent::Absent,
    }
}

type EndReply = oneshot::Sender<Result<(), Error>>;

///
/// Subscription to a single key.
///
/// Events are read in a background task and yielded through [`WatchSession::recv`] or the
/// [`Stream`] implementation. A stream failure is yielded once as an error, after which the session
/// yields nothing more. Nothing reconnects: open a fresh session to recover.
///
/// Call [`WatchSession::end`] to stop the session. Dropping it tears the subscription down in the
/// background instead.
///
pub struct WatchSession {
    key: String,
    watch_id: i64,
    rx: mpsc::UnboundedReceiver<Result<WatchEvent, Error>>,
    tx_end: oneshot::Sender<EndReply>,
    handle: JoinHandle<()>,
}

impl WatchSession {
    ///
    /// Subscribes to `key`.
    ///
    /// Returns once etcd acknowledged the subscription and assigned it a watch id.
    ///
    pub async fn open(mut etcd: etcd_client::Client, key: &str) -> Result<Self, Error> {
        let (watcher, stream) = etcd
            .watch(key, None)
            .await
            .map_err(Error::remote(RemoteCall::WatchCreate))?;
        let watch_id = watcher.watch_id();
        trace!("opened watch {watch_id} on {key}");

        let (tx, rx) = mpsc::unbounded_channel();
        let (tx_end, rx_end) = oneshot::channel();
        let handle = tokio::spawn(run_session(key.to_string(), watcher, stream, tx, rx_end));

        Ok(Self {
            key: key.to_string(),
            watch_id,
            rx,
            tx_end,
            handle,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    ///
    /// The watch id assigned by etcd when the subscription was created.
    ///
    pub fn watch_id(&self) -> i64 {
        self.watch_id
    }

    pub async fn recv(&mut self) -> Option<Result<WatchEvent, Error>> {
        self.rx.recv().await
    }

    ///
    /// Cancels the subscription and closes the stream.
    ///
    /// An explicit cancel is sent for the watch id before the stream is closed. Errors coming from
    /// the stream being closed on purpose are not reported.
    ///
    pub async fn end(self) -> Result<(), Error> {
        let Self { tx_end, handle, .. } = self;
        let (reply_tx, reply_rx) = oneshot::channel();
        let result = match tx_end.send(reply_tx) {
            // The session task already stopped on its own.
            Err(_) => Ok(()),
            Ok(()) => reply_rx.await.unwrap_or(Ok(())),
        };
        if let Err(e) = handle.await {
            warn!("watch session task failed: {e:?}");
        }
        result
    }
}

impl Stream for WatchSession {
    type Item = Result<WatchEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum Flow {
    Continue,
    Stop,
}

///
/// What one message of the watch stream means for the subscribers.
///
#[derive(Debug)]
enum Incoming {
    Events(Vec<WatchEvent>),
    Canceled(i64),
    Failed(etcd_client::Error),
    Ended,
}

impl Incoming {
    fn from_message(msg: Option<Result<WatchResponse, etcd_client::Error>>) -> Self {
        match msg {
            Some(Ok(resp)) if resp.canceled() => Self::Canceled(resp.watch_id()),
            Some(Ok(resp)) => Self::Events(
                resp.events()
                    .iter()
                    .map(|event| decode_event(event.event_type(), event.kv().map(|kv| kv.value())))
                    .collect(),
            ),
            Some(Err(e)) => Self::Failed(e),
            None => Self::Ended,
        }
    }
}

fn deliver(
    key: &str,
    incoming: Incoming,
    tx: &mpsc::UnboundedSender<Result<WatchEvent, Error>>,
) -> Flow {
    match incoming {
        Incoming::Events(events) => {
            for event in events {
                if tx.send(Ok(event)).is_err() {
                    warn!("closed watch event receiver for {key}");
                    return Flow::Stop;
                }
            }
            Flow::Continue
        }
        Incoming::Canceled(watch_id) => {
            // This is probably because the compaction_revision < initial revision
            error!("watch {watch_id} on {key} cancelled by etcd");
            let _ = tx.send(Err(Error::WatchCanceled { watch_id }));
            Flow::Stop
        }
        Incoming::Failed(e) => {
            error!("watch stream error on {key}: {e:?}");
            let _ = tx.send(Err(Error::WatchStreamFailure(e)));
            Flow::Stop
        }
        Incoming::Ended => {
            warn!("watch stream on {key} ended");
            Flow::Stop
        }
    }
}

async fn run_session(
    key: String,
    mut watcher: Watcher,
    mut stream: WatchStream,
    tx: mpsc::UnboundedSender<Result<WatchEvent, Error>>,
    mut rx_end: oneshot::Receiver<EndReply>,
) {
    let reply = loop {
        tokio::select! {
            end = &mut rx_end => {
                // Err means the session was dropped without `end()`.
                break end.ok();
            }
            msg = stream.next() => {
                if let Flow::Stop = deliver(&key, Incoming::from_message(msg), &tx) {
                    return;
                }
            }
        }
    };

    let watch_id = watcher.watch_id();
    let result = watcher
        .cancel_by_id(watch_id)
        .await
        .map_err(Error::remote(RemoteCall::WatchCancel));
    // Closing the request side ends the grpc stream, the response side is aborted unread so
    // the errors of a closed stream never reach the subscribers.
    drop(watcher);
    drop(stream);
    trace!("ended watch {watch_id} on {key}");

    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!("failed to cancel dropped watch on {key}: {e}");
            }
        }
    }
}
