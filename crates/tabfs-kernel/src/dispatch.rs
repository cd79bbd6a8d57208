//! Request dispatcher.
//!
//! [`Dispatcher::handle`] turns one [`WireRequest`] into one
//! [`WireResponse`]: shadow-path check, payload decode, route resolution,
//! operation call, error mapping. [`Dispatcher::serve`] runs that for every
//! record a transport delivers, concurrently. Each request is answered
//! exactly once; a handler still running when the timeout fires is
//! cancelled and the driver gets `ETIMEDOUT`.

use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::{Errno, FsError, FsResult};
use crate::protocol::{RecordHeader, WireRequest, WireResponse};
use crate::table::RouteTable;
use crate::transport::{RecordSink, RecordSource, TransportError};
use crate::types::{NULL_HANDLE, Op, OpRequest, Reply};

/// How long a handler may run before the driver is told `ETIMEDOUT`.
///
/// The handler is cancelled at that point rather than left running in the
/// background: its future is dropped, so it makes no further progress and
/// its result never exists. Providers whose side effects must finish
/// regardless should spawn that work themselves.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Prefix of the resource-fork shadow files some clients look up.
const SHADOW_PREFIX: &str = "._";

/// Whether the last segment of `path` is a resource-fork shadow file.
pub fn is_shadow_path(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(SHADOW_PREFIX))
}

/// Routes wire requests through a [`RouteTable`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self {
            table,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Handle one request to completion. No timeout is applied here.
    pub async fn handle(&self, req: WireRequest) -> WireResponse {
        let id = req.id;
        let op = req.op.clone();
        let path = req.path.clone();
        tracing::debug!(id, %op, %path, "request");

        let resp = match self.execute(req).await {
            Ok(reply) => WireResponse::from_reply(id, op, reply),
            Err(err) => {
                log_failure(id, &op, &path, &err);
                WireResponse::from_error(id, op, &err)
            }
        };
        tracing::debug!(id, error = ?resp.error, "response");
        resp
    }

    async fn execute(&self, req: WireRequest) -> FsResult<Reply> {
        if is_shadow_path(&req.path) {
            return Err(FsError::not_supported(req.path));
        }
        let buf = req.data()?;
        let (route, vars) = self.table.resolve(&req.path)?;
        let op = Op::from_str(&req.op)
            .map_err(|_| FsError::io(format!("unknown operation {:?}", req.op)))?;

        let op_req = OpRequest {
            op,
            path: req.path,
            vars,
            fh: req.fh.unwrap_or(NULL_HANDLE),
            offset: req.offset.unwrap_or(0),
            size: req.size.unwrap_or(0),
            buf,
            flags: req.flags.unwrap_or(0),
            mode: req.mode.unwrap_or(0),
        };
        route.invoke(op_req).await
    }

    /// Serve requests from `source`, writing responses to `sink`.
    ///
    /// Returns when `source` reaches end of stream and every request read
    /// so far has been answered, or when either side fails.
    pub async fn serve<S, K>(self: Arc<Self>, mut source: S, sink: K) -> Result<(), TransportError>
    where
        S: RecordSource,
        K: RecordSink + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_responses(sink, rx));

        let read_result = loop {
            let record = match source.recv().await {
                Ok(Some(record)) => record,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            match serde_json::from_slice::<WireRequest>(&record) {
                Ok(req) => self.spawn_request(req, tx.clone()),
                Err(e) => match serde_json::from_slice::<RecordHeader>(&record) {
                    Ok(header) => {
                        tracing::warn!(id = header.id, op = %header.op, "malformed request: {e}");
                        let resp = WireResponse::error(header.id, header.op, Errno::EIO);
                        // The writer only stops once every sender is gone.
                        let _ = tx.send(resp);
                    }
                    Err(_) => {
                        tracing::warn!(len = record.len(), "dropping unparseable record: {e}");
                    }
                },
            }
        };
        drop(tx);

        tracing::debug!("request stream ended, draining responses");
        let write_result = match writer.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("response writer panicked: {e}");
                Ok(())
            }
        };
        read_result.and(write_result)
    }

    fn spawn_request(self: &Arc<Self>, req: WireRequest, tx: mpsc::UnboundedSender<WireResponse>) {
        let span = tracing::debug_span!("request", id = req.id, op = %req.op);
        let responder = Responder::new(req.id, req.op.clone(), tx);
        let timeout = self.timeout;
        let this = Arc::clone(self);

        tokio::spawn(
            async move {
                let work = AssertUnwindSafe(this.handle(req)).catch_unwind();
                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(resp)) => {
                        responder.answer(resp);
                    }
                    Ok(Err(_)) => {
                        tracing::error!("handler panicked");
                        responder.answer(responder.error(Errno::EIO));
                    }
                    // The handler future is dropped here, cancelling it.
                    Err(_) => responder.time_out(timeout),
                }
            }
            .instrument(span),
        );
    }
}

fn log_failure(id: u64, op: &str, path: &str, err: &FsError) {
    match err {
        FsError::Provider(e) => tracing::error!(id, op, path, "provider failed: {e:#}"),
        FsError::StaleHandle(fh) => tracing::warn!(id, op, path, fh, "stale handle"),
        FsError::NotFound(_) | FsError::NotSupported(_) => {
            tracing::debug!(id, op, path, "{err}")
        }
        _ => tracing::info!(id, op, path, "{err}"),
    }
}

async fn write_responses<K: RecordSink>(
    mut sink: K,
    mut rx: mpsc::UnboundedReceiver<WireResponse>,
) -> Result<(), TransportError> {
    while let Some(resp) = rx.recv().await {
        let record = serde_json::to_vec(&resp)?;
        sink.send(record).await?;
    }
    Ok(())
}

/// Answers one request at most once.
///
/// The sender is released with the first answer, so the response writer
/// can finish as soon as every request has been answered.
struct Responder {
    id: u64,
    op: String,
    answered: AtomicBool,
    tx: Mutex<Option<mpsc::UnboundedSender<WireResponse>>>,
}

impl Responder {
    fn new(id: u64, op: String, tx: mpsc::UnboundedSender<WireResponse>) -> Self {
        Self {
            id,
            op,
            answered: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        }
    }

    fn error(&self, errno: Errno) -> WireResponse {
        WireResponse::error(self.id, self.op.clone(), errno)
    }

    /// Send `resp` unless already answered. Returns whether it was sent.
    fn answer(&self, resp: WireResponse) -> bool {
        if self.answered.swap(true, Ordering::AcqRel) {
            tracing::debug!(id = self.id, op = %self.op, "discarding late response");
            return false;
        }
        let Some(tx) = self.tx.lock().take() else {
            return false;
        };
        if tx.send(resp).is_err() {
            tracing::warn!(id = self.id, "response writer gone");
            return false;
        }
        true
    }

    fn time_out(&self, after: Duration) {
        if self.answer(self.error(Errno::ETIMEDOUT)) {
            tracing::warn!(id = self.id, op = %self.op, ?after, "handler timed out, cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteSpec;
    use crate::table::RouteTableBuilder;

    fn dispatcher() -> Dispatcher {
        let mut builder = RouteTableBuilder::new();
        builder
            .route("/hello.txt", RouteSpec::new().read(|_| async { Ok(b"hi".to_vec()) }))
            .route(
                "/fail",
                RouteSpec::new().read(|_| async { Err(anyhow::anyhow!("browser exploded").into()) }),
            );
        Dispatcher::new(Arc::new(builder.build().unwrap()))
    }

    #[test]
    fn test_shadow_path() {
        assert!(is_shadow_path("/tabs/._by-id"));
        assert!(is_shadow_path("/._"));
        assert!(!is_shadow_path("/tabs/by-id/._x/y"));
        assert!(!is_shadow_path("/tabs/a._b"));
    }

    #[tokio::test]
    async fn test_handle_read() {
        let resp = dispatcher()
            .handle(WireRequest::new(3, "read", "/hello.txt").with_size(10))
            .await;
        assert_eq!(resp.id, 3);
        assert_eq!(resp.op, "read");
        assert_eq!(resp.data().unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_shadow_rejected_before_routing() {
        let resp = dispatcher().handle(WireRequest::new(1, "getattr", "/._hello.txt")).await;
        assert_eq!(resp.error, Some(Errno::ENOTSUP.code()));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let d = dispatcher();
        let resp = d.handle(WireRequest::new(1, "getattr", "/missing")).await;
        assert_eq!(resp.error, Some(Errno::ENOENT.code()));

        let resp = d.handle(WireRequest::new(2, "read", "/fail")).await;
        assert_eq!(resp.error, Some(Errno::EIO.code()));

        let resp = d.handle(WireRequest::new(3, "rename", "/hello.txt")).await;
        assert_eq!(resp.error, Some(Errno::EIO.code()));

        let resp = d.handle(WireRequest::new(4, "readdir", "/hello.txt")).await;
        assert_eq!(resp.error, Some(Errno::EIO.code()));
    }

    #[tokio::test]
    async fn test_responder_answers_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let responder = Responder::new(1, "read".into(), tx);
        responder.time_out(Duration::from_millis(1));
        assert!(!responder.answer(WireResponse::from_reply(1, "read", Reply::Empty)));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.error, Some(Errno::ETIMEDOUT.code()));
        // The sender was released with the first answer.
        assert!(rx.recv().await.is_none());
    }
}
