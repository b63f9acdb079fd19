//! Response relay.
//!
//! # Responsibilities
//! - Copy the upstream status and filtered headers to the caller
//! - Stream the upstream body in chunks of at most `chunk_size` bytes
//! - Release the upstream connection when the body ends or the relay stops
//!
//! # Design Decisions
//! - No buffering: each upstream frame is split, never coalesced
//! - The total response deadline keeps running while the body streams
//! - A body dropped before its end means the caller went away; the
//!   connection is discarded because unread bytes may still be in flight

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Response;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use tokio::time::{Instant, Sleep};

use crate::error::{classify_hyper_error, ProxyError, TimeoutPhase};
use crate::forward::executor::UpstreamResponse;
use crate::forward::headers::HEADER_POLICY;
use crate::forward::{PhaseTracker, RequestPhase};
use crate::observability::metrics;
use crate::pool::PooledConnection;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Turn an upstream response into the caller's response.
pub fn relay(upstream: UpstreamResponse, chunk_size: usize, phase: PhaseTracker) -> Response<Body> {
    let UpstreamResponse {
        response,
        connection,
        deadline,
    } = upstream;
    let (parts, incoming) = response.into_parts();

    let body = RelayBody::new(incoming, chunk_size, deadline, phase).with_connection(connection);

    let mut relayed = Response::new(Body::new(body));
    *relayed.status_mut() = parts.status;
    *relayed.headers_mut() = HEADER_POLICY.filter(&parts.headers, true);
    relayed
}

/// Body wrapper that re-chunks the upstream body and owns its connection.
pub struct RelayBody<B> {
    inner: B,
    pending: Bytes,
    chunk_size: usize,
    connection: Option<PooledConnection>,
    deadline: Pin<Box<Sleep>>,
    phase: PhaseTracker,
    relayed: u64,
    span: tracing::Span,
}

impl<B> RelayBody<B>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    pub fn new(inner: B, chunk_size: usize, deadline: Instant, phase: PhaseTracker) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
            chunk_size: chunk_size.max(1),
            connection: None,
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
            phase,
            relayed: 0,
            span: tracing::Span::current(),
        }
    }

    /// Bind the upstream connection to this body.
    ///
    /// An upstream body that is already complete (HEAD, 204, empty) releases
    /// the connection right away.
    pub fn with_connection(mut self, connection: PooledConnection) -> Self {
        self.connection = Some(connection);
        if self.inner.is_end_stream() {
            self.finish(true);
        }
        self
    }

    /// Bytes handed to the caller so far.
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase.phase()
    }

    fn next_chunk(&mut self) -> Bytes {
        if self.pending.len() > self.chunk_size {
            self.pending.split_to(self.chunk_size)
        } else {
            std::mem::take(&mut self.pending)
        }
    }

    fn drained(&self) -> bool {
        self.pending.is_empty() && self.inner.is_end_stream()
    }

    fn finish(&mut self, clean: bool) {
        if self.phase.phase().is_terminal() {
            return;
        }
        if let Some(connection) = self.connection.take() {
            connection.release(!clean);
        }
        metrics::record_relayed_bytes(self.relayed);
        self.phase.advance(if clean {
            RequestPhase::Completed
        } else {
            RequestPhase::Aborted
        });
    }

    fn fail(&mut self, error: ProxyError) -> ProxyError {
        let entered = self.span.enter();
        tracing::warn!(
            error = %error,
            kind = error.kind(),
            relayed_bytes = self.relayed,
            "Upstream body relay failed"
        );
        metrics::record_upstream_error(error.kind());
        drop(entered);
        self.finish(false);
        error
    }

    fn emit(&mut self) -> Poll<Option<Result<Frame<Bytes>, ProxyError>>> {
        let chunk = self.next_chunk();
        self.relayed += chunk.len() as u64;
        if self.drained() {
            self.finish(true);
        }
        Poll::Ready(Some(Ok(Frame::data(chunk))))
    }
}

fn classify_body_error(error: BoxError) -> ProxyError {
    match error.downcast_ref::<hyper::Error>() {
        Some(e) => classify_hyper_error(e),
        None => ProxyError::UpstreamProtocolError(error.to_string()),
    }
}

impl<B> http_body::Body for RelayBody<B>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = ProxyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            return this.emit();
        }
        if this.phase.phase().is_terminal() {
            return Poll::Ready(None);
        }
        if this.deadline.as_mut().poll(cx).is_ready() {
            let error = this.fail(ProxyError::UpstreamTimeout(TimeoutPhase::Response));
            return Poll::Ready(Some(Err(error)));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                Ok(data) => {
                    this.pending = data;
                    this.emit()
                }
                Err(frame) => {
                    if this.inner.is_end_stream() {
                        this.finish(true);
                    }
                    Poll::Ready(Some(Ok(frame)))
                }
            },
            Poll::Ready(Some(Err(e))) => {
                let error = this.fail(classify_body_error(e.into()));
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish(true);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_empty() && (self.phase.phase().is_terminal() || self.inner.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let inner = self.inner.size_hint();
        let pending = self.pending.len() as u64;

        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower() + pending);
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + pending);
        }
        hint
    }
}

impl<B> RelayBody<B> {
    /// Stop relaying because the caller went away.
    ///
    /// Returns `None` when the relay had already finished.
    fn abandon(&mut self) -> Option<ProxyError> {
        if self.phase.phase().is_terminal() {
            return None;
        }
        let error = ProxyError::ClientDisconnected;
        {
            let _entered = self.span.enter();
            tracing::info!(
                kind = error.kind(),
                status = error.status_code().as_u16(),
                relayed_bytes = self.relayed,
                "Client disconnected before response completed"
            );
        }
        metrics::record_client_disconnected();
        metrics::record_relayed_bytes(self.relayed);
        if let Some(connection) = self.connection.take() {
            connection.release(true);
        }
        self.phase.advance(RequestPhase::Aborted);
        Some(error)
    }
}

impl<B> Drop for RelayBody<B> {
    fn drop(&mut self) {
        let _ = self.abandon();
    }
}
