//! A [`tower`] middleware that reports every completed request to an [`AccessLogger`].

use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::extract::ConnectInfo;
use futures_util::future::BoxFuture;
use http::{header, Request, Response};
use http_body::{Body, Frame, SizeHint};
use tower::{Layer, Service};

use super::access_log::{size_kb, AccessLogEntry, AccessLogger};

const FORWARDED_FOR: &str = "x-forwarded-for";

impl AccessLogger {
    /// A [`tower::Layer`] that logs each request handled by the wrapped service.
    ///
    /// ```no_run
    /// use axum::{routing::get, Router};
    /// use log_kit::{AccessLogger, AccessLoggerConfig};
    ///
    /// # fn main() -> Result<(), log_kit::LoggerError> {
    /// let access_logger = AccessLogger::new(AccessLoggerConfig::default())?;
    /// let app: Router = Router::new()
    ///     .route("/health", get(|| async { "ok" }))
    ///     .layer(access_logger.layer());
    /// # Ok(())
    /// # }
    /// ```
    pub fn layer(&self) -> AccessLogLayer {
        AccessLogLayer {
            logger: self.clone(),
        }
    }
}

/// Applies [`AccessLogService`] to the wrapped service.
#[derive(Clone, Debug)]
pub struct AccessLogLayer {
    logger: AccessLogger,
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

/// Forwards every request to the inner service unchanged and logs an [`AccessLogEntry`] once
/// the response body has been sent in full.
///
/// Requests are never rejected or delayed. Errors of the inner service, failing bodies and
/// bodies dropped before their end are not logged.
#[derive(Clone, Debug)]
pub struct AccessLogService<S> {
    inner: S,
    logger: AccessLogger,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AccessLogService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    ResBody: Body + Unpin + 'static,
{
    type Response = Response<AccessLogBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let ip = client_ip(&request);
        let method = request.method().to_string();
        let url = request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path(), |path_and_query| path_and_query.as_str())
            .to_string();

        let logger = self.logger.clone();
        let response = self.inner.call(request);

        Box::pin(async move {
            let response = response.await?;

            let content_length = response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok());
            let pending = PendingEntry {
                logger,
                start,
                entry: AccessLogEntry {
                    ip,
                    method,
                    url,
                    status: response.status().as_u16(),
                    elapsed_ms: 0,
                    size_kb: size_kb(content_length),
                },
            };

            Ok(response.map(|body| AccessLogBody::new(body, pending)))
        })
    }
}

/// An entry waiting for the end of its response body.
#[derive(Debug)]
struct PendingEntry {
    logger: AccessLogger,
    start: Instant,
    entry: AccessLogEntry,
}

impl PendingEntry {
    fn log(mut self) {
        self.entry.elapsed_ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.logger.log(&self.entry);
    }
}

/// Response body of an [`AccessLogService`]: yields the frames of the inner body and logs the
/// request when the last frame has been polled.
#[derive(Debug)]
pub struct AccessLogBody<B> {
    inner: B,
    pending: Option<PendingEntry>,
}

impl<B> AccessLogBody<B>
where
    B: Body + Unpin,
{
    fn new(inner: B, pending: PendingEntry) -> Self {
        let mut body = Self {
            inner,
            pending: Some(pending),
        };
        // Servers do not poll bodies that are empty from the start
        if body.inner.is_end_stream() {
            body.finish();
        }
        body
    }

    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.log();
        }
    }
}

impl<B> Body for AccessLogBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.finish(),
            Poll::Ready(Some(Err(_))) => this.pending = None,
            Poll::Ready(Some(Ok(_))) | Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// The peer address recorded by axum, the first `X-Forwarded-For` entry, or `-`.
fn client_ip<B>(request: &Request<B>) -> String {
    if let Some(ConnectInfo(address)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return address.ip().to_string();
    }

    request
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("-")
        .to_string()
}
