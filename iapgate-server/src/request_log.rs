//! Structured logging of completed requests.
//!
//! Every request produces exactly one log event: `successful_request` at `INFO` level or
//! `failed_request` at `ERROR` level. Both carry the request's attributes as `http_request.*`
//! fields together with the response status.
//!
//! Responses with a body are only complete once the body has been sent, so the event for a
//! successful response is emitted by [`LoggedStream`] when the body stream ends.

use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, Method, StatusCode, Version, header};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use iapgate_service::PayloadStream;

/// Status logged when the response was abandoned before completion.
///
/// Derived from nginx' non-standard "client closed request".
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Attributes of an incoming request, captured before the request is consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRecord {
    /// The request method.
    pub method: Method,
    /// The request URL as received.
    pub url: String,
    /// The protocol version, such as `HTTP/1.1`.
    pub proto: &'static str,
    /// Major protocol version.
    pub proto_major: u8,
    /// Minor protocol version.
    pub proto_minor: u8,
    /// Declared body length, or `-1` if it is unknown.
    pub content_length: i64,
    /// Transfer codings applied to the request body.
    pub transfer_encoding: Vec<String>,
    /// Whether the client asked to close the connection after this request.
    pub close: bool,
    /// The requested host.
    pub host: String,
    /// Address of the peer, empty if unknown.
    pub remote_addr: String,
    /// The unmodified request target.
    pub request_uri: String,
}

fn proto_version(version: Version) -> (&'static str, u8, u8) {
    match version {
        Version::HTTP_09 => ("HTTP/0.9", 0, 9),
        Version::HTTP_10 => ("HTTP/1.0", 1, 0),
        Version::HTTP_2 => ("HTTP/2.0", 2, 0),
        Version::HTTP_3 => ("HTTP/3.0", 3, 0),
        _ => ("HTTP/1.1", 1, 1),
    }
}

fn header_tokens(headers: &HeaderMap, name: header::HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn wants_close(version: Version, headers: &HeaderMap) -> bool {
    let connection = header_tokens(headers, header::CONNECTION);
    match version {
        Version::HTTP_09 | Version::HTTP_10 => !connection.iter().any(|t| t == "keep-alive"),
        Version::HTTP_11 => connection.iter().any(|t| t == "close"),
        _ => false,
    }
}

impl RequestRecord {
    /// Captures the attributes of `request`.
    pub fn from_request(request: &Request) -> Self {
        let headers = request.headers();
        let uri = request.uri();
        let (proto, proto_major, proto_minor) = proto_version(request.version());
        let transfer_encoding = header_tokens(headers, header::TRANSFER_ENCODING);

        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(if transfer_encoding.is_empty() { 0 } else { -1 });

        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| uri.authority().map(|authority| authority.as_str()))
            .unwrap_or_default()
            .to_owned();

        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        let request_uri = uri
            .path_and_query()
            .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned());

        Self {
            method: request.method().clone(),
            url: uri.to_string(),
            proto,
            proto_major,
            proto_minor,
            content_length,
            transfer_encoding,
            close: wants_close(request.version(), headers),
            host,
            remote_addr,
            request_uri,
        }
    }
}

macro_rules! request_event {
    ($level:expr, $record:ident, $status:expr, $($rest:tt)+) => {
        tracing::event!(
            $level,
            http_request.method = %$record.method,
            http_request.url = %$record.url,
            http_request.proto = $record.proto,
            http_request.proto_major = $record.proto_major,
            http_request.proto_minor = $record.proto_minor,
            http_request.content_length = $record.content_length,
            http_request.transfer_encoding = ?$record.transfer_encoding,
            http_request.close = $record.close,
            http_request.host = %$record.host,
            http_request.remote_addr = %$record.remote_addr,
            http_request.request_uri = %$record.request_uri,
            status = $status,
            $($rest)+
        )
    };
}

/// Guard that emits the log event for one request.
///
/// Call [`success`](Self::success) or [`failure`](Self::failure) when the outcome is known. If
/// the guard is dropped without either, a `failed_request` with status `499` is logged. A guard
/// dropped while its thread unwinds from a panic logs `500` instead.
#[derive(Debug)]
pub struct RequestLog {
    record: Option<RequestRecord>,
}

impl RequestLog {
    /// Starts tracking a request.
    pub fn new(record: RequestRecord) -> Self {
        Self {
            record: Some(record),
        }
    }

    /// Logs the request as successful.
    pub fn success(mut self, status: StatusCode) {
        if let Some(record) = self.record.take() {
            request_event!(tracing::Level::INFO, record, status.as_u16(), "successful_request");
        }
    }

    /// Logs the request as failed.
    pub fn failure(mut self, status: StatusCode, error: &(dyn Error + 'static)) {
        if let Some(record) = self.record.take() {
            emit_failure(&record, status.as_u16(), error);
        }
    }
}

fn emit_failure(record: &RequestRecord, status: u16, error: &(dyn Error + 'static)) {
    request_event!(
        tracing::Level::ERROR,
        record,
        status,
        error = error,
        "failed_request"
    );
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };

        if std::thread::panicking() {
            let error = io::Error::other("request handler panicked");
            emit_failure(&record, StatusCode::INTERNAL_SERVER_ERROR.as_u16(), &error);
        } else {
            let error = io::Error::from(io::ErrorKind::ConnectionAborted);
            emit_failure(&record, CLIENT_CLOSED_REQUEST, &error);
        }
    }
}

/// A response body that logs its request once the body has been fully produced.
///
/// The end of the stream logs a `200` success. A stream error logs a `500` failure and is passed
/// on, which aborts the response. Dropping the stream early logs a `499`.
pub struct LoggedStream {
    first: Option<Bytes>,
    inner: PayloadStream,
    log: Option<RequestLog>,
}

impl LoggedStream {
    /// Wraps a payload whose first chunk has already been read.
    pub fn new(first: Option<Bytes>, inner: PayloadStream, log: RequestLog) -> Self {
        Self {
            first,
            inner,
            log: Some(log),
        }
    }
}

impl Stream for LoggedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }

        let poll = self.inner.poll_next_unpin(cx);
        match &poll {
            Poll::Ready(None) => {
                if let Some(log) = self.log.take() {
                    log.success(StatusCode::OK);
                }
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(log) = self.log.take() {
                    log.failure(StatusCode::INTERNAL_SERVER_ERROR, err);
                }
            }
            _ => {}
        }
        poll
    }
}
