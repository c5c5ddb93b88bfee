use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use iapgate_service::{Object, Resolved};

use crate::auth;
use crate::endpoints::common::{ApiError, ApiResult};
use crate::request_log::{LoggedStream, RequestLog, RequestRecord};
use crate::state::ServiceState;

pub fn router() -> Router<ServiceState> {
    Router::new().fallback(serve_object)
}

async fn serve_object(State(state): State<ServiceState>, request: Request) -> Response {
    let log = RequestLog::new(RequestRecord::from_request(&request));
    let (parts, _body) = request.into_parts();

    let resolved = match open_object(&state, &parts.headers, parts.uri.path()).await {
        Ok(resolved) => resolved,
        Err(err) => {
            log.failure(err.status(), &err);
            return err.into_response();
        }
    };

    tracing::debug!(
        object = %resolved.name,
        fallback = resolved.fallback,
        "serving object"
    );
    stream_object(resolved.object, parts.method == Method::HEAD, log).await
}

async fn open_object(state: &ServiceState, headers: &HeaderMap, path: &str) -> ApiResult<Resolved> {
    if let Err(err) = auth::authorize(headers, &state.config.auth, &*state.validator).await {
        tracing::debug!("Authorization rejected: `{err}`");
        return Err(err.into());
    }

    Ok(state.service.resolve(path).await?)
}

async fn stream_object(object: Object, head: bool, log: RequestLog) -> Response {
    let Object { metadata, mut stream } = object;

    let mut headers = HeaderMap::new();
    if let Some(content_type) = metadata.content_type {
        match HeaderValue::try_from(content_type) {
            Ok(value) => {
                headers.insert(header::CONTENT_TYPE, value);
            }
            Err(err) => tracing::debug!("ignoring invalid content type: {err}"),
        }
    }

    if head {
        log.success(StatusCode::OK);
        return (headers, Body::empty()).into_response();
    }

    // Nothing has been sent before the first chunk arrives, so an early failure still gets a
    // proper error status.
    let first = match stream.try_next().await {
        Ok(first) => first,
        Err(err) => {
            let err = ApiError::Read(err);
            log.failure(err.status(), &err);
            return err.into_response();
        }
    };

    let body = Body::from_stream(LoggedStream::new(first, stream, log));
    (headers, body).into_response()
}
