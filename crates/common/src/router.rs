//! Router and error-reporting capabilities

use axum::body::Body as HttpBody;
use bytes::Bytes;
use http::header::{HeaderValue, COOKIE};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::types::{Request, Response};

/// Maps a request to a response.
///
/// `prototype` is the response the router builds on; it decides where the
/// body is written. Internal failures are not returned: a router records them
/// through an [`ErrorHandler`] and answers with an error response.
pub trait Router: Send + Sync {
    fn handle(&self, request: Request, prototype: Response) -> Response;
}

impl<F> Router for F
where
    F: Fn(Request, Response) -> Response + Send + Sync,
{
    fn handle(&self, request: Request, prototype: Response) -> Response {
        self(request, prototype)
    }
}

/// Exposes the last error raised inside routed code
pub trait ErrorHandler: Send + Sync {
    fn last_error(&self) -> Option<Arc<anyhow::Error>>;

    /// Forget recorded errors; called between tests
    fn clear(&self);
}

/// Append-only record of errors raised while dispatching
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    errors: Arc<Mutex<Vec<Arc<anyhow::Error>>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: anyhow::Error) {
        error!("Dispatch failed: {:#}", error);
        self.errors.lock().push(Arc::new(error));
    }

    pub fn errors(&self) -> Vec<Arc<anyhow::Error>> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

impl ErrorHandler for ErrorLog {
    fn last_error(&self) -> Option<Arc<anyhow::Error>> {
        self.errors.lock().last().cloned()
    }

    fn clear(&self) {
        self.errors.lock().clear();
    }
}

/// Request attributes, available to axum handlers through `Extension<Attributes>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(pub BTreeMap<String, String>);

/// Drives an [`axum::Router`] synchronously.
///
/// Dispatch runs on a private current-thread runtime, so handlers execute on
/// the caller's thread. Must not be called from inside another tokio runtime.
pub struct AxumRouter {
    router: axum::Router,
    runtime: tokio::runtime::Runtime,
    errors: ErrorLog,
}

impl AxumRouter {
    pub fn new(router: axum::Router) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Dispatch(format!("Failed to create runtime: {}", e)))?;

        Ok(Self {
            router,
            runtime,
            errors: ErrorLog::new(),
        })
    }

    /// Record dispatch failures into a shared log
    pub fn with_error_log(mut self, errors: ErrorLog) -> Self {
        self.errors = errors;
        self
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    fn to_http(request: Request) -> anyhow::Result<http::Request<HttpBody>> {
        let mut req = http::Request::new(HttpBody::from(request.body().clone()));
        *req.method_mut() = request.method().clone();
        *req.uri_mut() = request.uri().clone();
        *req.headers_mut() = request.headers().clone();

        if let Some(cookies) = request.cookie_header() {
            req.headers_mut()
                .append(COOKIE, HeaderValue::from_str(&cookies)?);
        }

        req.extensions_mut()
            .insert(Attributes(request.attributes().clone()));
        Ok(req)
    }

    async fn call(&self, request: Request) -> anyhow::Result<(http::response::Parts, Bytes)> {
        let req = Self::to_http(request)?;
        let response = self.router.clone().oneshot(req).await?;
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await?;
        Ok((parts, bytes))
    }
}

impl std::fmt::Debug for AxumRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumRouter")
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl Router for AxumRouter {
    fn handle(&self, request: Request, prototype: Response) -> Response {
        let method = request.method().clone();
        let path = request.path().to_string();

        let mut response = prototype;

        if tokio::runtime::Handle::try_current().is_ok() {
            let e = anyhow::Error::new(Error::Dispatch(
                "cannot dispatch from inside an async runtime; call the router from synchronous code"
                    .to_string(),
            ));
            self.errors
                .record(e.context(format!("{} {} failed", method, path)));
            response.set_status(http::StatusCode::INTERNAL_SERVER_ERROR);
            return response;
        }

        match self.runtime.block_on(self.call(request)) {
            Ok((parts, bytes)) => {
                debug!("{} {} -> {}", method, path, parts.status);
                response.set_status(parts.status);

                for name in parts.headers.keys() {
                    response.headers_mut().remove(name);
                }
                for (name, value) in parts.headers.iter() {
                    response.headers_mut().append(name.clone(), value.clone());
                }

                response.body_mut().write(&bytes);
            }
            Err(e) => {
                self.errors
                    .record(e.context(format!("{} {} failed", method, path)));
                response.set_status(http::StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputTarget;
    use axum::extract::Extension;
    use axum::routing::get;
    use http::StatusCode;

    fn sample_router() -> AxumRouter {
        let app = axum::Router::new()
            .route("/hello", get(|| async { "hello" }))
            .route(
                "/cookie",
                get(|headers: http::HeaderMap| async move {
                    headers
                        .get(COOKIE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string()
                }),
            )
            .route(
                "/attr",
                get(|Extension(attrs): Extension<Attributes>| async move {
                    attrs.0.get("locale").cloned().unwrap_or_default()
                }),
            );
        AxumRouter::new(app).unwrap()
    }

    #[test]
    fn test_dispatch_into_prototype() {
        let router = sample_router();
        let prototype = Response::with_output(OutputTarget::Temp)
            .with_header("x-frame-options", "deny")
            .unwrap();

        let response = router.handle(Request::get("/hello").unwrap(), prototype);

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().text(), "hello");
        assert_eq!(response.output_target(), OutputTarget::Temp);
        assert_eq!(response.header("x-frame-options"), Some("deny"));
    }

    #[test]
    fn test_unknown_route_uses_router_fallback() {
        let router = sample_router();
        let response = router.handle(Request::get("/unknown").unwrap(), Response::new());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(router.error_log().is_empty());
    }

    #[test]
    fn test_cookies_and_attributes_reach_handlers() {
        let router = sample_router();

        let request = Request::get("/cookie").unwrap().with_cookie("sid", "42");
        let response = router.handle(request, Response::new());
        assert_eq!(response.body().text(), "sid=42");

        let request = Request::get("/attr").unwrap().with_attribute("locale", "nl");
        let response = router.handle(request, Response::new());
        assert_eq!(response.body().text(), "nl");
    }

    #[test]
    fn test_closure_router() {
        let router = |request: Request, prototype: Response| {
            prototype.with_body(request.path().as_bytes())
        };
        let response = router.handle(Request::get("/echo").unwrap(), Response::new());
        assert_eq!(response.body().text(), "/echo");
    }

    #[test]
    fn test_dispatch_inside_runtime_is_reported() {
        let router = sample_router();
        let outer = tokio::runtime::Runtime::new().unwrap();
        let guard = outer.enter();

        let response = router.handle(Request::get("/hello").unwrap(), Response::new());
        drop(guard);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body().is_empty());
        let error = router.error_log().last_error().unwrap();
        assert!(format!("{:#}", error).starts_with("GET /hello failed: Dispatch error"));
    }

    #[test]
    fn test_error_log_clear() {
        let log = ErrorLog::new();
        log.record(anyhow::anyhow!("stale"));

        ErrorHandler::clear(&log);
        assert!(log.last_error().is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_error_log_last_error() {
        let log = ErrorLog::new();
        assert!(log.last_error().is_none());

        log.record(anyhow::anyhow!("first"));
        log.record(anyhow::anyhow!("second"));

        assert_eq!(log.len(), 2);
        assert_eq!(log.last_error().unwrap().to_string(), "second");
    }
}
