//! In-process connector: a simulated browser in front of the router
//!
//! Requests are composed in three layers, later layers winning:
//!
//! 1. the base request (suite-wide defaults, e.g. a logged-in session cookie)
//! 2. per-test state: headers set with [`Connector::have_http_header`] and the
//!    cookie jar, which absorbs `Set-Cookie` from every response
//! 3. the explicit request passed to [`Connector::dispatch`]
//!
//! The router receives the composed request together with a blank prototype
//! derived from the base response, so the base response decides where the
//! body is written.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use routeprobe_common::{Request, Response, Router};

use crate::error::{HarnessError, HarnessResult};

pub struct Connector {
    router: Option<Arc<dyn Router>>,
    base_request: Option<Request>,
    base_response: Option<Response>,

    cookies: BTreeMap<String, String>,
    default_headers: HeaderMap,
    current_request: Option<Request>,
    current_response: Option<Response>,
    history: Vec<Request>,

    follow_redirects: bool,
    max_redirects: usize,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector {
    pub fn new() -> Self {
        Self {
            router: None,
            base_request: None,
            base_response: None,
            cookies: BTreeMap::new(),
            default_headers: HeaderMap::new(),
            current_request: None,
            current_response: None,
            history: Vec::new(),
            follow_redirects: false,
            max_redirects: 5,
        }
    }

    pub fn set_router(&mut self, router: Arc<dyn Router>) {
        self.router = Some(router);
    }

    pub fn router(&self) -> Option<&Arc<dyn Router>> {
        self.router.as_ref()
    }

    /// Use `request` as the baseline; its cookies seed the cookie jar
    pub fn set_base_request(&mut self, request: Request) {
        self.cookies = request.cookies().clone();
        self.base_request = Some(request);
    }

    pub fn set_base_response(&mut self, response: Response) {
        self.base_response = Some(response);
    }

    pub fn base_request(&self) -> Option<&Request> {
        self.base_request.as_ref()
    }

    pub fn base_response(&self) -> Option<&Response> {
        self.base_response.as_ref()
    }

    pub fn set_follow_redirects(&mut self, follow: bool) {
        self.follow_redirects = follow;
    }

    pub fn set_max_redirects(&mut self, max: usize) {
        self.max_redirects = max;
    }

    /// Send `value` as header `name` with every request of this test
    pub fn have_http_header(&mut self, name: &str, value: &str) -> HarnessResult<()> {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            routeprobe_common::Error::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            routeprobe_common::Error::InvalidHeader {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.default_headers.insert(header, value);
        Ok(())
    }

    pub fn delete_header(&mut self, name: &str) {
        self.default_headers.remove(name);
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn reset_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Base request overlaid with this test's headers and cookie jar
    fn defaults(&self) -> Request {
        let mut defaults = self.base_request.clone().unwrap_or_default();
        *defaults.cookies_mut() = self.cookies.clone();

        let headers = defaults.headers_mut();
        for name in self.default_headers.keys() {
            headers.remove(name);
        }
        for (name, value) in self.default_headers.iter() {
            headers.append(name.clone(), value.clone());
        }

        defaults
    }

    fn absorb_cookies(&mut self, response: &Response) {
        for cookie in response.set_cookies() {
            if cookie.expired {
                trace!("Cookie {} cleared", cookie.name);
                self.cookies.remove(&cookie.name);
            } else {
                trace!("Cookie {} set", cookie.name);
                self.cookies.insert(cookie.name, cookie.value);
            }
        }
    }

    fn send_once(&mut self, router: &Arc<dyn Router>, request: Request) -> Response {
        let composed = request.with_defaults(&self.defaults());
        let prototype = self
            .base_response
            .as_ref()
            .map(Response::prototype)
            .unwrap_or_default();

        debug!("Dispatching {} {}", composed.method(), composed.uri());
        let response = router.handle(composed.clone(), prototype);
        debug!("Response {} for {}", response.status(), composed.uri());

        self.absorb_cookies(&response);
        self.history.push(composed.clone());
        self.current_request = Some(composed);
        self.current_response = Some(response.clone());
        response
    }

    fn redirect_request(&self, response: &Response) -> HarnessResult<Request> {
        let location = response.location().ok_or_else(|| {
            HarnessError::Precondition("Response is not a redirect".to_string())
        })?;

        let previous = self.current_request.as_ref();
        match response.status() {
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
                let method = previous.map(|r| r.method().clone()).unwrap_or(Method::GET);
                let body = previous.map(|r| r.body().clone()).unwrap_or_default();
                Ok(Request::new(method, location)?.with_body(body))
            }
            _ => Ok(Request::get(location)?),
        }
    }

    /// Route `request` through the router and return the response
    pub fn dispatch(&mut self, request: Request) -> HarnessResult<Response> {
        let router = self.router.clone().ok_or_else(|| {
            HarnessError::Precondition(
                "No router configured; set_router must be called before dispatching".to_string(),
            )
        })?;

        let mut response = self.send_once(&router, request);
        let mut redirects = 0;

        while self.follow_redirects && response.is_redirect() {
            if redirects >= self.max_redirects {
                return Err(HarnessError::RedirectLimit {
                    limit: self.max_redirects,
                    uri: response.location().unwrap_or_default().to_string(),
                });
            }
            redirects += 1;

            let next = self.redirect_request(&response)?;
            response = self.send_once(&router, next);
        }

        Ok(response)
    }

    pub fn get(&mut self, uri: &str) -> HarnessResult<Response> {
        self.dispatch(Request::get(uri)?)
    }

    pub fn post(&mut self, uri: &str, body: impl Into<Bytes>) -> HarnessResult<Response> {
        self.dispatch(Request::post(uri)?.with_body(body))
    }

    pub fn send(&mut self, method: &str, uri: &str, body: impl Into<Bytes>) -> HarnessResult<Response> {
        self.dispatch(Request::from_parts(method, uri)?.with_body(body))
    }

    /// Follow the redirect held by the current response
    pub fn follow_redirect(&mut self) -> HarnessResult<Response> {
        let response = self.current_response.as_ref().ok_or_else(|| {
            HarnessError::Precondition("No request has been made yet".to_string())
        })?;
        let next = self.redirect_request(response)?;
        self.dispatch(next)
    }

    pub fn current_request(&self) -> Option<&Request> {
        self.current_request.as_ref()
    }

    pub fn current_response(&self) -> Option<&Response> {
        self.current_response.as_ref()
    }

    pub fn current_url(&self) -> Option<String> {
        self.current_request.as_ref().map(|r| r.uri().to_string())
    }

    pub fn history(&self) -> &[Request] {
        &self.history
    }

    /// Fold this test's state into the base request/response and clear
    /// everything else.
    ///
    /// The base response becomes the last response produced; the base
    /// request's cookies become the cookie jar. Bases that were never set
    /// stay unset.
    pub fn reset(&mut self) {
        if let Some(response) = self.current_response.take() {
            if self.base_response.is_some() {
                self.base_response = Some(response);
            }
        }

        let cookies = std::mem::take(&mut self.cookies);
        if let Some(base) = self.base_request.as_mut() {
            *base.cookies_mut() = cookies;
        }

        self.default_headers.clear();
        self.current_request = None;
        self.history.clear();
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("has_router", &self.router.is_some())
            .field("base_request", &self.base_request)
            .field("base_response", &self.base_response)
            .field("cookies", &self.cookies)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeprobe_common::OutputTarget;

    /// Echoes the composed request back as text
    fn echo_router() -> Arc<dyn Router> {
        Arc::new(|request: Request, prototype: Response| {
            let body = format!(
                "{} {} accept={} cookies={}",
                request.method(),
                request.path(),
                request.header("accept").unwrap_or("-"),
                request.cookie_header().unwrap_or_default(),
            );
            prototype.with_body(body)
        })
    }

    /// `/login` sets a session cookie, `/logout` clears it, `/old` redirects
    fn browser_router() -> Arc<dyn Router> {
        Arc::new(|request: Request, prototype: Response| match request.path() {
            "/login" => prototype
                .with_header("set-cookie", "sid=s3cr3t; Path=/")
                .unwrap(),
            "/logout" => prototype
                .with_header("set-cookie", "sid=; Max-Age=0")
                .unwrap(),
            "/old" => prototype
                .with_status(StatusCode::FOUND)
                .with_header("location", "/new")
                .unwrap(),
            "/loop" => prototype
                .with_status(StatusCode::FOUND)
                .with_header("location", "/loop")
                .unwrap(),
            "/keep" => prototype
                .with_status(StatusCode::TEMPORARY_REDIRECT)
                .with_header("location", "/new")
                .unwrap(),
            path => prototype.with_body(format!(
                "{} {} sid={}",
                request.method(),
                path,
                request.cookie("sid").unwrap_or("-")
            )),
        })
    }

    #[test]
    fn test_dispatch_without_router_fails_fast() {
        let mut connector = Connector::new();
        let err = connector.get("/").unwrap_err();
        assert!(matches!(err, HarnessError::Precondition(_)));
        assert!(connector.current_request().is_none());
    }

    #[test]
    fn test_explicit_request_wins_over_base() {
        let mut connector = Connector::new();
        connector.set_router(echo_router());
        connector.set_base_request(
            Request::get("/")
                .unwrap()
                .with_header("accept", "text/html")
                .unwrap(),
        );

        let response = connector.get("/a").unwrap();
        assert_eq!(response.body().text(), "GET /a accept=text/html cookies=");

        let request = Request::get("/b")
            .unwrap()
            .with_header("accept", "application/json")
            .unwrap();
        let response = connector.dispatch(request).unwrap();
        assert_eq!(response.body().text(), "GET /b accept=application/json cookies=");
    }

    #[test]
    fn test_test_headers_sit_between_base_and_explicit() {
        let mut connector = Connector::new();
        connector.set_router(echo_router());
        connector.set_base_request(
            Request::get("/")
                .unwrap()
                .with_header("accept", "text/html")
                .unwrap(),
        );
        connector.have_http_header("accept", "text/plain").unwrap();

        let response = connector.get("/").unwrap();
        assert_eq!(response.body().text(), "GET / accept=text/plain cookies=");

        connector.delete_header("accept");
        let response = connector.get("/").unwrap();
        assert_eq!(response.body().text(), "GET / accept=text/html cookies=");
    }

    #[test]
    fn test_cookie_jar_follows_responses() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());

        connector.get("/login").unwrap();
        assert_eq!(connector.cookie("sid"), Some("s3cr3t"));

        let response = connector.get("/profile").unwrap();
        assert_eq!(response.body().text(), "GET /profile sid=s3cr3t");

        connector.get("/logout").unwrap();
        assert_eq!(connector.cookie("sid"), None);
    }

    #[test]
    fn test_expired_cookie_overrides_base() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());
        connector.set_base_request(Request::get("/").unwrap().with_cookie("sid", "old"));

        connector.get("/logout").unwrap();
        let response = connector.get("/profile").unwrap();
        assert_eq!(response.body().text(), "GET /profile sid=-");
    }

    #[test]
    fn test_reset_folds_state_into_bases() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());
        connector.set_base_request(Request::get("/").unwrap());
        connector.set_base_response(Response::with_output(OutputTarget::Temp));

        let last = connector.get("/login").unwrap();
        connector.reset();

        assert_eq!(connector.base_request().unwrap().cookie("sid"), Some("s3cr3t"));
        assert_eq!(connector.base_response(), Some(&last));
        assert!(connector.current_response().is_none());
        assert!(connector.history().is_empty());
        assert!(connector.cookies().is_empty());
    }

    #[test]
    fn test_reset_without_dispatch_keeps_bases() {
        let base_request = Request::get("/").unwrap().with_cookie("theme", "dark");
        let base_response = Response::with_output(OutputTarget::Output);

        let mut connector = Connector::new();
        connector.set_router(browser_router());
        connector.set_base_request(base_request.clone());
        connector.set_base_response(base_response.clone());
        connector.reset();

        assert_eq!(connector.base_request(), Some(&base_request));
        assert_eq!(connector.base_response(), Some(&base_response));
    }

    #[test]
    fn test_reset_leaves_unset_bases_unset() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());
        connector.get("/login").unwrap();
        connector.reset();

        assert!(connector.base_request().is_none());
        assert!(connector.base_response().is_none());
    }

    #[test]
    fn test_router_receives_base_response_prototype() {
        let router: Arc<dyn Router> = Arc::new(|_: Request, prototype: Response| {
            let target = prototype.output_target().to_string();
            prototype.with_body(target)
        });

        let mut connector = Connector::new();
        connector.set_router(router);
        connector.set_base_response(Response::with_output(OutputTarget::Temp).with_body("stale"));

        let response = connector.get("/").unwrap();
        assert_eq!(response.body().text(), "temp");
    }

    #[test]
    fn test_redirects_not_followed_by_default() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());

        let response = connector.get("/old").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);

        let response = connector.follow_redirect().unwrap();
        assert_eq!(response.body().text(), "GET /new sid=-");
        assert_eq!(connector.current_url().as_deref(), Some("/new"));
        assert_eq!(connector.history().len(), 2);
    }

    #[test]
    fn test_follow_redirects() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());
        connector.set_follow_redirects(true);

        let response = connector.get("/old").unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().text(), "GET /new sid=-");

        let response = connector.send("post", "/keep", "payload").unwrap();
        assert_eq!(response.body().text(), "POST /new sid=-");
    }

    #[test]
    fn test_redirect_limit() {
        let mut connector = Connector::new();
        connector.set_router(browser_router());
        connector.set_follow_redirects(true);
        connector.set_max_redirects(3);

        let err = connector.get("/loop").unwrap_err();
        assert!(matches!(err, HarnessError::RedirectLimit { limit: 3, .. }));
        assert_eq!(connector.history().len(), 4);
    }
}
