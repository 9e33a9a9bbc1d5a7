//! Message types exchanged between the harness and the router

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::output;

/// Where a response body sends the bytes written into it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    /// In-memory buffer owned by the body
    #[default]
    Memory,
    /// Temporary buffer owned by the body
    Temp,
    /// The shared output channel; bytes never land in the body
    Output,
}

impl OutputTarget {
    /// True for the shared output channel sentinel
    pub fn is_shared(&self) -> bool {
        matches!(self, OutputTarget::Output)
    }
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::Memory => write!(f, "memory"),
            OutputTarget::Temp => write!(f, "temp"),
            OutputTarget::Output => write!(f, "output"),
        }
    }
}

/// Response body bound to an output target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    target: OutputTarget,
    content: Vec<u8>,
}

impl Body {
    pub fn new(target: OutputTarget) -> Self {
        Self {
            target,
            content: Vec::new(),
        }
    }

    pub fn target(&self) -> OutputTarget {
        self.target
    }

    /// Write bytes to the body's target
    pub fn write(&mut self, data: &[u8]) {
        if self.target.is_shared() {
            output::write(data);
        } else {
            self.content.extend_from_slice(data);
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.content
    }

    /// Body content as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// In-memory server request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
    body: Bytes,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            cookies: BTreeMap::new(),
            attributes: BTreeMap::new(),
            body: Bytes::new(),
        }
    }
}

impl Request {
    pub fn new(method: Method, uri: &str) -> Result<Self> {
        let uri = uri.parse::<Uri>().map_err(|e| Error::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            method,
            uri,
            ..Default::default()
        })
    }

    pub fn get(uri: &str) -> Result<Self> {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Result<Self> {
        Self::new(Method::POST, uri)
    }

    /// Build a request from a method name such as "PUT"
    pub fn from_parts(method: &str, uri: &str) -> Result<Self> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
        Self::new(method, uri)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.insert_header(name, value)?;
        Ok(self)
    }

    /// Set a header, replacing any previous values for it
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<()> {
        let value = header_value(name, value)?;
        self.headers.insert(header_name(name)?, value);
        Ok(())
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Fill in headers, cookies and attributes from `base` that this request
    /// does not set itself. Fields set on `self` always win.
    pub fn with_defaults(mut self, base: &Request) -> Self {
        for name in base.headers.keys() {
            if self.headers.contains_key(name) {
                continue;
            }
            for value in base.headers.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }

        for (name, value) in &base.cookies {
            self.cookies
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        for (name, value) in &base.attributes {
            self.attributes
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        self
    }

    /// Cookies rendered as a `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Some(pairs.join("; "))
    }
}

/// A cookie set (or cleared) by a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// `Max-Age` of zero or less: the browser must drop the cookie
    pub expired: bool,
}

impl SetCookie {
    /// Parse a `Set-Cookie` header value
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let expired = parts.any(|attr| {
            attr.split_once('=')
                .filter(|(key, _)| key.trim().eq_ignore_ascii_case("max-age"))
                .and_then(|(_, age)| age.trim().parse::<i64>().ok())
                .map(|age| age <= 0)
                .unwrap_or(false)
        });

        Some(Self {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            expired,
        })
    }
}

/// In-memory response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Body::default(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty response whose body writes to `target`
    pub fn with_output(target: OutputTarget) -> Self {
        Self {
            body: Body::new(target),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let value = header_value(name, value)?;
        self.headers.append(header_name(name)?, value);
        Ok(self)
    }

    pub fn with_body(mut self, data: impl AsRef<[u8]>) -> Self {
        self.body.write(data.as_ref());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn output_target(&self) -> OutputTarget {
        self.body.target()
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection() && self.headers.contains_key(LOCATION)
    }

    pub fn location(&self) -> Option<&str> {
        header_str(&self.headers, LOCATION.as_str())
    }

    /// Cookies set or cleared by this response, in header order
    pub fn set_cookies(&self) -> Vec<SetCookie> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(SetCookie::parse)
            .collect()
    }

    /// Blank copy handed to the router as the starting point of a new response
    pub fn prototype(&self) -> Response {
        let mut headers = self.headers.clone();
        headers.remove(SET_COOKIE);
        headers.remove(LOCATION);

        Response {
            status: StatusCode::OK,
            headers,
            body: Body::new(self.body.target()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_request_overrides_base() {
        let base = Request::get("/")
            .unwrap()
            .with_header("accept", "text/html")
            .unwrap()
            .with_header("x-tenant", "acme")
            .unwrap()
            .with_cookie("session", "base")
            .with_cookie("theme", "dark")
            .with_attribute("locale", "en");

        let request = Request::get("/api/ping")
            .unwrap()
            .with_header("accept", "application/json")
            .unwrap()
            .with_cookie("session", "explicit")
            .with_defaults(&base);

        assert_eq!(request.path(), "/api/ping");
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("x-tenant"), Some("acme"));
        assert_eq!(request.cookie("session"), Some("explicit"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.attribute("locale"), Some("en"));
    }

    #[test]
    fn test_invalid_uri_is_rejected() {
        let err = Request::get("http://[::1").unwrap_err();
        assert!(matches!(err, Error::InvalidUri { .. }));
    }

    #[test]
    fn test_cookie_header() {
        let request = Request::get("/").unwrap();
        assert_eq!(request.cookie_header(), None);

        let request = request.with_cookie("b", "2").with_cookie("a", "1");
        assert_eq!(request.cookie_header().as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn test_set_cookie_parse() {
        let cookie = SetCookie::parse("sid=abc123; Path=/; HttpOnly").unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert!(!cookie.expired);

        let cleared = SetCookie::parse("sid=; Max-Age=0").unwrap();
        assert!(cleared.expired);

        assert!(SetCookie::parse("garbage").is_none());
        assert!(SetCookie::parse("=value").is_none());
    }

    #[test]
    fn test_prototype_keeps_target_and_drops_state() {
        let response = Response::with_output(OutputTarget::Temp)
            .with_status(StatusCode::NOT_FOUND)
            .with_header("x-powered-by", "routeprobe")
            .unwrap()
            .with_header("set-cookie", "sid=1")
            .unwrap()
            .with_header("location", "/elsewhere")
            .unwrap()
            .with_body("stale");

        let prototype = response.prototype();
        assert_eq!(prototype.status(), StatusCode::OK);
        assert_eq!(prototype.output_target(), OutputTarget::Temp);
        assert_eq!(prototype.header("x-powered-by"), Some("routeprobe"));
        assert!(prototype.header("set-cookie").is_none());
        assert!(prototype.location().is_none());
        assert!(prototype.body().is_empty());
    }

    #[test]
    fn test_shared_body_writes_to_output_channel() {
        output::start();
        let mut body = Body::new(OutputTarget::Output);
        body.write(b"hello");

        assert!(body.is_empty());
        assert_eq!(output::contents(), b"hello".to_vec());

        output::discard();
        assert_eq!(output::level(), 0);
    }

    #[test]
    fn test_redirect_detection() {
        let response = Response::new()
            .with_status(StatusCode::FOUND)
            .with_header("location", "/login")
            .unwrap();
        assert!(response.is_redirect());
        assert_eq!(response.location(), Some("/login"));

        assert!(!Response::new().is_redirect());
    }
}
