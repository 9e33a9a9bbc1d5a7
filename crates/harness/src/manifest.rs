//! Declarative container manifests
//!
//! A manifest is a YAML file describing the routes of a small application
//! plus the optional base request and response. Loading it yields a
//! [`ServiceContainer`] exposing an axum-backed router under the usual keys.
//!
//! ```yaml
//! routes:
//!   /:
//!     controller: test
//!   /api/ping:
//!     controller: test
//!     action: ping
//! request:
//!   headers:
//!     accept: text/html
//! response:
//!   output: temp
//! ```

use axum::response::IntoResponse;
use axum::routing::any;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use routeprobe_common::{
    session, AxumRouter, ErrorLog, OutputTarget, Request, Response, ServiceContainer,
    SharedContainer,
};

use crate::error::{HarnessError, HarnessResult};
use crate::gateway::{ContainerLoader, Loaded};

/// Cookie carrying the id of sessions opened by manifest routes
pub const SESSION_COOKIE: &str = "routeprobe_session";

/// A complete container manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerManifest {
    /// Route path to route definition
    #[serde(default)]
    pub routes: BTreeMap<String, RouteDef>,

    /// Base request registered under `request`
    #[serde(default)]
    pub request: Option<RequestDef>,

    /// Base response registered under `response`
    #[serde(default)]
    pub response: Option<ResponseDef>,

    /// Register the router's error log under `error_handler`
    #[serde(default = "default_true")]
    pub error_handler: bool,
}

fn default_true() -> bool {
    true
}

fn default_status() -> u16 {
    200
}

/// What a route answers with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDef {
    pub controller: String,

    #[serde(default)]
    pub action: Option<String>,

    #[serde(default = "default_status")]
    pub status: u16,

    /// Literal body; defaults to a JSON description of controller and action
    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Answer with a redirect to this location
    #[serde(default)]
    pub redirect: Option<String>,

    /// Fail with this message instead of answering normally
    #[serde(default)]
    pub fail: Option<String>,

    /// Open a session and leave it open
    #[serde(default)]
    pub start_session: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDef {
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseDef {
    #[serde(default)]
    pub output: OutputTarget,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn parse_headers(context: &str, headers: &BTreeMap<String, String>) -> HarnessResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            HarnessError::Configuration(format!("{}: invalid header '{}': {}", context, name, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            HarnessError::Configuration(format!("{}: invalid value for '{}': {}", context, name, e))
        })?;
        map.insert(header, value);
    }
    Ok(map)
}

/// Route definition checked and converted to http types
#[derive(Debug)]
struct CompiledRoute {
    name: String,
    status: StatusCode,
    body: String,
    content_type: &'static str,
    headers: HeaderMap,
    redirect: Option<HeaderValue>,
    fail: Option<String>,
    start_session: bool,
}

impl CompiledRoute {
    fn compile(path: &str, route: &RouteDef) -> HarnessResult<Self> {
        if !path.starts_with('/') {
            return Err(HarnessError::Configuration(format!(
                "Route '{}' must start with '/'",
                path
            )));
        }
        if let Some(c) = path.chars().find(|c| matches!(c, ':' | '*')) {
            return Err(HarnessError::Configuration(format!(
                "route '{}': '{}' is not allowed; manifest routes are literal paths",
                path, c
            )));
        }

        let action = route.action.as_deref().unwrap_or("default");
        let name = format!("{}::{}", route.controller, action);
        let context = format!("route '{}'", path);

        let mut status = StatusCode::from_u16(route.status).map_err(|e| {
            HarnessError::Configuration(format!("{}: invalid status {}: {}", context, route.status, e))
        })?;

        let redirect = match &route.redirect {
            Some(location) => {
                if !status.is_redirection() {
                    status = StatusCode::FOUND;
                }
                Some(HeaderValue::from_str(location).map_err(|e| {
                    HarnessError::Configuration(format!("{}: invalid redirect: {}", context, e))
                })?)
            }
            None => None,
        };

        let (body, content_type) = match &route.body {
            Some(body) => (body.clone(), "text/html; charset=utf-8"),
            None => (
                serde_json::json!({
                    "controller": route.controller,
                    "action": action,
                })
                .to_string(),
                "application/json",
            ),
        };

        Ok(Self {
            name,
            status,
            body,
            content_type,
            headers: parse_headers(&context, &route.headers)?,
            redirect,
            fail: route.fail.clone(),
            start_session: route.start_session,
        })
    }

    fn respond(&self, request_headers: &HeaderMap, errors: &ErrorLog) -> axum::response::Response {
        debug!("Routing to {}", self.name);

        if let Some(message) = &self.fail {
            errors.record(anyhow::anyhow!("{}", message).context(format!("{} failed", self.name)));
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        let mut response = (self.status, self.body.clone()).into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(location) = &self.redirect {
            headers.insert(LOCATION, location.clone());
        }

        if self.start_session {
            let known = session_cookie(request_headers);
            let id = session::start(known.as_deref());
            if let Ok(cookie) = HeaderValue::from_str(&format!("{}={}; Path=/", SESSION_COOKIE, id)) {
                headers.append(SET_COOKIE, cookie);
            }
        }

        response
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "rejected by the router".to_string()
    }
}

impl RequestDef {
    fn to_request(&self) -> HarnessResult<Request> {
        let mut request = Request::from_parts(
            self.method.as_deref().unwrap_or("GET"),
            self.uri.as_deref().unwrap_or("/"),
        )?;
        request
            .headers_mut()
            .extend(parse_headers("base request", &self.headers)?);

        for (name, value) in &self.cookies {
            request = request.with_cookie(name, value);
        }
        for (name, value) in &self.attributes {
            request = request.with_attribute(name, value);
        }
        Ok(request)
    }
}

impl ResponseDef {
    fn to_response(&self) -> HarnessResult<Response> {
        let mut response = Response::with_output(self.output);
        response
            .headers_mut()
            .extend(parse_headers("base response", &self.headers)?);
        Ok(response)
    }
}

impl ContainerManifest {
    /// Parse a manifest from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml).map_err(HarnessError::from)
    }

    /// Parse a manifest from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Build the container described by this manifest
    pub fn into_container(self) -> HarnessResult<ServiceContainer> {
        let errors = ErrorLog::new();
        let mut app = axum::Router::new();

        for (path, route) in &self.routes {
            let compiled = Arc::new(CompiledRoute::compile(path, route)?);
            let errors = errors.clone();
            let handler = any(move |headers: HeaderMap| {
                let route = compiled.clone();
                let errors = errors.clone();
                async move { route.respond(&headers, &errors) }
            });

            // axum panics on routes its matcher rejects
            app = catch_unwind(AssertUnwindSafe(move || app.route(path, handler))).map_err(
                |panic| {
                    HarnessError::Configuration(format!(
                        "route '{}': {}",
                        path,
                        panic_message(panic.as_ref())
                    ))
                },
            )?;
        }

        let router = AxumRouter::new(app)?.with_error_log(errors.clone());
        let mut container = ServiceContainer::new().with_router(Arc::new(router));

        if let Some(request) = &self.request {
            container = container.with_request(request.to_request()?);
        }
        if let Some(response) = &self.response {
            container = container.with_response(response.to_response()?);
        }
        if self.error_handler {
            container = container.with_error_handler(Arc::new(errors));
        }

        Ok(container)
    }
}

/// Loads containers from YAML manifests
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

impl ContainerLoader for ManifestLoader {
    fn load(&self, path: &Path) -> HarnessResult<Loaded> {
        let container: SharedContainer =
            Arc::new(ContainerManifest::from_file(path)?.into_container()?);
        Ok(Box::new(container))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeprobe_common::{keys, Container, ContainerExt, ErrorHandler, Router};

    const MANIFEST: &str = r#"
routes:
  /:
    controller: test
  /api/ping:
    controller: test
    action: ping
  /old:
    controller: test
    redirect: /
  /boom:
    controller: test
    action: boom
    fail: database unavailable
request:
  headers:
    accept: text/html
  cookies:
    theme: dark
response:
  output: temp
"#;

    fn router(container: &ServiceContainer) -> Arc<dyn Router> {
        container.fetch::<Arc<dyn Router>>(keys::ROUTER).unwrap()
    }

    #[test]
    fn test_manifest_registers_services() {
        let container = ContainerManifest::from_yaml(MANIFEST)
            .unwrap()
            .into_container()
            .unwrap();

        assert!(container.has(keys::ROUTER));
        assert!(container.has(keys::ERROR_HANDLER));

        let request = container.fetch::<Request>(keys::REQUEST).unwrap();
        assert_eq!(request.header("accept"), Some("text/html"));
        assert_eq!(request.cookie("theme"), Some("dark"));

        let response = container.fetch::<Response>(keys::RESPONSE).unwrap();
        assert_eq!(response.output_target(), OutputTarget::Temp);
    }

    #[test]
    fn test_default_body_names_action() {
        let container = ContainerManifest::from_yaml(MANIFEST)
            .unwrap()
            .into_container()
            .unwrap();

        let response = router(&container).handle(Request::get("/api/ping").unwrap(), Response::new());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("content-type"), Some("application/json"));

        let body: serde_json::Value = serde_json::from_slice(response.body().bytes()).unwrap();
        assert_eq!(body["controller"], "test");
        assert_eq!(body["action"], "ping");
    }

    #[test]
    fn test_redirect_route() {
        let container = ContainerManifest::from_yaml(MANIFEST)
            .unwrap()
            .into_container()
            .unwrap();

        let response = router(&container).handle(Request::get("/old").unwrap(), Response::new());
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.location(), Some("/"));
    }

    #[test]
    fn test_failing_route_records_error() {
        let container = ContainerManifest::from_yaml(MANIFEST)
            .unwrap()
            .into_container()
            .unwrap();

        let response = router(&container).handle(Request::get("/boom").unwrap(), Response::new());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let handler = container
            .fetch::<Arc<dyn ErrorHandler>>(keys::ERROR_HANDLER)
            .unwrap();
        let error = handler.last_error().unwrap();
        assert_eq!(format!("{:#}", error), "test::boom failed: database unavailable");
    }

    #[test]
    fn test_session_route_sets_cookie() {
        let manifest = ContainerManifest::from_yaml(
            r#"
routes:
  /login:
    controller: auth
    action: login
    start_session: true
"#,
        )
        .unwrap();
        let container = manifest.into_container().unwrap();

        let request = Request::get("/login").unwrap().with_cookie(SESSION_COOKIE, "abc");
        let response = router(&container).handle(request, Response::new());

        assert_eq!(session::status(), routeprobe_common::SessionStatus::Active);
        assert_eq!(session::id().as_deref(), Some("abc"));
        let cookies = response.set_cookies();
        assert_eq!(cookies[0].name, SESSION_COOKIE);
        assert_eq!(cookies[0].value, "abc");
        session::abort();
    }

    #[test]
    fn test_relative_route_rejected() {
        let manifest = ContainerManifest::from_yaml(
            r#"
routes:
  nope:
    controller: test
"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.into_container(),
            Err(HarnessError::Configuration(_))
        ));
    }

    #[test]
    fn test_parameter_routes_rejected() {
        let manifest = ContainerManifest::from_yaml(
            r#"
routes:
  /users/:id:
    controller: users
  /users/:name:
    controller: users
"#,
        )
        .unwrap();

        let err = manifest.into_container().err().unwrap();
        assert!(matches!(
            err,
            HarnessError::Configuration(ref msg) if msg.starts_with("route '/users/:id'")
        ));
    }

    #[test]
    fn test_wildcard_route_rejected() {
        let manifest = ContainerManifest::from_yaml("routes:\n  /files/*rest:\n    controller: files\n")
            .unwrap();
        assert!(matches!(
            manifest.into_container(),
            Err(HarnessError::Configuration(ref msg)) if msg.contains("'*' is not allowed")
        ));
    }

    #[test]
    fn test_no_error_handler_when_disabled() {
        let container = ContainerManifest::from_yaml("error_handler: false\n")
            .unwrap()
            .into_container()
            .unwrap();
        assert!(!container.has(keys::ERROR_HANDLER));
        assert!(!container.has(keys::REQUEST));
        assert!(!container.has(keys::RESPONSE));
    }
}
