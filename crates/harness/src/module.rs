//! Lifecycle controller
//!
//! `Module` owns the suite: it resolves the container once, brackets the
//! suite with output capture when the base response writes to the shared
//! channel, hands every test a fresh [`Connector`] and cleans up after it.
//!
//! Hook order for a suite:
//!
//! ```text
//! initialize -> before_suite -> { before -> (test) -> [failed] -> after }* -> after_suite
//! ```
//!
//! [`Suite`](crate::suite::Suite) drives these hooks with guaranteed cleanup.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info, warn};

use routeprobe_common::{
    keys, Container, ContainerExt, ErrorHandler, Request, Response, Router, SessionStatus,
    SharedContainer,
};

use crate::capture::{OutputCapture, OutputCaptureController, ProcessOutput};
use crate::config::ModuleConfig;
use crate::connector::Connector;
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::error::{HarnessError, HarnessResult};
use crate::gateway::{ContainerGateway, ContainerLoader};
use crate::manifest::ManifestLoader;
use crate::session::{ProcessSession, SessionControl};

/// What the host runner knows about the current test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInfo {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TestInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
        }
    }
}

/// Why a test failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub message: String,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build a failure from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "test panicked".to_string()
        };
        Self { message }
    }
}

impl std::fmt::Display for TestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<anyhow::Error> for TestFailure {
    fn from(e: anyhow::Error) -> Self {
        Self::new(format!("{:#}", e))
    }
}

impl From<HarnessError> for TestFailure {
    fn from(e: HarnessError) -> Self {
        Self::new(e.to_string())
    }
}

/// Builds a [`Module`] with its collaborators
pub struct ModuleBuilder {
    config: ModuleConfig,
    loader: Arc<dyn ContainerLoader>,
    output: Arc<dyn OutputCapture>,
    session: Arc<dyn SessionControl>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ModuleBuilder {
    pub fn loader(mut self, loader: Arc<dyn ContainerLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn output_capture(mut self, output: Arc<dyn OutputCapture>) -> Self {
        self.output = output;
        self
    }

    pub fn session_control(mut self, session: Arc<dyn SessionControl>) -> Self {
        self.session = session;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn build(self) -> Module {
        let gateway = ContainerGateway::with_loader(self.config.project_dir(), self.loader);

        Module {
            config: self.config,
            gateway,
            capture: OutputCaptureController::new(self.output),
            session: self.session,
            diagnostics: self.diagnostics,
            container: None,
            router: None,
            base_request: None,
            base_response: None,
            client: None,
            capturing: false,
        }
    }
}

/// Functional-test lifecycle controller
pub struct Module {
    config: ModuleConfig,
    gateway: ContainerGateway,
    capture: OutputCaptureController,
    session: Arc<dyn SessionControl>,
    diagnostics: Arc<dyn Diagnostics>,

    container: Option<SharedContainer>,
    router: Option<Arc<dyn Router>>,
    base_request: Option<Request>,
    base_response: Option<Response>,
    client: Option<Connector>,

    /// Output capture was engaged at suite start
    capturing: bool,
}

impl Module {
    /// Module with the default collaborators: YAML manifests, the thread's
    /// output channel and session store, tracing diagnostics
    pub fn new(config: ModuleConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ModuleConfig) -> ModuleBuilder {
        ModuleBuilder {
            config,
            loader: Arc::new(ManifestLoader),
            output: Arc::new(ProcessOutput),
            session: Arc::new(ProcessSession),
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn container(&self) -> Option<&SharedContainer> {
        self.container.as_ref()
    }

    pub fn router(&self) -> Option<&Arc<dyn Router>> {
        self.router.as_ref()
    }

    pub fn base_request(&self) -> Option<&Request> {
        self.base_request.as_ref()
    }

    pub fn base_response(&self) -> Option<&Response> {
        self.base_response.as_ref()
    }

    /// Replace the suite's base request
    pub fn set_base_request(&mut self, request: Option<Request>) {
        self.base_request = request;
    }

    /// Replace the suite's base response
    pub fn set_base_response(&mut self, response: Option<Response>) {
        self.base_response = response;
    }

    /// Connector of the running test
    pub fn client(&self) -> Option<&Connector> {
        self.client.as_ref()
    }

    pub fn client_mut(&mut self) -> HarnessResult<&mut Connector> {
        self.client
            .as_mut()
            .ok_or_else(|| HarnessError::Precondition("No test is running".to_string()))
    }

    /// Whether output capture was engaged by `before_suite`
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Resolve the container and pull the router and base request/response
    /// out of it
    pub fn initialize(&mut self) -> HarnessResult<()> {
        let locator = self.config.container_locator()?.to_string();
        let container = self.gateway.resolve(&locator)?;

        let router = container
            .fetch::<Arc<dyn Router>>(keys::ROUTER)
            .map_err(|e| {
                HarnessError::Configuration(format!(
                    "Container from '{}' does not provide a router: {}",
                    locator, e
                ))
            })?;

        let base_request = fetch_optional::<Request>(container.as_ref(), keys::REQUEST, &locator)?;
        let base_response = fetch_optional::<Response>(container.as_ref(), keys::RESPONSE, &locator)?;

        info!(
            "Module initialized from '{}' (base request: {}, base response: {})",
            locator,
            base_request.is_some(),
            base_response.is_some()
        );

        self.router = Some(router);
        self.base_request = base_request;
        self.base_response = base_response;
        self.container = Some(container);
        Ok(())
    }

    pub fn before_suite(&mut self) -> HarnessResult<()> {
        self.capturing = OutputCaptureController::uses_shared_output(self.base_response.as_ref());

        if self.capturing {
            debug!("Base response writes to the shared output channel; capturing");
            if let Err(e) = self.capture.start_capture() {
                self.capturing = false;
                return Err(e);
            }
        }

        Ok(())
    }

    pub fn after_suite(&mut self) {
        if self.capturing {
            self.capture.stop_capture();
            self.capturing = false;
        }
    }

    /// Give the test a fresh connector wired to the router and the bases
    pub fn before(&mut self, test: &TestInfo) -> HarnessResult<()> {
        let router = self.router.clone().ok_or_else(|| {
            HarnessError::Precondition("Module is not initialized; no router available".to_string())
        })?;

        let mut client = Connector::new();
        client.set_router(router);
        client.set_follow_redirects(self.config.follow_redirects);
        client.set_max_redirects(self.config.max_redirects);

        if let Some(request) = &self.base_request {
            client.set_base_request(request.clone());
        }
        if let Some(response) = &self.base_response {
            client.set_base_response(response.clone());
        }

        debug!("Starting test '{}'", test.name);
        self.client = Some(client);
        Ok(())
    }

    /// Surface the last error recorded by the code under test
    pub fn failed(&mut self, test: &TestInfo, failure: &TestFailure) {
        debug!("Test '{}' failed: {}", test.name, failure);

        if let Some(error) = self.error_handler().and_then(|handler| handler.last_error()) {
            self.diagnostics.debug(&format!("{:#}", error));
        }
    }

    fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        let container = self.container.as_ref()?;
        if !container.has(keys::ERROR_HANDLER) {
            return None;
        }

        container
            .fetch::<Arc<dyn ErrorHandler>>(keys::ERROR_HANDLER)
            .map_err(|e| warn!("Error handler unavailable: {}", e))
            .ok()
    }

    /// Abort a leftover session and clear recorded errors; the connector's
    /// state becomes the next test's base
    pub fn after(&mut self, test: &TestInfo) {
        if self.session.status() == SessionStatus::Active {
            debug!("Aborting session left open by '{}'", test.name);
            self.session.abort();
        }

        if let Some(handler) = self.error_handler() {
            handler.clear();
        }

        if let Some(mut client) = self.client.take() {
            client.reset();

            if self.base_request.is_some() {
                self.base_request = client.base_request().cloned();
            }
            if self.base_response.is_some() {
                self.base_response = client.base_response().cloned();
            }
        }
    }
}

fn fetch_optional<T: Clone + 'static>(
    container: &dyn Container,
    key: &str,
    locator: &str,
) -> HarnessResult<Option<T>> {
    if !container.has(key) {
        return Ok(None);
    }

    container.fetch::<T>(key).map(Some).map_err(|e| {
        HarnessError::Configuration(format!("Container from '{}': {}", locator, e))
    })
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("config", &self.config)
            .field("initialized", &self.container.is_some())
            .field("base_request", &self.base_request)
            .field("base_response", &self.base_response)
            .field("capturing", &self.capturing)
            .finish_non_exhaustive()
    }
}
