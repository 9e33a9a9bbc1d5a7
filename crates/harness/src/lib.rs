//! routeprobe functional-test harness
//!
//! Runs an HTTP-style router in-process: requests are built in memory, handed
//! straight to the router and the response object is returned for assertions.
//! No socket is ever opened.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Module (lifecycle controller)                              │
//! │    ├── initialize()   -> ContainerGateway::resolve()        │
//! │    │                     router, base request/response      │
//! │    ├── before_suite() -> OutputCaptureController::start     │
//! │    ├── before(test)   -> fresh Connector                    │
//! │    ├── failed(test)   -> ErrorHandler -> Diagnostics        │
//! │    ├── after(test)    -> SessionControl::abort,             │
//! │    │                     Connector::reset, carry bases      │
//! │    └── after_suite()  -> OutputCaptureController::stop      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Connector (simulated browser)                              │
//! │    └── dispatch(request) -> Router::handle(request, proto)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Suite / TestRunner                                         │
//! │    ├── Suite::run(test, |client| ...) with cleanup          │
//! │    └── ScenarioSpec (YAML) -> execute_steps                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod capture;
pub mod config;
pub mod connector;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod manifest;
pub mod module;
pub mod runner;
pub mod session;
pub mod spec;
pub mod suite;

pub use capture::{OutputCapture, OutputCaptureController};
pub use config::ModuleConfig;
pub use connector::Connector;
pub use error::{HarnessError, HarnessResult};
pub use gateway::{ContainerGateway, ContainerLoader};
pub use module::{Module, TestFailure, TestInfo};
pub use runner::TestRunner;
pub use session::SessionControl;
pub use spec::{ScenarioSpec, ScenarioStep};
pub use suite::{Suite, TestResult, TestSuiteResult};
