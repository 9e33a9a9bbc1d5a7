//! routeprobe common library
//!
//! Message types and capability contracts shared by the harness and the code
//! it drives: requests and responses, the dependency container, the router,
//! the error log, plus the shared output channel and session store that
//! routed code may touch directly.

pub mod container;
pub mod error;
pub mod output;
pub mod router;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use container::{keys, Container, ContainerExt, Service, ServiceContainer, SharedContainer};
pub use error::{Error, Result};
pub use router::{Attributes, AxumRouter, ErrorHandler, ErrorLog, Router};
pub use session::SessionStatus;
pub use types::*;

/// routeprobe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
