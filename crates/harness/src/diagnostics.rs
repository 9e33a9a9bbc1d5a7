//! Diagnostic channel for surfacing errors the response object hides

use tracing::debug;

pub trait Diagnostics: Send + Sync {
    fn debug(&self, message: &str);
}

/// Emits diagnostics as `tracing` debug events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn debug(&self, message: &str) {
        debug!(target: "routeprobe::diagnostics", "{}", message);
    }
}
