//! Output capture
//!
//! When the base response writes straight to the shared output channel, the
//! suite is bracketed by a capture scope so that output never reaches the
//! runner's own report. Tests assert on the response object, so the captured
//! bytes are discarded.

use std::sync::Arc;
use tracing::debug;

use routeprobe_common::{output, Response};

use crate::error::{HarnessError, HarnessResult};

/// Primitives of the shared output channel
pub trait OutputCapture: Send + Sync {
    /// Open a capture scope
    fn start(&self);

    /// Number of open capture scopes
    fn level(&self) -> usize;

    /// Empty the innermost scope but keep it open
    fn clean(&self);

    /// Close the innermost scope, dropping what it captured
    fn discard(&self);
}

/// The shared output channel of the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOutput;

impl OutputCapture for ProcessOutput {
    fn start(&self) {
        output::start();
    }

    fn level(&self) -> usize {
        output::level()
    }

    fn clean(&self) {
        output::clean();
    }

    fn discard(&self) {
        output::discard();
    }
}

#[derive(Clone)]
pub struct OutputCaptureController {
    port: Arc<dyn OutputCapture>,
    /// The active scope was opened by this controller
    owned: bool,
}

impl OutputCaptureController {
    pub fn new(port: Arc<dyn OutputCapture>) -> Self {
        Self { port, owned: false }
    }

    /// True when a base response exists and writes to the shared channel
    pub fn uses_shared_output(base_response: Option<&Response>) -> bool {
        base_response
            .map(|response| response.output_target().is_shared())
            .unwrap_or(false)
    }

    /// Open a capture scope unless one is already open
    pub fn start_capture(&mut self) -> HarnessResult<()> {
        if self.port.level() == 0 {
            self.port.start();
            self.owned = self.port.level() > 0;
        }

        if self.port.level() < 1 {
            return Err(HarnessError::Resource("failed to start output capture".to_string()));
        }

        debug!("Output capture active (level {})", self.port.level());
        Ok(())
    }

    /// Discard what the suite captured. A scope opened here is closed; a
    /// scope that was already open is only emptied.
    pub fn stop_capture(&mut self) {
        if self.port.level() == 0 {
            self.owned = false;
            return;
        }

        if std::mem::take(&mut self.owned) {
            self.port.discard();
            debug!("Output capture stopped");
        } else {
            self.port.clean();
            debug!("Output capture cleaned; outer scope left open");
        }
    }
}

impl Default for OutputCaptureController {
    fn default() -> Self {
        Self::new(Arc::new(ProcessOutput))
    }
}

impl std::fmt::Debug for OutputCaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCaptureController")
            .field("level", &self.port.level())
            .finish()
    }
}
