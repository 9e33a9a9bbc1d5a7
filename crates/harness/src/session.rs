//! Session control port

use routeprobe_common::{session, SessionStatus};

/// Query and tear down the session left behind by a test
pub trait SessionControl: Send + Sync {
    fn status(&self) -> SessionStatus;

    /// Close the session without saving it
    fn abort(&self);
}

/// The session store of the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSession;

impl SessionControl for ProcessSession {
    fn status(&self) -> SessionStatus {
        session::status()
    }

    fn abort(&self) {
        session::abort();
    }
}
