//! Shared output channel
//!
//! Code under test that writes to [`OutputTarget::Output`](crate::OutputTarget)
//! bodies ends up here instead of in the response. Writes go to the innermost
//! active capture buffer, or straight to stdout when nothing is capturing.
//!
//! The channel is scoped to the calling thread. The harness drives the router
//! synchronously on the test's own thread, so every write made while
//! dispatching lands in that test's buffers.

use std::cell::RefCell;
use std::io::Write;
use tracing::warn;

thread_local! {
    static BUFFERS: RefCell<Vec<Vec<u8>>> = const { RefCell::new(Vec::new()) };
}

/// Write bytes to the channel
pub fn write(data: &[u8]) {
    let captured = BUFFERS.with(|buffers| match buffers.borrow_mut().last_mut() {
        Some(buffer) => {
            buffer.extend_from_slice(data);
            true
        }
        None => false,
    });

    if !captured {
        pass_through(std::io::stdout().lock(), data);
    }
}

/// Uncaptured writes; failures are logged, never raised into routed code
fn pass_through<W: Write>(mut sink: W, data: &[u8]) -> bool {
    match sink.write_all(data).and_then(|()| sink.flush()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to write {} bytes to stdout: {}", data.len(), e);
            false
        }
    }
}

/// Open a new capture buffer on top of the stack
pub fn start() {
    BUFFERS.with(|buffers| buffers.borrow_mut().push(Vec::new()));
}

/// Number of active capture buffers
pub fn level() -> usize {
    BUFFERS.with(|buffers| buffers.borrow().len())
}

/// Contents of the innermost buffer
pub fn contents() -> Vec<u8> {
    BUFFERS.with(|buffers| buffers.borrow().last().cloned().unwrap_or_default())
}

/// Empty the innermost buffer but keep it active
pub fn clean() {
    BUFFERS.with(|buffers| {
        if let Some(buffer) = buffers.borrow_mut().last_mut() {
            buffer.clear();
        }
    });
}

/// Close the innermost buffer and throw its contents away
pub fn discard() {
    BUFFERS.with(|buffers| {
        buffers.borrow_mut().pop();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_buffers() {
        assert_eq!(level(), 0);

        start();
        write(b"outer");
        start();
        write(b"inner");
        assert_eq!(level(), 2);
        assert_eq!(contents(), b"inner".to_vec());

        discard();
        assert_eq!(contents(), b"outer".to_vec());

        clean();
        assert!(contents().is_empty());
        assert_eq!(level(), 1);

        discard();
        assert_eq!(level(), 0);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pass_through_reports_write_errors() {
        assert!(!pass_through(BrokenPipe, b"lost"));

        let mut sink = Vec::new();
        assert!(pass_through(&mut sink, b"kept"));
        assert_eq!(sink, b"kept".to_vec());
    }

    #[test]
    fn test_discard_without_buffer_is_harmless() {
        discard();
        assert_eq!(level(), 0);
        assert!(contents().is_empty());
    }
}
