//! Transport abstraction and the controller's command queues
//!
//! The controller never reads from the device itself. Outbound lines go
//! through a [`Transport`]; inbound lines are handed to
//! `Controller::handle_line` by whoever owns the serial port.

pub mod buffered;

pub use buffered::{CommandQueues, QueueStats};

use gcodelink_core::Result;

/// Outbound half of a device connection
pub trait Transport: Send + Sync {
    /// Write one complete line, newline included
    fn send_line(&self, line: &str) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "transport"
    }
}

/// Transport that discards everything
///
/// Used for dry runs and for controllers that have not been attached to a
/// device yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTransport;

impl NoOpTransport {
    /// Create a new no-op transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NoOpTransport {
    fn send_line(&self, line: &str) -> Result<()> {
        tracing::trace!("NoOpTransport dropped: {}", line.trim_end());
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
