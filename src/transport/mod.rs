//! Bus adapter abstraction
//!
//! The link engine talks to hardware through [`BusAdapter`], a narrow
//! non-blocking interface. Production code uses the serial
//! [`SlcanAdapter`]; tests use [`MockBus`].

use crate::codec::Frame;
use crate::error::Result;

mod mock;
mod slcan;

pub use mock::{MockBus, MockRemote};
pub use slcan::SlcanAdapter;

/// A frame received from the bus, stamped by the adapter hardware
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// Decoded frame
    pub frame: Frame,
    /// Adapter hardware timestamp, wrapping milliseconds
    pub timestamp: u16,
}

/// Bus adapter trait for hardware access
///
/// All methods are called with the engine's bus mutex held, so
/// implementations do not need internal locking.
pub trait BusAdapter: Send {
    /// Bring the adapter into an open, receiving state
    fn initialize(&mut self) -> Result<()>;

    /// Write one frame to the bus
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Read one frame if available, without blocking.
    ///
    /// Returns `Ok(None)` when no complete frame is pending. A receive
    /// buffer overrun must be reported as [`crate::Error::BufferOverrun`];
    /// the reader treats any error from this method as fatal.
    fn try_read_frame(&mut self) -> Result<Option<ReceivedFrame>>;

    /// Reset the adapter, discarding buffered data
    fn reset(&mut self) -> Result<()>;

    /// Human-readable detail for the most recent adapter fault
    fn error_text(&self) -> Option<String> {
        None
    }
}
