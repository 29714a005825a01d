//! Background reader thread
//!
//! One reader per connection drains the bus into the ingest log. Bus
//! access shares a mutex with the sender path; the loop drains everything
//! currently available, releases the lock, then sleeps briefly to bound
//! CPU use. Any adapter error is fatal: the thread records the fault,
//! flips to Stopped, and exits.

use super::ingest::IngestLog;
use crate::error::Error;
use crate::transport::BusAdapter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Reader thread lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Not yet started
    Idle,
    /// Draining the bus
    Reading,
    /// Exited, either on shutdown or a fatal fault
    Stopped,
}

/// Fatal fault recorded by the reader for the request path to observe
#[derive(Debug, Clone)]
pub(crate) enum ReaderFault {
    BufferOverrun,
    Adapter(String),
}

impl ReaderFault {
    pub(crate) fn to_error(&self) -> Error {
        match self {
            ReaderFault::BufferOverrun => Error::BufferOverrun,
            ReaderFault::Adapter(text) => Error::Adapter(text.clone()),
        }
    }
}

/// State shared between the reader thread and the engine
pub(crate) struct ReaderShared {
    pub(crate) state: Mutex<ReaderState>,
    pub(crate) fault: Mutex<Option<ReaderFault>>,
    pub(crate) shutdown: AtomicBool,
}

impl ReaderShared {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ReaderState::Idle),
            fault: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// Spawn the reader thread
pub(crate) fn spawn_reader(
    bus: Arc<Mutex<Box<dyn BusAdapter>>>,
    ingest: Arc<IngestLog>,
    shared: Arc<ReaderShared>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        *shared.state.lock() = ReaderState::Reading;
        log::info!("Reader thread started ({:?} drain interval)", poll_interval);

        loop {
            if shared.shutdown.load(Ordering::Relaxed) {
                log::info!("Reader thread shutting down");
                break;
            }

            let fault = {
                let mut bus = bus.lock();
                drain_available(&mut **bus, &ingest)
            };

            if let Some(fault) = fault {
                log::error!("Reader stopping on adapter fault: {:?}", fault);
                *shared.fault.lock() = Some(fault);
                break;
            }

            thread::sleep(poll_interval);
        }

        *shared.state.lock() = ReaderState::Stopped;
        log::info!("Reader thread stopped ({} entries ingested)", ingest.len());
    })
}

/// Drain every frame the adapter has buffered without blocking.
/// Returns the fault that ended the connection, if any.
fn drain_available(bus: &mut dyn BusAdapter, ingest: &IngestLog) -> Option<ReaderFault> {
    loop {
        match bus.try_read_frame() {
            Ok(Some(received)) => {
                if log::log_enabled!(log::Level::Trace) {
                    log::trace!(
                        "RX {} ({} bytes, hw ts {})",
                        received.frame.id,
                        received.frame.data.len(),
                        received.timestamp
                    );
                }
                ingest.append(received.frame, received.timestamp);
            }
            Ok(None) => return None,
            Err(Error::BufferOverrun) => {
                return Some(ReaderFault::BufferOverrun);
            }
            Err(e) => {
                let detail = bus
                    .error_text()
                    .map(|text| format!("{} ({})", e, text))
                    .unwrap_or_else(|| e.to_string());
                return Some(ReaderFault::Adapter(detail));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{blocks, system, Frame, Identifier, NodeId};
    use crate::transport::MockBus;
    use std::time::Instant;

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn test_reader_ingests_injected_frames() {
        let (bus, remote) = MockBus::pair();
        let bus: Arc<Mutex<Box<dyn BusAdapter>>> = Arc::new(Mutex::new(Box::new(bus)));
        let ingest = Arc::new(IngestLog::new());
        let shared = Arc::new(ReaderShared::new());

        let handle = spawn_reader(
            Arc::clone(&bus),
            Arc::clone(&ingest),
            Arc::clone(&shared),
            Duration::from_micros(200),
        );

        let frame = Frame::new(
            Identifier::request(blocks::SYSTEM, system::RESET, NodeId::HOST, NodeId::BRIDGE),
            &[0xAA],
        );
        remote.inject(frame.clone());
        remote.inject(frame.clone());

        assert!(wait_until(500, || ingest.len() == 2));
        assert_eq!(ingest.get(0).unwrap().frame, frame);

        shared.shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
        assert_eq!(*shared.state.lock(), ReaderState::Stopped);
        assert!(shared.fault.lock().is_none());
    }

    #[test]
    fn test_overrun_is_fatal() {
        let (bus, remote) = MockBus::pair();
        let bus: Arc<Mutex<Box<dyn BusAdapter>>> = Arc::new(Mutex::new(Box::new(bus)));
        let ingest = Arc::new(IngestLog::new());
        let shared = Arc::new(ReaderShared::new());

        let handle = spawn_reader(
            Arc::clone(&bus),
            Arc::clone(&ingest),
            Arc::clone(&shared),
            Duration::from_micros(200),
        );

        remote.trigger_overrun();
        handle.join().unwrap();

        assert_eq!(*shared.state.lock(), ReaderState::Stopped);
        assert!(matches!(
            *shared.fault.lock(),
            Some(ReaderFault::BufferOverrun)
        ));
    }
}
