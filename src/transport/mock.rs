//! Mock bus for testing
//!
//! [`MockBus::pair`] returns the host-side adapter plus a [`MockRemote`]
//! handle standing in for everything else on the bus: tests capture what
//! the host wrote, inject frames, or install an auto-responder that
//! answers writes like a real node would.

use super::{BusAdapter, ReceivedFrame};
use crate::codec::Frame;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

struct Shared {
    written: Mutex<Vec<Frame>>,
    responder: Mutex<Option<Responder>>,
    fail_writes: AtomicBool,
    overrun: AtomicBool,
}

/// Host-side mock bus adapter
pub struct MockBus {
    rx: Receiver<ReceivedFrame>,
    reply_tx: Sender<ReceivedFrame>,
    shared: Arc<Shared>,
    epoch: Instant,
}

/// Remote end of a mock bus: the simulated nodes
#[derive(Clone)]
pub struct MockRemote {
    tx: Sender<ReceivedFrame>,
    shared: Arc<Shared>,
    epoch: Instant,
}

impl MockBus {
    /// Create a connected adapter/remote pair
    pub fn pair() -> (MockBus, MockRemote) {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            written: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            overrun: AtomicBool::new(false),
        });
        let epoch = Instant::now();

        let bus = MockBus {
            rx,
            reply_tx: tx.clone(),
            shared: Arc::clone(&shared),
            epoch,
        };
        let remote = MockRemote { tx, shared, epoch };
        (bus, remote)
    }

    fn now_ms(&self) -> u16 {
        (self.epoch.elapsed().as_millis() % 60000) as u16
    }
}

impl BusAdapter for MockBus {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.shared.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::Adapter("mock write failure".to_string()));
        }

        self.shared.written.lock().push(frame.clone());

        let replies = {
            let mut responder = self.shared.responder.lock();
            match responder.as_mut() {
                Some(f) => f(frame),
                None => Vec::new(),
            }
        };
        let timestamp = self.now_ms();
        for reply in replies {
            let _ = self.reply_tx.send(ReceivedFrame {
                frame: reply,
                timestamp,
            });
        }
        Ok(())
    }

    fn try_read_frame(&mut self) -> Result<Option<ReceivedFrame>> {
        if self.shared.overrun.swap(false, Ordering::Relaxed) {
            return Err(Error::BufferOverrun);
        }
        Ok(self.rx.try_recv().ok())
    }

    fn reset(&mut self) -> Result<()> {
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn error_text(&self) -> Option<String> {
        None
    }
}

impl MockRemote {
    /// Inject a frame as if a node had transmitted it
    pub fn inject(&self, frame: Frame) {
        let timestamp = (self.epoch.elapsed().as_millis() % 60000) as u16;
        let _ = self.tx.send(ReceivedFrame { frame, timestamp });
    }

    /// All frames the host has written so far
    pub fn written(&self) -> Vec<Frame> {
        self.shared.written.lock().clone()
    }

    /// Drain and return the frames the host has written
    pub fn take_written(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.shared.written.lock())
    }

    /// Number of frames the host has written
    pub fn written_count(&self) -> usize {
        self.shared.written.lock().len()
    }

    /// Install a closure that answers every host write with zero or more
    /// reply frames, like a node on the bus would
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&Frame) -> Vec<Frame> + Send + 'static,
    {
        *self.shared.responder.lock() = Some(Box::new(responder));
    }

    /// Remove the installed responder
    pub fn clear_responder(&self) {
        *self.shared.responder.lock() = None;
    }

    /// Make the next adapter read report a receive buffer overrun
    pub fn trigger_overrun(&self) {
        self.shared.overrun.store(true, Ordering::Relaxed);
    }

    /// Make host writes fail with an adapter fault
    pub fn set_write_failure(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{blocks, system, Frame, Identifier, NodeId};

    fn reset_frame() -> Frame {
        Frame::empty(Identifier::request(
            blocks::SYSTEM,
            system::RESET,
            NodeId::HOST,
            NodeId::BRIDGE,
        ))
    }

    #[test]
    fn test_capture_and_inject() {
        let (mut bus, remote) = MockBus::pair();

        let frame = reset_frame();
        bus.write_frame(&frame).unwrap();
        assert_eq!(remote.written(), vec![frame.clone()]);

        assert!(bus.try_read_frame().unwrap().is_none());
        remote.inject(frame.clone());
        let received = bus.try_read_frame().unwrap().unwrap();
        assert_eq!(received.frame, frame);
    }

    #[test]
    fn test_responder_answers_writes() {
        let (mut bus, remote) = MockBus::pair();
        remote.set_responder(|request| {
            vec![Frame::empty(request.id.expected_ack())]
        });

        let frame = reset_frame();
        bus.write_frame(&frame).unwrap();
        let reply = bus.try_read_frame().unwrap().unwrap();
        assert_eq!(reply.frame.id, frame.id.expected_ack());
    }

    #[test]
    fn test_overrun_and_write_failure() {
        let (mut bus, remote) = MockBus::pair();

        remote.trigger_overrun();
        assert!(matches!(bus.try_read_frame(), Err(Error::BufferOverrun)));
        // One-shot: the next read succeeds again
        assert!(bus.try_read_frame().unwrap().is_none());

        remote.set_write_failure(true);
        assert!(matches!(
            bus.write_frame(&reset_frame()),
            Err(Error::Adapter(_))
        ));
    }
}
