//! Reliable request engine
//!
//! [`LinkEngine`] owns one bus connection: the adapter behind a shared
//! mutex, the append-only ingest log, and the background reader draining
//! the former into the latter. Requests are written to the bus, then the
//! log is polled from the pre-send index for the matching acknowledgment
//! or negative acknowledgment, with retries on timeout.

mod ingest;
mod reader;

pub use ingest::{IngestEntry, IngestLog};
pub use reader::ReaderState;

use crate::codec::{blocks, system, Frame, Identifier, NodeId};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::transport::BusAdapter;
use parking_lot::Mutex;
use reader::ReaderShared;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A positive acknowledgment
#[derive(Debug, Clone)]
pub struct Acknowledgment {
    /// Acknowledgment payload
    pub payload: Vec<u8>,
    /// Host receive time of the acknowledgment
    pub host_time: Instant,
    /// Adapter hardware timestamp, wrapping milliseconds
    pub adapter_timestamp: u16,
    /// Retries spent before this acknowledgment arrived (0 = first send)
    pub retries_used: u32,
}

/// Resolution of a single logical request
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Matching acknowledgment observed
    Acknowledged(Acknowledgment),
    /// Device rejected the request (acknowledgment with toggled error bit)
    ErrorAcknowledged {
        /// Negative acknowledgment payload
        payload: Vec<u8>,
    },
    /// No matching reply within the retry budget
    TimedOut {
        /// Total send attempts made
        attempts: u32,
    },
}

/// Node status flags, obtained only by explicit query
#[derive(Debug, Clone, Copy)]
pub struct DeviceStatus {
    /// Raw status word
    pub raw: u16,
    /// Sample buffer overrun since the last query
    pub overrun: bool,
    /// Frame transmission failure since the last query
    pub transmission_failure: bool,
}

impl DeviceStatus {
    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(Error::InvalidFrame(format!(
                "status payload too short: {} bytes",
                payload.len()
            )));
        }
        let raw = u16::from_le_bytes([payload[0], payload[1]]);
        Ok(DeviceStatus {
            raw,
            overrun: raw & 0x0001 != 0,
            transmission_failure: raw & 0x0002 != 0,
        })
    }
}

/// Traffic counters for one connection
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStats {
    /// Frames written to the bus
    pub frames_sent: u64,
    /// Frames ingested from the bus
    pub frames_received: u64,
    /// Retransmissions after per-attempt timeouts
    pub retries: u64,
    /// Requests that exhausted their retry budget
    pub timeouts: u64,
    /// Negative acknowledgments received
    pub negative_acks: u64,
}

/// One bus connection: adapter, ingest log, reader thread, retry logic.
///
/// Explicitly constructed and explicitly torn down; any number of caller
/// threads may issue requests concurrently.
pub struct LinkEngine {
    bus: Arc<Mutex<Box<dyn BusAdapter>>>,
    ingest: Arc<IngestLog>,
    shared: Arc<ReaderShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: LinkConfig,
    host: NodeId,
    frames_sent: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    negative_acks: AtomicU64,
}

impl LinkEngine {
    /// Initialize the adapter and start the reader thread
    pub fn connect<A: BusAdapter + 'static>(
        mut adapter: A,
        host: NodeId,
        config: LinkConfig,
    ) -> Result<Self> {
        adapter.initialize()?;

        let bus: Arc<Mutex<Box<dyn BusAdapter>>> = Arc::new(Mutex::new(Box::new(adapter)));
        let ingest = Arc::new(IngestLog::new());
        let shared = Arc::new(ReaderShared::new());

        let handle = reader::spawn_reader(
            Arc::clone(&bus),
            Arc::clone(&ingest),
            Arc::clone(&shared),
            config.reader_poll_interval(),
        );

        log::info!("Link engine connected as {}", host);

        Ok(LinkEngine {
            bus,
            ingest,
            shared,
            handle: Mutex::new(Some(handle)),
            config,
            host,
            frames_sent: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            negative_acks: AtomicU64::new(0),
        })
    }

    /// Host address this engine sends from
    pub fn host(&self) -> NodeId {
        self.host
    }

    /// Link parameters in effect
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The connection's ingest log
    pub fn ingest_log(&self) -> &Arc<IngestLog> {
        &self.ingest
    }

    /// Reader thread lifecycle state
    pub fn reader_state(&self) -> ReaderState {
        *self.shared.state.lock()
    }

    /// Traffic counter snapshot
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.ingest.len() as u64,
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            negative_acks: self.negative_acks.load(Ordering::Relaxed),
        }
    }

    /// Issue a request and wait for its acknowledgment.
    ///
    /// Timeout after all retries surfaces [`Error::Timeout`]; a negative
    /// acknowledgment surfaces [`Error::NegativeAck`] without retrying.
    pub fn request(&self, frame: &Frame) -> Result<Acknowledgment> {
        self.resolve(frame, None)
    }

    /// Like [`request`](Self::request), but only an acknowledgment whose
    /// payload equals `expected_payload` matches.
    pub fn request_expecting(
        &self,
        frame: &Frame,
        expected_payload: &[u8],
    ) -> Result<Acknowledgment> {
        self.resolve(frame, Some(expected_payload))
    }

    /// Build and issue a request from the host to `receiver`
    pub fn request_to(
        &self,
        block: u8,
        block_command: u8,
        receiver: NodeId,
        payload: &[u8],
    ) -> Result<Acknowledgment> {
        let id = Identifier::request(block, block_command, self.host, receiver);
        self.request(&Frame::new(id, payload))
    }

    fn resolve(&self, frame: &Frame, expected_payload: Option<&[u8]>) -> Result<Acknowledgment> {
        match self.try_request(frame, expected_payload)? {
            RequestOutcome::Acknowledged(ack) => Ok(ack),
            RequestOutcome::ErrorAcknowledged { payload } => {
                self.negative_acks.fetch_add(1, Ordering::Relaxed);
                Err(Error::NegativeAck {
                    command: frame.id.command(),
                    payload,
                })
            }
            RequestOutcome::TimedOut { attempts } => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                if self.config.teardown_on_timeout {
                    log::warn!("Tearing down connection after request timeout");
                    self.shutdown()?;
                }
                Err(Error::Timeout {
                    command: frame.id.command(),
                    attempts,
                })
            }
        }
    }

    /// Issue a request and report the raw outcome. `Err` is reserved for
    /// fatal faults (adapter failure, overrun, closed connection), which
    /// tear the connection down before returning.
    pub fn try_request(
        &self,
        frame: &Frame,
        expected_payload: Option<&[u8]>,
    ) -> Result<RequestOutcome> {
        let ack_id = frame.id.expected_ack();
        let nack_id = frame.id.expected_nack();
        let timeout = self.config.ack_timeout();
        let poll = self.config.ack_poll_interval();

        for attempt in 0..=self.config.retries {
            self.check_open()?;

            let scan_start = self.ingest.len();
            let send_time = Instant::now();
            {
                let mut bus = self.bus.lock();
                if let Err(e) = bus.write_frame(frame) {
                    drop(bus);
                    log::error!("Bus write failed, tearing down: {}", e);
                    let _ = self.shutdown();
                    return Err(e);
                }
            }
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            if log::log_enabled!(log::Level::Trace) {
                log::trace!(
                    "TX {} ({} bytes), attempt {}/{}",
                    frame.id,
                    frame.data.len(),
                    attempt + 1,
                    self.config.retries + 1
                );
            }

            let deadline = send_time + timeout;
            let mut index = scan_start;
            loop {
                self.check_open()?;

                while index < self.ingest.len() {
                    let entry = match self.ingest.get(index) {
                        Some(entry) => entry,
                        None => break,
                    };
                    index += 1;

                    // Stale-match protection: a frame received before this
                    // attempt's send cannot be its reply
                    if entry.host_time < send_time {
                        continue;
                    }

                    if entry.frame.id == ack_id {
                        if let Some(expected) = expected_payload {
                            if entry.frame.data != expected {
                                log::debug!(
                                    "Ack {} with unexpected payload {:02X?}, ignoring",
                                    entry.frame.id,
                                    entry.frame.data
                                );
                                continue;
                            }
                        }
                        return Ok(RequestOutcome::Acknowledged(Acknowledgment {
                            payload: entry.frame.data.clone(),
                            host_time: entry.host_time,
                            adapter_timestamp: entry.adapter_timestamp,
                            retries_used: attempt,
                        }));
                    }

                    if entry.frame.id == nack_id {
                        log::warn!(
                            "Negative acknowledgment for {} (payload {:02X?})",
                            frame.id,
                            entry.frame.data
                        );
                        return Ok(RequestOutcome::ErrorAcknowledged {
                            payload: entry.frame.data.clone(),
                        });
                    }
                }

                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(poll);
            }

            if attempt < self.config.retries {
                self.retries.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "No acknowledgment for {} within {:?}, retry {}/{}",
                    frame.id,
                    timeout,
                    attempt + 1,
                    self.config.retries
                );
            }
        }

        Ok(RequestOutcome::TimedOut {
            attempts: self.config.retries + 1,
        })
    }

    /// Fail fast when the reader has died or the engine was shut down
    fn check_open(&self) -> Result<()> {
        let fault = self.shared.fault.lock().clone();
        if let Some(fault) = fault {
            let _ = self.shutdown();
            return Err(fault.to_error());
        }
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return Err(Error::ConnectionClosed("engine shut down".to_string()));
        }
        Ok(())
    }

    /// Stop the reader, join it, and reset the adapter. Idempotent; also
    /// invoked on drop and on fatal faults before they are reported.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::Relaxed);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            let mut bus = self.bus.lock();
            if let Err(e) = bus.reset() {
                log::warn!("Adapter reset during shutdown failed: {}", e);
            }
            log::info!("Link engine shut down");
        }
        Ok(())
    }

    // ----- System block convenience operations -----

    /// Reset a node
    pub fn reset_node(&self, node: NodeId) -> Result<Acknowledgment> {
        log::info!("Resetting {}", node);
        self.request_to(blocks::SYSTEM, system::RESET, node, &[])
    }

    /// Query a node's status flags. Errors such as sample overrun are
    /// only ever surfaced through this explicit query.
    pub fn node_status(&self, node: NodeId) -> Result<DeviceStatus> {
        let ack = self.request_to(blocks::SYSTEM, system::NODE_STATUS, node, &[])?;
        DeviceStatus::from_payload(&ack.payload)
    }

    /// Enable or disable a node's active state
    pub fn set_active_state(&self, node: NodeId, active: bool) -> Result<Acknowledgment> {
        self.request_to(blocks::SYSTEM, system::ACTIVE_STATE, node, &[active as u8])
    }

    /// Frames relayed over the radio link since power-up (bridge only)
    pub fn routing_counter(&self, node: NodeId) -> Result<u32> {
        let ack = self.request_to(blocks::SYSTEM, system::ROUTING_COUNTERS, node, &[])?;
        if ack.payload.len() < 4 {
            return Err(Error::InvalidFrame(format!(
                "routing counter payload too short: {} bytes",
                ack.payload.len()
            )));
        }
        Ok(u32::from_le_bytes([
            ack.payload[0],
            ack.payload[1],
            ack.payload[2],
            ack.payload[3],
        ]))
    }
}

impl Drop for LinkEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
