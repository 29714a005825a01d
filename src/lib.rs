//! setu-link - Host-side link layer for Setu sensor networks
//!
//! This library implements the messaging/protocol layer between a host
//! controller and the nodes of a wireless sensor measurement network: a
//! bridge unit and one or more sensor-holder units on a shared broadcast
//! bus, with the bridge relaying to nodes reachable only over its
//! short-range radio.
//!
//! ## Layers
//!
//! - [`codec`]: bit-exact 29-bit identifier and frame codec
//! - [`transport`]: narrow bus adapter interface (serial SLCAN adapter,
//!   channel-backed mock for tests)
//! - [`engine`]: background frame reader, timestamped ingest log, and
//!   the reliable request/acknowledgment engine with retries
//! - [`bridge`]: radio discovery/connect state machine on top of the
//!   request engine
//! - [`storage`]: chunked paged non-volatile memory access with typed
//!   accessors
//! - [`streaming`]: ADC sampling configuration, stream capture
//!   demultiplexing, and descriptive statistics
//!
//! ## Example
//!
//! ```no_run
//! use setu_link::{LinkConfig, LinkEngine, NodeId};
//! use setu_link::transport::SlcanAdapter;
//!
//! # fn main() -> setu_link::Result<()> {
//! let adapter = SlcanAdapter::open("/dev/ttyUSB0", 115200)?;
//! let engine = LinkEngine::connect(adapter, NodeId::HOST, LinkConfig::default())?;
//!
//! engine.reset_node(NodeId::FIRST_SENSOR)?;
//! let status = engine.node_status(NodeId::FIRST_SENSOR)?;
//! println!("sensor status: {:#06x}", status.raw);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod storage;
pub mod streaming;
pub mod transport;

// Re-export commonly used types
pub use bridge::{BridgeClient, BridgeState, RemoteDevice};
pub use codec::{Command, Frame, Identifier, NodeId};
pub use config::LinkConfig;
pub use engine::{Acknowledgment, DeviceStatus, IngestLog, LinkEngine, RequestOutcome};
pub use error::{Error, Result};
pub use storage::PagedStorage;
pub use streaming::{AxisMask, DataSetMode, SamplingConfig, StatisticsSummary, StreamEngine};
