//! Bridge unit sub-protocol
//!
//! The bridge relays to nodes reachable only over its short-range radio.
//! Discovery and connection management are plain request-engine calls to
//! the bridge's system block; this module adds the outer polling loops
//! (device attributes are not instantly available after a scan, and the
//! radio handshake completes asynchronously).

use crate::codec::{blocks, system, NodeId};
use crate::engine::LinkEngine;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for the scan to find devices
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Poll interval while waiting for a device attribute to populate
const ATTRIBUTE_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Connected-flag checks between connect request repetitions
const CONNECT_CHECKS_PER_REQUEST: u32 = 3;

/// Radio link state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No radio link
    Disconnected,
    /// Scan running, waiting for devices
    Scanning,
    /// Scan finished, device attributes retrieved
    DeviceListed,
    /// Connect handshake in progress
    Connecting,
    /// Radio link established
    Connected,
}

/// One device found by a radio scan
#[derive(Debug, Clone)]
pub struct RemoteDevice {
    /// Scan index, used for connect-by-index
    pub index: u8,
    /// Advertised device name
    pub name: String,
    /// Radio address
    pub address: u32,
    /// Received signal strength, dBm
    pub rssi_dbm: i8,
}

/// Client for the bridge unit's radio sub-protocol
pub struct BridgeClient {
    engine: Arc<LinkEngine>,
    bridge: NodeId,
    state: BridgeState,
}

impl BridgeClient {
    /// Client for the default bridge address
    pub fn new(engine: Arc<LinkEngine>) -> Self {
        Self::with_address(engine, NodeId::BRIDGE)
    }

    /// Client for a bridge at a non-default address
    pub fn with_address(engine: Arc<LinkEngine>, bridge: NodeId) -> Self {
        BridgeClient {
            engine,
            bridge,
            state: BridgeState::Disconnected,
        }
    }

    /// Current link state
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Run a discovery scan and retrieve every found device's attributes.
    ///
    /// Issues the scan-start request, then polls the device count until it
    /// is non-zero or the discovery timeout elapses.
    pub fn scan(&mut self) -> Result<Vec<RemoteDevice>> {
        self.state = BridgeState::Scanning;
        log::info!("Bridge: starting radio scan");
        self.engine
            .request_to(blocks::SYSTEM, system::BRIDGE_SCAN_START, self.bridge, &[])?;

        let deadline = Instant::now() + self.engine.config().discovery_timeout();
        let count = loop {
            let count = self.device_count()?;
            if count > 0 {
                break count;
            }
            if Instant::now() >= deadline {
                self.state = BridgeState::Disconnected;
                return Err(Error::DeadlineExceeded(
                    "radio scan found no devices".to_string(),
                ));
            }
            thread::sleep(DISCOVERY_POLL_INTERVAL);
        };
        log::info!("Bridge: scan found {} device(s)", count);

        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            devices.push(self.device(index)?);
        }
        self.state = BridgeState::DeviceListed;
        Ok(devices)
    }

    /// Number of devices the current scan has found so far
    pub fn device_count(&self) -> Result<u8> {
        let ack =
            self.engine
                .request_to(blocks::SYSTEM, system::BRIDGE_DEVICE_COUNT, self.bridge, &[])?;
        Ok(ack.payload.first().copied().unwrap_or(0))
    }

    /// All attributes of the device at `index`
    pub fn device(&self, index: u8) -> Result<RemoteDevice> {
        let name = self.device_name(index)?;
        let address = self.device_address(index)?;
        let rssi_dbm = self.device_rssi(index)?;
        log::debug!(
            "Bridge: device {} = {:?} addr {:#010x} rssi {} dBm",
            index,
            name,
            address,
            rssi_dbm
        );
        Ok(RemoteDevice {
            index,
            name,
            address,
            rssi_dbm,
        })
    }

    /// Device name by scan index. Polls until the bridge reports a
    /// non-empty name; right after a scan the attribute may not have been
    /// read from the device yet.
    pub fn device_name(&self, index: u8) -> Result<String> {
        self.poll_attribute("device name", |client| {
            let ack = client.engine.request_to(
                blocks::SYSTEM,
                system::BRIDGE_DEVICE_NAME,
                client.bridge,
                &[index],
            )?;
            let end = ack
                .payload
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(ack.payload.len());
            let name = String::from_utf8_lossy(&ack.payload[..end]).into_owned();
            Ok(if name.is_empty() { None } else { Some(name) })
        })
    }

    /// Device radio address by scan index, polled until non-zero
    pub fn device_address(&self, index: u8) -> Result<u32> {
        self.poll_attribute("device address", |client| {
            let ack = client.engine.request_to(
                blocks::SYSTEM,
                system::BRIDGE_DEVICE_ADDRESS,
                client.bridge,
                &[index],
            )?;
            if ack.payload.len() < 4 {
                return Ok(None);
            }
            let address = u32::from_le_bytes([
                ack.payload[0],
                ack.payload[1],
                ack.payload[2],
                ack.payload[3],
            ]);
            Ok(if address == 0 { None } else { Some(address) })
        })
    }

    /// Device signal strength by scan index, polled until non-zero
    pub fn device_rssi(&self, index: u8) -> Result<i8> {
        self.poll_attribute("device RSSI", |client| {
            let ack = client.engine.request_to(
                blocks::SYSTEM,
                system::BRIDGE_DEVICE_RSSI,
                client.bridge,
                &[index],
            )?;
            let rssi = ack.payload.first().map(|&b| b as i8).unwrap_or(0);
            Ok(if rssi == 0 { None } else { Some(rssi) })
        })
    }

    fn poll_attribute<T>(
        &self,
        what: &str,
        mut query: impl FnMut(&Self) -> Result<Option<T>>,
    ) -> Result<T> {
        let deadline = Instant::now() + self.engine.config().attribute_timeout();
        loop {
            if let Some(value) = query(self)? {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded(format!(
                    "{} not available from bridge",
                    what
                )));
            }
            thread::sleep(ATTRIBUTE_POLL_INTERVAL);
        }
    }

    /// Connect to a scanned device by its index
    pub fn connect_by_index(&mut self, index: u8) -> Result<()> {
        log::info!("Bridge: connecting to device index {}", index);
        self.connect_with(system::BRIDGE_CONNECT_INDEX, &[index])
    }

    /// Connect to a device by its radio address
    pub fn connect_by_address(&mut self, address: u32) -> Result<()> {
        log::info!("Bridge: connecting to device {:#010x}", address);
        self.connect_with(system::BRIDGE_CONNECT_ADDRESS, &address.to_le_bytes())
    }

    /// Alternate connect requests with connected-flag polls until the
    /// flag is observed or the connect timeout elapses. A failure here is
    /// reported but does not affect the engine.
    fn connect_with(&mut self, block_command: u8, payload: &[u8]) -> Result<()> {
        self.state = BridgeState::Connecting;
        let deadline = Instant::now() + self.engine.config().connect_timeout();

        loop {
            self.engine
                .request_to(blocks::SYSTEM, block_command, self.bridge, payload)?;

            for _ in 0..CONNECT_CHECKS_PER_REQUEST {
                if self.is_connected()? {
                    self.state = BridgeState::Connected;
                    log::info!("Bridge: radio link established");
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(DISCOVERY_POLL_INTERVAL);
            }

            if Instant::now() >= deadline {
                self.state = BridgeState::Disconnected;
                log::warn!("Bridge: connect handshake timed out");
                return Err(Error::DeadlineExceeded(
                    "radio connect handshake".to_string(),
                ));
            }
        }
    }

    /// Query the bridge's connected flag
    pub fn is_connected(&self) -> Result<bool> {
        let ack =
            self.engine
                .request_to(blocks::SYSTEM, system::BRIDGE_CONNECTED, self.bridge, &[])?;
        Ok(ack.payload.first().copied().unwrap_or(0) != 0)
    }

    /// Drop the radio link
    pub fn disconnect(&mut self) -> Result<()> {
        self.engine
            .request_to(blocks::SYSTEM, system::BRIDGE_DISCONNECT, self.bridge, &[])?;
        self.state = BridgeState::Disconnected;
        log::info!("Bridge: radio link closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;
    use crate::config::LinkConfig;
    use crate::transport::MockBus;

    fn test_config() -> LinkConfig {
        LinkConfig {
            ack_timeout_ms: 40,
            retries: 1,
            reader_poll_interval_us: 200,
            ack_poll_interval_us: 100,
            discovery_timeout_s: 2,
            connect_timeout_s: 2,
            attribute_timeout_ms: 500,
            ..LinkConfig::default()
        }
    }

    /// Responder emulating a bridge with one discoverable device.
    /// Attributes only populate after a couple of polls, and the
    /// connected flag only after a couple of connect requests.
    fn bridge_responder(remote: &crate::transport::MockRemote) {
        let mut count_polls = 0u32;
        let mut name_polls = 0u32;
        let mut connect_requests = 0u32;

        remote.set_responder(move |request| {
            let id = request.id;
            if id.block() != blocks::SYSTEM {
                return vec![];
            }
            let ack = id.expected_ack();
            let reply = match id.block_command() {
                system::BRIDGE_SCAN_START => Frame::empty(ack),
                system::BRIDGE_DEVICE_COUNT => {
                    count_polls += 1;
                    let count = if count_polls >= 3 { 1 } else { 0 };
                    Frame::new(ack, &[count])
                }
                system::BRIDGE_DEVICE_NAME => {
                    name_polls += 1;
                    if name_polls >= 2 {
                        Frame::new(ack, b"SU-07\0\0\0")
                    } else {
                        Frame::empty(ack)
                    }
                }
                system::BRIDGE_DEVICE_ADDRESS => Frame::new(ack, &0xA1B2C3D4u32.to_le_bytes()),
                system::BRIDGE_DEVICE_RSSI => Frame::new(ack, &[(-62i8) as u8]),
                system::BRIDGE_CONNECT_INDEX | system::BRIDGE_CONNECT_ADDRESS => {
                    connect_requests += 1;
                    Frame::empty(ack)
                }
                system::BRIDGE_CONNECTED => {
                    let connected = connect_requests >= 2;
                    Frame::new(ack, &[connected as u8])
                }
                system::BRIDGE_DISCONNECT => {
                    connect_requests = 0;
                    Frame::empty(ack)
                }
                _ => return vec![],
            };
            vec![reply]
        });
    }

    #[test]
    fn test_scan_connect_disconnect() {
        let (bus, remote) = MockBus::pair();
        let engine = Arc::new(LinkEngine::connect(bus, NodeId::HOST, test_config()).unwrap());
        bridge_responder(&remote);

        let mut bridge = BridgeClient::new(Arc::clone(&engine));
        assert_eq!(bridge.state(), BridgeState::Disconnected);

        let devices = bridge.scan().unwrap();
        assert_eq!(bridge.state(), BridgeState::DeviceListed);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "SU-07");
        assert_eq!(devices[0].address, 0xA1B2C3D4);
        assert_eq!(devices[0].rssi_dbm, -62);

        bridge.connect_by_index(devices[0].index).unwrap();
        assert_eq!(bridge.state(), BridgeState::Connected);
        assert!(bridge.is_connected().unwrap());

        bridge.disconnect().unwrap();
        assert_eq!(bridge.state(), BridgeState::Disconnected);
    }

    #[test]
    fn test_connect_by_address() {
        let (bus, remote) = MockBus::pair();
        let engine = Arc::new(LinkEngine::connect(bus, NodeId::HOST, test_config()).unwrap());
        bridge_responder(&remote);

        let mut bridge = BridgeClient::new(Arc::clone(&engine));
        bridge.connect_by_address(0xA1B2C3D4).unwrap();
        assert_eq!(bridge.state(), BridgeState::Connected);
    }

    #[test]
    fn test_scan_timeout_reports_but_engine_survives() {
        let (bus, remote) = MockBus::pair();
        let mut config = test_config();
        config.discovery_timeout_s = 1;
        let engine = Arc::new(LinkEngine::connect(bus, NodeId::HOST, config).unwrap());

        // Bridge acks everything but never finds a device
        remote.set_responder(|request| {
            let ack = request.id.expected_ack();
            match request.id.block_command() {
                system::BRIDGE_DEVICE_COUNT => vec![Frame::new(ack, &[0])],
                _ => vec![Frame::empty(ack)],
            }
        });

        let mut bridge = BridgeClient::new(Arc::clone(&engine));
        let err = bridge.scan().unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(bridge.state(), BridgeState::Disconnected);

        // The engine is still usable afterwards
        assert_eq!(bridge.device_count().unwrap(), 0);
    }
}
