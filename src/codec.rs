//! Bus identifier and frame codec
//!
//! Identifier layout (29 bits, MSB→LSB):
//!
//! ```text
//! bit 28      reserved (0)
//! bits 22-27  block (6 bits)
//! bits 14-21  block command (8 bits)
//! bit 13      acknowledge (0 = request, 1 = acknowledgment)
//! bit 12      error
//! bit 11      unused (0)
//! bits 6-10   sender (5 bits)
//! bit 5       unused (0)
//! bits 0-4    receiver (5 bits)
//! ```
//!
//! Payload: 0-8 bytes. Encoding masks out-of-range field values to their
//! bit width instead of rejecting them; callers on real hardware never
//! produce out-of-range values, and masking keeps the codec total.

use std::fmt;

/// Full 29-bit identifier mask
pub const IDENTIFIER_MASK: u32 = 0x1FFF_FFFF;

/// Maximum payload length of a bus frame
pub const MAX_PAYLOAD: usize = 8;

const BLOCK_START: u32 = 22;
const BLOCK_WIDTH: u32 = 6;
const BLOCK_COMMAND_START: u32 = 14;
const BLOCK_COMMAND_WIDTH: u32 = 8;
const ACK_BIT: u32 = 13;
const ERROR_BIT: u32 = 12;
const SENDER_START: u32 = 6;
const RECEIVER_START: u32 = 0;
const NODE_WIDTH: u32 = 5;

/// Logical node address on the bus (5 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u8);

impl NodeId {
    /// Host controller address
    pub const HOST: NodeId = NodeId(0x00);
    /// Bridge unit address
    pub const BRIDGE: NodeId = NodeId(0x01);
    /// First sensor-holder unit address
    pub const FIRST_SENSOR: NodeId = NodeId(0x02);
    /// Broadcast address (all nodes)
    pub const BROADCAST: NodeId = NodeId(0x1F);

    /// Create a node address, masking to 5 bits
    pub const fn new(raw: u8) -> Self {
        NodeId(raw & 0x1F)
    }

    /// Raw 5-bit address value
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {:#04x}", self.0)
    }
}

/// 29-bit bus identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier(u32);

impl Identifier {
    /// Pack identifier fields. Out-of-range values are masked to their
    /// field width.
    pub const fn encode(
        block: u8,
        block_command: u8,
        ack: bool,
        error: bool,
        sender: NodeId,
        receiver: NodeId,
    ) -> Self {
        let mut raw = 0u32;
        raw |= ((block as u32) & mask(BLOCK_WIDTH)) << BLOCK_START;
        raw |= ((block_command as u32) & mask(BLOCK_COMMAND_WIDTH)) << BLOCK_COMMAND_START;
        raw |= (ack as u32) << ACK_BIT;
        raw |= (error as u32) << ERROR_BIT;
        raw |= ((sender.0 as u32) & mask(NODE_WIDTH)) << SENDER_START;
        raw |= ((receiver.0 as u32) & mask(NODE_WIDTH)) << RECEIVER_START;
        Identifier(raw)
    }

    /// Shorthand for a request identifier (ack = false, error = false)
    pub const fn request(block: u8, block_command: u8, sender: NodeId, receiver: NodeId) -> Self {
        Self::encode(block, block_command, false, false, sender, receiver)
    }

    /// Wrap a raw identifier value, masking to 29 bits
    pub const fn from_raw(raw: u32) -> Self {
        Identifier(raw & IDENTIFIER_MASK)
    }

    /// Raw 29-bit value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Block number (6 bits)
    pub const fn block(self) -> u8 {
        ((self.0 >> BLOCK_START) & mask(BLOCK_WIDTH)) as u8
    }

    /// Block command number (8 bits)
    pub const fn block_command(self) -> u8 {
        ((self.0 >> BLOCK_COMMAND_START) & mask(BLOCK_COMMAND_WIDTH)) as u8
    }

    /// Acknowledge bit
    pub const fn is_ack(self) -> bool {
        (self.0 >> ACK_BIT) & 1 != 0
    }

    /// Error bit
    pub const fn is_error(self) -> bool {
        (self.0 >> ERROR_BIT) & 1 != 0
    }

    /// Sender address (5 bits)
    pub const fn sender(self) -> NodeId {
        NodeId(((self.0 >> SENDER_START) & mask(NODE_WIDTH)) as u8)
    }

    /// Receiver address (5 bits)
    pub const fn receiver(self) -> NodeId {
        NodeId(((self.0 >> RECEIVER_START) & mask(NODE_WIDTH)) as u8)
    }

    /// Replace only the targeted bits, leaving all others unchanged.
    /// `value` is masked to `width` bits.
    pub const fn with_field(self, width: u32, start: u32, value: u32) -> Self {
        let field_mask = mask(width) << start;
        Identifier((self.0 & !field_mask) | ((value & mask(width)) << start))
    }

    /// Replace the block field
    pub const fn with_block(self, block: u8) -> Self {
        self.with_field(BLOCK_WIDTH, BLOCK_START, block as u32)
    }

    /// Replace the block-command field
    pub const fn with_block_command(self, block_command: u8) -> Self {
        self.with_field(BLOCK_COMMAND_WIDTH, BLOCK_COMMAND_START, block_command as u32)
    }

    /// Replace the acknowledge bit
    pub const fn with_ack(self, ack: bool) -> Self {
        self.with_field(1, ACK_BIT, ack as u32)
    }

    /// Replace the error bit
    pub const fn with_error(self, error: bool) -> Self {
        self.with_field(1, ERROR_BIT, error as u32)
    }

    /// Replace the sender address
    pub const fn with_sender(self, sender: NodeId) -> Self {
        self.with_field(NODE_WIDTH, SENDER_START, sender.0 as u32)
    }

    /// Replace the receiver address
    pub const fn with_receiver(self, receiver: NodeId) -> Self {
        self.with_field(NODE_WIDTH, RECEIVER_START, receiver.0 as u32)
    }

    /// Addressing-independent command view (bits 12-27)
    pub const fn command(self) -> Command {
        Command(((self.0 >> ERROR_BIT) & 0xFFFF) as u16)
    }

    /// Identifier of the acknowledgment this request expects: sender and
    /// receiver swapped, acknowledge bit set, error bit preserved.
    pub const fn expected_ack(self) -> Identifier {
        self.with_ack(true)
            .with_sender(self.receiver())
            .with_receiver(self.sender())
    }

    /// Identifier of the matching negative acknowledgment: the expected
    /// acknowledgment with the error bit toggled.
    pub const fn expected_nack(self) -> Identifier {
        let ack = self.expected_ack();
        ack.with_error(!ack.is_error())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id {:#010x} [blk {:#04x} cmd {:#04x} ack={} err={} {:#04x}->{:#04x}]",
            self.0,
            self.block(),
            self.block_command(),
            self.is_ack() as u8,
            self.is_error() as u8,
            self.sender().raw(),
            self.receiver().raw()
        )
    }
}

const fn mask(width: u32) -> u32 {
    (1 << width) - 1
}

/// Addressing-independent command: block + block command + ack + error
/// (identifier bits 12-27)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command(u16);

impl Command {
    /// Build a command view directly
    pub const fn new(block: u8, block_command: u8, ack: bool, error: bool) -> Self {
        Identifier::encode(block, block_command, ack, error, NodeId::HOST, NodeId::HOST).command()
    }

    /// Raw 16-bit command value
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Block number
    pub const fn block(self) -> u8 {
        ((self.0 >> (BLOCK_START - ERROR_BIT)) as u8) & mask(BLOCK_WIDTH) as u8
    }

    /// Block command number
    pub const fn block_command(self) -> u8 {
        ((self.0 >> (BLOCK_COMMAND_START - ERROR_BIT)) & 0xFF) as u8
    }

    /// Acknowledge bit
    pub const fn is_ack(self) -> bool {
        (self.0 >> (ACK_BIT - ERROR_BIT)) & 1 != 0
    }

    /// Error bit
    pub const fn is_error(self) -> bool {
        self.0 & 1 != 0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cmd {:#04x}:{:#04x} ack={} err={}",
            self.block(),
            self.block_command(),
            self.is_ack() as u8,
            self.is_error() as u8
        )
    }
}

/// Bus frame: identifier plus 0-8 payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame identifier
    pub id: Identifier,
    /// Payload (at most [`MAX_PAYLOAD`] bytes)
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a frame; payloads longer than [`MAX_PAYLOAD`] are truncated
    pub fn new(id: Identifier, data: &[u8]) -> Self {
        let len = data.len().min(MAX_PAYLOAD);
        Frame {
            id,
            data: data[..len].to_vec(),
        }
    }

    /// Frame with an empty payload
    pub fn empty(id: Identifier) -> Self {
        Frame {
            id,
            data: Vec::new(),
        }
    }
}

/// Block namespace (reference data, non-exhaustive)
pub mod blocks {
    /// System block: reset, status, active state, bridge sub-commands,
    /// routing counters
    pub const SYSTEM: u8 = 0x01;
    /// Streamed measurement data
    pub const STREAMING: u8 = 0x04;
    /// ADC sampling and calibration configuration
    pub const CONFIGURATION: u8 = 0x06;
    /// Product identification strings
    pub const PRODUCT_DATA: u8 = 0x08;
    /// Paged non-volatile memory access
    pub const EEPROM: u8 = 0x0A;
    /// Power-cycle counters, operating seconds, watchdog counter
    pub const STATISTICAL_DATA: u8 = 0x0C;
}

/// System block commands
pub mod system {
    /// Node reset
    pub const RESET: u8 = 0x01;
    /// Node status query (error/overrun flags)
    pub const NODE_STATUS: u8 = 0x02;
    /// Active-state control
    pub const ACTIVE_STATE: u8 = 0x03;
    /// Routing counter query (frames relayed by the bridge)
    pub const ROUTING_COUNTERS: u8 = 0x08;
    /// Start radio discovery scan
    pub const BRIDGE_SCAN_START: u8 = 0x10;
    /// Number of radio devices found so far
    pub const BRIDGE_DEVICE_COUNT: u8 = 0x11;
    /// Device name by index
    pub const BRIDGE_DEVICE_NAME: u8 = 0x12;
    /// Device radio address by index
    pub const BRIDGE_DEVICE_ADDRESS: u8 = 0x13;
    /// Device signal strength by index
    pub const BRIDGE_DEVICE_RSSI: u8 = 0x14;
    /// Connect to device by scan index
    pub const BRIDGE_CONNECT_INDEX: u8 = 0x15;
    /// Connect to device by radio address
    pub const BRIDGE_CONNECT_ADDRESS: u8 = 0x16;
    /// Disconnect the radio link
    pub const BRIDGE_DISCONNECT: u8 = 0x17;
    /// Connected-flag query
    pub const BRIDGE_CONNECTED: u8 = 0x18;
}

/// Streaming block commands (one per streamed quantity)
pub mod streaming {
    /// Acceleration samples
    pub const ACCELERATION: u8 = 0x01;
    /// Supply voltage samples
    pub const VOLTAGE: u8 = 0x02;
    /// Supply current samples
    pub const CURRENT: u8 = 0x03;
}

/// Configuration block commands
pub mod configuration {
    /// ADC clock prescaler
    pub const ADC_PRESCALER: u8 = 0x01;
    /// ADC acquisition-time code
    pub const ADC_ACQUISITION_TIME: u8 = 0x02;
    /// ADC oversampling code
    pub const ADC_OVERSAMPLING: u8 = 0x03;
    /// ADC reference-voltage code
    pub const ADC_REFERENCE_VOLTAGE: u8 = 0x04;
    /// Sampling status query (overrun / transmission-failure flags)
    pub const SAMPLING_STATUS: u8 = 0x05;
}

/// Product data block commands
pub mod product {
    /// Identification string, chunked by index
    pub const IDENTIFICATION: u8 = 0x01;
}

/// EEPROM block commands
pub mod eeprom {
    /// Paged read
    pub const READ: u8 = 0x01;
    /// Paged write
    pub const WRITE: u8 = 0x02;
    /// Physical write-cycle counter query
    pub const WRITE_CYCLE_COUNTER: u8 = 0x03;
}

/// Statistical data block commands
pub mod statistics {
    /// Power-cycle counter
    pub const POWER_CYCLES: u8 = 0x01;
    /// Accumulated operating seconds
    pub const OPERATING_SECONDS: u8 = 0x02;
    /// Watchdog reset counter
    pub const WATCHDOG_RESETS: u8 = 0x03;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        // Exhaustive over blocks and nodes, sampled over block commands
        for block in 0..64u8 {
            for block_command in [0x00, 0x01, 0x7F, 0x80, 0xFF] {
                for ack in [false, true] {
                    for error in [false, true] {
                        let sender = NodeId::new(block % 32);
                        let receiver = NodeId::new(block_command % 32);
                        let id = Identifier::encode(
                            block,
                            block_command,
                            ack,
                            error,
                            sender,
                            receiver,
                        );
                        assert_eq!(id.block(), block);
                        assert_eq!(id.block_command(), block_command);
                        assert_eq!(id.is_ack(), ack);
                        assert_eq!(id.is_error(), error);
                        assert_eq!(id.sender(), sender);
                        assert_eq!(id.receiver(), receiver);
                    }
                }
            }
        }
    }

    #[test]
    fn test_reserved_bit_clear() {
        let id = Identifier::encode(0x3F, 0xFF, true, true, NodeId::new(31), NodeId::new(31));
        assert_eq!(id.raw() >> 28, 0);
        assert_eq!(id.raw() & !IDENTIFIER_MASK, 0);
    }

    #[test]
    fn test_out_of_range_masked() {
        // 6-bit block: 0x7F masks to 0x3F
        let id = Identifier::encode(0x7F, 0x00, false, false, NodeId::HOST, NodeId::BRIDGE);
        assert_eq!(id.block(), 0x3F);

        // 5-bit node address: 0x3F masks to 0x1F
        assert_eq!(NodeId::new(0x3F).raw(), 0x1F);
    }

    #[test]
    fn test_with_field_partial_overwrite() {
        let original = Identifier::encode(
            0x15,
            0xA7,
            false,
            true,
            NodeId::new(0x0C),
            NodeId::new(0x13),
        );

        let modified = original.with_block_command(0x42);
        assert_eq!(modified.block_command(), 0x42);
        assert_eq!(modified.block(), original.block());
        assert_eq!(modified.is_ack(), original.is_ack());
        assert_eq!(modified.is_error(), original.is_error());
        assert_eq!(modified.sender(), original.sender());
        assert_eq!(modified.receiver(), original.receiver());

        // Every other bit must be untouched
        let command_mask = 0xFFu32 << 14;
        assert_eq!(modified.raw() & !command_mask, original.raw() & !command_mask);
    }

    #[test]
    fn test_with_ack_only_changes_ack_bit() {
        let id = Identifier::request(blocks::SYSTEM, system::RESET, NodeId::HOST, NodeId::BRIDGE);
        let acked = id.with_ack(true);
        assert_eq!(acked.raw() ^ id.raw(), 1 << 13);
    }

    #[test]
    fn test_expected_ack_swaps_addresses() {
        let request = Identifier::request(
            blocks::SYSTEM,
            system::RESET,
            NodeId::HOST,
            NodeId::FIRST_SENSOR,
        );
        let ack = request.expected_ack();
        assert!(ack.is_ack());
        assert!(!ack.is_error());
        assert_eq!(ack.sender(), NodeId::FIRST_SENSOR);
        assert_eq!(ack.receiver(), NodeId::HOST);
        assert_eq!(ack.block(), request.block());
        assert_eq!(ack.block_command(), request.block_command());

        let nack = request.expected_nack();
        assert!(nack.is_ack());
        assert!(nack.is_error());
        assert_eq!(nack.raw() ^ ack.raw(), 1 << 12);
    }

    #[test]
    fn test_command_view_is_addressing_independent() {
        let from_host = Identifier::request(
            blocks::EEPROM,
            eeprom::READ,
            NodeId::HOST,
            NodeId::FIRST_SENSOR,
        );
        let from_bridge = Identifier::request(
            blocks::EEPROM,
            eeprom::READ,
            NodeId::BRIDGE,
            NodeId::new(0x07),
        );
        assert_eq!(from_host.command(), from_bridge.command());
        assert_ne!(
            from_host.command(),
            from_host.with_ack(true).command(),
            "ack bit is part of the command view"
        );

        let cmd = from_host.command();
        assert_eq!(cmd.block(), blocks::EEPROM);
        assert_eq!(cmd.block_command(), eeprom::READ);
        assert!(!cmd.is_ack());
        assert!(!cmd.is_error());
    }

    #[test]
    fn test_frame_payload_clamped() {
        let id = Identifier::request(blocks::SYSTEM, system::RESET, NodeId::HOST, NodeId::BRIDGE);
        let frame = Frame::new(id, &[0u8; 12]);
        assert_eq!(frame.data.len(), MAX_PAYLOAD);

        let empty = Frame::empty(id);
        assert!(empty.data.is_empty());
    }
}
