//! Serial bus adapter speaking the SLCAN (Lawicel) ASCII framing
//!
//! Record format for extended frames with hardware timestamps enabled:
//!
//! ```text
//! T iiiiiiii L dd.. tttt CR
//! ```
//!
//! `iiiiiiii` is the 29-bit identifier in hex, `L` the payload length
//! (0-8), `dd..` the payload bytes in hex, `tttt` the adapter millisecond
//! timestamp (wrapping, 0-59999).

use super::{BusAdapter, ReceivedFrame};
use crate::codec::{Frame, Identifier, MAX_PAYLOAD};
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Incoming line buffer cap. A buffer that grows past this without a
/// record terminator means the adapter stream is desynchronized, which
/// only happens after its receive FIFO overruns.
const LINE_BUFFER_LIMIT: usize = 4096;

/// Serial SLCAN bus adapter
pub struct SlcanAdapter {
    port: Box<dyn SerialPort>,
    line: Vec<u8>,
    last_error: Option<String>,
}

impl SlcanAdapter {
    /// Open a serial port for SLCAN traffic
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_micros(100))
            .open()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(SlcanAdapter {
            port,
            line: Vec::new(),
            last_error: None,
        })
    }

    fn send_control(&mut self, command: &str) -> Result<()> {
        self.port.write_all(command.as_bytes())?;
        self.port.write_all(b"\r")?;
        self.port.flush()?;
        Ok(())
    }

    /// Parse one CR-terminated record. Returns `None` for records this
    /// layer does not consume (control acks, status responses).
    fn parse_record(record: &[u8]) -> Option<ReceivedFrame> {
        // Minimum extended frame: 'T' + 8 id + 1 len
        if record.len() < 10 || record[0] != b'T' {
            return None;
        }

        let id_raw = hex_field(&record[1..9])?;
        let len = (record[9] as char).to_digit(16)? as usize;
        if len > MAX_PAYLOAD {
            return None;
        }

        let data_end = 10 + len * 2;
        if record.len() < data_end {
            return None;
        }
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            data.push(hex_field(&record[10 + i * 2..12 + i * 2])? as u8);
        }

        // Optional 4-hex-digit hardware timestamp suffix
        let timestamp = if record.len() >= data_end + 4 {
            hex_field(&record[data_end..data_end + 4])? as u16
        } else {
            0
        };

        Some(ReceivedFrame {
            frame: Frame {
                id: Identifier::from_raw(id_raw),
                data,
            },
            timestamp,
        })
    }
}

fn hex_field(digits: &[u8]) -> Option<u32> {
    let mut value = 0u32;
    for &d in digits {
        value = (value << 4) | (d as char).to_digit(16)?;
    }
    Some(value)
}

impl BusAdapter for SlcanAdapter {
    fn initialize(&mut self) -> Result<()> {
        // Close a possibly-open channel, enable timestamps, open
        self.send_control("C")?;
        self.send_control("Z1")?;
        self.send_control("O")?;
        log::info!("SLCAN channel open, hardware timestamps enabled");
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut record = format!("T{:08X}{:X}", frame.id.raw(), frame.data.len());
        for byte in &frame.data {
            record.push_str(&format!("{:02X}", byte));
        }
        record.push('\r');
        self.port.write_all(record.as_bytes()).map_err(|e| {
            self.last_error = Some(e.to_string());
            Error::Adapter(format!("bus write failed: {}", e))
        })?;
        Ok(())
    }

    fn try_read_frame(&mut self) -> Result<Option<ReceivedFrame>> {
        // Pull whatever the port has buffered, never blocking past the
        // 100us port timeout
        let available = self.port.bytes_to_read()? as usize;
        if available > 0 {
            let mut buffer = vec![0u8; available.min(512)];
            match self.port.read(&mut buffer) {
                Ok(n) => self.line.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    self.last_error = Some(e.to_string());
                    return Err(Error::Adapter(format!("bus read failed: {}", e)));
                }
            }
        }

        // Extract complete records
        while let Some(pos) = self.line.iter().position(|&b| b == b'\r' || b == 0x07) {
            let record: Vec<u8> = self.line.drain(..=pos).collect();
            let record = &record[..record.len() - 1];
            if record.is_empty() {
                continue;
            }
            match Self::parse_record(record) {
                Some(received) => return Ok(Some(received)),
                None => {
                    log::debug!(
                        "SLCAN: skipping non-frame record ({} bytes, starts {:02X?})",
                        record.len(),
                        &record[..record.len().min(4)]
                    );
                }
            }
        }

        if self.line.len() > LINE_BUFFER_LIMIT {
            self.last_error = Some("receive stream desynchronized".to_string());
            self.line.clear();
            return Err(Error::BufferOverrun);
        }

        Ok(None)
    }

    fn reset(&mut self) -> Result<()> {
        self.send_control("C")?;
        self.line.clear();
        self.port.clear(serialport::ClearBuffer::All)?;
        log::info!("SLCAN channel closed");
        Ok(())
    }

    fn error_text(&self) -> Option<String> {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{blocks, system, NodeId};

    #[test]
    fn test_parse_extended_frame_with_timestamp() {
        let received = SlcanAdapter::parse_record(b"T18400041228EA1024").unwrap();
        assert_eq!(received.frame.id.raw(), 0x18400041);
        assert_eq!(received.frame.data, vec![0x28, 0xEA]);
        assert_eq!(received.timestamp, 0x1024);
    }

    #[test]
    fn test_parse_frame_without_timestamp() {
        let received = SlcanAdapter::parse_record(b"T044000811AB").unwrap();
        assert_eq!(received.frame.id.raw(), 0x04400081);
        assert_eq!(received.frame.data, vec![0xAB]);
        assert_eq!(received.timestamp, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SlcanAdapter::parse_record(b"t12341").is_none());
        assert!(SlcanAdapter::parse_record(b"T123").is_none());
        assert!(SlcanAdapter::parse_record(b"TZZZZZZZZ0").is_none());
        // Length nibble larger than the payload cap
        assert!(SlcanAdapter::parse_record(b"T12345678F").is_none());
    }

    #[test]
    fn test_record_round_trip() {
        let id = Identifier::request(blocks::SYSTEM, system::RESET, NodeId::HOST, NodeId::BRIDGE);
        let frame = Frame::new(id, &[0x01, 0x02, 0x03]);

        let mut record = format!("T{:08X}{:X}", frame.id.raw(), frame.data.len());
        for byte in &frame.data {
            record.push_str(&format!("{:02X}", byte));
        }

        let parsed = SlcanAdapter::parse_record(record.as_bytes()).unwrap();
        assert_eq!(parsed.frame, frame);
    }
}
