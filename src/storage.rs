//! Paged non-volatile storage access
//!
//! Node memory is addressed by (page, offset, length). Every transport
//! frame carries a 4-byte protocol header `[page, offset, length, 0]`
//! and at most [`DATA_BYTES_PER_FRAME`] data bytes, so larger transfers
//! are chunked. There is no transactionality: a failure mid-way through
//! a multi-chunk write leaves a partially updated region.

use crate::codec::{blocks, eeprom, product, statistics, NodeId};
use crate::engine::LinkEngine;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Data bytes per storage frame (the other 4 payload bytes are header)
pub const DATA_BYTES_PER_FRAME: usize = 4;

/// Bytes per storage page
pub const PAGE_SIZE: usize = 256;

/// Storage address: page, byte offset within the page, length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageAddress {
    /// Page number
    pub page: u8,
    /// Byte offset within the page
    pub offset: u8,
    /// Transfer length in bytes
    pub length: usize,
}

impl StorageAddress {
    /// Validate that the transfer stays within one page
    fn checked(page: u8, offset: u8, length: usize) -> Result<Self> {
        if offset as usize + length > PAGE_SIZE {
            return Err(Error::InvalidParameter(format!(
                "storage access [{}..{}) exceeds page size {}",
                offset,
                offset as usize + length,
                PAGE_SIZE
            )));
        }
        Ok(StorageAddress {
            page,
            offset,
            length,
        })
    }
}

/// Paged storage client for one node
pub struct PagedStorage {
    engine: Arc<LinkEngine>,
    node: NodeId,
}

impl PagedStorage {
    /// Storage client for `node`
    pub fn new(engine: Arc<LinkEngine>, node: NodeId) -> Self {
        PagedStorage { engine, node }
    }

    fn header(page: u8, offset: u8, chunk_len: usize) -> [u8; 4] {
        [page, offset, chunk_len as u8, 0]
    }

    /// Read `length` bytes starting at (page, offset).
    ///
    /// Issues `ceil(length / 4)` requests and reassembles the chunks in
    /// offset order.
    pub fn read_bytes(&self, page: u8, offset: u8, length: usize) -> Result<Vec<u8>> {
        let address = StorageAddress::checked(page, offset, length)?;
        let mut data = Vec::with_capacity(length);

        let mut position = 0usize;
        while position < length {
            let chunk_len = (length - position).min(DATA_BYTES_PER_FRAME);
            let chunk_offset = offset + position as u8;
            let header = Self::header(address.page, chunk_offset, chunk_len);
            let ack = self
                .engine
                .request_to(blocks::EEPROM, eeprom::READ, self.node, &header)?;
            if ack.payload.len() < chunk_len {
                return Err(Error::InvalidFrame(format!(
                    "storage read returned {} of {} bytes at page {} offset {}",
                    ack.payload.len(),
                    chunk_len,
                    page,
                    chunk_offset
                )));
            }
            data.extend_from_slice(&ack.payload[..chunk_len]);
            position += chunk_len;
        }

        Ok(data)
    }

    /// Write `data` starting at (page, offset), chunked like reads
    pub fn write_bytes(&self, page: u8, offset: u8, data: &[u8]) -> Result<()> {
        let address = StorageAddress::checked(page, offset, data.len())?;
        log::debug!(
            "Storage: writing {} bytes to page {} offset {}",
            data.len(),
            page,
            offset
        );

        let mut position = 0usize;
        while position < data.len() {
            let chunk = &data[position..(position + DATA_BYTES_PER_FRAME).min(data.len())];
            let chunk_offset = offset + position as u8;
            let mut payload = Vec::with_capacity(4 + chunk.len());
            payload.extend_from_slice(&Self::header(address.page, chunk_offset, chunk.len()));
            payload.extend_from_slice(chunk);
            self.engine
                .request_to(blocks::EEPROM, eeprom::WRITE, self.node, &payload)?;
            position += chunk.len();
        }

        Ok(())
    }

    /// Write `data` truncated or zero-padded to exactly `pad_length`
    /// bytes, then chunked identically to [`write_bytes`](Self::write_bytes)
    pub fn write_bytes_padded(
        &self,
        page: u8,
        offset: u8,
        data: &[u8],
        pad_length: usize,
    ) -> Result<()> {
        let mut padded = data[..data.len().min(pad_length)].to_vec();
        padded.resize(pad_length, 0);
        self.write_bytes(page, offset, &padded)
    }

    // ----- Typed accessors -----

    /// Read a text field of at most `max_length` bytes, stopping at the
    /// first NUL byte
    pub fn read_string(&self, page: u8, offset: u8, max_length: usize) -> Result<String> {
        let raw = self.read_bytes(page, offset, max_length)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Write a text field into exactly `field_length` bytes, truncating
    /// or zero-padding as needed
    pub fn write_string(&self, page: u8, offset: u8, text: &str, field_length: usize) -> Result<()> {
        self.write_bytes_padded(page, offset, text.as_bytes(), field_length)
    }

    /// Read an unsigned byte
    pub fn read_u8(&self, page: u8, offset: u8) -> Result<u8> {
        Ok(self.read_bytes(page, offset, 1)?[0])
    }

    /// Read a little-endian u16
    pub fn read_u16(&self, page: u8, offset: u8) -> Result<u16> {
        let raw = self.read_bytes(page, offset, 2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    /// Read a little-endian u32
    pub fn read_u32(&self, page: u8, offset: u8) -> Result<u32> {
        let raw = self.read_bytes(page, offset, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a little-endian IEEE-754 float
    pub fn read_f32(&self, page: u8, offset: u8) -> Result<f32> {
        let raw = self.read_bytes(page, offset, 4)?;
        Ok(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Write an unsigned byte
    pub fn write_u8(&self, page: u8, offset: u8, value: u8) -> Result<()> {
        self.write_bytes(page, offset, &[value])
    }

    /// Write a little-endian u16
    pub fn write_u16(&self, page: u8, offset: u8, value: u16) -> Result<()> {
        self.write_bytes(page, offset, &value.to_le_bytes())
    }

    /// Write a little-endian u32
    pub fn write_u32(&self, page: u8, offset: u8, value: u32) -> Result<()> {
        self.write_bytes(page, offset, &value.to_le_bytes())
    }

    /// Write a little-endian IEEE-754 float
    pub fn write_f32(&self, page: u8, offset: u8, value: f32) -> Result<()> {
        self.write_bytes(page, offset, &value.to_le_bytes())
    }

    /// Query the device-maintained physical write-cycle counter.
    ///
    /// Increments only when a write actually hit the memory, so a
    /// logically redundant rewrite can be detected as a missing
    /// increment. A correctness probe, not a consistency mechanism.
    pub fn write_cycle_counter(&self) -> Result<u32> {
        let ack =
            self.engine
                .request_to(blocks::EEPROM, eeprom::WRITE_CYCLE_COUNTER, self.node, &[])?;
        if ack.payload.len() < 4 {
            return Err(Error::InvalidFrame(
                "write-cycle counter payload too short".to_string(),
            ));
        }
        Ok(u32::from_le_bytes([
            ack.payload[0],
            ack.payload[1],
            ack.payload[2],
            ack.payload[3],
        ]))
    }
}

/// Lifetime counters maintained by every node
pub struct StatisticalCounters {
    engine: Arc<LinkEngine>,
    node: NodeId,
}

impl StatisticalCounters {
    /// Counter client for `node`
    pub fn new(engine: Arc<LinkEngine>, node: NodeId) -> Self {
        StatisticalCounters { engine, node }
    }

    fn query(&self, block_command: u8) -> Result<u32> {
        let ack = self
            .engine
            .request_to(blocks::STATISTICAL_DATA, block_command, self.node, &[])?;
        if ack.payload.len() < 4 {
            return Err(Error::InvalidFrame("counter payload too short".to_string()));
        }
        Ok(u32::from_le_bytes([
            ack.payload[0],
            ack.payload[1],
            ack.payload[2],
            ack.payload[3],
        ]))
    }

    /// Number of power cycles
    pub fn power_cycles(&self) -> Result<u32> {
        self.query(statistics::POWER_CYCLES)
    }

    /// Accumulated operating time in seconds
    pub fn operating_seconds(&self) -> Result<u32> {
        self.query(statistics::OPERATING_SECONDS)
    }

    /// Number of watchdog resets
    pub fn watchdog_resets(&self) -> Result<u32> {
        self.query(statistics::WATCHDOG_RESETS)
    }
}

/// Product identification strings, chunked over 8-byte frames
pub struct ProductData {
    engine: Arc<LinkEngine>,
    node: NodeId,
}

impl ProductData {
    /// Product data client for `node`
    pub fn new(engine: Arc<LinkEngine>, node: NodeId) -> Self {
        ProductData { engine, node }
    }

    /// Read the identification string chunk by chunk until a NUL
    /// terminator or an empty chunk
    pub fn identification(&self) -> Result<String> {
        let mut text = Vec::new();
        for chunk_index in 0..32u8 {
            let ack = self.engine.request_to(
                blocks::PRODUCT_DATA,
                product::IDENTIFICATION,
                self.node,
                &[chunk_index],
            )?;
            if ack.payload.is_empty() {
                break;
            }
            if let Some(end) = ack.payload.iter().position(|&b| b == 0) {
                text.extend_from_slice(&ack.payload[..end]);
                break;
            }
            text.extend_from_slice(&ack.payload);
        }
        Ok(String::from_utf8_lossy(&text).into_owned())
    }
}
