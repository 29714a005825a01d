//! Streamed-frame demultiplexing
//!
//! Streamed frames carry a wrapping 8-bit sequence counter followed by up
//! to three 16-bit little-endian sample slots. Which axis a slot belongs
//! to depends on the activated-axis bitmask and the data-set mode, never
//! on a fixed position.

use super::sampling::{AxisMask, DataSetMode};
use super::StreamQuantity;
use crate::codec::{blocks, NodeId};
use crate::engine::IngestEntry;
use std::sync::Arc;

/// One parsed streamed message
#[derive(Debug, Clone)]
pub struct StreamingSample {
    /// Wrapping per-message sequence counter
    pub sequence: u8,
    /// Raw slot values in wire order
    pub slots: Vec<i16>,
}

impl StreamingSample {
    /// Parse a streamed payload: sequence byte plus 16-bit LE slots.
    /// Returns `None` for payloads too short to carry a sample.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 3 {
            return None;
        }
        let sequence = payload[0];
        let slots = payload[1..]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(StreamingSample { sequence, slots })
    }
}

/// Demultiplexed capture: per-axis sample arrays plus stream health
#[derive(Debug, Clone, Default)]
pub struct AxisCapture {
    /// Samples per axis, indexed 0-2
    pub axes: [Vec<i16>; 3],
    /// Streamed messages consumed
    pub messages: usize,
    /// Messages missing according to sequence-counter gaps
    pub lost_messages: u64,
}

impl AxisCapture {
    /// Samples of one axis
    pub fn axis(&self, index: usize) -> &[i16] {
        &self.axes[index]
    }

    /// Samples of one axis as f64, ready for statistics
    pub fn axis_f64(&self, index: usize) -> Vec<f64> {
        self.axes[index].iter().map(|&v| v as f64).collect()
    }

    /// Total samples across all axes
    pub fn total_samples(&self) -> usize {
        self.axes.iter().map(Vec::len).sum()
    }
}

/// Demultiplex a slice of the ingest log into per-axis sample arrays.
///
/// Only non-acknowledgment frames of the given quantity sent by `node`
/// are consumed; everything else in the slice is ignored.
pub fn demultiplex(
    entries: &[Arc<IngestEntry>],
    node: NodeId,
    quantity: StreamQuantity,
    axes: AxisMask,
    mode: DataSetMode,
) -> AxisCapture {
    let mut capture = AxisCapture::default();
    let mut last_sequence: Option<u8> = None;

    for entry in entries {
        let id = entry.frame.id;
        if id.block() != blocks::STREAMING
            || id.block_command() != quantity.block_command()
            || id.sender() != node
            || id.is_ack()
        {
            continue;
        }

        let sample = match StreamingSample::parse(&entry.frame.data) {
            Some(sample) => sample,
            None => {
                log::debug!(
                    "Streaming: short payload ({} bytes) from {}, skipped",
                    entry.frame.data.len(),
                    node
                );
                continue;
            }
        };

        if let Some(previous) = last_sequence {
            let gap = sample.sequence.wrapping_sub(previous).wrapping_sub(1);
            if gap != 0 {
                capture.lost_messages += gap as u64;
            }
        }
        last_sequence = Some(sample.sequence);
        capture.messages += 1;

        match mode {
            DataSetMode::OneValuePerAxis => {
                // Slot k carries the k-th enabled axis. With a single
                // enabled axis the remaining slots are replicas of slot 0
                // and are dropped.
                for (slot, axis) in axes.enabled().enumerate() {
                    if let Some(&value) = sample.slots.get(slot) {
                        capture.axes[axis].push(value);
                    }
                }
            }
            DataSetMode::ThreeValuesPerAxis => {
                // All slots are consecutive samples of the single enabled
                // axis
                if let Some(axis) = axes.enabled().next() {
                    capture.axes[axis].extend_from_slice(&sample.slots);
                }
            }
        }
    }

    capture
}
