//! Streaming configuration, capture, and statistics
//!
//! [`StreamEngine`] configures a sensor node's ADC, starts and stops the
//! telemetry stream, and slices the connection's ingest log into per-axis
//! sample arrays for numeric validation.

pub mod demux;
pub mod sampling;
pub mod stats;

pub use demux::{demultiplex, AxisCapture, StreamingSample};
pub use sampling::{control_byte, AxisMask, DataSetMode, SamplingConfig};
pub use stats::StatisticsSummary;

use crate::codec::{blocks, configuration, streaming as streaming_cmd, NodeId};
use crate::engine::{DeviceStatus, LinkEngine};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Streamable measurement quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamQuantity {
    /// Acceleration samples
    Acceleration,
    /// Supply voltage samples
    Voltage,
    /// Supply current samples
    Current,
}

impl StreamQuantity {
    /// Streaming-block command for this quantity
    pub const fn block_command(self) -> u8 {
        match self {
            StreamQuantity::Acceleration => streaming_cmd::ACCELERATION,
            StreamQuantity::Voltage => streaming_cmd::VOLTAGE,
            StreamQuantity::Current => streaming_cmd::CURRENT,
        }
    }
}

/// Streaming session against one sensor node.
///
/// Owns the node's [`SamplingConfig`] mirror: configuration setters issue
/// the bus request first and update the local copy only on
/// acknowledgment, so [`sample_rate`](Self::sample_rate) always reflects
/// what the device runs with.
pub struct StreamEngine {
    engine: Arc<LinkEngine>,
    node: NodeId,
    quantity: StreamQuantity,
    config: SamplingConfig,
    axes: AxisMask,
    mode: DataSetMode,
    fixed_dataset: bool,
    start_index: Option<usize>,
    stop_index: Option<usize>,
}

impl StreamEngine {
    /// Streaming session for `quantity` on `node`
    pub fn new(engine: Arc<LinkEngine>, node: NodeId, quantity: StreamQuantity) -> Self {
        StreamEngine {
            engine,
            node,
            quantity,
            config: SamplingConfig::default(),
            axes: AxisMask::ALL,
            mode: DataSetMode::OneValuePerAxis,
            fixed_dataset: false,
            start_index: None,
            stop_index: None,
        }
    }

    /// Local mirror of the node's sampling configuration
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Expected sample rate for the current configuration, Hz
    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate()
    }

    /// Set the ADC clock prescaler
    pub fn set_prescaler(&mut self, prescaler: u16) -> Result<()> {
        self.engine.request_to(
            blocks::CONFIGURATION,
            configuration::ADC_PRESCALER,
            self.node,
            &prescaler.to_le_bytes(),
        )?;
        self.config.prescaler = prescaler;
        Ok(())
    }

    /// Set the acquisition-time code
    pub fn set_acquisition_time(&mut self, code: u8) -> Result<()> {
        SamplingConfig::check_acquisition_code(code)?;
        self.engine.request_to(
            blocks::CONFIGURATION,
            configuration::ADC_ACQUISITION_TIME,
            self.node,
            &[code],
        )?;
        self.config.acquisition_code = code;
        Ok(())
    }

    /// Set the oversampling code
    pub fn set_oversampling(&mut self, code: u8) -> Result<()> {
        SamplingConfig::check_oversampling_code(code)?;
        self.engine.request_to(
            blocks::CONFIGURATION,
            configuration::ADC_OVERSAMPLING,
            self.node,
            &[code],
        )?;
        self.config.oversampling_code = code;
        Ok(())
    }

    /// Set the reference-voltage code
    pub fn set_reference_voltage(&mut self, code: u8) -> Result<()> {
        SamplingConfig::check_reference_code(code)?;
        self.engine.request_to(
            blocks::CONFIGURATION,
            configuration::ADC_REFERENCE_VOLTAGE,
            self.node,
            &[code],
        )?;
        self.config.reference_code = code;
        Ok(())
    }

    /// Apply a complete sampling configuration, field by field
    pub fn apply_config(&mut self, config: SamplingConfig) -> Result<()> {
        self.set_prescaler(config.prescaler)?;
        self.set_acquisition_time(config.acquisition_code)?;
        self.set_oversampling(config.oversampling_code)?;
        self.set_reference_voltage(config.reference_code)?;
        log::info!(
            "Streaming: {} configured, expected rate {:.1} Hz",
            self.node,
            self.sample_rate()
        );
        Ok(())
    }

    /// Start streaming on the given axes.
    ///
    /// Records the current ingest-log index as the capture start. The
    /// three-values mode needs exactly one enabled axis.
    pub fn start(&mut self, axes: AxisMask, mode: DataSetMode) -> Result<()> {
        if axes.count() == 0 {
            return Err(Error::InvalidParameter(
                "streaming needs at least one enabled axis".to_string(),
            ));
        }
        if mode == DataSetMode::ThreeValuesPerAxis && axes.count() != 1 {
            return Err(Error::InvalidParameter(
                "three-values-per-axis mode needs exactly one enabled axis".to_string(),
            ));
        }

        // Capture the index before the request goes out: the device may
        // start streaming before the acknowledgment is observed here
        let start_index = self.engine.ingest_log().len();

        let control = control_byte(true, self.fixed_dataset, axes, mode);
        self.engine.request_to(
            blocks::STREAMING,
            self.quantity.block_command(),
            self.node,
            &[control],
        )?;

        self.axes = axes;
        self.mode = mode;
        self.start_index = Some(start_index);
        self.stop_index = None;
        log::info!(
            "Streaming: started on {} (mask {:#05b}, {:?})",
            self.node,
            axes.bits(),
            mode
        );
        Ok(())
    }

    /// Stop streaming and record the capture end index
    pub fn stop(&mut self) -> Result<()> {
        let control = control_byte(false, self.fixed_dataset, self.axes, self.mode);
        self.engine.request_to(
            blocks::STREAMING,
            self.quantity.block_command(),
            self.node,
            &[control],
        )?;
        self.stop_index = Some(self.engine.ingest_log().len());
        log::info!("Streaming: stopped on {}", self.node);
        Ok(())
    }

    /// Demultiplex everything streamed between start and stop.
    ///
    /// Callable after [`stop`](Self::stop), or mid-stream for a snapshot
    /// up to the current log end.
    pub fn collect(&self) -> Result<AxisCapture> {
        let start = self.start_index.ok_or_else(|| {
            Error::InvalidParameter("no capture started on this session".to_string())
        })?;
        let log = self.engine.ingest_log();
        let end = self.stop_index.unwrap_or_else(|| log.len());
        let entries = log.range(start, end);
        Ok(demultiplex(
            &entries,
            self.node,
            self.quantity,
            self.axes,
            self.mode,
        ))
    }

    /// Summary statistics for one captured axis
    pub fn axis_statistics(&self, capture: &AxisCapture, axis: usize) -> Result<StatisticsSummary> {
        StatisticsSummary::from_samples(&capture.axis_f64(axis))
    }

    /// Explicit device-side sampling status query.
    ///
    /// A reported overrun invalidates the capture just collected; callers
    /// must check this before trusting statistics. Never raised
    /// implicitly by the streaming calls themselves.
    pub fn sampling_status(&self) -> Result<DeviceStatus> {
        let ack = self.engine.request_to(
            blocks::CONFIGURATION,
            configuration::SAMPLING_STATUS,
            self.node,
            &[],
        )?;
        DeviceStatus::from_payload(&ack.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;
    use crate::config::LinkConfig;
    use crate::transport::{MockBus, MockRemote};

    fn test_config() -> LinkConfig {
        LinkConfig {
            ack_timeout_ms: 100,
            retries: 1,
            reader_poll_interval_us: 200,
            ack_poll_interval_us: 100,
            ..LinkConfig::default()
        }
    }

    fn ack_all(remote: &MockRemote) {
        remote.set_responder(|request| vec![Frame::empty(request.id.expected_ack())]);
    }

    fn fixture() -> (Arc<LinkEngine>, MockRemote, StreamEngine) {
        let (bus, remote) = MockBus::pair();
        let engine = Arc::new(LinkEngine::connect(bus, NodeId::HOST, test_config()).unwrap());
        let stream = StreamEngine::new(
            Arc::clone(&engine),
            NodeId::FIRST_SENSOR,
            StreamQuantity::Acceleration,
        );
        (engine, remote, stream)
    }

    #[test]
    fn test_configuration_updates_local_mirror() {
        let (_engine, remote, mut stream) = fixture();
        ack_all(&remote);

        stream
            .apply_config(SamplingConfig {
                prescaler: 2,
                acquisition_code: 4,
                oversampling_code: 6,
                reference_code: 3,
            })
            .unwrap();

        assert_eq!(stream.config().prescaler, 2);
        assert_eq!(stream.config().reference_millivolts(), 1800);
        let expected = 38_400_000.0 / (3.0 * 21.0 * 64.0);
        assert!((stream.sample_rate() - expected).abs() < 1e-9);

        // One request per parameter
        assert_eq!(remote.written_count(), 4);
    }

    #[test]
    fn test_invalid_codes_rejected_without_request() {
        let (_engine, remote, mut stream) = fixture();
        ack_all(&remote);

        assert!(stream.set_acquisition_time(10).is_err());
        assert!(stream.set_oversampling(13).is_err());
        assert!(stream.set_reference_voltage(11).is_err());
        assert_eq!(remote.written_count(), 0);
    }

    #[test]
    fn test_capture_slices_log_between_start_and_stop() {
        let (engine, remote, mut stream) = fixture();
        ack_all(&remote);

        // Streamed before start: must not be captured
        remote.inject(stream_frame(9, [99, 99, 99]));
        wait_for_log_len(&engine, 1);

        stream
            .start(AxisMask::X | AxisMask::Y, DataSetMode::OneValuePerAxis)
            .unwrap();
        remote.inject(stream_frame(0, [10, 20, 0]));
        remote.inject(stream_frame(1, [11, 21, 0]));
        // Stale frame + start ack + 2 sample messages
        wait_for_log_len(&engine, 4);
        stream.stop().unwrap();

        // Streamed after stop: must not be captured
        remote.inject(stream_frame(2, [12, 22, 0]));

        let capture = stream.collect().unwrap();
        assert_eq!(capture.messages, 2);
        assert_eq!(capture.axis(0), &[10, 11]);
        assert_eq!(capture.axis(1), &[20, 21]);
        assert_eq!(capture.lost_messages, 0);

        let summary = stream.axis_statistics(&capture, 0).unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.mean - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_start_validates_axis_mode_combination() {
        let (_engine, remote, mut stream) = fixture();
        ack_all(&remote);

        assert!(stream
            .start(AxisMask::from_bits(0), DataSetMode::OneValuePerAxis)
            .is_err());
        assert!(stream
            .start(AxisMask::ALL, DataSetMode::ThreeValuesPerAxis)
            .is_err());
        assert_eq!(remote.written_count(), 0);

        stream
            .start(AxisMask::Z, DataSetMode::ThreeValuesPerAxis)
            .unwrap();
        let control = remote.written()[0].data[0];
        assert_eq!(control, 0b1010_0011);
    }

    #[test]
    fn test_sampling_status_query() {
        let (_engine, remote, stream) = fixture();
        remote.set_responder(|request| {
            vec![Frame::new(request.id.expected_ack(), &[0x01, 0x00])]
        });

        let status = stream.sampling_status().unwrap();
        assert!(status.overrun);
        assert!(!status.transmission_failure);
    }

    fn stream_frame(sequence: u8, values: [i16; 3]) -> Frame {
        let id = crate::codec::Identifier::request(
            blocks::STREAMING,
            streaming_cmd::ACCELERATION,
            NodeId::FIRST_SENSOR,
            NodeId::HOST,
        );
        let mut payload = vec![sequence];
        for value in values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        Frame::new(id, &payload)
    }

    fn wait_for_log_len(engine: &LinkEngine, target: usize) {
        use std::time::{Duration, Instant};
        let log = engine.ingest_log();
        let deadline = Instant::now() + Duration::from_millis(500);
        while log.len() < target && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(log.len() >= target, "ingest log never reached {}", target);
    }
}
