// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

//! The monitoring session: one `process_tick` per sampling period, host
//! bytes in through [`MonitorSession::handle_host_bytes`], report lines out
//! through [`MonitorSession::bytes_to_send`]. The session never terminates
//! on bad input or a silent sensor; both degrade to a skipped step.

use crate::config::MonitorConfig;
use crate::drink_monitor::{DrinkDetector, WeightTrend};
use crate::weight::interface::StrainGaugeInterface;
use crate::weight::{Calibration, ReadingSample, WeightFilter, WeightScale};
use circular_buffer::CircularBuffer;
use core::fmt::Write;
use std::io::BufRead;
use watermonitor_messages::{decode_command, encode_report, DeviceReport, HostCommand, LineError};

pub const STATUS_READY: &str = "READY";
pub const STATUS_TARED: &str = "TARED";
pub const STATUS_RESET: &str = "RESET";
pub const STATUS_CAL_START: &str = "CAL_START";
pub const STATUS_CAL_END: &str = "CAL_END";

/// Only the leading byte of a command line matters; anything longer than
/// this is trailing data we are allowed to drop.
const COMMAND_LINE_MAX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Normal,
    Calibrating,
}

pub struct MonitorSession<StrainGauge, const BUFFER_SIZE: usize> {
    scale: WeightScale<StrainGauge>,
    filter: WeightFilter,
    detector: DrinkDetector,
    mode: MonitorMode,
    config: MonitorConfig,
    last_sample: Option<ReadingSample>,
    rx_buffer: CircularBuffer<BUFFER_SIZE, u8>,
    tx_buffer: [u8; BUFFER_SIZE],
    tx_valid_bytes: usize,
    missed_reads: u32,
}

impl<StrainGauge, StrainGaugeE, const BUFFER_SIZE: usize> MonitorSession<StrainGauge, BUFFER_SIZE>
where
    StrainGauge: StrainGaugeInterface<Error = StrainGaugeE>,
    StrainGaugeE: core::fmt::Debug,
{
    pub fn new(scale: WeightScale<StrainGauge>, config: MonitorConfig) -> Self {
        let mut session = Self {
            scale,
            filter: WeightFilter::new(config.use_averaging),
            detector: DrinkDetector::new(config.weight_threshold, config.stable_readings),
            mode: MonitorMode::Normal,
            config,
            last_sample: None,
            rx_buffer: CircularBuffer::new(),
            tx_buffer: [0u8; BUFFER_SIZE],
            tx_valid_bytes: 0,
            missed_reads: 0,
        };
        session.queue_status(STATUS_READY);
        session
    }

    /// Buffer bytes received from the host. Decoding happens on the next
    /// tick so command effects stay ordered against the sampling pipeline.
    pub fn handle_host_bytes(&mut self, incoming: &[u8]) {
        if incoming.len() + self.rx_buffer.len() > self.rx_buffer.capacity() {
            log::warn!(
                "Command buffer full, discarding {} incoming bytes",
                incoming.len()
            );
            return;
        }
        self.rx_buffer.extend_from_slice(incoming);
    }

    /// Run one control-loop period. A failed sensor read skips the rest of
    /// the tick; buffered commands wait for the next successful one.
    pub fn process_tick(&mut self, now_ms: u64) {
        let sample = match self.scale.read_sample(now_ms) {
            Ok(sample) => sample,
            Err(e) => {
                self.missed_reads += 1;
                log::warn!("Sensor read failed ({} missed): {:?}", self.missed_reads, e);
                if self.config.debug_mode {
                    self.queue_status("ERR SENSOR");
                }
                return;
            }
        };
        self.last_sample = Some(sample);

        let grams = self.scale.to_grams(&sample);
        let smoothed = self.filter.push(grams);

        match self.mode {
            MonitorMode::Normal => {
                let trend = self.detector.update(smoothed);
                self.queue_report(&DeviceReport::Weight(smoothed));
                if let WeightTrend::DrinkDetected { grams: consumed } = trend {
                    self.queue_report(&DeviceReport::Drink(consumed));
                }
            }
            MonitorMode::Calibrating => {
                // Raw and converted values for manual factor tuning; the
                // detector does not run in this mode.
                let mut text: heapless::String<48> = heapless::String::new();
                if write!(text, "RAW={},G={:.3}", sample.raw, grams).is_ok() {
                    self.queue_status(text.as_str());
                }
            }
        }

        self.drain_host_commands();
    }

    /// Hand out everything queued for the host since the last call.
    pub fn bytes_to_send(&mut self) -> Option<&[u8]> {
        if self.tx_valid_bytes > 0 {
            let message_size = self.tx_valid_bytes;
            self.tx_valid_bytes = 0;
            return Some(&self.tx_buffer[..message_size]);
        }
        None
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub fn calibration(&self) -> &Calibration {
        self.scale.calibration()
    }

    pub fn detector(&self) -> &DrinkDetector {
        &self.detector
    }

    pub fn filter(&self) -> &WeightFilter {
        &self.filter
    }

    pub fn missed_reads(&self) -> u32 {
        self.missed_reads
    }

    fn drain_host_commands(&mut self) {
        loop {
            self.rx_buffer.make_contiguous();
            let (buffered, _) = self.rx_buffer.as_slices();
            let Some(position) = buffered.iter().position(|&b| b == b'\n') else {
                if buffered.len() == self.rx_buffer.capacity() {
                    // A full buffer with no terminator can never make
                    // progress, start over
                    log::warn!("Discarding {} unterminated command bytes", buffered.len());
                    self.rx_buffer.clear();
                }
                break;
            };

            let mut line = [0u8; COMMAND_LINE_MAX];
            let copy_len = position.min(COMMAND_LINE_MAX);
            line[..copy_len].copy_from_slice(&buffered[..copy_len]);
            self.rx_buffer.consume(position + 1);

            self.apply_command_line(&line[..copy_len]);
        }
    }

    fn apply_command_line(&mut self, line: &[u8]) {
        match decode_command(line) {
            Ok(HostCommand::Tare) => self.tare(),
            Ok(HostCommand::Reset) => self.reset(),
            Ok(HostCommand::Calibrate) => self.enter_calibration(),
            Err(LineError::EmptyLine) => {}
            Err(LineError::MalformedCommand(byte)) => {
                log::debug!("Ignoring unknown command byte 0x{:02X}", byte);
                if self.config.debug_mode {
                    let mut text: heapless::String<24> = heapless::String::new();
                    if write!(text, "ERR CMD {}", byte as char).is_ok() {
                        self.queue_status(text.as_str());
                    }
                }
            }
            Err(e) => {
                log::debug!("Ignoring undecodable command line: {:?}", e);
            }
        }
    }

    fn tare(&mut self) {
        let Some(sample) = self.last_sample else {
            log::debug!("Tare requested before the first reading, ignored");
            return;
        };
        self.scale.tare_at(sample.raw);
        self.filter.reset();
        self.detector.reset();
        self.leave_calibration();
        self.queue_status(STATUS_TARED);
    }

    fn reset(&mut self) {
        self.filter.reset();
        self.detector.reset();
        self.leave_calibration();
        self.queue_status(STATUS_RESET);
    }

    fn enter_calibration(&mut self) {
        if self.mode == MonitorMode::Calibrating {
            log::debug!("Already calibrating");
            return;
        }
        self.mode = MonitorMode::Calibrating;
        self.queue_status(STATUS_CAL_START);
    }

    fn leave_calibration(&mut self) {
        if self.mode == MonitorMode::Calibrating {
            self.mode = MonitorMode::Normal;
            self.queue_status(STATUS_CAL_END);
        }
    }

    fn queue_status(&mut self, text: &str) {
        self.queue_report(&DeviceReport::Status(text));
    }

    fn queue_report(&mut self, report: &DeviceReport) {
        match encode_report(report, &mut self.tx_buffer[self.tx_valid_bytes..]) {
            Ok(written) => self.tx_valid_bytes += written,
            Err(LineError::BufferTooSmall(needed)) => {
                log::warn!("Send buffer full, dropping report ({} bytes short)", needed);
            }
            Err(e) => {
                log::warn!("Failed to encode report: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, PartialEq)]
    struct FakeGaugeError;

    /// Scripted gauge: plays back the queued results, then repeats the last
    /// scripted raw value forever.
    struct FakeStrainGauge {
        script: VecDeque<Result<i32, FakeGaugeError>>,
        last_raw: i32,
    }

    impl FakeStrainGauge {
        fn with_script(script: Vec<Result<i32, FakeGaugeError>>) -> Self {
            Self {
                script: script.into(),
                last_raw: 0,
            }
        }
    }

    impl StrainGaugeInterface for FakeStrainGauge {
        type Error = FakeGaugeError;

        fn initialize(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn read_raw(&mut self) -> Result<i32, Self::Error> {
            match self.script.pop_front() {
                Some(Ok(raw)) => {
                    self.last_raw = raw;
                    Ok(raw)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last_raw),
            }
        }
    }

    const FACTOR: f32 = -7050.0;

    fn raw_for_grams(grams: f32) -> i32 {
        (grams * FACTOR) as i32
    }

    fn session_with(
        script: Vec<Result<i32, FakeGaugeError>>,
        config: MonitorConfig,
    ) -> MonitorSession<FakeStrainGauge, 512> {
        let calibration = Calibration::new(FACTOR).unwrap();
        let scale = WeightScale::new(FakeStrainGauge::with_script(script), calibration).unwrap();
        MonitorSession::new(scale, config)
    }

    fn unfiltered_config() -> MonitorConfig {
        MonitorConfig {
            use_averaging: false,
            ..MonitorConfig::default()
        }
    }

    fn take_output<SG, const N: usize>(session: &mut MonitorSession<SG, N>) -> String
    where
        SG: StrainGaugeInterface,
        SG::Error: core::fmt::Debug,
    {
        session
            .bytes_to_send()
            .map(|bytes| String::from_utf8(bytes.to_vec()).unwrap())
            .unwrap_or_default()
    }

    #[test]
    fn announces_ready_on_startup() {
        let mut session = session_with(vec![], unfiltered_config());
        assert_eq!(take_output(&mut session), "S:READY\n");
        assert!(session.bytes_to_send().is_none());
    }

    #[test]
    fn reports_weight_every_tick() {
        let mut session = session_with(vec![Ok(raw_for_grams(300.0))], unfiltered_config());
        take_output(&mut session);

        session.process_tick(500);
        assert_eq!(take_output(&mut session), "W:300.000\n");
        session.process_tick(1000);
        assert_eq!(take_output(&mut session), "W:300.000\n");
    }

    #[test]
    fn drink_event_reports_weight_then_amount() {
        let mut session = session_with(
            vec![Ok(raw_for_grams(300.0)), Ok(raw_for_grams(250.0))],
            unfiltered_config(),
        );
        take_output(&mut session);

        session.process_tick(500);
        take_output(&mut session);
        session.process_tick(1000);
        assert_eq!(take_output(&mut session), "W:250.000\nD:50.000\n");
    }

    #[test]
    fn sensor_failure_skips_the_tick() {
        let mut session = session_with(
            vec![Err(FakeGaugeError), Ok(raw_for_grams(300.0))],
            unfiltered_config(),
        );
        take_output(&mut session);

        // Command arrives before the failing tick; it must survive it
        session.handle_host_bytes(b"C\n");
        session.process_tick(500);
        assert_eq!(take_output(&mut session), "");
        assert_eq!(session.missed_reads(), 1);
        assert_eq!(session.mode(), MonitorMode::Normal);

        session.process_tick(1000);
        let output = take_output(&mut session);
        assert!(output.starts_with("W:300.000\n"));
        assert!(output.contains("S:CAL_START\n"));
        assert_eq!(session.mode(), MonitorMode::Calibrating);
    }

    #[test]
    fn tare_zeroes_at_the_last_raw_reading() {
        let mut session = session_with(vec![Ok(705_000)], unfiltered_config());
        take_output(&mut session);

        session.process_tick(500);
        take_output(&mut session);

        session.handle_host_bytes(b"T\n");
        session.process_tick(1000);
        let output = take_output(&mut session);
        assert!(output.contains("S:TARED\n"));
        assert_eq!(session.calibration().zero_offset(), 705_000.0);
        assert_eq!(session.detector().last_stable_weight(), None);

        // Same raw value now reads as zero grams
        session.process_tick(1500);
        assert_eq!(take_output(&mut session), "W:0.000\n");
    }

    #[test]
    fn command_before_first_tick_tares_at_that_ticks_reading() {
        let mut session = session_with(vec![Ok(705_000)], unfiltered_config());
        take_output(&mut session);

        // Commands drain after the read, so the tare uses this tick's raw
        session.handle_host_bytes(b"T\n");
        session.process_tick(500);
        let output = take_output(&mut session);
        assert!(output.contains("S:TARED\n"));
        assert_eq!(session.calibration().zero_offset(), 705_000.0);

        session.process_tick(1000);
        assert_eq!(take_output(&mut session), "W:0.000\n");
    }

    #[test]
    fn reset_clears_state_but_keeps_calibration() {
        let config = MonitorConfig::default();
        let mut session = session_with(vec![Ok(705_000)], config);
        take_output(&mut session);

        session.process_tick(500);
        session.handle_host_bytes(b"T\n");
        session.process_tick(1000);
        session.process_tick(1500);
        take_output(&mut session);
        assert!(session.filter().len() > 0);

        session.handle_host_bytes(b"R\n");
        session.process_tick(2000);
        let output = take_output(&mut session);
        assert!(output.contains("S:RESET\n"));
        // Tare offset survives a reset
        assert_eq!(session.calibration().zero_offset(), 705_000.0);
        assert_eq!(session.detector().last_stable_weight(), None);
        assert_eq!(session.detector().consecutive_stable_count(), 0);
    }

    #[test]
    fn calibration_mode_reports_raw_readings_only() {
        let raw = raw_for_grams(100.0);
        let mut session = session_with(vec![Ok(raw)], unfiltered_config());
        take_output(&mut session);

        session.handle_host_bytes(b"C\n");
        session.process_tick(500);
        let output = take_output(&mut session);
        assert!(output.starts_with("W:"));
        assert!(output.contains("S:CAL_START\n"));
        assert_eq!(session.mode(), MonitorMode::Calibrating);

        let baseline_before = session.detector().last_stable_weight();
        session.process_tick(1000);
        let output = take_output(&mut session);
        assert_eq!(output, format!("S:RAW={},G=100.000\n", raw));
        // Detector suspended while calibrating
        assert_eq!(session.detector().last_stable_weight(), baseline_before);

        session.handle_host_bytes(b"R\n");
        session.process_tick(1500);
        let output = take_output(&mut session);
        assert!(output.contains("S:CAL_END\n"));
        assert!(output.contains("S:RESET\n"));
        assert_eq!(session.mode(), MonitorMode::Normal);
    }

    #[test]
    fn unknown_command_byte_changes_nothing() {
        let mut session = session_with(vec![Ok(raw_for_grams(300.0))], MonitorConfig::default());
        take_output(&mut session);

        session.process_tick(500);
        take_output(&mut session);
        let offset = session.calibration().zero_offset();
        let factor = session.calibration().scale_factor();
        let baseline = session.detector().last_stable_weight();
        let window_len = session.filter().len();

        session.handle_host_bytes(b"X\n");
        session.process_tick(1000);
        let output = take_output(&mut session);

        assert_eq!(output, "W:300.000\n");
        assert_eq!(session.calibration().zero_offset(), offset);
        assert_eq!(session.calibration().scale_factor(), factor);
        assert_eq!(session.detector().last_stable_weight(), baseline);
        // One more tick, one more window entry; the command itself added none
        assert_eq!(session.filter().len(), window_len + 1);
        assert_eq!(session.mode(), MonitorMode::Normal);
    }

    #[test]
    fn debug_mode_surfaces_rejected_commands() {
        let config = MonitorConfig {
            debug_mode: true,
            use_averaging: false,
            ..MonitorConfig::default()
        };
        let mut session = session_with(vec![Ok(raw_for_grams(300.0))], config);
        take_output(&mut session);

        session.handle_host_bytes(b"X\n");
        session.process_tick(500);
        let output = take_output(&mut session);
        assert!(output.contains("S:ERR CMD X\n"));
    }

    #[test]
    fn commands_split_across_deliveries_are_reassembled() {
        let mut session = session_with(vec![Ok(raw_for_grams(300.0))], unfiltered_config());
        take_output(&mut session);

        session.process_tick(500);
        take_output(&mut session);
        session.handle_host_bytes(b"T");
        session.process_tick(1000);
        let output = take_output(&mut session);
        assert!(!output.contains("S:TARED\n"));

        session.handle_host_bytes(b"\n");
        session.process_tick(1500);
        let output = take_output(&mut session);
        assert!(output.contains("S:TARED\n"));
    }

    #[test]
    fn trailing_bytes_after_command_are_ignored() {
        let mut session = session_with(vec![Ok(raw_for_grams(300.0))], unfiltered_config());
        take_output(&mut session);

        session.process_tick(500);
        take_output(&mut session);
        session.handle_host_bytes(b"C:0\n");
        session.process_tick(1000);
        assert_eq!(session.mode(), MonitorMode::Calibrating);
    }

    #[test]
    fn smoothing_dampens_a_step_between_ticks() {
        let config = MonitorConfig::default();
        let mut session = session_with(
            vec![Ok(raw_for_grams(300.0)), Ok(raw_for_grams(200.0))],
            config,
        );
        take_output(&mut session);

        session.process_tick(500);
        take_output(&mut session);
        session.process_tick(1000);
        // Window holds [300, 200], so both the report and the drink delta
        // come off the smoothed trace, not the raw step
        assert_eq!(take_output(&mut session), "W:250.000\nD:50.000\n");
    }
}
