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

//! Compile-time configuration surface of the original device, plus a
//! [`MonitorConfig`] runtime snapshot initialised from these constants and
//! handed to the monitoring session.

/// Signed scale factor mapping raw load-cell counts to grams.
pub const CALIBRATION_FACTOR: f32 = -7050.0;

/// Weight change (grams) that counts as a drink/refill event.
pub const WEIGHT_THRESHOLD: f32 = 5.0;

/// Consecutive in-threshold readings before a `Stable` trend is emitted.
pub const STABLE_READINGS: u32 = 5;

/// Sampling cadence in milliseconds.
pub const READ_INTERVAL_MS: u64 = 500;

/// Whether the smoothing filter averages samples by default.
pub const USE_AVERAGING: bool = true;

/// Length of the moving-average window.
pub const AVERAGE_SAMPLES: usize = 10;

/// Whether diagnostic/debug notices are emitted by default.
pub const DEBUG_MODE: bool = false;

/// Serial transport baud rate.
pub const SERIAL_BAUD_RATE: u32 = 9600;

/// Runtime snapshot of the configuration surface handed to the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    pub calibration_factor: f32,
    pub weight_threshold: f32,
    pub stable_readings: u32,
    pub read_interval_ms: u64,
    pub use_averaging: bool,
    pub debug_mode: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            calibration_factor: CALIBRATION_FACTOR,
            weight_threshold: WEIGHT_THRESHOLD,
            stable_readings: STABLE_READINGS,
            read_interval_ms: READ_INTERVAL_MS,
            use_averaging: USE_AVERAGING,
            debug_mode: DEBUG_MODE,
        }
    }
}
