#![no_std]
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

//! Wire format shared by the device firmware and host-side tooling. Reports
//! travel from device to host as newline-terminated ASCII lines (`W:`, `D:`,
//! `S:`), commands from host to device as a single significant leading byte.
//! The prefixes are fixed; the companion app matches on them literally.

use core::fmt::Write;
use core::str;

pub const WEIGHT_PREFIX: &str = "W:";
pub const DRINK_PREFIX: &str = "D:";
pub const STATUS_PREFIX: &str = "S:";

pub const TARE_BYTE: u8 = b'T';
pub const RESET_BYTE: u8 = b'R';
pub const CALIBRATE_BYTE: u8 = b'C';

/// Grams are reported with three decimal places.
const GRAMS_DECIMALS: usize = 3;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum DeviceReport<'a> {
    /// Current (smoothed) weight in grams.
    Weight(f32),
    /// Grams removed in a detected drink event.
    Drink(f32),
    /// Free-form status or diagnostic text.
    Status(&'a str),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HostCommand {
    Tare,
    Reset,
    Calibrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    /// The buffer cannot hold the encoded line, value is the required length
    BufferTooSmall(usize),
    /// The line is not valid UTF-8 or its payload failed to parse
    MalformedReport,
    /// The leading byte matches no known command, value is that byte
    MalformedCommand(u8),
    /// Nothing left on the line after trimming the terminator
    EmptyLine,
}

/// Encode a report as a newline-terminated line.
///
/// Returns the number of bytes written on success.
///
/// # Errors
///
/// - `BufferTooSmall`: if the buffer is not large enough to hold the prefix,
///   the payload and the trailing newline
pub fn encode_report(report: &DeviceReport, buffer: &mut [u8]) -> Result<usize, LineError> {
    let needed = encoded_len(report);
    if buffer.len() < needed {
        return Err(LineError::BufferTooSmall(needed));
    }

    let mut writer = SliceWriter::new(buffer);
    write_report(&mut writer, report).map_err(|_| LineError::BufferTooSmall(needed))?;
    Ok(writer.written)
}

/// Number of bytes `encode_report` will produce for this report.
pub fn encoded_len(report: &DeviceReport) -> usize {
    let mut counter = CountingWriter::default();
    // Counting cannot fail
    let _ = write_report(&mut counter, report);
    counter.count
}

/// Decode a device-to-host line. The terminator (`\n` or `\r\n`) is optional.
pub fn decode_report(line: &[u8]) -> Result<DeviceReport<'_>, LineError> {
    let line = trim_line(line);
    if line.is_empty() {
        return Err(LineError::EmptyLine);
    }
    let text = str::from_utf8(line).map_err(|_| LineError::MalformedReport)?;

    if let Some(payload) = text.strip_prefix(WEIGHT_PREFIX) {
        return parse_grams(payload).map(DeviceReport::Weight);
    }
    if let Some(payload) = text.strip_prefix(DRINK_PREFIX) {
        return parse_grams(payload).map(DeviceReport::Drink);
    }
    if let Some(payload) = text.strip_prefix(STATUS_PREFIX) {
        return Ok(DeviceReport::Status(payload));
    }
    Err(LineError::MalformedReport)
}

/// Decode a host-to-device command line.
///
/// Only the leading byte is significant; anything after it on the same line
/// is ignored. Case-sensitive.
///
/// # Errors
///
/// - `EmptyLine`: the line holds nothing but its terminator
/// - `MalformedCommand`: the leading byte is not `T`, `R` or `C`
pub fn decode_command(line: &[u8]) -> Result<HostCommand, LineError> {
    let line = trim_line(line);
    match line.first() {
        None => Err(LineError::EmptyLine),
        Some(&TARE_BYTE) => Ok(HostCommand::Tare),
        Some(&RESET_BYTE) => Ok(HostCommand::Reset),
        Some(&CALIBRATE_BYTE) => Ok(HostCommand::Calibrate),
        Some(&other) => Err(LineError::MalformedCommand(other)),
    }
}

fn write_report<W: Write>(writer: &mut W, report: &DeviceReport) -> core::fmt::Result {
    match report {
        DeviceReport::Weight(grams) => {
            writeln!(writer, "{}{:.prec$}", WEIGHT_PREFIX, grams, prec = GRAMS_DECIMALS)
        }
        DeviceReport::Drink(grams) => {
            writeln!(writer, "{}{:.prec$}", DRINK_PREFIX, grams, prec = GRAMS_DECIMALS)
        }
        DeviceReport::Status(text) => writeln!(writer, "{}{}", STATUS_PREFIX, text),
    }
}

fn parse_grams(payload: &str) -> Result<f32, LineError> {
    payload
        .trim()
        .parse::<f32>()
        .map_err(|_| LineError::MalformedReport)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut line = line;
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

struct SliceWriter<'a> {
    buffer: &'a mut [u8],
    written: usize,
}

impl<'a> SliceWriter<'a> {
    fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, written: 0 }
    }
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let end = self.written + bytes.len();
        if end > self.buffer.len() {
            return Err(core::fmt::Error);
        }
        self.buffer[self.written..end].copy_from_slice(bytes);
        self.written = end;
        Ok(())
    }
}

#[derive(Default)]
struct CountingWriter {
    count: usize,
}

impl Write for CountingWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.count += s.len();
        Ok(())
    }
}
