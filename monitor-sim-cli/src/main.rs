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

//! Runs a monitoring session against the simulated load cell and serves the
//! device protocol over a serial port (or stdio with `--stdio`), so the
//! companion app can be exercised without hardware.

mod sim_load_cell;

use log::LevelFilter;
use sim_load_cell::SimulatedLoadCell;
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use water_monitor::config::{self, MonitorConfig};
use water_monitor::monitor::MonitorSession;
use water_monitor::weight::{Calibration, WeightScale};

const SESSION_BUFFER_SIZE: usize = 512;
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(10);
const IDLE_SLEEP: Duration = Duration::from_millis(5);

trait Transport {
    /// Read whatever is currently available; 0 means nothing buffered.
    fn read_available(&mut self, buffer: &mut [u8]) -> IoResult<usize>;
    fn send(&mut self, bytes: &[u8]) -> IoResult<()>;
}

struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl Transport for SerialTransport {
    fn read_available(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        match self.port.read(buffer) {
            Ok(received) => Ok(received),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> IoResult<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

/// stdin blocks, so a reader thread feeds a channel and the session side
/// only ever takes what has already arrived.
struct StdioTransport {
    incoming: mpsc::Receiver<Vec<u8>>,
}

impl StdioTransport {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut stdin = std::io::stdin();
            let mut chunk = [0u8; 64];
            loop {
                match stdin.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(received) => {
                        if tx.send(chunk[..received].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { incoming: rx }
    }
}

impl Transport for StdioTransport {
    fn read_available(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        let mut total = 0;
        while total < buffer.len() {
            match self.incoming.try_recv() {
                Ok(chunk) => {
                    let take = chunk.len().min(buffer.len() - total);
                    buffer[total..total + take].copy_from_slice(&chunk[..take]);
                    total += take;
                }
                Err(_) => break,
            }
        }
        Ok(total)
    }

    fn send(&mut self, bytes: &[u8]) -> IoResult<()> {
        let mut stdout = std::io::stdout();
        stdout.write_all(bytes)?;
        stdout.flush()
    }
}

fn main() -> IoResult<()> {
    let log_level = parse_log_level();

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Water Monitor device simulator");

    let mut monitor_config = MonitorConfig::default();
    if has_flag("--debug") {
        monitor_config.debug_mode = true;
    }

    if has_flag("--stdio") {
        log::info!("Serving protocol on stdio");
        let mut transport = StdioTransport::new();
        return run_session(&mut transport, monitor_config);
    }

    log::info!("Available serial ports:");
    let ports = serialport::available_ports()
        .map_err(|e| IoError::new(ErrorKind::Other, e.to_string()))?;

    if ports.is_empty() {
        log::error!("No serial ports found, try --stdio");
        return Ok(());
    }

    for port in &ports {
        log::info!("  - {}", port.port_name);
    }

    let port_name = positional_argument().unwrap_or_else(|| ports[0].port_name.clone());

    log::info!("Connecting to: {}", port_name);
    log::info!("Baud rate: {}", config::SERIAL_BAUD_RATE);

    let port = serialport::new(&port_name, config::SERIAL_BAUD_RATE)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()
        .map_err(|e| IoError::new(ErrorKind::ConnectionRefused, e.to_string()))?;

    let mut transport = SerialTransport { port };
    run_session(&mut transport, monitor_config)
}

fn run_session(transport: &mut dyn Transport, monitor_config: MonitorConfig) -> IoResult<()> {
    let calibration = Calibration::new(monitor_config.calibration_factor)
        .map_err(|e| IoError::new(ErrorKind::InvalidInput, format!("{:?}", e)))?;
    let scale = WeightScale::new(SimulatedLoadCell::new(), calibration)
        .map_err(|e| IoError::new(ErrorKind::Other, format!("{:?}", e)))?;
    let mut session = MonitorSession::<_, SESSION_BUFFER_SIZE>::new(scale, monitor_config);

    let interval = Duration::from_millis(monitor_config.read_interval_ms);
    let started = Instant::now();
    let mut next_tick = started;
    let mut read_buffer = [0u8; 256];

    log::info!("Reporting every {} ms", monitor_config.read_interval_ms);

    loop {
        let received = transport.read_available(&mut read_buffer)?;
        if received > 0 {
            session.handle_host_bytes(&read_buffer[..received]);
        }

        if Instant::now() >= next_tick {
            session.process_tick(started.elapsed().as_millis() as u64);
            next_tick += interval;
        }

        if let Some(bytes) = session.bytes_to_send() {
            transport.send(bytes)?;
        }

        std::thread::sleep(IDLE_SLEEP);
    }
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

/// First argument that is not a flag or a flag's value, treated as the
/// serial port name.
fn positional_argument() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-level" => {
                let _ = args.next();
            }
            "--stdio" | "--debug" => {}
            _ => return Some(arg),
        }
    }
    None
}

/// Parse log level from command-line arguments
/// Supports: --log-level <LEVEL> or RUST_LOG environment variable
/// Defaults to INFO if neither is provided
fn parse_log_level() -> LevelFilter {
    let args: Vec<String> = std::env::args().collect();

    for i in 0..args.len() {
        if args[i] == "--log-level" && i + 1 < args.len() {
            return match args[i + 1].to_uppercase().as_str() {
                "OFF" => LevelFilter::Off,
                "ERROR" => LevelFilter::Error,
                "WARN" => LevelFilter::Warn,
                "INFO" => LevelFilter::Info,
                "DEBUG" => LevelFilter::Debug,
                "TRACE" => LevelFilter::Trace,
                _ => {
                    eprintln!("Unknown log level: {}. Using INFO", args[i + 1]);
                    LevelFilter::Info
                }
            };
        }
    }

    LevelFilter::Info
}
