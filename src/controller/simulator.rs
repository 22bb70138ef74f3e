//! Simulated motion firmware
//!
//! Speaks enough Grbl or Marlin to drive a dry run: it prints the banner on
//! open, acknowledges commands, and moves each axis toward its target by a
//! fixed amount every time the position is queried.

use crate::controller::dialect::{Dialect, ACK};
use crate::controller::transport::SerialTransport;
use crate::core::axis::{format_position, Axis};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RESET_BYTE: u8 = 0x18;

/// Commands the simulator received, shared with whoever created it
pub type CommandLog = Arc<Mutex<Vec<String>>>;

/// In-process stand-in for a serial-attached controller
pub struct SimulatedFirmware {
    dialect: Dialect,
    axes: Vec<Axis>,
    position: BTreeMap<Axis, f64>,
    target: BTreeMap<Axis, f64>,
    /// Distance each axis travels per position query
    speed: f64,
    relative: bool,
    open: bool,
    inbound: Vec<u8>,
    outbound: VecDeque<String>,
    commands: CommandLog,
}

impl SimulatedFirmware {
    pub fn new(dialect: Dialect, axes: &[Axis]) -> Self {
        let origin: BTreeMap<Axis, f64> = axes.iter().map(|a| (*a, 0.0)).collect();
        Self {
            dialect,
            axes: axes.to_vec(),
            position: origin.clone(),
            target: origin,
            speed: 1.0,
            relative: false,
            open: false,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Units travelled per position query; zero never moves
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    /// Handle to every command line received so far
    pub fn command_log(&self) -> CommandLog {
        Arc::clone(&self.commands)
    }

    fn push_banner(&mut self) {
        match self.dialect {
            Dialect::Grbl => {
                self.outbound.push_back(String::new());
                self.outbound.push_back("Grbl 1.1h ['$' for help]".to_string());
            }
            Dialect::Marlin => {
                self.outbound.push_back("start".to_string());
                self.outbound.push_back("Marlin 2.1.2".to_string());
            }
        }
    }

    fn record(&self, command: &str) {
        if let Ok(mut log) = self.commands.lock() {
            log.push(command.to_string());
        }
    }

    fn advance(&mut self) {
        for axis in &self.axes {
            let current = self.position.get(axis).copied().unwrap_or(0.0);
            let target = self.target.get(axis).copied().unwrap_or(current);
            let remaining = target - current;
            let next = if remaining.abs() <= self.speed {
                target
            } else {
                current + self.speed * remaining.signum()
            };
            self.position.insert(*axis, next);
        }
    }

    fn is_idle(&self) -> bool {
        self.position == self.target
    }

    /// Queue a position report, then take one step toward the target
    fn report(&mut self) {
        let values: Vec<String> = self
            .axes
            .iter()
            .map(|axis| format_position(self.position.get(axis).copied().unwrap_or(0.0)))
            .collect();

        match self.dialect {
            Dialect::Grbl => {
                let state = if self.is_idle() { "Idle" } else { "Run" };
                self.outbound
                    .push_back(format!("<{}|MPos:{}|FS:0,0>", state, values.join(",")));
            }
            Dialect::Marlin => {
                let labelled: Vec<String> = self
                    .axes
                    .iter()
                    .zip(values.iter())
                    .map(|(axis, value)| format!("{}:{}", axis.letter(), value))
                    .collect();
                self.outbound.push_back("echo:busy: processing".to_string());
                self.outbound.push_back("echo:M114".to_string());
                self.outbound
                    .push_back(format!("{} E:0.00 Count X:0 Y:0 Z:0", labelled.join(" ")));
            }
        }
        self.advance();
    }

    /// Apply the axis words of a motion command
    fn apply_motion(&mut self, words: &str, relative: bool) {
        let mut chars = words.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            let Some(axis) = Axis::from_symbol(c).filter(|_| c.is_ascii_uppercase()) else {
                continue;
            };
            let mut end = start + c.len_utf8();
            while let Some((idx, d)) = chars.peek().copied() {
                if d.is_ascii_digit() || d == '.' || d == '-' {
                    end = idx + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let Ok(value) = words[start + c.len_utf8()..end].parse::<f64>() else {
                continue;
            };
            if !self.axes.contains(&axis) {
                continue;
            }
            let base = if relative {
                self.target.get(&axis).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            self.target.insert(axis, base + value);
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        self.record(line);

        if line.is_empty() {
            self.outbound.push_back(ACK.to_string());
            return;
        }

        if line == "M114" {
            self.report();
            return;
        }

        if let Some(jog) = line.strip_prefix("$J=") {
            let words = jog.trim_start_matches("G91");
            let words = words.split('F').next().unwrap_or(words);
            self.apply_motion(words, true);
        } else if line.starts_with("G91") {
            self.relative = true;
        } else if line.starts_with("G90") {
            self.relative = false;
        } else if line.starts_with("G0") {
            let absolute = line.contains("G90");
            let words = line.split(" F").next().unwrap_or(line);
            let words = words.trim_start_matches("G0").replace("G90", "").replace("G53", "");
            self.apply_motion(&words, self.relative && !absolute);
        }

        self.outbound.push_back(ACK.to_string());
    }

    fn soft_reset(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
        self.relative = false;
        self.target = self.position.clone();
        self.push_banner();
    }
}

#[async_trait]
impl SerialTransport for SimulatedFirmware {
    async fn open(&mut self, _port: &str, _baud_rate: u32, _read_timeout: Duration) -> io::Result<()> {
        self.open = true;
        self.inbound.clear();
        self.outbound.clear();
        self.push_banner();
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulator is not open"));
        }

        for byte in bytes {
            match *byte {
                RESET_BYTE => {
                    self.record("\u{18}");
                    self.soft_reset();
                }
                b'?' if self.dialect == Dialect::Grbl => {
                    self.record("?");
                    self.report();
                }
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.inbound).into_owned();
                    self.inbound.clear();
                    self.handle_line(&line);
                }
                other => self.inbound.push(other),
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulator is not open"));
        }
        Ok(self
            .outbound
            .pop_front()
            .map(|line| format!("{}\r\n", line).into_bytes()))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
