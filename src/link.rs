// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Physical link strategies: which port, which speed class, and how bytes
//! are moved through the host serial device.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use crate::protocol::{EXIT_DATA_TIMEOUT, EXIT_FLOW_CONTROL_TIMEOUT, EXIT_FRAMING_ERROR, EXIT_UNEXPECTED_LINK_ERROR};
use crate::serial::SerialPort;

// ============================================================================
// Result codes
// ============================================================================

/// Failure reported by a transmit or receive primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkFault {
    #[error("RTS line timeout")]
    FlowControlTimeout,
    #[error("Data reception timeout")]
    DataTimeout,
    #[error("Stop bit error")]
    Framing,
    #[error("Unexpected error: {0}")]
    Other(u8),
}

impl LinkFault {
    /// Process exit code for a fault hit while receiving.
    pub fn exit_code(self) -> u8 {
        match self {
            LinkFault::FlowControlTimeout => EXIT_FLOW_CONTROL_TIMEOUT,
            LinkFault::DataTimeout => EXIT_DATA_TIMEOUT,
            LinkFault::Framing => EXIT_FRAMING_ERROR,
            LinkFault::Other(_) => EXIT_UNEXPECTED_LINK_ERROR,
        }
    }

    fn from_io(err: &std::io::Error, first_byte: bool) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock if first_byte => {
                LinkFault::FlowControlTimeout
            }
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => LinkFault::DataTimeout,
            std::io::ErrorKind::InvalidData => LinkFault::Framing,
            _ => LinkFault::Other(err.raw_os_error().map_or(0xFF, |code| code as u8)),
        }
    }
}

// ============================================================================
// Session configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoystickPort {
    One,
    Two,
}

impl JoystickPort {
    pub fn parse(arg: &str) -> Result<Self, String> {
        match arg {
            "1" => Ok(JoystickPort::One),
            "2" => Ok(JoystickPort::Two),
            _ => Err(format!("Invalid port: {}. Must be 1 or 2", arg)),
        }
    }

    pub fn number(self) -> u8 {
        match self {
            JoystickPort::One => 1,
            JoystickPort::Two => 2,
        }
    }
}

/// Baud rates of the software-timed UART
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowBaud {
    B2400,
    B4800,
    B9600,
    B19200,
}

impl SlowBaud {
    pub fn bps(self) -> u32 {
        match self {
            SlowBaud::B2400 => 2400,
            SlowBaud::B4800 => 4800,
            SlowBaud::B9600 => 9600,
            SlowBaud::B19200 => 19200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Slow(SlowBaud),
    HighSpeed,
}

impl Speed {
    /// Speed index as typed by the operator: 0-3 slow, 4 high speed.
    pub fn parse(arg: &str) -> Result<Self, String> {
        match arg {
            "0" => Ok(Speed::Slow(SlowBaud::B2400)),
            "1" => Ok(Speed::Slow(SlowBaud::B4800)),
            "2" => Ok(Speed::Slow(SlowBaud::B9600)),
            "3" => Ok(Speed::Slow(SlowBaud::B19200)),
            "4" => Ok(Speed::HighSpeed),
            _ => Err(format!(
                "Invalid speed: {}. Must be 0 (2400), 1 (4800), 2 (9600), 3 (19200) or 4 (57600)",
                arg
            )),
        }
    }

    pub fn bps(self) -> u32 {
        match self {
            Speed::Slow(baud) => baud.bps(),
            Speed::HighSpeed => HIGH_SPEED_BPS,
        }
    }
}

pub const HIGH_SPEED_BPS: u32 = 57600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// Wait for the peer to start a block
    pub flow_control: Duration,
    /// Wait for the rest of a block once it started
    pub data: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        LinkTimeouts {
            flow_control: Duration::from_secs(30),
            data: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// PhysicalLayer Trait
// ============================================================================

/// One transport strategy, chosen once per session.
///
/// `receive` fills the whole buffer or fails; `send` transmits the whole
/// buffer or fails. Timeouts are the strategy's business.
pub trait PhysicalLayer: Send {
    fn send(&mut self, data: &[u8]) -> Result<(), LinkFault>;

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), LinkFault>;

    /// Bit timing depends on the host running at its baseline CPU speed
    fn timing_sensitive(&self) -> bool {
        true
    }
}

/// Open the device behind `port` and wrap it in the strategy for `speed`.
pub fn open_layer(
    open: impl FnOnce(u32) -> Result<Box<dyn SerialPort>, serialport::Error>,
    speed: Speed,
    timeouts: LinkTimeouts,
    byte_delay: Duration,
) -> Result<Box<dyn PhysicalLayer>, serialport::Error> {
    let serial = open(speed.bps())?;
    debug!(bps = speed.bps(), ?speed, "link opened");

    Ok(match speed {
        Speed::Slow(baud) => Box::new(SoftUart::new(serial, baud, timeouts, byte_delay)),
        Speed::HighSpeed => Box::new(HighSpeedLink::new(serial, timeouts)),
    })
}

// ============================================================================
// Software-timed UART
// ============================================================================

pub struct SoftUart {
    serial: Box<dyn SerialPort>,
    baud: SlowBaud,
    timeouts: LinkTimeouts,
    byte_delay: Duration,
}

impl SoftUart {
    pub fn new(serial: Box<dyn SerialPort>, baud: SlowBaud, timeouts: LinkTimeouts, byte_delay: Duration) -> Self {
        SoftUart { serial, baud, timeouts, byte_delay }
    }

    /// Data timeout stretched by sixteen character times at this baud rate.
    fn byte_timeout(&self) -> Duration {
        let char_time = Duration::from_micros(10_000_000 / self.baud.bps() as u64);
        self.timeouts.data + char_time * 16
    }
}

impl PhysicalLayer for SoftUart {
    fn send(&mut self, data: &[u8]) -> Result<(), LinkFault> {
        if self.byte_delay.is_zero() {
            return self.serial.write_all(data).map_err(|e| LinkFault::from_io(&e, false));
        }

        for byte in data {
            self.serial.write_all(std::slice::from_ref(byte)).map_err(|e| LinkFault::from_io(&e, false))?;
            std::thread::sleep(self.byte_delay);
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), LinkFault> {
        let byte_timeout = self.byte_timeout();

        for idx in 0..buf.len() {
            let timeout = if idx == 0 { self.timeouts.flow_control } else { byte_timeout };
            match self.serial.read_timeout(&mut buf[idx..idx + 1], timeout) {
                Ok(1) => {}
                Ok(_) if idx == 0 => return Err(LinkFault::FlowControlTimeout),
                Ok(_) => return Err(LinkFault::DataTimeout),
                Err(e) => return Err(LinkFault::from_io(&e, idx == 0)),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Fixed high-speed mode
// ============================================================================

pub struct HighSpeedLink {
    serial: Box<dyn SerialPort>,
    timeouts: LinkTimeouts,
}

impl HighSpeedLink {
    pub fn new(serial: Box<dyn SerialPort>, timeouts: LinkTimeouts) -> Self {
        HighSpeedLink { serial, timeouts }
    }
}

impl PhysicalLayer for HighSpeedLink {
    fn send(&mut self, data: &[u8]) -> Result<(), LinkFault> {
        self.serial.write_all(data).map_err(|e| LinkFault::from_io(&e, false))
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), LinkFault> {
        let mut filled = 0;
        while filled < buf.len() {
            let first = filled == 0;
            let timeout = if first { self.timeouts.flow_control } else { self.timeouts.data };
            match self.serial.read_timeout(&mut buf[filled..], timeout) {
                Ok(0) if first => return Err(LinkFault::FlowControlTimeout),
                Ok(0) => return Err(LinkFault::DataTimeout),
                Ok(n) => filled += n,
                Err(e) => return Err(LinkFault::from_io(&e, first)),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Scripted Layer for Testing
// ============================================================================

#[cfg(test)]
pub use scripted::{ScriptedLayer, LinkLog};
