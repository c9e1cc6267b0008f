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

use std::io::{Read, Write};
use std::time::Duration;
use serialport::{DataBits, FlowControl, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte-level access to the host serial device wired to the joystick port
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Host serial device, always 8N1 with no handshake; the joystick port
/// adapter drives RTS/CTS itself.
pub struct RealSerialPort {
    port: Box<dyn serialport::SerialPort>,
}

impl RealSerialPort {
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(device, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }

    /// Whether the host knows a serial device by this name.
    pub fn is_present(device: &str) -> bool {
        if std::path::Path::new(device).exists() {
            return true;
        }
        serialport::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == device))
            .unwrap_or(false)
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout).map_err(std::io::Error::other)?;
        self.port.read(buf)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub enum MockRead {
    Byte(u8),
    Timeout,
    Fail(std::io::ErrorKind),
}

#[cfg(test)]
pub struct MockSerialPort {
    reads: Vec<MockRead>,
    read_pos: usize,
    // Timeout requested by every read call, in order
    pub timeouts: std::sync::Arc<std::sync::Mutex<Vec<Duration>>>,
    write_log: Vec<u8>,
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(reads: Vec<MockRead>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            reads,
            read_pos: 0,
            timeouts: Default::default(),
            write_log: Vec::new(),
            expected_writes,
        }
    }

    pub fn bytes(data: &[u8], expected_writes: Vec<u8>) -> Self {
        Self::new(data.iter().map(|&b| MockRead::Byte(b)).collect(), expected_writes)
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.timeouts.lock().unwrap().push(timeout);

        match self.reads.get(self.read_pos).copied() {
            // Out of responses = timeout
            None => {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock timeout"));
            }
            Some(MockRead::Timeout) => {
                self.read_pos += 1;
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock timeout"));
            }
            Some(MockRead::Fail(kind)) => {
                self.read_pos += 1;
                return Err(std::io::Error::new(kind, "Mock failure"));
            }
            Some(MockRead::Byte(_)) => {}
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() {
            match self.reads.get(self.read_pos) {
                Some(MockRead::Byte(byte)) => {
                    buf[bytes_read] = *byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                _ => break,
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.reads.len(),
            "MockSerialPort dropped with {} unconsumed responses",
            self.reads.len() - self.read_pos,
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
