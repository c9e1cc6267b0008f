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

//! Session state and the single termination path

use std::fmt;
use std::io::Write;
use tracing::{debug, warn};
use crate::crc::CrcVariant;
use crate::files::{Destination, FileError, Storage};
use crate::link::LinkFault;
use crate::protocol::{ack_block, DEFAULT_ACK_REDUNDANCY};
use crate::receiver::ReceiverError;
use crate::timing::TimedLink;

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub crc: CrcVariant,
    pub ack_redundancy: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions { crc: CrcVariant::Xmodem, ack_redundancy: DEFAULT_ACK_REDUNDANCY }
    }
}

/// Everything one run of the receiver owns.
///
/// The output file is stored here the moment it is created, so that
/// `terminate` closes it whatever state the transfer failed in.
pub struct TransferSession {
    pub link: TimedLink,
    pub storage: Box<dyn Storage>,
    pub destination: Destination,
    pub file: Option<Box<dyn Write + Send>>,
    pub remaining: u32,
    pub chunk_size: usize,
    pub options: SessionOptions,
    console: Box<dyn Write + Send>,
}

impl TransferSession {
    pub fn new(
        link: TimedLink,
        storage: Box<dyn Storage>,
        destination: Destination,
        options: SessionOptions,
        console: Box<dyn Write + Send>,
    ) -> Self {
        TransferSession {
            link,
            storage,
            destination,
            file: None,
            remaining: 0,
            chunk_size: 0,
            options,
            console,
        }
    }

    pub fn crc(&self) -> CrcVariant {
        self.options.crc
    }

    pub fn send_ack(&mut self, code: u8) -> Result<(), LinkFault> {
        debug!(code, "sending ack");
        let block = ack_block(code, self.options.ack_redundancy);
        self.link.send(&block)
    }

    /// Report a file failure to the sender before giving up. The file error
    /// wins over a failure to deliver that report.
    pub fn file_failure(&mut self, err: FileError) -> ReceiverError {
        if let Err(fault) = self.send_ack(err.code) {
            warn!(%fault, "could not report file error to sender");
        }
        ReceiverError::File(err)
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data),
            None => Err(std::io::Error::other("output file is not open")),
        }
    }

    /// Console output for the operator. A broken console never stops a transfer.
    pub fn say(&mut self, args: fmt::Arguments<'_>) {
        if self.console.write_fmt(args).and_then(|_| self.console.flush()).is_err() {
            debug!("console write failed");
        }
    }

    /// The only way a session ends. Restores the CPU mode and closes the file
    /// before the diagnostic is printed, then hands back the process exit code.
    pub fn terminate(mut self, outcome: Result<(), ReceiverError>) -> u8 {
        let code = match &outcome {
            Ok(()) => 0,
            Err(e) => e.exit_code(),
        };
        self.link.restore_cpu();

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(error = %e, "flushing output file failed");
            }
            drop(file);
            debug!("output file closed");
        }

        if let Err(e) = &outcome {
            if !matches!(e, ReceiverError::TransferComplete) {
                self.say(format_args!("\n*** {}", e));
            }
        }

        self.say(format_args!("\n"));
        code
    }
}

// ============================================================================
// Shared Console for Testing
// ============================================================================

#[cfg(test)]
#[derive(Clone, Default)]
pub struct SharedConsole(pub std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedConsole {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedConsole {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
