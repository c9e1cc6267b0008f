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
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use crate::link::LinkFault;
use crate::protocol::*;
use crate::session::SessionOptions;
use crate::timing::TimedLink;

/// Resends of one chunk before the sender gives up
pub const MAX_CRC_RETRIES: u32 = 5;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Link(#[from] LinkFault),
    #[error("Invalid file name: {0}")]
    InvalidName(String),
    #[error("File is too large: {0} bytes")]
    TooLarge(u64),
    #[error("Garbled acknowledgment: {0:02X?}")]
    GarbledAck(Vec<u8>),
    #[error("Too many CRC errors")]
    TooManyRetries,
    #[error("Peer closed connection with code {0}")]
    PeerAbort(u8),
    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// Session
// ============================================================================

pub struct SendSession {
    pub link: TimedLink,
    source: Box<dyn Read + Send>,
    name: String,
    remaining: u32,
    options: SessionOptions,
    console: Box<dyn Write + Send>,
}

impl SendSession {
    pub fn new(
        link: TimedLink,
        source: Box<dyn Read + Send>,
        name: String,
        size: u64,
        options: SessionOptions,
        console: Box<dyn Write + Send>,
    ) -> Result<Self, SenderError> {
        let remaining = u32::try_from(size).map_err(|_| SenderError::TooLarge(size))?;
        Ok(SendSession { link, source, name, remaining, options, console })
    }

    fn say(&mut self, args: std::fmt::Arguments<'_>) {
        if self.console.write_fmt(args).and_then(|_| self.console.flush()).is_err() {
            debug!("console write failed");
        }
    }

    /// Read one ack block and settle on the value most of its bytes agree on.
    fn read_ack(&mut self) -> Result<u8, SenderError> {
        let mut block = vec![0u8; self.options.ack_redundancy];
        self.link.receive(&mut block)?;
        decode_ack(&block).ok_or(SenderError::GarbledAck(block))
    }

    /// Restore the CPU mode and report; returns the process exit code.
    pub fn finish(mut self, outcome: Result<(), SenderError>) -> u8 {
        self.link.restore_cpu();
        match outcome {
            Ok(()) | Err(SenderError::TransferComplete) => {
                self.say(format_args!("\n"));
                0
            }
            Err(e) => {
                self.say(format_args!("\n*** {}\n", e));
                1
            }
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct TransmitHeader;
pub struct ReadChunk;
pub struct TransmitChunk;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    frame: Vec<u8>,
    retries: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState {
    fn step(self: Box<Self>, session: &mut SendSession) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            frame: self.frame,
            retries: self.retries,
        })
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<TransmitHeader> {
    fn step(self: Box<Self>, session: &mut SendSession) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let header = TransferHeader::new(&session.name, session.remaining, session.options.crc);
        session.link.send(&header.to_bytes())?;
        debug!(name = %session.name, size = session.remaining, "sent header");

        match session.read_ack()? {
            ACK_ACCEPTED => {
                let (name, size) = (session.name.clone(), session.remaining);
                session.say(format_args!("Sending file as {}, size is {}K... ", name, size.div_ceil(1024)));
                Ok(fsm.transition::<ReadChunk>() as Box<dyn SenderState>)
            }
            // Same resend rule as for chunks
            ACK_CHUNK_CRC => {
                fsm.retries += 1;
                if fsm.retries > MAX_CRC_RETRIES {
                    return Err(SenderError::TooManyRetries);
                }
                warn!(retries = fsm.retries, "receiver reported CRC error, resending header");
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
            code => Err(SenderError::PeerAbort(code)),
        }
    }
}

impl SenderState for SenderFsm<ReadChunk> {
    fn step(self: Box<Self>, session: &mut SendSession) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        if session.remaining == 0 {
            session.say(format_args!("\nDone!"));
            return Err(SenderError::TransferComplete);
        }

        let size = chunk_size(session.remaining);
        fsm.frame.resize(size, 0);
        read_full(session.source.as_mut(), &mut fsm.frame)?;

        let crc = session.options.crc.checksum(&fsm.frame);
        fsm.frame.extend_from_slice(&crc.to_le_bytes());
        fsm.retries = 0;
        debug!(size, crc, "prepared chunk");

        Ok(fsm.transition::<TransmitChunk>() as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<TransmitChunk> {
    fn step(self: Box<Self>, session: &mut SendSession) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        session.link.send(&fsm.frame)?;

        match session.read_ack()? {
            ACK_ACCEPTED => {
                session.remaining -= (fsm.frame.len() - CHECKSUM_SIZE) as u32;
                session.say(format_args!("."));
                Ok(fsm.transition::<ReadChunk>() as Box<dyn SenderState>)
            }
            ACK_CHUNK_CRC => {
                fsm.retries += 1;
                session.say(format_args!("!"));
                if fsm.retries > MAX_CRC_RETRIES {
                    return Err(SenderError::TooManyRetries);
                }
                warn!(retries = fsm.retries, "receiver reported CRC error, resending chunk");
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
            code => Err(SenderError::PeerAbort(code)),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<TransmitHeader> {
    pub fn new() -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<TransmitHeader>,
            frame: Vec::with_capacity(MAX_CHUNK_SIZE + CHECKSUM_SIZE),
            retries: 0,
        })
    }
}

pub fn send_file(session: &mut SendSession) -> Result<(), SenderError> {
    let mut state = SenderFsm::new();

    loop {
        match state.step(session) {
            Ok(next) => state = next,
            Err(SenderError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Name to announce in the header: upper case, 8.3 at most.
pub fn header_name(path: &Path, name_override: Option<&str>) -> Result<String, SenderError> {
    let name = match name_override {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SenderError::InvalidName(path.display().to_string()))?
            .to_string(),
    }
    .to_uppercase();

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (name.as_str(), ""),
    };

    if stem.is_empty() || stem.len() > 8 {
        return Err(SenderError::InvalidName(format!("{}: name must be 1 to 8 characters", name)));
    }
    if ext.len() > 3 {
        return Err(SenderError::InvalidName(format!("{}: extension is longer than 3 characters", name)));
    }
    if !name.is_ascii() || name.contains(['/', '\\', ':']) {
        return Err(SenderError::InvalidName(name));
    }

    Ok(name)
}

/// Value agreed on by more than half of the block, if any.
pub fn decode_ack(block: &[u8]) -> Option<u8> {
    block
        .iter()
        .copied()
        .find(|&candidate| block.iter().filter(|&&b| b == candidate).count() * 2 > block.len())
}

fn read_full(source: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<()> {
    source.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            std::io::Error::new(e.kind(), "file is shorter than announced")
        } else {
            e
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
