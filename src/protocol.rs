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

//! Wire format and status codes of the joystick port transfer protocol

use crate::crc::CrcVariant;

/// Largest data span carried by one chunk
pub const MAX_CHUNK_SIZE: usize = 1024;

/// Size of the trailing checksum after a header or chunk
pub const CHECKSUM_SIZE: usize = 2;

/// Size of the file name field, including the terminating NUL
pub const FILE_NAME_SIZE: usize = 13;

/// File name, 32-bit file size, 16-bit checksum
pub const HEADER_SIZE: usize = FILE_NAME_SIZE + 4 + CHECKSUM_SIZE;

/// Default number of times each acknowledgment byte is repeated on the wire
pub const DEFAULT_ACK_REDUNDANCY: usize = 4;

// ============================================================================
// Acknowledgment codes
// ============================================================================

/// Header or chunk accepted
pub const ACK_ACCEPTED: u8 = 0;

/// Chunk checksum mismatch, resend the same chunk
pub const ACK_CHUNK_CRC: u8 = 1;

/// Header checksum mismatch, receiver gives up
pub const ACK_HEADER_CRC: u8 = 2;

// File failures are acknowledged with the file error code itself, see files.rs

// ============================================================================
// Exit codes
// ============================================================================

/// Transfer done, or usage/capability message printed
pub const EXIT_OK: u8 = 0;

/// Sender never raised its flow-control (RTS) line
pub const EXIT_FLOW_CONTROL_TIMEOUT: u8 = 1;

/// Sender stopped in the middle of a block
pub const EXIT_DATA_TIMEOUT: u8 = 2;

/// Stop bit error
pub const EXIT_FRAMING_ERROR: u8 = 3;

/// Transport returned a code we don't know
pub const EXIT_UNEXPECTED_LINK_ERROR: u8 = 4;

/// Sender never raised its CTS line while we were acknowledging
pub const EXIT_ACK_TIMEOUT: u8 = 5;

/// Header checksum mismatch
pub const EXIT_HEADER_CRC: u8 = 6;

/// Size of the next chunk to request while `remaining` bytes are still due.
pub fn chunk_size(remaining: u32) -> usize {
    (remaining as usize).min(MAX_CHUNK_SIZE)
}

/// The same status byte repeated across the acknowledgment block.
pub fn ack_block(code: u8, redundancy: usize) -> Vec<u8> {
    vec![code; redundancy]
}

/// Little-endian checksum stored right after a data span.
pub fn trailing_checksum(frame: &[u8], data_len: usize) -> u16 {
    u16::from_le_bytes([frame[data_len], frame[data_len + 1]])
}

// ============================================================================
// Transfer header
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub file_name: [u8; FILE_NAME_SIZE],
    pub file_size: u32,
    pub checksum: u16,
}

impl TransferHeader {
    /// Build a header for sending, with its checksum filled in.
    pub fn new(name: &str, file_size: u32, crc: CrcVariant) -> Self {
        let mut file_name = [0u8; FILE_NAME_SIZE];
        let len = name.len().min(FILE_NAME_SIZE - 1);
        file_name[..len].copy_from_slice(&name.as_bytes()[..len]);

        let mut header = TransferHeader { file_name, file_size, checksum: 0 };
        header.checksum = crc.checksum(&header.to_bytes()[..HEADER_SIZE - CHECKSUM_SIZE]);
        header
    }

    pub fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut file_name = [0u8; FILE_NAME_SIZE];
        file_name.copy_from_slice(&raw[..FILE_NAME_SIZE]);
        let file_size = u32::from_le_bytes([raw[13], raw[14], raw[15], raw[16]]);
        let checksum = trailing_checksum(raw, HEADER_SIZE - CHECKSUM_SIZE);

        TransferHeader { file_name, file_size, checksum }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..FILE_NAME_SIZE].copy_from_slice(&self.file_name);
        raw[FILE_NAME_SIZE..FILE_NAME_SIZE + 4].copy_from_slice(&self.file_size.to_le_bytes());
        raw[HEADER_SIZE - CHECKSUM_SIZE..].copy_from_slice(&self.checksum.to_le_bytes());
        raw
    }

    /// Checksum over the name and size fields, never over the checksum itself.
    pub fn calculated_checksum(&self, crc: CrcVariant) -> u16 {
        crc.checksum(&self.to_bytes()[..HEADER_SIZE - CHECKSUM_SIZE])
    }

    /// Name as sent: up to the first NUL, trailing spaces dropped.
    pub fn name(&self) -> String {
        let end = self.file_name.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_SIZE);
        String::from_utf8_lossy(&self.file_name[..end]).trim_end().to_string()
    }
}
