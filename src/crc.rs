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

//! CRC-16 checksums used for the header and for every data chunk

use serde::Deserialize;

/// XMODEM CRC-16: polynomial 0x1021, start value 0, no reflection, no final XOR.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Reflected CCITT CRC-16 (polynomial 0x8408, start value 0xFFFF), complemented
/// and then byte-swapped, as computed by the .NET sender.
pub fn crc16_reflected(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        let mut bits = byte;
        for _ in 0..8 {
            if (crc ^ bits as u16) & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
            bits >>= 1;
        }
    }
    (!crc).swap_bytes()
}

/// Which CRC-16 both ends of a session agree on. Chosen once, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrcVariant {
    #[default]
    Xmodem,
    ReflectedCcitt,
}

impl CrcVariant {
    pub fn checksum(self, data: &[u8]) -> u16 {
        match self {
            CrcVariant::Xmodem => crc16(data),
            CrcVariant::ReflectedCcitt => crc16_reflected(data),
        }
    }
}
