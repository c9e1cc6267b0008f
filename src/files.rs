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

//! Output file handling and the file error codes echoed to the sender

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// MSX-DOS 2 error codes, echoed to the sender in the ack block
pub const ERR_WRITE_PROTECTED: u8 = 0xF8;
pub const ERR_UNEXPECTED: u8 = 0xDF;
pub const ERR_INVALID_FILENAME: u8 = 0xDA;
pub const ERR_INVALID_PATH: u8 = 0xD9;
pub const ERR_DIRECTORY_NOT_FOUND: u8 = 0xD6;
pub const ERR_DISK_FULL: u8 = 0xD4;
pub const ERR_READ_ONLY: u8 = 0xD1;
pub const ERR_DIRECTORY_EXISTS: u8 = 0xCC;
pub const ERR_FILE_EXISTS: u8 = 0xCB;

#[derive(Debug, Error)]
#[error("{source} (error code 0x{code:02X})")]
pub struct FileError {
    pub code: u8,
    #[source]
    pub source: std::io::Error,
}

impl From<std::io::Error> for FileError {
    fn from(source: std::io::Error) -> Self {
        FileError { code: file_error_code(&source), source }
    }
}

pub fn file_error_code(err: &std::io::Error) -> u8 {
    match err.kind() {
        ErrorKind::NotFound => ERR_DIRECTORY_NOT_FOUND,
        ErrorKind::NotADirectory => ERR_INVALID_PATH,
        ErrorKind::PermissionDenied => ERR_READ_ONLY,
        ErrorKind::ReadOnlyFilesystem => ERR_WRITE_PROTECTED,
        ErrorKind::AlreadyExists => ERR_FILE_EXISTS,
        ErrorKind::IsADirectory => ERR_DIRECTORY_EXISTS,
        ErrorKind::StorageFull | ErrorKind::WriteZero => ERR_DISK_FULL,
        ErrorKind::InvalidInput => ERR_INVALID_FILENAME,
        _ => ERR_UNEXPECTED,
    }
}

// ============================================================================
// Target resolution
// ============================================================================

/// Where the received file goes
#[derive(Debug, Clone)]
pub enum Destination {
    /// Operator-given path; an existing directory gets the sender's name inside it
    Path(PathBuf),
    /// Sender's name inside this directory
    Directory(PathBuf),
}

impl Destination {
    pub fn resolve(&self, header_name: &str) -> Result<PathBuf, FileError> {
        match self {
            Destination::Path(path) if !path.is_dir() => Ok(path.clone()),
            Destination::Path(dir) | Destination::Directory(dir) => {
                Ok(dir.join(validate_name(header_name)?))
            }
        }
    }
}

fn validate_name(name: &str) -> Result<&str, FileError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', ':']) {
        return Err(FileError {
            code: ERR_INVALID_FILENAME,
            source: std::io::Error::new(ErrorKind::InvalidInput, format!("invalid file name {:?}", name)),
        });
    }
    Ok(name)
}

// ============================================================================
// Storage Trait
// ============================================================================

/// File creation as seen by the receiver. Dropping the handle closes it.
pub trait Storage: Send {
    fn create(&mut self, path: &Path) -> Result<Box<dyn Write + Send>, FileError>;
}

pub struct DiskStorage;

impl Storage for DiskStorage {
    fn create(&mut self, path: &Path) -> Result<Box<dyn Write + Send>, FileError> {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        Ok(Box::new(file))
    }
}

// ============================================================================
// Memory Storage for Testing
// ============================================================================

#[cfg(test)]
pub use memory::MemoryStorage;
