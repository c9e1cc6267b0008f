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

use std::marker::PhantomData;
use thiserror::Error;
use tracing::{debug, warn};
use crate::files::FileError;
use crate::link::LinkFault;
use crate::protocol::*;
use crate::session::TransferSession;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error(transparent)]
    Link(#[from] LinkFault),
    #[error("CTS line timeout")]
    AckTimeout(#[source] LinkFault),
    #[error("Header CRC mismatch. Received: 0x{received:04X}. Calculated: 0x{calculated:04X}.")]
    HeaderChecksum { received: u16, calculated: u16 },
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("Transfer complete")]
    TransferComplete,
}

impl ReceiverError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ReceiverError::Link(fault) => fault.exit_code(),
            ReceiverError::AckTimeout(_) => EXIT_ACK_TIMEOUT,
            ReceiverError::HeaderChecksum { .. } => EXIT_HEADER_CRC,
            ReceiverError::File(e) => e.code,
            ReceiverError::TransferComplete => EXIT_OK,
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct ReceiveHeader;
pub struct CreateFile;
pub struct AwaitChunk;
pub struct ValidateChunk;
pub struct WriteChunk;
pub struct RejectChunk;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    file_name: String,
    frame: Vec<u8>,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            file_name: self.file_name,
            frame: self.frame,
        })
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<ReceiveHeader> {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        session.say(format_args!("Connecting... "));

        let mut raw = [0u8; HEADER_SIZE];
        session.link.receive(&mut raw)?;
        let header = TransferHeader::from_bytes(&raw);
        debug!(?raw, "received header");

        let calculated = header.calculated_checksum(session.crc());
        if calculated != header.checksum {
            // Nothing has been created yet, so there is nothing to clean up
            if let Err(fault) = session.send_ack(ACK_HEADER_CRC) {
                warn!(%fault, "could not reject header");
            }
            return Err(ReceiverError::HeaderChecksum { received: header.checksum, calculated });
        }

        fsm.file_name = header.name();
        session.remaining = header.file_size;
        session.say(format_args!(
            "\nFile name: {}\nFile size: {}\n\n",
            fsm.file_name, header.file_size
        ));

        Ok(fsm.transition::<CreateFile>() as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<CreateFile> {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        let path = session
            .destination
            .resolve(&fsm.file_name)
            .map_err(|e| session.file_failure(e))?;
        let file = session.storage.create(&path).map_err(|e| session.file_failure(e))?;
        session.file = Some(file);
        debug!(path = %path.display(), "created output file");

        // The sender starts streaming as soon as it sees this
        session.send_ack(ACK_ACCEPTED).map_err(ReceiverError::AckTimeout)?;

        session.say(format_args!(".=1KByte, !=CRC error\nReceiving: "));

        Ok(fsm.transition::<AwaitChunk>() as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<AwaitChunk> {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        if session.remaining == 0 {
            session.say(format_args!("\nDone!"));
            return Err(ReceiverError::TransferComplete);
        }

        session.chunk_size = chunk_size(session.remaining);
        let frame_len = session.chunk_size + CHECKSUM_SIZE;
        session.link.receive(&mut fsm.frame[..frame_len])?;
        debug!(size = session.chunk_size, remaining = session.remaining, "received chunk");

        Ok(fsm.transition::<ValidateChunk>() as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<ValidateChunk> {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        let size = session.chunk_size;
        let received = trailing_checksum(&fsm.frame, size);
        let calculated = session.crc().checksum(&fsm.frame[..size]);

        if received == calculated {
            Ok(fsm.transition::<WriteChunk>() as Box<dyn ReceiverState>)
        } else {
            debug!(received, calculated, "chunk checksum mismatch");
            Ok(fsm.transition::<RejectChunk>() as Box<dyn ReceiverState>)
        }
    }
}

impl ReceiverState for ReceiverFsm<WriteChunk> {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        let size = session.chunk_size;
        if let Err(e) = session.write_chunk(&fsm.frame[..size]) {
            return Err(session.file_failure(e.into()));
        }

        session.send_ack(ACK_ACCEPTED).map_err(ReceiverError::AckTimeout)?;
        session.say(format_args!("."));

        session.remaining -= size as u32;
        Ok(fsm.transition::<AwaitChunk>() as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<RejectChunk> {
    fn step(self: Box<Self>, session: &mut TransferSession) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        // Same range again: remaining and chunk size stay as they are
        session.say(format_args!("!"));
        session.send_ack(ACK_CHUNK_CRC).map_err(ReceiverError::AckTimeout)?;

        Ok(fsm.transition::<AwaitChunk>() as Box<dyn ReceiverState>)
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<ReceiveHeader> {
    pub fn new() -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<ReceiveHeader>,
            file_name: String::new(),
            frame: vec![0; MAX_CHUNK_SIZE + CHECKSUM_SIZE],
        })
    }
}

/// Run one transfer to completion or to its first fatal error.
pub fn receive_file(session: &mut TransferSession) -> Result<(), ReceiverError> {
    let mut state = ReceiverFsm::new();

    loop {
        match state.step(session) {
            Ok(next) => state = next,
            Err(ReceiverError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use crate::crc::{crc16, CrcVariant};
    use crate::files::{Destination, DiskStorage, MemoryStorage, ERR_DISK_FULL, ERR_INVALID_FILENAME, ERR_READ_ONLY};
    use crate::link::{LinkLog, ScriptedLayer};
    use crate::session::{SessionOptions, SharedConsole};
    use crate::timing::{CpuMode, RecordingCpu, TimedLink};

    struct Harness {
        log: Arc<Mutex<LinkLog>>,
        storage: MemoryStorage,
        cpu: RecordingCpu,
        console: SharedConsole,
    }

    impl Harness {
        fn out(name: &str) -> PathBuf {
            PathBuf::from("out").join(name)
        }

        fn receives(&self) -> Vec<usize> {
            self.log.lock().unwrap().receives.clone()
        }

        /// First byte of every ack block, after checking the block is uniform
        fn acks(&self) -> Vec<u8> {
            self.log
                .lock()
                .unwrap()
                .sends
                .iter()
                .map(|block| {
                    assert_eq!(block.len(), 4);
                    assert!(block.iter().all(|&b| b == block[0]));
                    block[0]
                })
                .collect()
        }
    }

    fn session_with(layer: ScriptedLayer, log: Arc<Mutex<LinkLog>>, storage: MemoryStorage) -> (TransferSession, Harness) {
        let cpu = RecordingCpu::new(CpuMode::Turbo(1));
        let console = SharedConsole::default();
        let session = TransferSession::new(
            TimedLink::new(Box::new(layer), Box::new(cpu.clone())),
            Box::new(storage.clone()),
            Destination::Directory(PathBuf::from("out")),
            SessionOptions::default(),
            Box::new(console.clone()),
        );
        (session, Harness { log, storage, cpu, console })
    }

    fn session(script: Vec<Result<Vec<u8>, LinkFault>>) -> (TransferSession, Harness) {
        let (layer, log) = ScriptedLayer::new(script);
        session_with(layer, log, MemoryStorage::default())
    }

    fn run(mut session: TransferSession) -> u8 {
        let outcome = receive_file(&mut session);
        session.terminate(outcome)
    }

    fn header(name: &str, size: u32) -> Vec<u8> {
        TransferHeader::new(name, size, CrcVariant::Xmodem).to_bytes().to_vec()
    }

    fn frame(data: &[u8]) -> Vec<u8> {
        let mut frame = data.to_vec();
        frame.extend_from_slice(&crc16(data).to_le_bytes());
        frame
    }

    fn corrupted(data: &[u8]) -> Vec<u8> {
        let mut frame = frame(data);
        frame[10] ^= 0x55;
        frame
    }

    fn file_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn clean_script(name: &str, data: &[u8]) -> Vec<Result<Vec<u8>, LinkFault>> {
        let mut script = vec![Ok(header(name, data.len() as u32))];
        script.extend(data.chunks(MAX_CHUNK_SIZE).map(|c| Ok(frame(c))));
        script
    }

    fn assert_cleaned_up(h: &Harness) {
        assert_eq!(h.storage.disk().open_handles, 0, "file left open");
        assert_eq!(h.cpu.mode(), CpuMode::Turbo(1), "CPU mode not restored");
    }

    #[test]
    fn test_clean_transfer() {
        let data = file_data(2500);
        let (session, h) = session(clean_script("TEST.BIN", &data));

        assert_eq!(run(session), 0);

        assert_eq!(h.receives(), vec![19, 1026, 1026, 454]);
        assert_eq!(h.acks(), vec![0, 0, 0, 0]);
        assert_eq!(h.storage.disk().files[&Harness::out("TEST.BIN")], data);
        assert_cleaned_up(&h);

        let text = h.console.text();
        assert!(text.contains("File name: TEST.BIN"));
        assert!(text.contains("File size: 2500"));
        assert!(text.contains("Receiving: ...\nDone!"));
    }

    #[test]
    fn test_zero_length_transfer() {
        let (session, h) = session(vec![Ok(header("EMPTY.TXT", 0))]);

        assert_eq!(run(session), 0);

        assert_eq!(h.receives(), vec![19]);
        assert_eq!(h.acks(), vec![0]);
        assert!(h.storage.disk().files[&Harness::out("EMPTY.TXT")].is_empty());
        assert_cleaned_up(&h);
    }

    #[test]
    fn test_header_corruption() {
        let mut bad = header("TEST.BIN", 2500);
        bad[17] ^= 0x12;
        let (session, h) = session(vec![Ok(bad)]);

        assert_eq!(run(session), EXIT_HEADER_CRC);

        assert_eq!(h.acks(), vec![ACK_HEADER_CRC]);
        assert!(h.storage.disk().files.is_empty(), "file created before header check");
        assert_eq!(h.receives(), vec![19]);
        assert_cleaned_up(&h);
        assert!(h.console.text().contains("*** Header CRC mismatch"));
    }

    #[test]
    fn test_corrupted_chunk_then_recovery() {
        let data = file_data(2500);
        let chunks: Vec<&[u8]> = data.chunks(MAX_CHUNK_SIZE).collect();
        let script = vec![
            Ok(header("TEST.BIN", 2500)),
            Ok(frame(chunks[0])),
            Ok(corrupted(chunks[1])),
            Ok(frame(chunks[1])),
            Ok(frame(chunks[2])),
        ];
        let (session, h) = session(script);

        assert_eq!(run(session), 0);

        // The rejected range is requested again with the same size
        assert_eq!(h.receives(), vec![19, 1026, 1026, 1026, 454]);
        assert_eq!(h.acks(), vec![0, 0, ACK_CHUNK_CRC, 0, 0]);
        let text = h.console.text();
        let progress = text.split("Receiving: ").nth(1).unwrap();
        let markers = progress.split('\n').next().unwrap();
        assert_eq!(markers.matches('!').count(), 1);
        assert!(progress.starts_with(".!..\nDone!"));
        assert_eq!(h.storage.disk().files[&Harness::out("TEST.BIN")], data);
    }

    #[test]
    fn test_reject_does_not_advance() {
        let data = file_data(300);
        let script = vec![
            Ok(header("A.BIN", 300)),
            Ok(corrupted(&data)),
            Ok(corrupted(&data)),
            Err(LinkFault::DataTimeout),
        ];
        let (mut session, h) = session(script);

        let outcome = receive_file(&mut session);
        assert!(matches!(outcome, Err(ReceiverError::Link(LinkFault::DataTimeout))));
        assert_eq!(session.remaining, 300);
        assert_eq!(session.chunk_size, 300);
        assert_eq!(h.receives(), vec![19, 302, 302, 302]);

        assert_eq!(session.terminate(outcome), EXIT_DATA_TIMEOUT);
        assert!(h.storage.disk().files[&Harness::out("A.BIN")].is_empty());
    }

    #[test]
    fn test_mid_transfer_timeout() {
        let data = file_data(2500);
        let script = vec![
            Ok(header("TEST.BIN", 2500)),
            Ok(frame(&data[..1024])),
            Err(LinkFault::DataTimeout),
        ];
        let (session, h) = session(script);

        assert_eq!(run(session), EXIT_DATA_TIMEOUT);

        assert_eq!(h.receives(), vec![19, 1026, 1026]);
        assert_eq!(h.storage.disk().files[&Harness::out("TEST.BIN")], &data[..1024]);
        assert_cleaned_up(&h);
        assert!(h.console.text().contains("*** Data reception timeout"));
    }

    #[test]
    fn test_header_timeout_and_framing() {
        let (s, h) = session(vec![Err(LinkFault::FlowControlTimeout)]);
        assert_eq!(run(s), EXIT_FLOW_CONTROL_TIMEOUT);
        assert!(h.storage.disk().files.is_empty());
        assert!(h.acks().is_empty());
        assert_cleaned_up(&h);

        let (s, h) = session(vec![Ok(header("X.BIN", 5000)), Err(LinkFault::Framing)]);
        assert_eq!(run(s), EXIT_FRAMING_ERROR);
        assert_cleaned_up(&h);

        let (s, h) = session(vec![Ok(header("X.BIN", 5000)), Err(LinkFault::Other(42))]);
        assert_eq!(run(s), EXIT_UNEXPECTED_LINK_ERROR);
        assert!(h.console.text().contains("*** Unexpected error: 42"));
    }

    #[test]
    fn test_write_failure_is_echoed() {
        let data = file_data(2500);
        let (layer, log) = ScriptedLayer::new(clean_script("TEST.BIN", &data));
        let storage = MemoryStorage::default();
        storage.disk().fail_write = Some((1, std::io::ErrorKind::StorageFull));
        let (session, h) = session_with(layer, log, storage);

        assert_eq!(run(session), ERR_DISK_FULL);

        assert_eq!(h.acks(), vec![0, 0, ERR_DISK_FULL]);
        assert_eq!(h.receives(), vec![19, 1026, 1026]);
        assert_cleaned_up(&h);
    }

    #[test]
    fn test_create_failure_is_echoed() {
        let (layer, log) = ScriptedLayer::new(vec![Ok(header("TEST.BIN", 10))]);
        let storage = MemoryStorage::default();
        storage.disk().fail_create = Some(std::io::ErrorKind::PermissionDenied);
        let (session, h) = session_with(layer, log, storage);

        assert_eq!(run(session), ERR_READ_ONLY);
        assert_eq!(h.acks(), vec![ERR_READ_ONLY]);
        assert_cleaned_up(&h);
    }

    #[test]
    fn test_invalid_header_name() {
        let (session, h) = session(vec![Ok(header("../ETC", 10))]);

        assert_eq!(run(session), ERR_INVALID_FILENAME);
        assert_eq!(h.acks(), vec![ERR_INVALID_FILENAME]);
        assert!(h.storage.disk().files.is_empty());
    }

    #[test]
    fn test_ack_timeout() {
        let data = file_data(2048);
        let (layer, log) = ScriptedLayer::new(clean_script("TEST.BIN", &data));
        let layer = layer.with_send_faults(vec![None, Some(LinkFault::FlowControlTimeout)]);
        let (session, h) = session_with(layer, log, MemoryStorage::default());

        assert_eq!(run(session), EXIT_ACK_TIMEOUT);

        // No further chunk is requested once the sender cannot be told
        assert_eq!(h.receives(), vec![19, 1026]);
        assert_cleaned_up(&h);
        assert!(h.console.text().contains("*** CTS line timeout"));
    }

    #[test]
    fn test_turbo_cpu_bracketed_per_operation() {
        let (session, h) = session(vec![Ok(header("EMPTY.TXT", 0))]);
        assert_eq!(run(session), 0);

        // One receive and one send, each bracketed
        assert_eq!(
            h.cpu.switches(),
            vec![CpuMode::Baseline, CpuMode::Turbo(1), CpuMode::Baseline, CpuMode::Turbo(1)]
        );
    }

    #[test]
    fn test_reflected_crc_session() {
        let data = file_data(100);
        let crc = CrcVariant::ReflectedCcitt;
        let mut chunk = data.clone();
        chunk.extend_from_slice(&crc.checksum(&data).to_le_bytes());
        let script = vec![Ok(TransferHeader::new("R.BIN", 100, crc).to_bytes().to_vec()), Ok(chunk)];

        let (mut session, h) = session(script);
        session.options.crc = crc;

        assert_eq!(run(session), 0);
        assert_eq!(h.acks(), vec![0, 0]);
        assert_eq!(h.storage.disk().files[&Harness::out("R.BIN")], data);
    }

    #[test]
    fn test_transfer_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("received.bin");
        let data = file_data(3000);

        let (layer, _log) = ScriptedLayer::new(clean_script("TEST.BIN", &data));
        let cpu = RecordingCpu::new(CpuMode::Baseline);
        let mut session = TransferSession::new(
            TimedLink::new(Box::new(layer), Box::new(cpu)),
            Box::new(DiskStorage),
            Destination::Path(target.clone()),
            SessionOptions { crc: CrcVariant::Xmodem, ack_redundancy: 2 },
            Box::new(SharedConsole::default()),
        );

        let outcome = receive_file(&mut session);
        assert_eq!(session.terminate(outcome), 0);
        assert_eq!(std::fs::read(&target).unwrap(), data);
        assert!(!dir.path().join("TEST.BIN").exists());
    }
}
