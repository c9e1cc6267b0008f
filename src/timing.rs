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

//! CPU speed bracketing around every link operation

use tracing::debug;
use crate::link::{LinkFault, PhysicalLayer};

/// Host CPU speed state. Bit timing is calibrated for `Baseline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Baseline,
    Turbo(u8),
}

pub trait CpuControl: Send {
    fn current(&self) -> CpuMode;

    fn switch(&mut self, mode: CpuMode);
}

/// Host without a switchable CPU: always reports the baseline mode.
pub struct FixedCpu;

impl CpuControl for FixedCpu {
    fn current(&self) -> CpuMode {
        CpuMode::Baseline
    }

    fn switch(&mut self, _mode: CpuMode) {}
}

/// The session's transport: one strategy plus the CPU mode it must run under.
///
/// The host's own mode is captured once, when the link is built, and put back
/// after each send and receive.
pub struct TimedLink {
    layer: Box<dyn PhysicalLayer>,
    cpu: Box<dyn CpuControl>,
    saved: CpuMode,
}

impl TimedLink {
    pub fn new(layer: Box<dyn PhysicalLayer>, cpu: Box<dyn CpuControl>) -> Self {
        let saved = cpu.current();
        debug!(?saved, "captured CPU mode");
        TimedLink { layer, cpu, saved }
    }

    pub fn with_baseline_timing<T>(&mut self, op: impl FnOnce(&mut dyn PhysicalLayer) -> T) -> T {
        let override_needed = self.layer.timing_sensitive() && self.saved != CpuMode::Baseline;

        if override_needed {
            self.cpu.switch(CpuMode::Baseline);
        }
        let result = op(self.layer.as_mut());
        if override_needed {
            self.cpu.switch(self.saved);
        }
        result
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), LinkFault> {
        self.with_baseline_timing(|layer| layer.send(data))
    }

    pub fn receive(&mut self, buf: &mut [u8]) -> Result<(), LinkFault> {
        self.with_baseline_timing(|layer| layer.receive(buf))
    }

    /// Put the host back in the mode it had when the session started.
    pub fn restore_cpu(&mut self) {
        if self.cpu.current() != self.saved {
            debug!(mode = ?self.saved, "restoring CPU mode");
            self.cpu.switch(self.saved);
        }
    }
}

// ============================================================================
// Recording CPU for Testing
// ============================================================================

#[cfg(test)]
pub use recording::RecordingCpu;

#[cfg(test)]
mod recording {
    use std::sync::{Arc, Mutex};
    use super::{CpuControl, CpuMode};

    #[derive(Debug)]
    pub struct CpuState {
        pub mode: CpuMode,
        pub switches: Vec<CpuMode>,
    }

    #[derive(Clone)]
    pub struct RecordingCpu(pub Arc<Mutex<CpuState>>);

    impl RecordingCpu {
        pub fn new(mode: CpuMode) -> Self {
            RecordingCpu(Arc::new(Mutex::new(CpuState { mode, switches: Vec::new() })))
        }

        pub fn mode(&self) -> CpuMode {
            self.0.lock().unwrap().mode
        }

        pub fn switches(&self) -> Vec<CpuMode> {
            self.0.lock().unwrap().switches.clone()
        }

        /// Pretend something else changed the mode behind our back.
        pub fn force(&self, mode: CpuMode) {
            self.0.lock().unwrap().mode = mode;
        }
    }

    impl CpuControl for RecordingCpu {
        fn current(&self) -> CpuMode {
            self.mode()
        }

        fn switch(&mut self, mode: CpuMode) {
            let mut state = self.0.lock().unwrap();
            state.mode = mode;
            state.switches.push(mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ScriptedLayer;

    struct Untimed(ScriptedLayer);

    impl PhysicalLayer for Untimed {
        fn send(&mut self, data: &[u8]) -> Result<(), LinkFault> {
            self.0.send(data)
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<(), LinkFault> {
            self.0.receive(buf)
        }

        fn timing_sensitive(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_turbo_host_drops_to_baseline_per_call() {
        let cpu = RecordingCpu::new(CpuMode::Turbo(2));
        let (layer, _log) = ScriptedLayer::new(vec![Ok(vec![1, 2])]);
        let mut link = TimedLink::new(Box::new(layer), Box::new(cpu.clone()));

        link.send(&[0; 4]).expect("send");
        let mut buf = [0u8; 2];
        link.receive(&mut buf).expect("receive");

        assert_eq!(
            cpu.switches(),
            vec![CpuMode::Baseline, CpuMode::Turbo(2), CpuMode::Baseline, CpuMode::Turbo(2)]
        );
        assert_eq!(cpu.mode(), CpuMode::Turbo(2));
    }

    #[test]
    fn test_restore_after_failure() {
        let cpu = RecordingCpu::new(CpuMode::Turbo(1));
        let (layer, _log) = ScriptedLayer::new(vec![Err(LinkFault::DataTimeout)]);
        let mut link = TimedLink::new(Box::new(layer), Box::new(cpu.clone()));

        let mut buf = [0u8; 8];
        assert_eq!(link.receive(&mut buf), Err(LinkFault::DataTimeout));
        assert_eq!(cpu.mode(), CpuMode::Turbo(1));
    }

    #[test]
    fn test_baseline_host_never_switches() {
        let cpu = RecordingCpu::new(CpuMode::Baseline);
        let (layer, _log) = ScriptedLayer::new(vec![]);
        let mut link = TimedLink::new(Box::new(layer), Box::new(cpu.clone()));

        link.send(&[0]).expect("send");
        link.restore_cpu();
        assert!(cpu.switches().is_empty());
    }

    #[test]
    fn test_untimed_layer_keeps_turbo() {
        let cpu = RecordingCpu::new(CpuMode::Turbo(1));
        let (layer, _log) = ScriptedLayer::new(vec![]);
        let mut link = TimedLink::new(Box::new(Untimed(layer)), Box::new(cpu.clone()));

        link.send(&[0]).expect("send");
        assert!(cpu.switches().is_empty());
    }

    #[test]
    fn test_restore_cpu_undoes_stray_switch() {
        let cpu = RecordingCpu::new(CpuMode::Turbo(1));
        let (layer, _log) = ScriptedLayer::new(vec![]);
        let mut link = TimedLink::new(Box::new(layer), Box::new(cpu.clone()));

        cpu.force(CpuMode::Baseline);
        link.restore_cpu();
        assert_eq!(cpu.mode(), CpuMode::Turbo(1));
    }
}
