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

//! Optional `jget.toml` with host device names and link tuning

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use crate::crc::CrcVariant;
use crate::link::{JoystickPort, LinkTimeouts};
use crate::protocol::DEFAULT_ACK_REDUNDANCY;
use crate::session::SessionOptions;

pub const DEFAULT_CONFIG_FILE: &str = "jget.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Cannot parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// Host serial device wired to joystick port 1
    pub port1: String,
    /// Host serial device wired to joystick port 2
    pub port2: String,
}

impl Default for PortsConfig {
    fn default() -> Self {
        if cfg!(windows) {
            PortsConfig { port1: "COM1".into(), port2: "COM2".into() }
        } else {
            PortsConfig { port1: "/dev/ttyUSB0".into(), port2: "/dev/ttyUSB1".into() }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub flow_control_timeout_ms: u64,
    pub data_timeout_ms: u64,
    /// How many times each acknowledgment byte is repeated
    pub ack_redundancy: usize,
    pub crc: CrcVariant,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            flow_control_timeout_ms: 30_000,
            data_timeout_ms: 1_000,
            ack_redundancy: DEFAULT_ACK_REDUNDANCY,
            crc: CrcVariant::Xmodem,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ports: PortsConfig,
    pub link: LinkConfig,
}

impl Config {
    /// Load `path`, or `jget.toml` in the working directory when it exists,
    /// or fall back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => PathBuf::from(DEFAULT_CONFIG_FILE),
            None => return Ok(Config::default()),
        };

        let content = fs::read_to_string(&path)
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        let config = Self::parse_at(&content, &path)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Self::parse_at(content, Path::new("<inline>"))
    }

    fn parse_at(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.link.ack_redundancy == 0 {
            return Err(ConfigError::Invalid("ack_redundancy must be at least 1".into()));
        }
        if self.link.flow_control_timeout_ms == 0 || self.link.data_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn device(&self, port: JoystickPort) -> &str {
        match port {
            JoystickPort::One => &self.ports.port1,
            JoystickPort::Two => &self.ports.port2,
        }
    }

    pub fn timeouts(&self) -> LinkTimeouts {
        LinkTimeouts {
            flow_control: Duration::from_millis(self.link.flow_control_timeout_ms),
            data: Duration::from_millis(self.link.data_timeout_ms),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions { crc: self.link.crc, ack_redundancy: self.link.ack_redundancy }
    }
}
