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

// Joystick-port file transfer
mod config;
mod crc;
mod files;
mod link;
mod protocol;
mod receiver;
mod sender;
mod serial;
mod session;
mod timing;

use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use config::Config;
use files::{Destination, DiskStorage};
use link::{open_layer, JoystickPort, PhysicalLayer, Speed};
use protocol::{EXIT_OK, EXIT_UNEXPECTED_LINK_ERROR};
use serial::{RealSerialPort, SerialPort};
use session::TransferSession;
use timing::{FixedCpu, TimedLink};

#[derive(Parser)]
#[command(name = "jget")]
#[command(version, about = "File transfer through the joystick port serial adapter", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Configuration file (defaults to jget.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive one file
    Receive {
        /// Joystick port (1 or 2)
        #[arg(value_parser = JoystickPort::parse)]
        port: JoystickPort,
        /// Speed: 0=2400, 1=4800, 2=9600, 3=19200, 4=57600 bps
        #[arg(value_parser = Speed::parse)]
        speed: Speed,
        /// Where to save the file; a directory keeps the sender's file name
        path: Option<PathBuf>,
    },
    /// Send one file
    Send {
        /// File to send
        file: PathBuf,
        /// Joystick port (1 or 2)
        #[arg(value_parser = JoystickPort::parse)]
        port: JoystickPort,
        /// Speed: 0=2400, 1=4800, 2=9600, 3=19200, 4=57600 bps
        #[arg(value_parser = Speed::parse)]
        speed: Speed,
        /// Name announced to the receiver instead of the file's own
        #[arg(long)]
        name: Option<String>,
        /// Delay in milliseconds between sending each byte
        #[arg(long, default_value = "0", value_name = "MS")]
        byte_delay: u8,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage problems, help and version all end quietly
            let _ = e.print();
            std::process::exit(EXIT_OK as i32);
        }
    };

    init_logging(cli.debug);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_OK as i32);
        }
    };

    let (port, speed, byte_delay) = match &cli.command {
        Commands::Receive { port, speed, .. } => (*port, *speed, Duration::ZERO),
        Commands::Send { port, speed, byte_delay, .. } => {
            (*port, *speed, Duration::from_millis(u64::from(*byte_delay)))
        }
    };

    let device = config.device(port).to_string();
    if !RealSerialPort::is_present(&device) {
        println!("*** No serial adapter found for joystick port {} ({}).", port.number(), device);
        println!("Connect the adapter or map the port to a device in the [ports] section of jget.toml.");
        std::process::exit(EXIT_OK as i32);
    }

    println!("JGET {} - joystick port file transfer", env!("CARGO_PKG_VERSION"));
    println!("Port {} ({}), {} bps\n", port.number(), device, speed.bps());

    let layer = match open_layer(
        |bps| RealSerialPort::open(&device, bps).map(|p| Box::new(p) as Box<dyn SerialPort>),
        speed,
        config.timeouts(),
        byte_delay,
    ) {
        Ok(layer) => layer,
        Err(e) => {
            error!(%device, error = %e, "opening serial device failed");
            eprintln!("*** Failed to open {}: {}", device, e);
            std::process::exit(EXIT_UNEXPECTED_LINK_ERROR as i32);
        }
    };

    let code = match cli.command {
        Commands::Receive { path, .. } => receive(layer, path, &config),
        Commands::Send { file, name, .. } => send(layer, file, name, &config),
    };

    debug!(code, "exiting");
    std::process::exit(code as i32);
}

fn receive(layer: Box<dyn PhysicalLayer>, path: Option<PathBuf>, config: &Config) -> u8 {
    let destination = match path {
        Some(path) => Destination::Path(path),
        None => Destination::Directory(PathBuf::from(".")),
    };

    let mut session = TransferSession::new(
        TimedLink::new(layer, Box::new(FixedCpu)),
        Box::new(DiskStorage),
        destination,
        config.session_options(),
        Box::new(std::io::stdout()),
    );

    let outcome = receiver::receive_file(&mut session);
    session.terminate(outcome)
}

fn send(layer: Box<dyn PhysicalLayer>, file: PathBuf, name: Option<String>, config: &Config) -> u8 {
    let prepared = sender::header_name(&file, name.as_deref()).and_then(|name| {
        let source = File::open(&file)?;
        let size = source.metadata()?.len();
        Ok((name, source, size))
    });

    let (name, source, size) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("*** {}: {}", file.display(), e);
            return 1;
        }
    };

    let mut session = match sender::SendSession::new(
        TimedLink::new(layer, Box::new(FixedCpu)),
        Box::new(source),
        name,
        size,
        config.session_options(),
        Box::new(std::io::stdout()),
    ) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("*** {}: {}", file.display(), e);
            return 1;
        }
    };

    let outcome = sender::send_file(&mut session);
    session.finish(outcome)
}
