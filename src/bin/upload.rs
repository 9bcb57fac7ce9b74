/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pasm::loader::{Loader, SystemSerialPort};

fn default_serial_device() -> &'static str {
    if cfg!(windows) {
        "COM1"
    } else {
        "/dev/ttyUSB0"
    }
}

#[derive(Parser)]
#[clap(version = "0.1", author = "Connor Nolan")]
struct Opts {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the connected Propeller chip's version.
    Version {
        /// Select the serial port device.
        #[clap(short, long, value_name = "DEVICE")]
        serial: Option<String>,
    },
    /// Upload a binary file to RAM or EEPROM.
    Upload {
        /// Binary file to be uploaded.
        filename: String,

        /// Upload to RAM or to EEPROM.
        #[clap(short, long, default_value = "RAM")]
        destination: String,

        /// Don't run the code after upload.
        #[clap(short = 'n', long = "no-run")]
        no_run: bool,

        /// Select the serial port device.
        #[clap(short, long, value_name = "DEVICE")]
        serial: Option<String>,
    },
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(opts: Opts) -> Result<()> {
    match opts.command {
        Command::Version { serial } => {
            let device = serial.unwrap_or_else(|| default_serial_device().to_string());
            let port = SystemSerialPort::open(&device)
                .with_context(|| format!("Failed to open serial device {}", device))?;
            let mut loader = Loader::new(port);
            let version = loader.get_version()?;
            println!("{}", version);
            Ok(())
        }
        Command::Upload {
            filename,
            mut destination,
            no_run,
            serial,
        } => {
            if filename.ends_with(".eeprom") {
                destination = "EEPROM".to_string();
            } else {
                destination = destination.to_uppercase();
            }

            let code = fs::read(&filename).with_context(|| format!("Failed to read {}", filename))?;

            let device = serial.unwrap_or_else(|| default_serial_device().to_string());
            let port = SystemSerialPort::open(&device)
                .with_context(|| format!("Failed to open serial device {}", device))?;
            let mut loader = Loader::new(port);

            loader.upload(&code, destination == "EEPROM", !no_run, |msg| println!("{}", msg))?;
            println!("Done");

            Ok(())
        }
    }
}
