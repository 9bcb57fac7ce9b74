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
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pasm::image::ImageFormat;

#[derive(Parser)]
#[clap(version = "0.1", author = "Connor Nolan")]
struct Opts {
    /// Syntax version of PASM code.
    #[clap(short, long, default_value_t = 1)]
    syntax: u32,

    /// Save as a binary with the SPIN bootstrap, an EEPROM image with the
    /// SPIN bootstrap, or without any bootstrap.
    #[clap(short, long, default_value = "binary")]
    format: String,

    /// Save output as a hex textfile alongside the binary output.
    #[clap(short = 'x', long)]
    hex: bool,

    /// The initial value for the `@` symbol.
    #[clap(short = 'b', long = "hub-offset", default_value_t = 1)]
    hub_offset: u32,

    /// Filename to save to (default is the input filename with the
    /// appropriate extension).
    #[clap(short, long, default_value = "")]
    output: String,

    /// Filename to be compiled.
    filename: PathBuf,
}

fn main() -> ExitCode {
    let opts = Opts::parse();

    if opts.syntax != 1 {
        eprintln!("Unsupported syntax version: {}", opts.syntax);
        return ExitCode::FAILURE;
    }

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(opts: &Opts) -> Result<()> {
    let format = ImageFormat::parse(&opts.format)
        .with_context(|| format!("Unknown output format: {}", opts.format))?;

    let source = fs::read_to_string(&opts.filename)
        .with_context(|| format!("Failed to open file \"{}\"!", opts.filename.display()))?;

    let words = pasm::assemble(&source, opts.hub_offset).map_err(|errors| {
        let report = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::anyhow!(report)
    })?;

    let data = pasm::image::build(&words, format).context("Failed to build output image")?;

    let outfile = if !opts.output.is_empty() {
        PathBuf::from(&opts.output)
    } else {
        let mut path = opts.filename.clone();
        path.set_extension(match format {
            ImageFormat::Binary => "binary",
            ImageFormat::Eeprom => "eeprom",
            ImageFormat::Raw => "raw",
        });
        path
    };

    fs::write(&outfile, &data).with_context(|| format!("Failed to write {}", outfile.display()))?;

    if opts.hex {
        let hex_path = format!("{}.hex", outfile.display());
        fs::write(&hex_path, format_hex(&data))
            .with_context(|| format!("Failed to write {}", hex_path))?;
    }

    println!("Successfully assembled {} to {}", opts.filename.display(), outfile.display());

    Ok(())
}

/// Renders the image as a hex textfile: bytes in groups of 4, space
/// separated, with a line break starting every 16 bytes.
fn format_hex(data: &[u8]) -> String {
    let mut out = String::new();

    for (count, b) in data.iter().enumerate() {
        if count % 4 == 0 {
            if count % 16 == 0 {
                out.push('\n');
            } else {
                out.push(' ');
            }
        }
        out.push_str(&format!("{:02X}", b));
    }

    out
}
