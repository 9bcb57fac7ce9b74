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

use thiserror::Error;

/// A single assembly failure, tied to the source line that produced it.
///
/// Pass 1 and Pass 2 each catch these per line and append them to
/// `State::errors` rather than aborting, so one bad line doesn't hide the
/// next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{line} : {message}")]
pub struct AssemblerError {
    pub line: usize,
    pub message: String,
}

impl AssemblerError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        AssemblerError {
            line,
            message: message.into(),
        }
    }
}

/// Raised by `ORG`/`FIT` when their argument falls outside the legal cog
/// address range. Kept distinct from `AssemblerError` so callers can match
/// on it without string comparison, the way the reference implementation
/// keeps it as its own exception type.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("address {0:#X} is out of range")]
pub struct AddressOutOfRangeError(pub i64);

/// Protocol-level failures from the bootstrap loader. Each one aborts the
/// upload; the serial port is always closed regardless of which of these
/// fires.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("No hardware found")]
    NoHardwareFound,
    #[error("Bad reply")]
    BadReply,
    #[error("Timeout error")]
    Timeout,
    #[error("RAM checksum error")]
    RamChecksum,
    #[error("EEPROM programming error")]
    EepromProgramming,
    #[error("EEPROM verification error")]
    EepromVerification,
    #[error("Code checksum error: {0:#04x}")]
    CodeChecksum(u8),
    #[error("Code too long for EEPROM (max {0} bytes)")]
    CodeTooLong(usize),
    #[error("Invalid binary format")]
    InvalidBinaryFormat,
    #[error("Invalid code size: must be a multiple of 4")]
    InvalidCodeSize,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
