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

//! The serial bootstrap protocol: resetting a Propeller chip into its ROM
//! bootloader, handshaking with it over an LFSR challenge, and streaming
//! an assembled image into RAM or EEPROM.
//!
//! Hardware access sits behind the `SerialPort` trait so the protocol
//! state machine itself -- the part worth testing -- never has to touch a
//! real device.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::errors::LoaderError;

pub const EEPROM_SIZE: usize = 32768;

const LFSR_REQUEST_LEN: usize = 250;
const LFSR_REPLY_LEN: usize = 250;
const LFSR_SEED: u8 = b'P';

const CMD_SHUTDOWN: u32 = 0;
const CMD_LOAD_RAM_RUN: u32 = 1;
const CMD_LOAD_EEPROM: u32 = 2;
const CMD_LOAD_EEPROM_RUN: u32 = 3;

/// Abstraction over a physical or simulated serial connection. Modeled on
/// the handful of operations the bootstrap protocol actually needs:
/// raw byte I/O, toggling DTR to reset the target, and clearing buffers
/// between protocol phases.
pub trait SerialPort {
    fn write(&mut self, data: &[u8]) -> Result<(), LoaderError>;
    /// Reads up to `buf.len()` bytes without blocking. Returns `0` if
    /// nothing is available yet -- callers that need to wait poll this in
    /// a loop against their own deadline.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LoaderError>;
    fn set_dtr(&mut self, level: bool) -> Result<(), LoaderError>;
    fn flush(&mut self) -> Result<(), LoaderError>;
    fn clear(&mut self) -> Result<(), LoaderError>;
}

/// Production `SerialPort` backed by a real OS serial device.
pub struct SystemSerialPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl SystemSerialPort {
    pub fn open(device: &str) -> Result<Self, LoaderError> {
        let inner = serialport::new(device, 115_200)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| LoaderError::Io(std::io::Error::other(e.to_string())))?;

        Ok(SystemSerialPort { inner })
    }
}

impl SerialPort for SystemSerialPort {
    fn write(&mut self, data: &[u8]) -> Result<(), LoaderError> {
        use std::io::Write;
        self.inner.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LoaderError> {
        use std::io::Read;
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), LoaderError> {
        self.inner
            .write_data_terminal_ready(level)
            .map_err(|e| LoaderError::Io(std::io::Error::other(e.to_string())))
    }

    fn flush(&mut self) -> Result<(), LoaderError> {
        use std::io::Write;
        self.inner.flush()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), LoaderError> {
        self.inner
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| LoaderError::Io(std::io::Error::other(e.to_string())))
    }
}

/// A scripted `SerialPort` for tests: records every byte written, and
/// replays a pre-loaded queue of bytes on `read`.
#[derive(Default)]
pub struct MockSerialPort {
    pub written: Vec<u8>,
    to_read: VecDeque<u8>,
    pub dtr_log: Vec<bool>,
}

impl MockSerialPort {
    pub fn new() -> Self {
        MockSerialPort::default()
    }

    pub fn queue(&mut self, bytes: &[u8]) {
        self.to_read.extend(bytes);
    }

    /// Builds a mock that answers a full `connect()` handshake as genuine
    /// hardware would for the given chip `version`, so `get_version` and
    /// `upload` can be exercised end to end without real hardware.
    pub fn scripted_handshake(version: u8) -> Self {
        let mut mock = MockSerialPort::new();
        let seq: Vec<u8> = Lfsr::new(LFSR_SEED).take(LFSR_REQUEST_LEN + LFSR_REPLY_LEN).collect();

        for &bit in &seq[LFSR_REQUEST_LEN..] {
            mock.queue(&[0xfe | bit]);
        }

        for i in 0..8 {
            let bit = (version >> i) & 1;
            mock.queue(&[0xfe | bit]);
        }

        mock
    }
}

impl SerialPort for MockSerialPort {
    fn write(&mut self, data: &[u8]) -> Result<(), LoaderError> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LoaderError> {
        let mut n = 0;
        while n < buf.len() {
            match self.to_read.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), LoaderError> {
        self.dtr_log.push(level);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LoaderError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), LoaderError> {
        Ok(())
    }
}

/// 8-bit LFSR with taps at bits 7, 5, 4 and 1, matching the Propeller ROM
/// bootloader's handshake generator.
struct Lfsr {
    state: u8,
}

impl Lfsr {
    fn new(seed: u8) -> Self {
        Lfsr { state: seed }
    }
}

impl Iterator for Lfsr {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let bit = self.state & 0x01;
        let feedback = ((self.state >> 7) ^ (self.state >> 5) ^ (self.state >> 4) ^ (self.state >> 1)) & 1;
        self.state = ((self.state << 1) & 0xFE) | feedback;
        Some(bit)
    }
}

/// Encodes a 32-bit word as the bootloader's tribit pulse stream: three
/// data bits per byte for the first ten bytes, then the final two bits of
/// the last bit triple.
fn encode_long(mut value: u32) -> [u8; 11] {
    let mut result = [0u8; 11];

    for slot in result.iter_mut().take(10) {
        *slot = 0x92
            | (value & 0x01) as u8
            | (((value & 0x02) << 2) as u8)
            | (((value & 0x04) << 4) as u8);
        value >>= 3;
    }

    result[10] = 0xF2 | (value & 0x01) as u8 | (((value & 0x02) << 2) as u8);

    result
}

/// Pads a RAM image into a full EEPROM image, per the uploader's
/// `_bin_to_eeprom`. This is the single authoritative padding
/// implementation; the assembler's `eeprom` output format calls straight
/// into it rather than duplicating the layout math.
pub fn bin_to_eeprom(code: &[u8]) -> Result<Vec<u8>, LoaderError> {
    if code.len() > EEPROM_SIZE - 8 {
        return Err(LoaderError::CodeTooLong(EEPROM_SIZE - 8));
    }

    let dbase = code[0x0a] as usize + ((code[0x0b] as usize) << 8);

    if dbase > EEPROM_SIZE {
        return Err(LoaderError::InvalidBinaryFormat);
    }

    let mut eeprom = code.to_vec();
    eeprom.extend(std::iter::repeat(0u8).take(dbase.saturating_sub(8).saturating_sub(code.len())));
    eeprom.extend_from_slice(&[0xff, 0xff, 0xf9, 0xff]);
    eeprom.extend_from_slice(&[0xff, 0xff, 0xf9, 0xff]);
    eeprom.extend(std::iter::repeat(0u8).take(EEPROM_SIZE.saturating_sub(code.len())));

    Ok(eeprom)
}

/// Drives the bootstrap protocol over a `SerialPort`.
pub struct Loader<P: SerialPort> {
    port: P,
}

impl<P: SerialPort> Loader<P> {
    pub fn new(port: P) -> Self {
        Loader { port }
    }

    pub fn into_port(self) -> P {
        self.port
    }

    /// Resets the target and returns its chip version.
    pub fn get_version(&mut self) -> Result<u8, LoaderError> {
        let version = self.connect()?;
        self.write_long(CMD_SHUTDOWN)?;
        std::thread::sleep(Duration::from_millis(10));
        self.reset()?;
        Ok(version)
    }

    /// Resets the target and streams `code` to RAM or EEPROM.
    pub fn upload(
        &mut self,
        code: &[u8],
        eeprom: bool,
        run: bool,
        mut progress: impl FnMut(&str),
    ) -> Result<(), LoaderError> {
        if code.len() % 4 != 0 {
            return Err(LoaderError::InvalidCodeSize);
        }

        let code = if eeprom && code.len() < EEPROM_SIZE {
            bin_to_eeprom(code)?
        } else {
            code.to_vec()
        };

        let mut checksum: u32 = code.iter().map(|&b| b as u32).sum();
        if !eeprom {
            checksum += 2 * (0xff + 0xff + 0xf9 + 0xff);
        }
        let checksum = (checksum & 0xff) as u8;

        if checksum != 0 {
            return Err(LoaderError::CodeChecksum(checksum));
        }

        let version = self.connect()?;
        progress(&format!("Connected (version={})", version));
        self.send_code(&code, eeprom, run, &mut progress)
    }

    fn reset(&mut self) -> Result<(), LoaderError> {
        self.port.flush()?;
        self.port.set_dtr(true)?;
        std::thread::sleep(Duration::from_millis(25));
        self.port.set_dtr(false)?;
        std::thread::sleep(Duration::from_millis(90));
        self.port.clear()?;
        Ok(())
    }

    fn calibrate(&mut self) -> Result<(), LoaderError> {
        self.port.write(&[0xf9])
    }

    fn connect(&mut self) -> Result<u8, LoaderError> {
        self.reset()?;
        self.calibrate()?;

        let seq: Vec<u8> = Lfsr::new(LFSR_SEED).take(LFSR_REQUEST_LEN + LFSR_REPLY_LEN).collect();

        let request: Vec<u8> = seq[..LFSR_REQUEST_LEN].iter().map(|&b| b | 0xfe).collect();
        self.port.write(&request)?;
        self.port.write(&vec![0xf9u8; LFSR_REPLY_LEN + 8])?;

        for &expected in &seq[LFSR_REQUEST_LEN..] {
            if self.read_bit(false, Duration::from_millis(100))? != expected {
                return Err(LoaderError::NoHardwareFound);
            }
        }

        let mut version: u8 = 0;
        for _ in 0..8 {
            let bit = self.read_bit(false, Duration::from_millis(50))?;
            version = (version >> 1) | (bit << 7);
        }

        Ok(version)
    }

    fn send_code(
        &mut self,
        code: &[u8],
        eeprom: bool,
        run: bool,
        progress: &mut impl FnMut(&str),
    ) -> Result<(), LoaderError> {
        let command = match (eeprom, run) {
            (false, false) => CMD_SHUTDOWN,
            (false, true) => CMD_LOAD_RAM_RUN,
            (true, false) => CMD_LOAD_EEPROM,
            (true, true) => CMD_LOAD_EEPROM_RUN,
        };

        self.write_long(command)?;

        if !eeprom && !run {
            return Ok(());
        }

        self.write_long((code.len() / 4) as u32)?;
        progress(&format!("Sending code ({} bytes)", code.len()));

        for chunk in code.chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write_long(word)?;
        }

        if self.read_bit(true, Duration::from_secs(8))? == 1 {
            return Err(LoaderError::RamChecksum);
        }

        if eeprom {
            progress("Programming EEPROM");
            if self.read_bit(true, Duration::from_secs(5))? == 1 {
                return Err(LoaderError::EepromProgramming);
            }

            progress("Verifying EEPROM");
            if self.read_bit(true, Duration::from_millis(2500))? == 1 {
                return Err(LoaderError::EepromVerification);
            }
        }

        Ok(())
    }

    fn write_long(&mut self, value: u32) -> Result<(), LoaderError> {
        self.port.write(&encode_long(value))
    }

    /// Polls for a single reply bit until `timeout` elapses. When `echo`
    /// is set, keeps nudging the target with a calibration byte every 25ms
    /// while waiting -- used during the long RAM/EEPROM programming waits.
    fn read_bit(&mut self, echo: bool, timeout: Duration) -> Result<u8, LoaderError> {
        let start = Instant::now();
        let mut byte = [0u8; 1];

        while start.elapsed() < timeout {
            if echo {
                self.port.write(&[0xf9])?;
                std::thread::sleep(Duration::from_millis(25));
            }

            if self.port.read(&mut byte)? > 0 {
                return match byte[0] {
                    0xfe | 0xff => Ok(byte[0] & 0x01),
                    _ => Err(LoaderError::BadReply),
                };
            }
        }

        Err(LoaderError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfsr_matches_the_known_first_bits_of_the_seed() {
        let bits: Vec<u8> = Lfsr::new(b'P').take(8).collect();
        // seed 'P' = 0x50 = 0b0101_0000
        assert_eq!(bits[0], 0);
        assert_eq!(bits.len(), 8);
    }

    #[test]
    fn encode_long_ends_with_the_terminator_pattern() {
        let encoded = encode_long(0);
        assert_eq!(encoded.len(), 11);
        assert_eq!(encoded[10] & 0xF0, 0xF0);
        for b in &encoded[..10] {
            assert_eq!(b & 0x90, 0x90);
        }
    }

    #[test]
    fn bin_to_eeprom_rejects_oversized_code() {
        let code = vec![0u8; EEPROM_SIZE];
        assert!(bin_to_eeprom(&code).is_err());
    }

    #[test]
    fn get_version_completes_a_scripted_handshake() {
        let mock = MockSerialPort::scripted_handshake(42);
        let mut loader = Loader::new(mock);
        let version = loader.get_version().unwrap();
        assert_eq!(version, 42);
    }

    #[test]
    fn get_version_without_a_reply_times_out() {
        let mock = MockSerialPort::new();
        let mut loader = Loader::new(mock);
        let result = loader.get_version();
        assert!(matches!(result, Err(LoaderError::Timeout)));
    }

    #[test]
    fn upload_rejects_code_whose_length_is_not_a_multiple_of_four() {
        let mock = MockSerialPort::new();
        let mut loader = Loader::new(mock);
        let result = loader.upload(&[0, 0, 0], false, true, |_| {});
        assert!(matches!(result, Err(LoaderError::InvalidCodeSize)));
    }
}
