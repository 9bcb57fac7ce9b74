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

//! Wraps assembled instruction words into a loadable image: a bare `raw`
//! dump for `ORG`'d cog code, or a `binary`/`eeprom` image carrying the
//! 16-byte SPIN header the boot ROM expects.

use crate::loader::bin_to_eeprom;

/// A tiny SPIN stub appended after the cog code: `COGINIT` back into cog 0
/// at `pbase`, stopping the boot cog. Constant across every image -- this
/// program never runs SPIN code of its own, it only needs the boot ROM to
/// hand control to cog 0.
const SPIN_STUB: [u8; 8] = [0x35, 0x37, 0x03, 0x35, 0x2C, 0x00, 0x00, 0x00];

const CLOCK_FREQ: u32 = 80_000_000;
const CLOCK_MODE: u8 = 0x6F;
const HEADER_LEN: u16 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Just the assembled words, little-endian. No header, no padding.
    Raw,
    /// Header + code + SPIN stub, sized for loading straight into RAM.
    Binary,
    /// `Binary`, then padded out to a full EEPROM image.
    Eeprom,
}

impl ImageFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Some(ImageFormat::Raw),
            "binary" => Some(ImageFormat::Binary),
            "eeprom" => Some(ImageFormat::Eeprom),
            _ => None,
        }
    }
}

/// Builds the final byte image from the assembled instruction words.
///
/// `hub_offset` only matters for `raw` output: it's the cog's view of
/// where in the hub its own code starts, used by the assembler state's hub
/// address bookkeeping, not by this function directly (the caller already
/// folded it into `State::hub_address` before assembling). It's accepted
/// here for symmetry with the CLI's `-b` flag and to keep a single call
/// site for "how does format choice affect layout".
pub fn build(words: &[u32], format: ImageFormat) -> Result<Vec<u8>, crate::errors::LoaderError> {
    let mut data = Vec::with_capacity(words.len() * 4);
    for word in words {
        data.extend_from_slice(&word.to_le_bytes());
    }

    if format == ImageFormat::Raw {
        return Ok(data);
    }

    let pbase = HEADER_LEN;
    let pcurr = pbase + data.len() as u16;
    let vbase = pcurr + SPIN_STUB.len() as u16;
    let dbase = vbase + 0x08;
    let dcurr = dbase + 0x04;

    let mut header = Vec::with_capacity(16);
    header.extend_from_slice(&CLOCK_FREQ.to_le_bytes());
    header.push(CLOCK_MODE);
    header.push(0x00); // checksum, patched below
    header.extend_from_slice(&pbase.to_le_bytes());
    header.extend_from_slice(&vbase.to_le_bytes());
    header.extend_from_slice(&dbase.to_le_bytes());
    header.extend_from_slice(&pcurr.to_le_bytes());
    header.extend_from_slice(&dcurr.to_le_bytes());

    let mut image = header;
    image.extend_from_slice(&data);
    image.extend_from_slice(&SPIN_STUB);

    patch_checksum(&mut image);

    if format == ImageFormat::Eeprom && image.len() < crate::loader::EEPROM_SIZE {
        image = bin_to_eeprom(&image)?;
    }

    Ok(image)
}

/// Patches the checksum byte so every byte in the image, including the
/// checksum byte itself, sums to `0x14` mod 256 -- the value the boot ROM
/// expects. Equivalent to `checksum = 0x14 - sum(data)`, written as the
/// reference does it to avoid a negative intermediate value.
fn patch_checksum(image: &mut [u8]) {
    let sum: u32 = image.iter().map(|&b| b as u32).sum();
    let checksum = (sum + 0xEC) % 256;
    let checksum = (256 - checksum) % 256;
    image[0x05] = checksum as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_format_is_just_the_words() {
        let words = [0x1234_5678u32, 0x9abc_def0];
        let image = build(&words, ImageFormat::Raw).unwrap();
        assert_eq!(image.len(), 8);
        assert_eq!(&image[0..4], &0x1234_5678u32.to_le_bytes());
    }

    #[test]
    fn binary_format_checksums_to_0x14() {
        let words = [0xAAAA_AAAAu32, 0x5555_5555];
        let image = build(&words, ImageFormat::Binary).unwrap();
        let sum: u32 = image.iter().map(|&b| b as u32).sum();
        assert_eq!(sum % 256, 0x14);
    }

    #[test]
    fn binary_format_has_the_16_byte_header_and_spin_stub() {
        let words = [0u32; 4];
        let image = build(&words, ImageFormat::Binary).unwrap();
        assert_eq!(image.len(), 16 + 16 + SPIN_STUB.len());
        assert_eq!(image[0x04], CLOCK_MODE);
    }

    #[test]
    fn eeprom_format_pads_to_eeprom_size() {
        // The padded image carries the EEPROM's declared user size plus
        // the fixed 8-byte calibration tail `_bin_to_eeprom` always adds
        // on top of it.
        let words = [0u32; 4];
        let image = build(&words, ImageFormat::Eeprom).unwrap();
        assert_eq!(image.len(), crate::loader::EEPROM_SIZE + 8);
    }
}
