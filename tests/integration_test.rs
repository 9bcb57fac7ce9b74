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

use pasm::image::{build, ImageFormat};
use pasm::loader::{Loader, MockSerialPort};

#[test]
fn assembles_a_loop_and_builds_a_raw_image() {
    let source = "start\tMOV CNT, #0\nloop\tADD CNT, #1\n\tJMP #loop\n";
    let words = pasm::assemble(source, 1).unwrap();
    assert_eq!(words.len(), 3);

    let image = build(&words, ImageFormat::Raw).unwrap();
    assert_eq!(image.len(), 12);
    assert_eq!(&image[0..4], &words[0].to_le_bytes());
}

#[test]
fn binary_image_carries_a_valid_header_and_checksum() {
    let words = pasm::assemble("\tNOP\n", 1).unwrap();
    let image = build(&words, ImageFormat::Binary).unwrap();

    // clkfreq
    assert_eq!(u32::from_le_bytes([image[0], image[1], image[2], image[3]]), 80_000_000);
    // clkmode
    assert_eq!(image[4], 0x6F);
    // the boot ROM expects every byte, including the checksum byte, to sum
    // to 0x14 mod 256
    let sum: u32 = image.iter().map(|&b| b as u32).sum();
    assert_eq!(sum % 256, 0x14);
}

#[test]
fn eeprom_image_round_trips_through_bin_to_eeprom() {
    let words = pasm::assemble("\tNOP\n\tNOP\n", 1).unwrap();
    let image = build(&words, ImageFormat::Eeprom).unwrap();
    assert_eq!(image.len(), pasm::loader::EEPROM_SIZE + 8);
}

#[test]
fn a_source_file_with_several_bad_lines_reports_every_error() {
    let source = "!!!\n???\n\tNOP\n###\n";
    let errors = pasm::assemble(source, 1).unwrap_err();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0].line, 1);
    assert_eq!(errors[1].line, 2);
    assert_eq!(errors[2].line, 4);
}

#[test]
fn a_subroutine_call_resolves_through_its_ret_label_across_a_whole_program() {
    let source = "\tCALL #worker\n\tMOV PAR, PAR\nworker\n\tMOV PAR, CNT\nworker_ret\tRET\n";
    let words = pasm::assemble(source, 1).unwrap();

    // worker_ret sits at cog address 2.
    let call_word = words[0];
    assert_eq!((call_word >> 9) & 0x1FF, 2);
}

#[test]
fn get_version_round_trips_through_a_scripted_serial_handshake() {
    let mock = MockSerialPort::scripted_handshake(17);
    let mut loader = Loader::new(mock);
    assert_eq!(loader.get_version().unwrap(), 17);
}

#[test]
fn upload_to_ram_streams_every_word_as_a_long_pulse_train() {
    let words = pasm::assemble("\tNOP\n\tNOP\n", 1).unwrap();
    let image = build(&words, ImageFormat::Binary).unwrap();

    let mut mock = MockSerialPort::scripted_handshake(1);
    // RAM checksum bit: 0 means success.
    mock.queue(&[0xfe]);

    let mut loader = Loader::new(mock);
    let mut log = Vec::new();
    loader
        .upload(&image, false, true, |msg| log.push(msg.to_string()))
        .unwrap();
    assert!(!log.is_empty());
}
