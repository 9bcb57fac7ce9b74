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

//! A two-pass assembler for the Propeller P1's PASM instruction set, and
//! the serial bootstrap protocol used to run or burn the result on real
//! hardware.
//!
//! [`assemble`] turns PASM source into instruction words; [`image`] wraps
//! those words into a loadable image; [`loader`] streams that image to a
//! Propeller over a serial port.

pub mod errors;
pub mod eval;
pub mod image;
pub mod loader;
pub mod passes;
pub mod state;
pub mod tables;

use errors::AssemblerError;
use state::State;

/// Assembles PASM `source`, starting hub addressing at `hub_address`
/// (`pasm`'s `-b/--hub-offset`).
///
/// Returns the assembled words on success. On any per-line failure,
/// returns every accumulated `AssemblerError` rather than stopping at the
/// first one -- both passes keep going after a bad line so a single typo
/// doesn't hide the rest of the file's problems.
pub fn assemble(source: &str, hub_address: u32) -> Result<Vec<u32>, Vec<AssemblerError>> {
    let mut state = State::new(hub_address);

    let pending = passes::pass1(source, &mut state);

    if !state.errors.is_empty() {
        return Err(state.errors);
    }

    let words = passes::pass2(&pending, &mut state);

    if !state.errors.is_empty() {
        return Err(state.errors);
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_tiny_program_into_two_words() {
        let words = assemble("start\tMOV PAR, #1\n\tJMP #start\n", 0).unwrap();
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn collects_errors_instead_of_stopping_at_the_first() {
        let errors = assemble("!!!\n???\n", 0).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
