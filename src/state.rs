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

//! Assembler-wide mutable state: current addresses, the label table, and
//! the accumulated error list. One `State` is threaded through both
//! passes.

use crate::errors::{AddressOutOfRangeError, AssemblerError};

pub const COG_ADDRESS_MAX: i64 = 0x1FF;
pub const FIT_DEFAULT: i64 = 0x1F0;

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub line_number: usize,
    pub cog_address: Option<u32>,
    pub hub_address: Option<u32>,
    /// Set on a bare label when a later `_RET`-suffixed label is added for
    /// it, pointing back at that `_RET` label's index in `State::labels`.
    pub ret_label_index: Option<usize>,
}

/// A label matches `:?[_A-Z][_A-Z0-9]*`, case-insensitively.
fn is_valid_label(token: &str) -> bool {
    let body = token.strip_prefix(':').unwrap_or(token);
    let mut chars = body.chars();

    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[derive(Debug, Default)]
pub struct State {
    pub line_number: usize,
    pub cog_address: u32,
    pub hub_address: u32,
    pub current_label: String,
    pub labels: Vec<Label>,
    pub errors: Vec<AssemblerError>,
}

impl State {
    pub fn new(hub_address: u32) -> Self {
        State {
            hub_address,
            ..Default::default()
        }
    }

    pub fn org(&mut self, address: i64) -> Result<(), AddressOutOfRangeError> {
        if address < 0 || address > COG_ADDRESS_MAX {
            return Err(AddressOutOfRangeError(address));
        }

        self.cog_address = address as u32;

        Ok(())
    }

    pub fn fit(&mut self, address: i64) -> Result<bool, AddressOutOfRangeError> {
        if address < 0 || address > FIT_DEFAULT {
            return Err(AddressOutOfRangeError(address));
        }

        Ok((self.cog_address as i64) < address)
    }

    pub fn res(&mut self, count: i64) -> Result<(), AssemblerError> {
        if count < 1 || (self.cog_address as i64 + count) > COG_ADDRESS_MAX {
            return Err(AssemblerError::new(
                self.line_number,
                "The value for RES is out of range.",
            ));
        }

        self.cog_address += count as u32;

        Ok(())
    }

    /// Restores `current_label` to whatever scope was active at
    /// `line_number`, so Pass 2 can resolve local labels (`:loop`) the same
    /// way Pass 1 saw them.
    pub fn set_line_number(&mut self, line_number: usize) {
        self.line_number = line_number;

        self.current_label = self
            .labels
            .iter()
            .filter(|l| l.line_number <= line_number && !l.name.contains(':'))
            .last()
            .map(|l| l.name.clone())
            .unwrap_or_default();
    }

    /// Validates and records a label declaration. Returns `false` (rather
    /// than an error) on a malformed or duplicate name, matching the
    /// reference's boolean-returning `AddLabel`; the caller turns that into
    /// an `AssemblerError`.
    pub fn add_label(&mut self, token: &str) -> bool {
        if !is_valid_label(token) {
            return false;
        }

        let name = if let Some(local) = token.strip_prefix(':') {
            format!("{}:{}", self.current_label, local)
        } else {
            self.current_label = token.to_string();

            if let Some(base) = token.strip_suffix("_RET") {
                if let Some(idx) = self.labels.iter().position(|l| l.name == base) {
                    let new_index = self.labels.len();
                    self.labels[idx].ret_label_index = Some(new_index);
                }
            }

            token.to_string()
        };

        if self.labels.iter().any(|l| l.name == name) {
            return false;
        }

        self.labels.push(Label {
            name,
            line_number: self.line_number,
            cog_address: None,
            hub_address: None,
            ret_label_index: None,
        });

        true
    }

    /// Assigns addresses to every trailing label that's still unresolved:
    /// "a label refers to the address of the next emitted code."
    pub fn fix_label_addresses(&mut self) {
        for label in self.labels.iter_mut().rev() {
            if label.cog_address.is_some() {
                break;
            }

            label.cog_address = Some(self.cog_address);
            label.hub_address = Some(self.hub_address);
        }
    }

    /// Resolves a (possibly colon-scoped) label name to its cog or hub
    /// address.
    pub fn label_address(&self, name: &str, hub: bool) -> Option<u32> {
        let resolved = if let Some(local) = name.strip_prefix(':') {
            format!("{}:{}", self.current_label, local)
        } else {
            name.to_string()
        };

        self.labels
            .iter()
            .find(|l| l.name == resolved)
            .and_then(|l| if hub { l.hub_address } else { l.cog_address })
    }

    pub fn add_error(&mut self, error: AssemblerError) {
        self.errors.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_sets_cog_address_within_range() {
        let mut state = State::new(0x10);
        state.org(0x10).unwrap();
        assert_eq!(state.cog_address, 0x10);
        assert!(state.org(0x200).is_err());
        assert!(state.org(-1).is_err());
    }

    #[test]
    fn fit_compares_against_cog_address() {
        let mut state = State::new(0x10);
        state.cog_address = 0x1F0;
        assert!(!state.fit(0x1F0).unwrap());
        state.cog_address = 0x1EF;
        assert!(state.fit(0x1F0).unwrap());
        assert!(state.fit(0x200).is_err());
    }

    #[test]
    fn res_advances_and_rejects_overflow() {
        let mut state = State::new(0x10);
        state.cog_address = 0x1FE;
        assert!(state.res(1).is_ok());
        assert_eq!(state.cog_address, 0x1FF);
        assert!(state.res(1).is_err());
        assert!(state.res(0).is_err());
    }

    #[test]
    fn local_labels_scope_to_the_preceding_non_local_label() {
        let mut state = State::new(0x10);
        state.line_number = 1;
        assert!(state.add_label("WORKER"));
        state.line_number = 2;
        assert!(state.add_label(":LOOP"));
        state.fix_label_addresses();

        assert_eq!(state.label_address("WORKER", false), Some(0));
        assert_eq!(state.label_address(":LOOP", false), Some(0));
        assert_eq!(state.labels[1].name, "WORKER:LOOP");
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let mut state = State::new(0x10);
        assert!(state.add_label("START"));
        assert!(!state.add_label("START"));
    }

    #[test]
    fn ret_labels_link_back_to_their_bare_counterpart() {
        let mut state = State::new(0x10);
        assert!(state.add_label("MYSUB"));
        assert!(state.add_label("MYSUB_RET"));
        assert_eq!(state.labels[0].ret_label_index, Some(1));
    }

    #[test]
    fn fix_label_addresses_stops_at_first_resolved_label() {
        let mut state = State::new(0x10);
        state.add_label("A");
        state.cog_address = 0;
        state.hub_address = 0x10;
        state.fix_label_addresses();
        state.cog_address = 5;
        state.hub_address = 0x15;
        state.add_label("B");
        state.fix_label_addresses();

        assert_eq!(state.label_address("A", false), Some(0));
        assert_eq!(state.label_address("B", false), Some(5));
    }
}
