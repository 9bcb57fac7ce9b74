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

//! The two-pass assembler proper: Pass 1 classifies each source line and
//! lays out addresses; Pass 2 evaluates operands and encodes instruction
//! words. Both passes collect errors onto `State` instead of aborting on
//! the first one, so a source file with several mistakes reports all of
//! them in one run.

use crate::errors::AssemblerError;
use crate::eval::{Evaluator, Value};
use crate::state::{State, FIT_DEFAULT};
use crate::tables::{CONDITIONS, DATATYPES, DIRECTIVES, EFFECTS, INSTRUCTIONS, RESERVED_WORDS};

/// An instruction or datatype line that survived Pass 1, waiting for Pass 2
/// to evaluate its operands and splice them into an instruction template.
#[derive(Debug, Clone)]
pub struct PendingLine {
    pub cond: String,
    pub opcode: String,
    pub parameters: String,
    pub line_number: usize,
}

/// Splits on the first run of whitespace, the way `str.split(maxsplit=1)`
/// does: leading whitespace on each half is trimmed, the token itself is
/// not.
fn split_ws1(s: &str) -> Vec<&str> {
    let s = s.trim_start();
    if s.is_empty() {
        return vec![];
    }

    match s.find(|c: char| c.is_whitespace()) {
        None => vec![s],
        Some(idx) => vec![&s[..idx], s[idx..].trim_start()],
    }
}

/// Tokenizes on any run of whitespace or commas, dropping empty tokens.
/// Used once a parameter string's trailing effect flags need separating
/// from its operand list, regardless of whether the source wrote
/// `d, s WZ` or `d,s,WZ`.
fn split_operands(s: &str) -> Vec<&str> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn pass1(source: &str, state: &mut State) -> Vec<PendingLine> {
    let mut pending = Vec::new();

    for raw_line in source.lines() {
        state.line_number += 1;

        let line = match raw_line.find('\'') {
            Some(idx) => &raw_line[..idx],
            None => raw_line,
        };

        if line.trim().is_empty() {
            continue;
        }

        let line = line.to_uppercase();

        match pass1_line(&line, state) {
            Ok(Some(p)) => pending.push(p),
            Ok(None) => {}
            Err(e) => state.add_error(e),
        }
    }

    pending
}

fn pass1_line(line: &str, state: &mut State) -> Result<Option<PendingLine>, AssemblerError> {
    let mut parts = split_ws1(line);

    let mut label = "";
    let mut directive = "";
    let mut cond = "";
    let mut opcode = "";
    let mut parameters = String::new();

    if !parts.is_empty() && !RESERVED_WORDS.contains(parts[0]) {
        label = parts[0];
        parts = if parts.len() == 2 {
            split_ws1(parts[1])
        } else {
            vec![]
        };
    }

    if !parts.is_empty() && DIRECTIVES.contains(&parts[0]) {
        directive = parts[0];
        parameters = if parts.len() == 2 {
            parts[1].to_string()
        } else {
            String::new()
        };
        parts = vec![];
    }

    if !parts.is_empty() && CONDITIONS.contains_key(parts[0]) {
        cond = parts[0];
        parts = if parts.len() == 2 {
            split_ws1(parts[1])
        } else {
            vec![]
        };
    }

    if !parts.is_empty() && INSTRUCTIONS.contains_key(parts[0]) {
        opcode = parts[0];
        parameters = if parts.len() == 2 {
            parts[1].to_string()
        } else {
            String::new()
        };
        parts = vec![];
    }

    if !parts.is_empty() && DATATYPES.contains(&parts[0]) {
        opcode = parts[0];
        parameters = if parts.len() == 2 {
            parts[1].to_string()
        } else {
            String::new()
        };
        parts = vec![];
    }

    if !label.is_empty() {
        if directive == "ORG" || directive == "FIT" {
            return Err(AssemblerError::new(
                state.line_number,
                "Labels are not allowed for ORG or FIT.",
            ));
        }

        if !state.add_label(label) {
            return Err(AssemblerError::new(
                state.line_number,
                format!("Could not add label '{}'", label),
            ));
        }
    }

    if !directive.is_empty() {
        match directive {
            "ORG" => {
                let address = if parameters.is_empty() {
                    0
                } else {
                    eval_int(&parameters, state)?
                };

                state
                    .org(address)
                    .map_err(|e| AssemblerError::new(state.line_number, e.to_string()))?;
            }
            "FIT" => {
                let address = if parameters.is_empty() {
                    FIT_DEFAULT
                } else {
                    eval_int(&parameters, state)?
                };

                let fits = state
                    .fit(address)
                    .map_err(|e| AssemblerError::new(state.line_number, e.to_string()))?;

                if !fits {
                    return Err(AssemblerError::new(state.line_number, "It doesn't FIT!"));
                }
            }
            "RES" => {
                state.fix_label_addresses();

                let count = if parameters.is_empty() {
                    1
                } else {
                    eval_int(&parameters, state)?
                };

                state.res(count)?;
            }
            _ => unreachable!("directive table and match arms are kept in sync"),
        }
    }

    let mut result = None;

    if !opcode.is_empty() {
        state.fix_label_addresses();

        result = Some(PendingLine {
            cond: cond.to_string(),
            opcode: opcode.to_string(),
            parameters: parameters.trim().to_string(),
            line_number: state.line_number,
        });

        state.cog_address += 1;
        state.hub_address += 1;
    }

    if directive.is_empty() && opcode.is_empty() && label.is_empty() {
        return Err(AssemblerError::new(
            state.line_number,
            format!("unrecognized text: {}", line),
        ));
    }

    Ok(result)
}

fn eval_int(expression: &str, state: &State) -> Result<i64, AssemblerError> {
    Evaluator::new(state)
        .evaluate(expression)?
        .as_int(state.line_number)
}

/// Resolves a d- or s-field operand (a register, a label, or a constant
/// expression) to its numeric value.
fn eval_field(expression: &str, state: &State) -> Result<i64, AssemblerError> {
    eval_int(expression, state)
}

/// Packs a value into a 9-bit field. Values outside `0..=0x1FF` are masked,
/// not rejected -- the d-field has no upper-bound check in the reference
/// either, and the bit pattern is all that ends up in the instruction word.
fn field_bits(value: i64) -> String {
    format!("{:09b}", (value as u32) & 0x1FF)
}

pub fn pass2(pending: &[PendingLine], state: &mut State) -> Vec<u32> {
    let mut words = Vec::new();

    for line in pending {
        state.set_line_number(line.line_number);

        match encode_line(line, state) {
            Ok(word) => words.push(word),
            Err(e) => state.add_error(e),
        }
    }

    words
}

fn encode_line(line: &PendingLine, state: &State) -> Result<u32, AssemblerError> {
    if DATATYPES.contains(&line.opcode.as_str()) {
        return encode_datatype(&line.opcode, &line.parameters, state);
    }

    let def = INSTRUCTIONS
        .get(line.opcode.as_str())
        .expect("pass 1 only queues known opcodes");

    let template: String = def.template.chars().filter(|c| !c.is_whitespace()).collect();
    let mut bits = [0u8; 32];
    for (i, b) in template.bytes().enumerate() {
        bits[i] = b;
    }

    if def.accepts_condition && !line.cond.is_empty() {
        let cond_bits = CONDITIONS
            .get(line.cond.as_str())
            .expect("pass 1 only queues known conditions");
        for (i, b) in cond_bits.bytes().enumerate() {
            bits[10 + i] = b;
        }
    }

    if !line.parameters.is_empty() {
        let mut tokens = split_operands(&line.parameters);

        let mut wr_or_nr = false;
        while let Some(&last) = tokens.last() {
            if !EFFECTS.contains(&last) {
                break;
            }

            match last {
                "WZ" => {
                    if !def.can_set_z {
                        return Err(AssemblerError::new(state.line_number, "WZ Not allowed!"));
                    }
                    bits[6] = b'1';
                }
                "WC" => {
                    if !def.can_set_c {
                        return Err(AssemblerError::new(state.line_number, "WC Not allowed!"));
                    }
                    bits[7] = b'1';
                }
                "WR" | "NR" => {
                    if !def.can_set_r {
                        return Err(AssemblerError::new(state.line_number, "WR Not allowed!"));
                    }
                    if wr_or_nr {
                        return Err(AssemblerError::new(
                            state.line_number,
                            "Cannot use NR and WR at the same time.",
                        ));
                    }
                    bits[8] = if last == "WR" { b'1' } else { b'0' };
                    wr_or_nr = true;
                }
                _ => unreachable!("checked above"),
            }

            tokens.pop();
        }

        let has_d = template.contains('d');
        let has_s = template.contains('s');

        let (d_expr, s_expr): (Option<&str>, Option<&str>) = if has_d && has_s {
            if tokens.len() != 2 {
                return Err(AssemblerError::new(
                    state.line_number,
                    format!("Unrecognized parameters: {}", line.parameters),
                ));
            }
            (Some(tokens[0]), Some(tokens[1]))
        } else if has_d {
            if tokens.len() != 1 {
                return Err(AssemblerError::new(
                    state.line_number,
                    format!("Unrecognized parameters: {}", line.parameters),
                ));
            }
            (Some(tokens[0]), None)
        } else if has_s {
            if tokens.len() != 1 {
                return Err(AssemblerError::new(
                    state.line_number,
                    format!("Unrecognized parameters: {}", line.parameters),
                ));
            }
            (None, Some(tokens[0]))
        } else if !tokens.is_empty() {
            return Err(AssemblerError::new(
                state.line_number,
                format!("Unrecognized parameters: {}", line.parameters),
            ));
        } else {
            (None, None)
        };

        if let Some(d) = d_expr {
            let value = eval_field(d.trim(), state)?;
            splice(&mut bits, b'd', &field_bits(value));
        }

        if let Some(s) = s_expr {
            let mut s = s.trim();

            if let Some(rest) = s.strip_prefix('#') {
                if !def.accepts_immediate {
                    return Err(AssemblerError::new(
                        state.line_number,
                        "Source cannot have an immediate value.",
                    ));
                }
                bits[9] = b'1';
                s = rest;
            }

            let value = eval_field(s, state)?;
            if value > 0x1FF {
                return Err(AssemblerError::new(
                    state.line_number,
                    "s-field expression evaluated to a value greater than $1FF.",
                ));
            }
            splice(&mut bits, b's', &field_bits(value));
        }

        if let Some(fix) = def.late_fix {
            fix(&mut bits, &line.parameters, state)?;
        }
    }

    for b in bits.iter_mut() {
        if *b != b'0' && *b != b'1' {
            *b = b'0';
        }
    }

    let bit_string = std::str::from_utf8(&bits).expect("bits are always ascii '0'/'1'");
    let value = u32::from_str_radix(bit_string, 2).expect("bits are always 32 '0'/'1' chars");

    Ok(value)
}

fn splice(bits: &mut [u8; 32], marker: u8, value: &str) {
    let start = bits.iter().position(|&b| b == marker);
    let stop = bits.iter().rposition(|&b| b == marker);

    if let (Some(start), Some(stop)) = (start, stop) {
        for (i, b) in value.bytes().enumerate() {
            bits[start + i] = b;
        }
        debug_assert_eq!(stop - start + 1, value.len());
    }
}

fn encode_datatype(keyword: &str, parameters: &str, state: &State) -> Result<u32, AssemblerError> {
    let value = Evaluator::new(state).evaluate(parameters)?;

    let packed = match keyword {
        "BYTE" => pack_datatype(value, 8, 0x100, 3),
        "WORD" => pack_datatype(value, 16, 0x1_0000, 1),
        _ => pack_long(value),
    };

    Ok(packed)
}

/// Implements the `BYTE`/`WORD` packing rule: the first list element (or
/// the scalar) seeds the low unit, later elements are shifted in above it
/// until the word is full. Extra elements beyond one 32-bit word are
/// silently dropped, matching the reference's fixed-width behavior.
fn pack_datatype(value: Value, unit_bits: u32, modulus: i64, pad_count: usize) -> u32 {
    match value {
        Value::List(items) => {
            let first = items.first().copied().unwrap_or(0);
            let mut temp: i64 = first;
            let mut count = unit_bits;

            let mut rest: Vec<i64> = items.iter().skip(1).copied().collect();
            rest.extend(std::iter::repeat(0).take(pad_count));

            for mut b in rest {
                if b < 0 {
                    b += modulus;
                }
                temp += b << count;
                count += unit_bits;
                if count == 32 {
                    break;
                }
            }

            temp as u32
        }
        Value::Int(mut v) => {
            if v < 0 {
                v += modulus;
            }
            v as u32
        }
    }
}

fn pack_long(value: Value) -> u32 {
    let mut v = match value {
        Value::List(items) => items.first().copied().unwrap_or(0),
        Value::Int(v) => v,
    };

    if v < 0 {
        v += 0x1_0000_0000;
    }

    v as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble_words(source: &str) -> (Vec<u32>, Vec<AssemblerError>) {
        let mut state = State::new(1);
        let pending = pass1(source, &mut state);
        let words = pass2(&pending, &mut state);
        (words, state.errors.clone())
    }

    #[test]
    fn single_mov_immediate() {
        let (words, errors) = assemble_words("MOV PAR, #1\n");
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(words.len(), 1);
        // opcode 101000, no condition override (IF_ALWAYS=1111 is the
        // template default), i=1, d=PAR's register number, s=1.
        let word = words[0];
        assert_eq!(word >> 26, 0b101000);
        assert_eq!((word >> 22) & 1, 1, "immediate bit must be set");
        assert_eq!((word >> 9) & 0x1FF, 0x1F0, "d-field must carry PAR");
        assert_eq!(word & 0x1FF, 1, "s-field must carry the literal 1");
    }

    #[test]
    fn org_places_following_labels() {
        let mut state = State::new(1);
        let pending = pass1("\tORG $10\nloop\tMOV a, b\n", &mut state);
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.label_address("LOOP", false), Some(0x10));
        let _ = pass2(&pending, &mut state);
    }

    #[test]
    fn fit_failure_reports_an_error() {
        let mut state = State::new(1);
        state.cog_address = 0x1F5;
        let _ = pass1("\tFIT $1F0\n", &mut state);
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].message.contains("FIT"));
    }

    #[test]
    fn res_advances_past_reserved_space() {
        let mut state = State::new(1);
        let pending = pass1("buf\tRES 4\nafter\tNOP\n", &mut state);
        assert!(state.errors.is_empty(), "{:?}", state.errors);
        assert_eq!(state.label_address("AFTER", false), Some(4));
        let _ = pass2(&pending, &mut state);
    }

    #[test]
    fn wz_on_an_instruction_that_cannot_set_it_is_rejected() {
        let (_, errors) = assemble_words("RDBYTE PAR, CNT WZ\n");
        // RDBYTE can set Z; NOP cannot set anything.
        assert!(errors.is_empty(), "{:?}", errors);

        let (_, errors) = assemble_words("NOP WZ\n");
        assert!(!errors.is_empty());
    }

    #[test]
    fn call_resolves_its_ret_label() {
        let source = "sub\tMOV PAR, CNT\nsub_ret\tRET\nentry\tCALL #sub\n";
        let (words, errors) = assemble_words(source);
        assert!(errors.is_empty(), "{:?}", errors);
        // `sub_ret` sits at cog address 1; CALL's d-field carries that
        // back-address.
        let call_word = words[2];
        assert_eq!((call_word >> 9) & 0x1FF, 1);
    }

    #[test]
    fn byte_datatype_packs_a_list_into_one_word() {
        let (words, errors) = assemble_words("BYTE 1, 2, 3, 4, 5\n");
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(words[0], 0x0403_0201);
    }

    #[test]
    fn long_datatype_takes_only_the_first_list_element() {
        let (words, errors) = assemble_words("LONG -1, 99\n");
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(words[0], 0xFFFF_FFFF);
    }

    #[test]
    fn unrecognized_text_is_an_error() {
        let mut state = State::new(1);
        let _ = pass1("!!!\n", &mut state);
        assert_eq!(state.errors.len(), 1);
    }
}
