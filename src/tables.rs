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

//! Static, process-wide language tables: condition codes, symbolic
//! constants, hardware registers, and the instruction set itself.
//!
//! Everything here is built once, lazily, and is immutable afterward. A
//! malformed instruction template is a configuration bug, not a user
//! error, so table construction panics instead of returning a `Result`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::errors::AssemblerError;
use crate::state::State;

pub const DIRECTIVES: [&str; 3] = ["ORG", "FIT", "RES"];
pub const EFFECTS: [&str; 4] = ["WC", "WZ", "WR", "NR"];
pub const DATATYPES: [&str; 3] = ["BYTE", "WORD", "LONG"];

/// A late-fix hook runs after the rest of an instruction's bits have been
/// spliced in, and gets a chance to patch the template using information
/// that isn't available until the whole word is otherwise built. `CALL` is
/// the only instruction that needs one: it resolves the `_RET` companion
/// of its target label and overwrites the d-field with that address.
pub type LateFix = fn(bits: &mut [u8; 32], params: &str, state: &State) -> Result<(), AssemblerError>;

#[derive(Clone, Copy)]
pub struct InstructionDef {
    pub template: &'static str,
    pub can_set_z: bool,
    pub can_set_c: bool,
    pub can_set_r: bool,
    pub accepts_immediate: bool,
    pub accepts_condition: bool,
    pub late_fix: Option<LateFix>,
}

fn fix_call(bits: &mut [u8; 32], params: &str, state: &State) -> Result<(), AssemblerError> {
    let params = params.trim();

    if !params.starts_with('#') {
        return Err(AssemblerError::new(
            state.line_number,
            format!("Cannot fix CALL. Parameters is: {}", params),
        ));
    }

    let mut label = params[1..].to_string();

    if label.starts_with(':') {
        label = format!("{}{}", state.current_label, label);
    }

    let target = state
        .labels
        .iter()
        .find(|l| l.name == label)
        .ok_or_else(|| {
            AssemblerError::new(state.line_number, "Cannot fix CALL. Label not found.")
        })?;

    let ret_idx = target.ret_label_index.ok_or_else(|| {
        AssemblerError::new(
            state.line_number,
            "Cannot fix CALL. No matching '_RET' label.",
        )
    })?;

    let ret_cog = state.labels[ret_idx]
        .cog_address
        .expect("_RET label must be resolved by the time CALL is fixed");

    for (i, bit) in format!("{:09b}", ret_cog).bytes().enumerate() {
        bits[14 + i] = bit;
    }

    Ok(())
}

fn inst(
    template: &'static str,
    can_set_z: bool,
    can_set_c: bool,
    can_set_r: bool,
    accepts_immediate: bool,
    accepts_condition: bool,
) -> InstructionDef {
    InstructionDef {
        template,
        can_set_z,
        can_set_c,
        can_set_r,
        accepts_immediate,
        accepts_condition,
        late_fix: None,
    }
}

macro_rules! instruction_table {
    ( $( $name:literal => ( $tpl:literal, $z:literal, $c:literal, $r:literal, $i:literal, $cond:literal $(, $fix:expr)? ) ),+ $(,)? ) => {{
        let mut map: HashMap<&'static str, InstructionDef> = HashMap::new();
        $(
            #[allow(unused_mut)]
            let mut def = inst($tpl, $z, $c, $r, $i, $cond);
            $( def.late_fix = Some($fix); )?
            let packed: String = def.template.chars().filter(|c| !c.is_whitespace()).collect();
            assert_eq!(
                packed.len(),
                32,
                "instruction template for {} is not 32 bits wide",
                $name
            );
            map.insert($name, def);
        )+
        map
    }};
}

pub static INSTRUCTIONS: LazyLock<HashMap<&'static str, InstructionDef>> = LazyLock::new(|| {
    instruction_table! {
        "ABS"     => ("101010 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ABSNEG"  => ("101011 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ADD"     => ("100000 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ADDABS"  => ("100010 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ADDS"    => ("110100 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ADDSX"   => ("110110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ADDX"    => ("110010 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "AND"     => ("011000 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ANDN"    => ("011001 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "CALL"    => ("010111 0011 1111 ????????? sssssssss", true,  false, true,  true,  true, fix_call),
        "CLKSET"  => ("000011 0001 1111 ddddddddd ------000", false, false, false, false, true),
        "CMP"     => ("100001 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "CMPS"    => ("110000 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "CMPSUB"  => ("111000 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "CMPSX"   => ("110001 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "CMPX"    => ("110011 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "COGID"   => ("000011 0011 1111 ddddddddd ------001", true,  true,  true,  false, true),
        "COGINIT" => ("000011 0001 1111 ddddddddd ------010", true,  true,  true,  false, true),
        "COGSTOP" => ("000011 0001 1111 ddddddddd ------011", true,  true,  true,  false, true),
        "DJNZ"    => ("111001 001i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "HUBOP"   => ("000011 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "JMP"     => ("010111 000i 1111 --------- sssssssss", true,  true,  false, true,  true),
        "JMPRET"  => ("010111 001i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "LOCKCLR" => ("000011 0001 1111 ddddddddd ------111", true,  true,  true,  false, true),
        "LOCKNEW" => ("000011 0011 1111 ddddddddd ------100", true,  true,  false, false, true),
        "LOCKRET" => ("000011 0001 1111 ddddddddd ------101", true,  true,  true,  false, true),
        "LOCKSET" => ("000011 0001 1111 ddddddddd ------110", true,  true,  true,  false, true),
        "MAX"     => ("010011 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MAXS"    => ("010001 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MIN"     => ("010010 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MINS"    => ("010000 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MOV"     => ("101000 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MOVD"    => ("010101 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MOVI"    => ("010110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MOVS"    => ("010100 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MUXC"    => ("011100 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MUXNC"   => ("011101 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MUXNZ"   => ("011111 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "MUXZ"    => ("011110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "NEG"     => ("101001 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "NEGC"    => ("101100 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "NEGNC"   => ("101101 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "NEGNZ"   => ("101111 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "NEGZ"    => ("101110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "NOP"     => ("------ ---- 0000 --------- ---------", false, false, false, false, false),
        "OR"      => ("011010 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "RCL"     => ("001101 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "RCR"     => ("001100 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "RDBYTE"  => ("000000 001i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "RDLONG"  => ("000010 001i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "RDWORD"  => ("000001 001i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "RET"     => ("010111 0001 1111 --------- ---------", true,  true,  true,  true,  true),
        "REV"     => ("001111 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ROL"     => ("001001 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "ROR"     => ("001000 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SAR"     => ("001110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SHL"     => ("001011 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SHR"     => ("001010 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUB"     => ("100001 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUBABS"  => ("100011 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUBS"    => ("110101 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUBSX"   => ("110111 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUBX"    => ("110011 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUMC"    => ("100100 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUMNC"   => ("100101 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUMNZ"   => ("100111 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "SUMZ"    => ("100110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "TEST"    => ("011000 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "TESTN"   => ("011001 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "TJNZ"    => ("111010 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "TJZ"     => ("111011 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "WAITCNT" => ("111110 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "WAITPEQ" => ("111100 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "WAITPNE" => ("111101 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "WAITVID" => ("111111 000i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
        "WRBYTE"  => ("000000 000i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "WRLONG"  => ("000010 000i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "WRWORD"  => ("000001 000i 1111 ddddddddd sssssssss", true,  true,  false, true,  true),
        "XOR"     => ("011011 001i 1111 ddddddddd sssssssss", true,  true,  true,  true,  true),
    }
});

pub static CONDITIONS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("IF_ALWAYS", "1111"),
        ("IF_NEVER", "0000"),
        ("IF_E", "1010"),
        ("IF_NE", "0101"),
        ("IF_A", "0001"),
        ("IF_B", "1100"),
        ("IF_AE", "0011"),
        ("IF_BE", "1110"),
        ("IF_C", "1100"),
        ("IF_NC", "0011"),
        ("IF_Z", "1010"),
        ("IF_NZ", "0101"),
        ("IF_C_EQ_Z", "1001"),
        ("IF_C_NE_Z", "0110"),
        ("IF_C_AND_Z", "1000"),
        ("IF_C_AND_NZ", "0100"),
        ("IF_NC_AND_Z", "0010"),
        ("IF_NC_AND_NZ", "0001"),
        ("IF_C_OR_Z", "1110"),
        ("IF_C_OR_NZ", "1101"),
        ("IF_NC_OR_Z", "1011"),
        ("IF_NC_OR_NZ", "0111"),
        ("IF_Z_EQ_C", "1001"),
        ("IF_Z_NE_C", "0110"),
        ("IF_Z_AND_C", "1000"),
        ("IF_Z_AND_NC", "0010"),
        ("IF_NZ_AND_C", "0100"),
        ("IF_NZ_AND_NC", "0001"),
        ("IF_Z_OR_C", "1110"),
        ("IF_Z_OR_NC", "1011"),
        ("IF_NZ_OR_C", "1101"),
        ("IF_NZ_OR_NC", "0111"),
    ])
});

pub static CONSTANTS: LazyLock<HashMap<&'static str, i64>> = LazyLock::new(|| {
    HashMap::from([
        ("TRUE", -1i64),
        ("FALSE", 0),
        ("POSX", 2147483647),
        ("NEGX", -2147483648),
        ("PI", 0x40490FDBi64),
    ])
});

pub static REGISTERS: LazyLock<HashMap<&'static str, u32>> = LazyLock::new(|| {
    HashMap::from([
        ("PAR", 0x1F0),
        ("CNT", 0x1F1),
        ("INA", 0x1F2),
        ("INB", 0x1F3),
        ("OUTA", 0x1F4),
        ("OUTB", 0x1F5),
        ("DIRA", 0x1F6),
        ("DIRB", 0x1F7),
        ("CTRA", 0x1F8),
        ("CTRB", 0x1F9),
        ("FRQA", 0x1FA),
        ("FRQB", 0x1FB),
        ("PHSA", 0x1FC),
        ("PHSB", 0x1FD),
        ("VCFG", 0x1FE),
        ("VSCL", 0x1FF),
    ])
});

pub static RESERVED_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    let mut set: HashSet<&'static str> = HashSet::new();
    set.extend(DIRECTIVES);
    set.extend(EFFECTS);
    set.extend(DATATYPES);
    set.extend(INSTRUCTIONS.keys());
    set.extend(CONDITIONS.keys());
    set.extend(CONSTANTS.keys());
    set.extend(REGISTERS.keys());
    set
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_is_32_bits() {
        for (name, def) in INSTRUCTIONS.iter() {
            let packed: String = def.template.chars().filter(|c| !c.is_whitespace()).collect();
            assert_eq!(packed.len(), 32, "{} template is not 32 bits", name);
        }
    }

    #[test]
    fn reserved_words_cover_every_table() {
        assert!(RESERVED_WORDS.contains("ORG"));
        assert!(RESERVED_WORDS.contains("MOV"));
        assert!(RESERVED_WORDS.contains("IF_ALWAYS"));
        assert!(RESERVED_WORDS.contains("PI"));
        assert!(RESERVED_WORDS.contains("DIRA"));
        assert!(RESERVED_WORDS.contains("BYTE"));
        assert!(RESERVED_WORDS.contains("WZ"));
    }

    #[test]
    fn call_has_a_late_fix_hook() {
        assert!(INSTRUCTIONS["CALL"].late_fix.is_some());
        assert!(INSTRUCTIONS["MOV"].late_fix.is_none());
    }
}
