//! Property tests: the Disassembler and CFG builder must never panic,
//! regardless of how garbled the input bytecode is.

use std::rc::Rc;

use proptest::prelude::*;

use pybc_verify::cfg::CfgBuilder;
use pybc_verify::codeobj::CodeObject;
use pybc_verify::instruction::{normalize_all, Disassembler};
use pybc_verify::opcode_table::{opcode_table, OpcodeTable};
use pybc_verify::version::{Implementation, PyVersion};

fn table() -> OpcodeTable {
    opcode_table(PyVersion::new(3, 11), Implementation::CPython)
}

fn code_with_bytes(bytes: Vec<u8>) -> CodeObject {
    CodeObject {
        argcount: 0,
        posonlyargcount: 0,
        kwonlyargcount: 0,
        stacksize: 8,
        flags: 0,
        code: Rc::from(bytes.into_boxed_slice()),
        consts: vec![],
        names: vec![],
        localsplusnames: vec![],
        localspluskinds: Rc::from(Vec::new().into_boxed_slice()),
        filename: Rc::from("fuzz.py"),
        name: Rc::from("fuzzed"),
        qualname: Rc::from("fuzzed"),
        firstlineno: 1,
        linetable: Rc::from(Vec::new().into_boxed_slice()),
        exceptiontable: Rc::from(Vec::new().into_boxed_slice()),
    }
}

proptest! {
    #[test]
    fn disassembler_never_panics_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let t = table();
        let code = code_with_bytes(bytes);
        let disasm = Disassembler::new(&t);
        let _ = disasm.disassemble(&code);
    }

    #[test]
    fn disassembler_emits_even_length_aligned_stream(bytes in prop::collection::vec(any::<u8>(), 0..256).prop_map(|mut b| { if b.len() % 2 != 0 { b.push(0); } b })) {
        let t = table();
        let code = code_with_bytes(bytes);
        let disasm = Disassembler::new(&t);
        if let Ok(insts) = disasm.disassemble(&code) {
            for w in insts.windows(2) {
                prop_assert!(w[1].offset > w[0].offset);
            }
        }
    }

    #[test]
    fn cfg_builder_never_panics_on_arbitrary_normalized_stream(bytes in prop::collection::vec(any::<u8>(), 0..256).prop_map(|mut b| { if b.len() % 2 != 0 { b.push(0); } b })) {
        let t = table();
        let code = code_with_bytes(bytes);
        let disasm = Disassembler::new(&t);
        if let Ok(raw) = disasm.disassemble(&code) {
            let normalized = normalize_all(&raw, &t);
            let cfg = CfgBuilder::build(&normalized);
            prop_assert!(cfg.block_count() <= normalized.len() + 1);
        }
    }
}
