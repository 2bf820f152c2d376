use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::rc::Rc;

use pybc_verify::analysis::Analyzer;
use pybc_verify::cfg::CfgBuilder;
use pybc_verify::codeobj::{CodeObject, OperandValue};
use pybc_verify::instruction::{normalize_all, Disassembler};
use pybc_verify::opcode_table::{opcode_table, OpcodeTable};
use pybc_verify::version::{Implementation, PyVersion};

fn table() -> OpcodeTable {
    opcode_table(PyVersion::new(3, 11), Implementation::CPython)
}

fn byte_for(t: &OpcodeTable, name: &str) -> u8 {
    (0..=255u8)
        .find(|c| t.info_for_code(*c).map(|i| i.name) == Some(name))
        .unwrap_or_else(|| panic!("no opcode byte for {name}"))
}

/// A loop that counts down from a local to zero, the kind of unit whose
/// CFG has a real back edge and a conditional exit.
fn countdown_loop_code(t: &OpcodeTable, iterations: u32) -> CodeObject {
    let load_fast = byte_for(t, "LOAD_FAST");
    let load_const = byte_for(t, "LOAD_CONST");
    let compare_op = byte_for(t, "COMPARE_OP");
    let pop_jump_if_false = byte_for(t, "POP_JUMP_IF_FALSE");
    let binary_op = byte_for(t, "BINARY_OP");
    let store_fast = byte_for(t, "STORE_FAST");
    let jump_backward = byte_for(t, "JUMP_BACKWARD");
    let return_value = byte_for(t, "RETURN_VALUE");

    let mut code = Vec::new();
    for _ in 0..iterations {
        code.extend_from_slice(&[
            load_fast, 0,
            load_const, 0,
            compare_op, 0,
            pop_jump_if_false, 8,
            load_fast, 0,
            load_const, 1,
            binary_op, 0,
            store_fast, 0,
            jump_backward, 9,
        ]);
    }
    code.extend_from_slice(&[load_fast, 0, return_value, 0]);

    CodeObject {
        argcount: 1,
        posonlyargcount: 0,
        kwonlyargcount: 0,
        stacksize: 4,
        flags: 0,
        code: Rc::from(code.into_boxed_slice()),
        consts: vec![OperandValue::Int(0), OperandValue::Int(1)],
        names: vec![],
        localsplusnames: vec![Rc::from("n")],
        localspluskinds: Rc::from(Vec::new().into_boxed_slice()),
        filename: Rc::from("bench.py"),
        name: Rc::from("countdown"),
        qualname: Rc::from("countdown"),
        firstlineno: 1,
        linetable: Rc::from(Vec::new().into_boxed_slice()),
        exceptiontable: Rc::from(Vec::new().into_boxed_slice()),
    }
}

fn bench_disassemble(c: &mut Criterion) {
    let t = table();
    let mut group = c.benchmark_group("disassemble");

    for blocks in [1usize, 8, 64] {
        let code = countdown_loop_code(&t, blocks as u32);
        group.throughput(Throughput::Elements(blocks as u64));
        group.bench_with_input(BenchmarkId::new("countdown_loop", blocks), &code, |b, code| {
            let disasm = Disassembler::new(&t);
            b.iter(|| disasm.disassemble(black_box(code)).unwrap());
        });
    }
    group.finish();
}

fn bench_normalize_and_cfg(c: &mut Criterion) {
    let t = table();
    let code = countdown_loop_code(&t, 32);
    let disasm = Disassembler::new(&t);
    let raw = disasm.disassemble(&code).unwrap();

    c.bench_function("normalize_and_build_cfg", |b| {
        b.iter(|| {
            let normalized = normalize_all(black_box(&raw), &t);
            CfgBuilder::build(&normalized)
        });
    });
}

fn bench_full_unit_analysis(c: &mut Criterion) {
    let t = table();
    let code = Rc::new(countdown_loop_code(&t, 32));

    c.bench_function("analyze_unit", |b| {
        let analyzer = Analyzer::new(&t);
        b.iter(|| analyzer.analyze(black_box(&code)));
    });
}

criterion_group!(benches, bench_disassemble, bench_normalize_and_cfg, bench_full_unit_analysis);
criterion_main!(benches);
