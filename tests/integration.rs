//! Black-box pipeline tests: Loader -> Analyzer -> Comparator/Localizer,
//! driven through synthetic `.pyc` fixtures built straight from the
//! marshal wire format rather than a real CPython install.

use std::io::Write;

use pybc_verify::analysis::Analyzer;
use pybc_verify::comparator::{Comparator, Thresholds, Verdict};
use pybc_verify::loader::Loader;
use pybc_verify::localizer::Localizer;
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

fn short_ascii(s: &str) -> Vec<u8> {
    let mut out = vec![b'z'];
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
    out
}

fn marshal_bytes(b: &[u8]) -> Vec<u8> {
    let mut out = vec![b's'];
    out.extend_from_slice(&(b.len() as u32).to_le_bytes());
    out.extend_from_slice(b);
    out
}

fn marshal_int(v: i32) -> Vec<u8> {
    let mut out = vec![b'i'];
    out.extend_from_slice(&v.to_le_bytes());
    out
}

/// A minimal `def f(n): return n + <k>` code object, marshal-encoded by
/// hand in document order exactly as `read_code` expects it.
fn single_function_module(t: &OpcodeTable, k: i32) -> Vec<u8> {
    let load_fast = byte_for(t, "LOAD_FAST");
    let load_const = byte_for(t, "LOAD_CONST");
    let binary_op = byte_for(t, "BINARY_OP");
    let return_value = byte_for(t, "RETURN_VALUE");
    let code_bytes = vec![load_fast, 0, load_const, 0, binary_op, 0, return_value, 0];

    let mut b = Vec::new();
    b.extend_from_slice(&1u32.to_le_bytes()); // argcount
    b.extend_from_slice(&0u32.to_le_bytes()); // posonlyargcount
    b.extend_from_slice(&0u32.to_le_bytes()); // kwonlyargcount
    b.extend_from_slice(&2u32.to_le_bytes()); // stacksize
    b.extend_from_slice(&0u32.to_le_bytes()); // flags
    b.extend(marshal_bytes(&code_bytes)); // code
    b.push(b')'); // consts: small tuple of 1
    b.push(1);
    b.extend(marshal_int(k));
    b.push(b')'); // names: empty tuple
    b.push(0);
    b.push(b')'); // localsplusnames: ("n",)
    b.push(1);
    b.extend(short_ascii("n"));
    b.extend(marshal_bytes(&[])); // localspluskinds
    b.extend(short_ascii("m.py")); // filename
    b.extend(short_ascii("f")); // name
    b.extend(short_ascii("f")); // qualname
    b.extend_from_slice(&1u32.to_le_bytes()); // firstlineno
    b.extend(marshal_bytes(&[])); // linetable
    b.extend(marshal_bytes(&[])); // exceptiontable
    b
}

fn wrap_as_module(inner: &[u8]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&1u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend(marshal_bytes(&[])); // code: empty module body
    b.push(b')');
    b.push(1);
    b.push(b'c');
    b.extend_from_slice(inner);
    b.push(b')'); // names
    b.push(0);
    b.push(b')'); // localsplusnames
    b.push(0);
    b.extend(marshal_bytes(&[]));
    b.extend(short_ascii("m.py"));
    b.extend(short_ascii("<module>"));
    b.extend(short_ascii("<module>"));
    b.extend_from_slice(&1u32.to_le_bytes());
    b.extend(marshal_bytes(&[]));
    b.extend(marshal_bytes(&[]));
    b
}

fn write_pyc(body: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(&3495u16.to_le_bytes()).unwrap();
    f.write_all(&[0x0D, 0x0A]).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&0u64.to_le_bytes()).unwrap();
    f.write_all(&[b'c']).unwrap();
    f.write_all(body).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn identical_modules_compare_exact() {
    let t = table();
    let inner = single_function_module(&t, 1);
    let module = wrap_as_module(&inner);
    let f = write_pyc(&module);

    let orig = Loader::load(f.path()).unwrap();
    let comp = Loader::load(f.path()).unwrap();

    let orig_units = Analyzer::new(&t).analyze(&orig.root);
    let comp_units = Analyzer::new(&t).analyze(&comp.root);

    let comparator = Comparator::new(Thresholds::default());
    let report = comparator.compare(&orig_units, &comp_units, orig.version, comp.version);
    assert_eq!(report.verdict, Verdict::Exact);
    assert_eq!(report.summary.units_compared, 2);
    assert_eq!(report.summary.units_missing.len(), 0);
}

#[test]
fn differing_constant_demotes_verdict_and_localizes() {
    let t = table();
    let orig_module = wrap_as_module(&single_function_module(&t, 1));
    let comp_module = wrap_as_module(&single_function_module(&t, 2));

    let orig_f = write_pyc(&orig_module);
    let comp_f = write_pyc(&comp_module);

    let orig = Loader::load(orig_f.path()).unwrap();
    let comp = Loader::load(comp_f.path()).unwrap();

    let orig_units = Analyzer::new(&t).analyze(&orig.root);
    let comp_units = Analyzer::new(&t).analyze(&comp.root);

    let comparator = Comparator::new(Thresholds::default());
    let report = comparator.compare(&orig_units, &comp_units, orig.version, comp.version);
    assert_ne!(report.verdict, Verdict::Exact);

    let orig_unit = orig_units.iter().find(|u| u.path == "<module>.f").unwrap();
    let comp_unit = comp_units.iter().find(|u| u.path == "<module>.f").unwrap();

    let orig_cfg = pybc_verify::cfg::CfgBuilder::build(&pybc_verify::instruction::normalize_all(&orig_unit.insts, &t));
    let comp_cfg = pybc_verify::cfg::CfgBuilder::build(&pybc_verify::instruction::normalize_all(&comp_unit.insts, &t));

    let localizer = Localizer::default();
    let localization = localizer.locate(&orig_unit.insts, &comp_unit.insts, &orig_cfg, &comp_cfg);
    assert_eq!(localization.orig.opname, "LOAD_CONST");
    assert_eq!(localization.comp.opname, "LOAD_CONST");
    assert_ne!(localization.orig.argrepr, localization.comp.argrepr);
}

#[test]
fn missing_unit_is_reported_not_panicked() {
    let t = table();
    let module_with_fn = wrap_as_module(&single_function_module(&t, 1));
    let empty_module = {
        let mut b = Vec::new();
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&1u32.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend(marshal_bytes(&[]));
        b.push(b')');
        b.push(0);
        b.push(b')');
        b.push(0);
        b.push(b')');
        b.push(0);
        b.extend(marshal_bytes(&[]));
        b.extend(short_ascii("m.py"));
        b.extend(short_ascii("<module>"));
        b.extend(short_ascii("<module>"));
        b.extend_from_slice(&1u32.to_le_bytes());
        b.extend(marshal_bytes(&[]));
        b.extend(marshal_bytes(&[]));
        b
    };

    let orig_f = write_pyc(&module_with_fn);
    let comp_f = write_pyc(&empty_module);
    let orig = Loader::load(orig_f.path()).unwrap();
    let comp = Loader::load(comp_f.path()).unwrap();

    let orig_units = Analyzer::new(&t).analyze(&orig.root);
    let comp_units = Analyzer::new(&t).analyze(&comp.root);

    let comparator = Comparator::new(Thresholds::default());
    let report = comparator.compare(&orig_units, &comp_units, orig.version, comp.version);
    assert_eq!(report.verdict, Verdict::Mismatch);
    assert_eq!(report.summary.units_missing, vec!["<module>.f".to_string()]);
}

#[test]
fn version_mismatch_short_circuits_comparison() {
    let t = table();
    let module = wrap_as_module(&single_function_module(&t, 1));
    let f = write_pyc(&module);
    let orig = Loader::load(f.path()).unwrap();

    let comparator = Comparator::new(Thresholds::default());
    let units = Analyzer::new(&t).analyze(&orig.root);
    let report = comparator.compare(&units, &units, PyVersion::new(3, 11), PyVersion::new(3, 12));
    assert_eq!(report.verdict, Verdict::Mismatch);
    assert_eq!(report.summary.version_mismatch, Some(true));
}
