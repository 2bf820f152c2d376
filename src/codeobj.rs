//! The verifier's own `CodeObject` representation, derived from a
//! [`crate::marshal::RawCode`] once marshal parsing is done.
//!
//! `RawCode` is the wire-accurate shape; `CodeObject` adds the convenience
//! views the rest of the pipeline wants (a polymorphic `OperandValue` for
//! constants instead of raw `MarshalValue`, and direct access to nested
//! code objects for the Unit Analyzer's walk) without re-parsing anything.

use std::rc::Rc;

use crate::marshal::{MarshalValue, RawCode};

pub const CO_OPTIMIZED: u32 = 0x0001;
pub const CO_NEWLOCALS: u32 = 0x0002;
pub const CO_VARARGS: u32 = 0x0004;
pub const CO_VARKEYWORDS: u32 = 0x0008;
pub const CO_NESTED: u32 = 0x0010;
pub const CO_GENERATOR: u32 = 0x0020;
pub const CO_COROUTINE: u32 = 0x0080;

/// The polymorphic tag a `consts` entry carries. Mirrors the `argval`
/// polymorphism called out for constant operands: most of the pipeline
/// only needs to hash/compare these, not interpret them.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandValue {
    None,
    Bool(bool),
    Int(i64),
    BigInt(Vec<u8>),
    Float(f64),
    Complex(f64, f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<OperandValue>),
    FrozenSet(Vec<OperandValue>),
    Code(Rc<CodeObject>),
    Other(&'static str),
}

impl OperandValue {
    pub fn from_marshal(v: &MarshalValue) -> Self {
        match v {
            MarshalValue::None => OperandValue::None,
            MarshalValue::Bool(b) => OperandValue::Bool(*b),
            MarshalValue::Int(i) => OperandValue::Int(*i),
            MarshalValue::BigInt(b) => OperandValue::BigInt(b.clone()),
            MarshalValue::Float(f) => OperandValue::Float(*f),
            MarshalValue::Complex(re, im) => OperandValue::Complex(*re, *im),
            MarshalValue::Str(s) => OperandValue::Str(s.clone()),
            MarshalValue::Bytes(b) => OperandValue::Bytes(b.clone()),
            MarshalValue::Tuple(t) => {
                OperandValue::Tuple(t.iter().map(OperandValue::from_marshal).collect())
            }
            MarshalValue::FrozenSet(s) => {
                OperandValue::FrozenSet(s.iter().map(OperandValue::from_marshal).collect())
            }
            MarshalValue::Code(c) => OperandValue::Code(Rc::new(CodeObject::from_raw(c))),
            other => OperandValue::Other(other.type_name()),
        }
    }

    /// A deterministic textual form used when a constant needs to be
    /// folded into a hash or a diagnostic, independent of Rust's own
    /// `Debug` formatting (which isn't guaranteed stable across types).
    pub fn canonical_repr(&self) -> String {
        match self {
            OperandValue::None => "None".to_string(),
            OperandValue::Bool(b) => b.to_string(),
            OperandValue::Int(i) => i.to_string(),
            OperandValue::BigInt(_) => "<bigint>".to_string(),
            OperandValue::Float(f) => format!("{f:?}"),
            OperandValue::Complex(re, im) => format!("({re:?}+{im:?}j)"),
            OperandValue::Str(s) => format!("{s:?}"),
            OperandValue::Bytes(b) => format!("b{:?}", hex::encode(b)),
            OperandValue::Tuple(items) => {
                let parts: Vec<_> = items.iter().map(OperandValue::canonical_repr).collect();
                format!("({})", parts.join(", "))
            }
            OperandValue::FrozenSet(items) => {
                let mut parts: Vec<_> = items.iter().map(OperandValue::canonical_repr).collect();
                parts.sort();
                format!("frozenset({{{}}})", parts.join(", "))
            }
            OperandValue::Code(c) => format!("<code {}>", c.qualname),
            OperandValue::Other(t) => format!("<{t}>"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeObject {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub stacksize: u32,
    pub flags: u32,
    pub code: Rc<[u8]>,
    pub consts: Vec<OperandValue>,
    pub names: Vec<Rc<str>>,
    pub localsplusnames: Vec<Rc<str>>,
    pub localspluskinds: Rc<[u8]>,
    pub filename: Rc<str>,
    pub name: Rc<str>,
    pub qualname: Rc<str>,
    pub firstlineno: u32,
    pub linetable: Rc<[u8]>,
    pub exceptiontable: Rc<[u8]>,
}

impl CodeObject {
    pub fn from_raw(raw: &RawCode) -> Self {
        Self {
            argcount: raw.argcount,
            posonlyargcount: raw.posonlyargcount,
            kwonlyargcount: raw.kwonlyargcount,
            stacksize: raw.stacksize,
            flags: raw.flags,
            code: raw.code.clone(),
            consts: raw.consts.iter().map(OperandValue::from_marshal).collect(),
            names: raw.names.clone(),
            localsplusnames: raw.localsplusnames.clone(),
            localspluskinds: raw.localspluskinds.clone(),
            filename: raw.filename.clone(),
            name: raw.name.clone(),
            qualname: raw.qualname.clone(),
            firstlineno: raw.firstlineno,
            linetable: raw.linetable.clone(),
            exceptiontable: raw.exceptiontable.clone(),
        }
    }

    pub fn is_generator(&self) -> bool {
        self.flags & CO_GENERATOR != 0
    }

    pub fn is_coroutine(&self) -> bool {
        self.flags & CO_COROUTINE != 0
    }

    /// Nested code objects in document order, as they appear in `consts`.
    /// This is the edge set the Unit Analyzer's walk descends.
    pub fn nested_code_objects(&self) -> impl Iterator<Item = &Rc<CodeObject>> {
        self.consts.iter().filter_map(|c| match c {
            OperandValue::Code(co) => Some(co),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> CodeObject {
        CodeObject {
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            stacksize: 1,
            flags: 0,
            code: Rc::from(vec![].into_boxed_slice()),
            consts: vec![],
            names: vec![],
            localsplusnames: vec![],
            localspluskinds: Rc::from(vec![].into_boxed_slice()),
            filename: Rc::from("m.py"),
            name: Rc::from(name),
            qualname: Rc::from(name),
            firstlineno: 1,
            linetable: Rc::from(vec![].into_boxed_slice()),
            exceptiontable: Rc::from(vec![].into_boxed_slice()),
        }
    }

    #[test]
    fn nested_code_objects_follow_consts_order() {
        let mut root = leaf("<module>");
        root.consts = vec![
            OperandValue::Int(1),
            OperandValue::Code(Rc::new(leaf("inner_a"))),
            OperandValue::None,
            OperandValue::Code(Rc::new(leaf("inner_b"))),
        ];
        let names: Vec<_> = root
            .nested_code_objects()
            .map(|c| c.name.to_string())
            .collect();
        assert_eq!(names, vec!["inner_a", "inner_b"]);
    }

    #[test]
    fn canonical_repr_is_stable_for_tuples() {
        let v = OperandValue::Tuple(vec![OperandValue::Int(1), OperandValue::Str(Rc::from("x"))]);
        assert_eq!(v.canonical_repr(), "(1, \"x\")");
    }
}
