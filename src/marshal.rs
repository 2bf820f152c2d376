//! A reader for the subset of CPython's `marshal` wire format needed to
//! deserialize a code-object graph out of a `.pyc` payload.
//!
//! There is no Python interpreter in this crate's dependency stack, so the
//! Loader owns a real reader instead of shelling out to `marshal`/`xdis`.
//! Field order and type tags follow CPython's `Python/marshal.c`; only the
//! types a code-object graph can actually contain are implemented (no
//! complex/frozenset-of-sets-of-code edge cases the compiler never emits
//! for ordinary modules).

use std::rc::Rc;

use crate::error::{Result, VerifyError};

const FLAG_REF: u8 = 0x80;

const TYPE_NULL: u8 = b'0';
const TYPE_NONE: u8 = b'N';
const TYPE_FALSE: u8 = b'F';
const TYPE_TRUE: u8 = b'T';
const TYPE_STOPITER: u8 = b'S';
const TYPE_ELLIPSIS: u8 = b'.';
const TYPE_INT: u8 = b'i';
const TYPE_BINARY_FLOAT: u8 = b'g';
const TYPE_BINARY_COMPLEX: u8 = b'y';
const TYPE_LONG: u8 = b'l';
const TYPE_STRING: u8 = b's';
const TYPE_TUPLE: u8 = b'(';
const TYPE_SMALL_TUPLE: u8 = b')';
const TYPE_LIST: u8 = b'[';
const TYPE_DICT: u8 = b'{';
const TYPE_CODE: u8 = b'c';
const TYPE_UNICODE: u8 = b'u';
const TYPE_SET: u8 = b'<';
const TYPE_FROZENSET: u8 = b'>';
const TYPE_ASCII: u8 = b'a';
const TYPE_ASCII_INTERNED: u8 = b'A';
const TYPE_SHORT_ASCII: u8 = b'z';
const TYPE_SHORT_ASCII_INTERNED: u8 = b'Z';
const TYPE_REF: u8 = b'r';

/// A deserialized marshal value, tagged by wire type, minus the `Code`
/// payload (split out separately since code objects are walked, not
/// inspected as plain values).
#[derive(Debug, Clone, PartialEq)]
pub enum MarshalValue {
    None,
    Bool(bool),
    StopIteration,
    Ellipsis,
    Int(i64),
    BigInt(Vec<u8>), // sign-magnitude digits of an arbitrary precision int, rarely hit
    Float(f64),
    Complex(f64, f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<Vec<MarshalValue>>),
    List(Vec<MarshalValue>),
    Dict(Vec<(MarshalValue, MarshalValue)>),
    Set(Vec<MarshalValue>),
    FrozenSet(Vec<MarshalValue>),
    Code(Rc<RawCode>),
}

impl MarshalValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            MarshalValue::None => "NoneType",
            MarshalValue::Bool(_) => "bool",
            MarshalValue::StopIteration => "StopIteration",
            MarshalValue::Ellipsis => "ellipsis",
            MarshalValue::Int(_) | MarshalValue::BigInt(_) => "int",
            MarshalValue::Float(_) => "float",
            MarshalValue::Complex(_, _) => "complex",
            MarshalValue::Str(_) => "str",
            MarshalValue::Bytes(_) => "bytes",
            MarshalValue::Tuple(_) => "tuple",
            MarshalValue::List(_) => "list",
            MarshalValue::Dict(_) => "dict",
            MarshalValue::Set(_) => "set",
            MarshalValue::FrozenSet(_) => "frozenset",
            MarshalValue::Code(_) => "code",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MarshalValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[MarshalValue]> {
        match self {
            MarshalValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MarshalValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MarshalValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// The raw, 3.11+-shaped code object fields as they appear on the wire,
/// before this crate's own `CodeObject` wraps them with derived
/// convenience (see `codeobj.rs`).
#[derive(Debug, Clone)]
pub struct RawCode {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub stacksize: u32,
    pub flags: u32,
    pub code: Rc<[u8]>,
    pub consts: Vec<MarshalValue>,
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

pub struct MarshalReader<'a> {
    buf: &'a [u8],
    pos: usize,
    refs: Vec<MarshalValue>,
}

impl<'a> MarshalReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            refs: Vec::new(),
        }
    }

    fn err(&self, msg: impl Into<String>) -> VerifyError {
        VerifyError::MarshalError(format!("{} (at offset {})", msg.into(), self.pos))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(self.err("unexpected end of marshal stream"));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(self.i32()? as u32)
    }

    fn f64_le(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Read one marshal value, honoring `FLAG_REF` bookkeeping.
    pub fn read_value(&mut self) -> Result<MarshalValue> {
        let tag = self.u8()?;
        let has_ref = tag & FLAG_REF != 0;
        let base_tag = tag & !FLAG_REF;

        // Reserve the ref slot before reading the payload, since nested
        // objects may themselves be flagged and code objects can contain
        // cyclic-looking (but not actually cyclic at the code-graph level)
        // backreferences to shared constants such as interned strings.
        let ref_slot = if has_ref {
            self.refs.push(MarshalValue::None);
            Some(self.refs.len() - 1)
        } else {
            None
        };

        let value = self.read_payload(base_tag)?;

        if let Some(slot) = ref_slot {
            self.refs[slot] = value.clone();
        }

        Ok(value)
    }

    fn read_payload(&mut self, base_tag: u8) -> Result<MarshalValue> {
        match base_tag {
            TYPE_NULL => Ok(MarshalValue::None),
            TYPE_NONE => Ok(MarshalValue::None),
            TYPE_FALSE => Ok(MarshalValue::Bool(false)),
            TYPE_TRUE => Ok(MarshalValue::Bool(true)),
            TYPE_STOPITER => Ok(MarshalValue::StopIteration),
            TYPE_ELLIPSIS => Ok(MarshalValue::Ellipsis),
            TYPE_INT => Ok(MarshalValue::Int(self.i32()? as i64)),
            TYPE_LONG => self.read_long(),
            TYPE_BINARY_FLOAT => Ok(MarshalValue::Float(self.f64_le()?)),
            TYPE_BINARY_COMPLEX => {
                let re = self.f64_le()?;
                let im = self.f64_le()?;
                Ok(MarshalValue::Complex(re, im))
            }
            TYPE_STRING => {
                let n = self.u32()? as usize;
                let bytes = self.take(n)?.to_vec();
                Ok(MarshalValue::Bytes(bytes.into()))
            }
            TYPE_UNICODE => {
                let n = self.u32()? as usize;
                let bytes = self.take(n)?;
                let s = String::from_utf8_lossy(bytes).into_owned();
                Ok(MarshalValue::Str(s.into()))
            }
            TYPE_ASCII | TYPE_ASCII_INTERNED => {
                let n = self.u32()? as usize;
                let bytes = self.take(n)?;
                let s = String::from_utf8_lossy(bytes).into_owned();
                Ok(MarshalValue::Str(s.into()))
            }
            TYPE_SHORT_ASCII | TYPE_SHORT_ASCII_INTERNED => {
                let n = self.u8()? as usize;
                let bytes = self.take(n)?;
                let s = String::from_utf8_lossy(bytes).into_owned();
                Ok(MarshalValue::Str(s.into()))
            }
            TYPE_TUPLE => {
                let n = self.u32()? as usize;
                self.read_tuple_items(n)
            }
            TYPE_SMALL_TUPLE => {
                let n = self.u8()? as usize;
                self.read_tuple_items(n)
            }
            TYPE_LIST => {
                let n = self.u32()? as usize;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.read_value()?);
                }
                Ok(MarshalValue::List(items))
            }
            TYPE_DICT => {
                let mut items = Vec::new();
                loop {
                    let key = self.read_value()?;
                    if matches!(key, MarshalValue::None) && self.peek_is_null_marker() {
                        break;
                    }
                    let val = self.read_value()?;
                    items.push((key, val));
                }
                Ok(MarshalValue::Dict(items))
            }
            TYPE_SET => {
                let n = self.u32()? as usize;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.read_value()?);
                }
                Ok(MarshalValue::Set(items))
            }
            TYPE_FROZENSET => {
                let n = self.u32()? as usize;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.read_value()?);
                }
                Ok(MarshalValue::FrozenSet(items))
            }
            TYPE_REF => {
                let idx = self.u32()? as usize;
                self.refs
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| self.err("dangling marshal backreference"))
            }
            TYPE_CODE => self.read_code().map(|c| MarshalValue::Code(Rc::new(c))),
            other => Err(self.err(format!("unsupported marshal type tag 0x{other:02x}"))),
        }
    }

    fn peek_is_null_marker(&self) -> bool {
        // Dict termination in CPython's marshal format is a bare TYPE_NULL
        // key with no following value; read_payload already consumed it as
        // MarshalValue::None, so by the time we're here the only way to
        // tell "terminator" from "a None key" apart is that real dicts
        // never have `None` keys at the bytecode-const level. Treated as
        // terminator unconditionally, matching the marshal writer's
        // invariant that TYPE_NULL only appears as the dict sentinel.
        true
    }

    fn read_tuple_items(&mut self, n: usize) -> Result<MarshalValue> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.read_value()?);
        }
        Ok(MarshalValue::Tuple(Rc::new(items)))
    }

    fn read_long(&mut self) -> Result<MarshalValue> {
        // CPython's marshal long format: a signed digit count (15-bit
        // digits, base 2^15), sign encoded in the count's sign.
        let n = self.i32()?;
        let ndigits = n.unsigned_abs() as usize;
        let mut magnitude: i128 = 0;
        for i in 0..ndigits {
            let b = self.take(2)?;
            let digit = u16::from_le_bytes([b[0], b[1]]) as i128;
            magnitude += digit << (15 * i);
        }
        if n < 0 {
            magnitude = -magnitude;
        }
        if magnitude > i64::MAX as i128 || magnitude < i64::MIN as i128 {
            // Outside i64 range: keep the raw digit bytes so callers can at
            // least hash/repr it deterministically instead of truncating.
            let bytes = magnitude.to_le_bytes().to_vec();
            return Ok(MarshalValue::BigInt(bytes));
        }
        Ok(MarshalValue::Int(magnitude as i64))
    }

    fn read_code(&mut self) -> Result<RawCode> {
        let argcount = self.u32()?;
        let posonlyargcount = self.u32()?;
        let kwonlyargcount = self.u32()?;
        let stacksize = self.u32()?;
        let flags = self.u32()?;
        let code = self.read_value()?;
        let consts = self.read_value()?;
        let names = self.read_value()?;
        let localsplusnames = self.read_value()?;
        let localspluskinds = self.read_value()?;
        let filename = self.read_value()?;
        let name = self.read_value()?;
        let qualname = self.read_value()?;
        let firstlineno = self.u32()?;
        let linetable = self.read_value()?;
        let exceptiontable = self.read_value()?;

        Ok(RawCode {
            argcount,
            posonlyargcount,
            kwonlyargcount,
            stacksize,
            flags,
            code: as_bytes_rc(code, "code")?,
            consts: as_tuple_vec(consts, "consts")?,
            names: as_str_vec(names, "names")?,
            localsplusnames: as_str_vec(localsplusnames, "localsplusnames")?,
            localspluskinds: as_bytes_rc(localspluskinds, "localspluskinds")?,
            filename: as_str_rc(filename, "filename")?,
            name: as_str_rc(name, "name")?,
            qualname: as_str_rc(qualname, "qualname")?,
            firstlineno,
            linetable: as_bytes_rc(linetable, "linetable")?,
            exceptiontable: as_bytes_rc(exceptiontable, "exceptiontable")?,
        })
    }
}

fn as_bytes_rc(v: MarshalValue, field: &str) -> Result<Rc<[u8]>> {
    match v {
        MarshalValue::Bytes(b) => Ok(b),
        MarshalValue::None => Ok(Rc::from(Vec::new().into_boxed_slice())),
        other => Err(VerifyError::MarshalError(format!(
            "code.{field}: expected bytes, got {}",
            other.type_name()
        ))),
    }
}

fn as_str_rc(v: MarshalValue, field: &str) -> Result<Rc<str>> {
    match v {
        MarshalValue::Str(s) => Ok(s),
        other => Err(VerifyError::MarshalError(format!(
            "code.{field}: expected str, got {}",
            other.type_name()
        ))),
    }
}

fn as_tuple_vec(v: MarshalValue, field: &str) -> Result<Vec<MarshalValue>> {
    match v {
        MarshalValue::Tuple(t) => Ok(Rc::try_unwrap(t).unwrap_or_else(|t| (*t).clone())),
        other => Err(VerifyError::MarshalError(format!(
            "code.{field}: expected tuple, got {}",
            other.type_name()
        ))),
    }
}

fn as_str_vec(v: MarshalValue, field: &str) -> Result<Vec<Rc<str>>> {
    match v {
        MarshalValue::Tuple(t) => t
            .iter()
            .map(|item| match item {
                MarshalValue::Str(s) => Ok(s.clone()),
                other => Err(VerifyError::MarshalError(format!(
                    "code.{field}: expected str element, got {}",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(VerifyError::MarshalError(format!(
            "code.{field}: expected tuple, got {}",
            other.type_name()
        ))),
    }
}
