//! Artifact version tagging and the pyc magic-number table.
//!
//! Grounded in the magic-number history transcribed as comments in
//! `examples/other_examples/2a8edb6d_prestist-add-determinism__src-handlers-pyc.rs.rs`
//! (itself lifted from CPython's `importlib._bootstrap_external`). Only the
//! final magic used by each supported minor version is wired here; this
//! crate targets the 3.11+ code-object layout (see DESIGN.md).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PyVersion {
    pub major: u16,
    pub minor: u16,
}

impl PyVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn as_tuple(&self) -> (u16, u16) {
        (self.major, self.minor)
    }
}

impl std::fmt::Display for PyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Implementation {
    CPython,
}

impl std::fmt::Display for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Implementation::CPython => write!(f, "cpython"),
        }
    }
}

/// Magic-number -> (major, minor) for the versions this crate disassembles.
///
/// The two low bytes of a `.pyc` header, read little-endian, identify the
/// compiler version. CPython bumps this value on every bytecode-affecting
/// change; only the last value assigned to each minor release is listed
/// here since that's the only one a "current" interpreter for that minor
/// release would ever stamp.
const MAGIC_TABLE: &[(u16, u16, u16)] = &[
    (3495, 3, 11),
    (3531, 3, 12),
    (3571, 3, 13),
];

pub fn version_for_magic(magic: u16) -> Option<PyVersion> {
    MAGIC_TABLE
        .iter()
        .find(|(m, _, _)| *m == magic)
        .map(|(_, maj, min)| PyVersion::new(*maj, *min))
}
