//! The Unit Analyzer: walks every reachable code object from a root and
//! produces one [`UnitAnalysis`] per unit, in document order.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::rc::Rc;

use crate::cfg::{BasicBlock, CfgBuilder};
use crate::codeobj::CodeObject;
use crate::instruction::{normalize_all, Disassembler, Instruction};
use crate::opcode_table::OpcodeTable;
use crate::signatures::{block_invariants, block_signature, cfg_sig, edge_signature, CfgSig};

#[derive(Debug, Clone)]
pub struct UnitMeta {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: u32,
    pub varnames_len: u32,
    pub exception_table_len: u32,
    pub exception_table_hash: String,
}

impl UnitMeta {
    pub fn from_code(code: &CodeObject) -> Self {
        Self {
            argcount: code.argcount,
            posonlyargcount: code.posonlyargcount,
            kwonlyargcount: code.kwonlyargcount,
            nlocals: code.localsplusnames.len() as u32,
            stacksize: code.stacksize,
            flags: code.flags,
            varnames_len: code.localsplusnames.len() as u32,
            exception_table_len: code.exceptiontable.len() as u32,
            exception_table_hash: crate::signatures::short_hash(&hex::encode(&*code.exceptiontable)),
        }
    }

    /// Keys whose values differ between two metas, sorted, for
    /// `ComparisonRow.meta_mismatch`.
    pub fn diff_keys(&self, other: &UnitMeta) -> Vec<String> {
        let mut keys = Vec::new();
        macro_rules! check {
            ($field:ident) => {
                if self.$field != other.$field {
                    keys.push(stringify!($field).to_string());
                }
            };
        }
        check!(argcount);
        check!(posonlyargcount);
        check!(kwonlyargcount);
        check!(nlocals);
        check!(stacksize);
        check!(flags);
        check!(varnames_len);
        check!(exception_table_len);
        check!(exception_table_hash);
        keys.sort();
        keys
    }
}

#[derive(Debug, Clone)]
pub struct UnitAnalysis {
    pub path: String,
    pub meta: UnitMeta,
    pub insts: Vec<Instruction>,
    pub norm_ops: Vec<String>,
    pub op_counts: BTreeMap<String, u32>,
    pub block_sigs: Vec<String>,
    pub block_sig_counts: BTreeMap<String, u32>,
    pub edge_sig_counts: BTreeMap<String, u32>,
    pub cfg_sig: CfgSig,
    pub blocks: Vec<BasicBlock>,
}

pub struct Analyzer<'a> {
    table: &'a OpcodeTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(table: &'a OpcodeTable) -> Self {
        Self { table }
    }

    /// Walk `root` depth-first through nested constants, emitting one
    /// `UnitAnalysis` per code object in document order. Duplicate paths
    /// (e.g. two `def f` under opposing branches) are preserved, not
    /// deduplicated.
    pub fn analyze(&self, root: &Rc<CodeObject>) -> Vec<UnitAnalysis> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.walk(root, root.qualname.to_string(), &mut out, &mut visited);
        out
    }

    fn walk(
        &self,
        code: &Rc<CodeObject>,
        path: String,
        out: &mut Vec<UnitAnalysis>,
        visited: &mut HashSet<usize>,
    ) {
        let identity = Rc::as_ptr(code) as usize;
        if !visited.insert(identity) {
            return;
        }

        out.push(self.analyze_one(code, path.clone()));

        for child in code.nested_code_objects() {
            let child_path = format!("{}.{}", path, child.qualname);
            self.walk(child, child_path, out, visited);
        }
    }

    fn analyze_one(&self, code: &CodeObject, path: String) -> UnitAnalysis {
        let disasm = Disassembler::new(self.table);
        let raw = disasm.disassemble(code).unwrap_or_default();
        let normalized = normalize_all(&raw, self.table);
        let cfg = CfgBuilder::build(&normalized);

        let mut block_sigs = Vec::with_capacity(cfg.blocks.len());
        for block in &cfg.blocks {
            let inv = block_invariants(block, self.table);
            block_sigs.push(block_signature(&inv));
        }

        let mut block_sig_counts = BTreeMap::new();
        for sig in &block_sigs {
            *block_sig_counts.entry(sig.clone()).or_insert(0) += 1;
        }

        let mut edge_sig_counts = BTreeMap::new();
        for edge in &cfg.edges {
            let src_idx = cfg.blocks.iter().position(|b| b.id == edge.src).unwrap();
            let dst_idx = cfg.blocks.iter().position(|b| b.id == edge.dst).unwrap();
            let esig = edge_signature(&block_sigs[src_idx], edge.kind, &block_sigs[dst_idx]);
            *edge_sig_counts.entry(esig).or_insert(0) += 1;
        }

        let norm_ops: Vec<String> = normalized.iter().map(|n| n.seq_token.clone()).collect();
        let mut op_counts = BTreeMap::new();
        for n in &normalized {
            *op_counts.entry(n.op_class.as_str().to_string()).or_insert(0) += 1;
        }

        UnitAnalysis {
            path,
            meta: UnitMeta::from_code(code),
            insts: raw,
            norm_ops,
            op_counts,
            block_sigs,
            block_sig_counts,
            edge_sig_counts,
            cfg_sig: cfg_sig(&cfg),
            blocks: cfg.blocks,
        }
    }
}
