//! Block and edge signatures: per-block invariants, canonicalized payload
//! hashing, and the stack-discipline bookkeeping that feeds them.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::cfg::{BasicBlock, Cfg, EdgeKind};
use crate::instruction::NormalizedInstruction;
use crate::opcode_table::{variadic_stack_delta, OpcodeTable};

pub type BlockSignature = String;

#[derive(Debug, Clone, Default)]
pub struct BlockInvariants {
    pub op_seq: Vec<String>,
    pub op_counts: BTreeMap<String, u32>,
    pub consts: Vec<String>,
    pub names: Vec<String>,
    pub call_bins: BTreeMap<String, u32>,
    pub stack_delta: i32,
    pub stack_max: i32,
    pub stack_min: i32,
}

pub fn short_hash(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..12].to_string()
}

/// Per-instruction stack effect. Variadic opcodes route through the
/// bit-exact closed forms; everything else uses the table's fixed
/// pop/push pair.
pub fn instruction_stack_delta(instr: &NormalizedInstruction, table: &OpcodeTable) -> i32 {
    if let Some(delta) = variadic_stack_delta(&instr.opname, instr.raw_arg) {
        return delta;
    }
    table
        .info_for_name(&instr.opname)
        .map(|info| info.push - info.pop)
        .unwrap_or(0)
}

pub fn block_invariants(block: &BasicBlock, table: &OpcodeTable) -> BlockInvariants {
    let mut inv = BlockInvariants::default();
    let mut running = 0i32;
    inv.stack_max = 0;
    inv.stack_min = 0;

    for instr in &block.instructions {
        inv.op_seq.push(instr.seq_token.clone());
        *inv.op_counts.entry(instr.op_class.as_str().to_string()).or_insert(0) += 1;

        if instr.op_class.as_str() == "const" {
            inv.consts.push(instr.arg_token.clone());
        }
        if instr.op_class.as_str() == "name" {
            inv.names.push(instr.arg_token.clone());
        }
        if instr.op_class.as_str() == "call" {
            *inv.call_bins.entry(instr.arg_token.clone()).or_insert(0) += 1;
        }

        let delta = instruction_stack_delta(instr, table);
        running += delta;
        inv.stack_max = inv.stack_max.max(running);
        inv.stack_min = inv.stack_min.min(running);
    }
    inv.stack_delta = running;
    inv.consts.sort();
    inv.names.sort();
    inv
}

/// Stable short hash over the canonicalized invariant payload. Sorting
/// every multiset component before hashing makes the result independent
/// of iteration order -- two blocks with identical payloads always yield
/// identical signatures.
pub fn block_signature(inv: &BlockInvariants) -> BlockSignature {
    let op_seq_hash = short_hash(&inv.op_seq.join("|"));

    let mut op_counts: Vec<(String, u32)> = inv.op_counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    op_counts.sort();

    let mut call_bins: Vec<(String, u32)> = inv.call_bins.iter().map(|(k, v)| (k.clone(), *v)).collect();
    call_bins.sort();

    let mut consts = inv.consts.clone();
    consts.sort();
    let mut names = inv.names.clone();
    names.sort();

    let payload = format!(
        "{op_seq_hash}|{}|{}|{:?}|{:?}|{:?}|{:?}",
        inv.stack_delta, inv.stack_max, consts, names, op_counts, call_bins
    );
    short_hash(&payload)
}

pub fn edge_signature(src_sig: &str, kind: EdgeKind, dst_sig: &str) -> String {
    format!("{src_sig}:{}:{dst_sig}", kind.as_str())
}

#[derive(Debug, Clone)]
pub struct CfgSig {
    pub block_count: usize,
    pub edge_count: usize,
    pub loop_edges: usize,
}

pub fn cfg_sig(cfg: &Cfg) -> CfgSig {
    let loop_edges = cfg
        .edges
        .iter()
        .filter(|e| {
            let src_block = cfg.blocks.iter().find(|b| b.id == e.src);
            let dst_block = cfg.blocks.iter().find(|b| b.id == e.dst);
            match (src_block, dst_block) {
                (Some(s), Some(d)) => d.start_offset <= s.start_offset,
                _ => false,
            }
        })
        .count();
    CfgSig {
        block_count: cfg.block_count(),
        edge_count: cfg.edge_count(),
        loop_edges,
    }
}

/// Weighted Jaccard over two multisets keyed by an arbitrary label:
/// `Σ min(a_k, b_k) / Σ max(a_k, b_k)`, `1.0` when both are empty.
pub fn multiset_jaccard<K: Ord + Clone>(a: &BTreeMap<K, u32>, b: &BTreeMap<K, u32>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut keys: Vec<&K> = a.keys().chain(b.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut sum_min = 0u64;
    let mut sum_max = 0u64;
    for k in keys {
        let av = *a.get(k).unwrap_or(&0) as u64;
        let bv = *b.get(k).unwrap_or(&0) as u64;
        sum_min += av.min(bv);
        sum_max += av.max(bv);
    }
    if sum_max == 0 {
        1.0
    } else {
        sum_min as f64 / sum_max as f64
    }
}

/// Count occurrences into a multiset, used to build the count-Jaccard
/// inputs from a flat label list (op sequence tokens, block/edge sigs).
pub fn counts_of<I: IntoIterator<Item = String>>(items: I) -> BTreeMap<String, u32> {
    let mut m = BTreeMap::new();
    for item in items {
        *m.entry(item).or_insert(0) += 1;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode_table::{opcode_table, OpClass};
    use crate::version::{Implementation, PyVersion};

    fn table() -> OpcodeTable {
        opcode_table(PyVersion::new(3, 11), Implementation::CPython)
    }

    fn inst(opname: &str, op_class: OpClass, arg_token: &str) -> NormalizedInstruction {
        NormalizedInstruction {
            offset: 0,
            opname: opname.to_string(),
            op_class,
            arg_token: arg_token.to_string(),
            seq_token: format!("{}:{}", op_class.as_str(), arg_token),
            jump_target: None,
            raw_arg: 0,
        }
    }

    #[test]
    fn identical_payloads_hash_equal() {
        let inv_a = BlockInvariants {
            op_seq: vec!["const:const:int:1".into()],
            ..Default::default()
        };
        let inv_b = inv_a.clone();
        assert_eq!(block_signature(&inv_a), block_signature(&inv_b));
    }

    #[test]
    fn distinct_payloads_hash_unequal() {
        let inv_a = BlockInvariants {
            op_seq: vec!["const:const:int:1".into()],
            ..Default::default()
        };
        let inv_b = BlockInvariants {
            op_seq: vec!["const:const:int:2".into()],
            ..Default::default()
        };
        assert_ne!(block_signature(&inv_a), block_signature(&inv_b));
    }

    #[test]
    fn reordered_commutative_ops_keep_multisets_but_differ_in_seq_hash() {
        let mut op_counts = BTreeMap::new();
        op_counts.insert("const".to_string(), 2u32);
        op_counts.insert("binary_op".to_string(), 1u32);

        let inv_a = BlockInvariants {
            op_seq: vec!["const:const:int:1".into(), "const:const:int:2".into(), "binary_op:add:".into()],
            op_counts: op_counts.clone(),
            consts: vec!["const:int:1".into(), "const:int:2".into()],
            ..Default::default()
        };
        let inv_b = BlockInvariants {
            op_seq: vec!["const:const:int:2".into(), "const:const:int:1".into(), "binary_op:add:".into()],
            op_counts,
            consts: vec!["const:int:1".into(), "const:int:2".into()],
            ..Default::default()
        };

        assert_eq!(inv_a.op_counts, inv_b.op_counts);
        assert_eq!(inv_a.consts, inv_b.consts);
        assert_ne!(short_hash(&inv_a.op_seq.join("|")), short_hash(&inv_b.op_seq.join("|")));
        assert_ne!(block_signature(&inv_a), block_signature(&inv_b));
    }

    #[test]
    fn jaccard_empty_is_one() {
        let a: BTreeMap<String, u32> = BTreeMap::new();
        let b: BTreeMap<String, u32> = BTreeMap::new();
        assert_eq!(multiset_jaccard(&a, &b), 1.0);
    }

    #[test]
    fn jaccard_partial_overlap() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), 2);
        let mut b = BTreeMap::new();
        b.insert("x".to_string(), 1);
        b.insert("y".to_string(), 1);
        assert_eq!(multiset_jaccard(&a, &b), 1.0 / 3.0);
    }

    #[test]
    fn stack_delta_sums_instruction_effects() {
        let t = table();
        let block = BasicBlock {
            id: 0,
            start_offset: 0,
            end_offset: 4,
            instructions: vec![
                inst("LOAD_CONST", OpClass::Const, "const:int:1"),
                inst("RETURN_VALUE", OpClass::Return, ""),
            ],
            is_loop_header: false,
            is_exception_handler: false,
        };
        let inv = block_invariants(&block, &t);
        // LOAD_CONST pushes 1, RETURN_VALUE pops 1: net 0
        assert_eq!(inv.stack_delta, 0);
        assert_eq!(inv.stack_max, 1);
        assert_eq!(inv.stack_min, 0);
    }
}
