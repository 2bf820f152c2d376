//! Control-flow graph construction: leader detection, block partitioning,
//! edge derivation, and reachability pruning.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};

use crate::instruction::NormalizedInstruction;
use crate::opcode_table::{is_cond_jump, is_raise, is_return, is_uncond_jump};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Cond,
    Fallthrough,
    Jump,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Cond => "cond",
            EdgeKind::Fallthrough => "fallthrough",
            EdgeKind::Jump => "jump",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: usize,
    pub start_offset: u32,
    pub end_offset: u32,
    pub instructions: Vec<NormalizedInstruction>,
    pub is_loop_header: bool,
    pub is_exception_handler: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub src: usize,
    pub dst: usize,
    pub kind: EdgeKind,
}

pub struct Cfg {
    pub graph: DiGraph<usize, EdgeKind>,
    pub blocks: Vec<BasicBlock>,
    pub edges: Vec<Edge>,
    node_of_block: HashMap<usize, NodeIndex>,
}

impl Cfg {
    pub fn block_for_offset(&self, offset: u32) -> Option<&BasicBlock> {
        self.blocks
            .iter()
            .find(|b| b.start_offset <= offset && offset < b.end_offset)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_index(&self, block_id: usize) -> Option<NodeIndex> {
        self.node_of_block.get(&block_id).copied()
    }
}

pub struct CfgBuilder;

impl CfgBuilder {
    pub fn build(instructions: &[NormalizedInstruction]) -> Cfg {
        if instructions.is_empty() {
            let graph = DiGraph::new();
            return Cfg {
                graph,
                blocks: vec![],
                edges: vec![],
                node_of_block: HashMap::new(),
            };
        }

        let leaders = Self::collect_leaders(instructions);
        let raw_blocks = Self::partition(instructions, &leaders);
        let (blocks, edges) = Self::derive_edges(raw_blocks);
        let (blocks, edges) = Self::prune_unreachable(blocks, edges);

        let mut graph = DiGraph::new();
        let mut node_of_block = HashMap::new();
        for b in &blocks {
            let idx = graph.add_node(b.id);
            node_of_block.insert(b.id, idx);
        }
        for e in &edges {
            let src = node_of_block[&e.src];
            let dst = node_of_block[&e.dst];
            graph.add_edge(src, dst, e.kind);
        }

        Cfg {
            graph,
            blocks,
            edges,
            node_of_block,
        }
    }

    fn collect_leaders(instructions: &[NormalizedInstruction]) -> HashSet<u32> {
        let mut leaders = HashSet::new();
        leaders.insert(instructions[0].offset);

        let offsets: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
        let next_offset = |pos: usize| -> Option<u32> { offsets.get(pos + 1).copied() };

        for (pos, instr) in instructions.iter().enumerate() {
            if let Some(target) = instr.jump_target {
                if offsets.binary_search(&target).is_ok() {
                    leaders.insert(target);
                }
            }
            let terminates = is_cond_jump(&instr.opname)
                || is_uncond_jump(&instr.opname)
                || is_return(&instr.opname)
                || is_raise(&instr.opname);
            if terminates {
                if let Some(next) = next_offset(pos) {
                    leaders.insert(next);
                }
            }
        }
        leaders
    }

    fn partition(
        instructions: &[NormalizedInstruction],
        leaders: &HashSet<u32>,
    ) -> Vec<BasicBlock> {
        let mut blocks = Vec::new();
        let mut current: Vec<NormalizedInstruction> = Vec::new();
        let mut id = 0usize;

        for instr in instructions {
            if leaders.contains(&instr.offset) && !current.is_empty() {
                blocks.push(Self::finish_block(id, current));
                id += 1;
                current = Vec::new();
            }
            current.push(instr.clone());
        }
        if !current.is_empty() {
            blocks.push(Self::finish_block(id, current));
        }
        blocks
    }

    fn finish_block(id: usize, instructions: Vec<NormalizedInstruction>) -> BasicBlock {
        let start_offset = instructions.first().unwrap().offset;
        // end_offset is exclusive: one past the last instruction's offset.
        // Instructions are 2 bytes wide at the wordcode level; since
        // CACHE entries are stripped before normalization, the increment
        // is a stand-in unit rather than a literal byte count.
        let end_offset = instructions.last().unwrap().offset + 2;
        BasicBlock {
            id,
            start_offset,
            end_offset,
            instructions,
            is_loop_header: false,
            is_exception_handler: false,
        }
    }

    fn derive_edges(mut blocks: Vec<BasicBlock>) -> (Vec<BasicBlock>, Vec<Edge>) {
        let mut offset_to_block: HashMap<u32, usize> = HashMap::new();
        for b in &blocks {
            offset_to_block.insert(b.start_offset, b.id);
        }

        let mut edges = Vec::new();
        for i in 0..blocks.len() {
            let last = blocks[i].instructions.last().unwrap().clone();
            let next_block_id = if i + 1 < blocks.len() { Some(blocks[i + 1].id) } else { None };

            if is_return(&last.opname) || is_raise(&last.opname) {
                continue;
            }

            if is_cond_jump(&last.opname) {
                if let Some(target) = last.jump_target {
                    if let Some(&dst) = offset_to_block.get(&target) {
                        edges.push(Edge {
                            src: blocks[i].id,
                            dst,
                            kind: EdgeKind::Cond,
                        });
                    }
                }
                if let Some(dst) = next_block_id {
                    edges.push(Edge {
                        src: blocks[i].id,
                        dst,
                        kind: EdgeKind::Fallthrough,
                    });
                }
                continue;
            }

            if is_uncond_jump(&last.opname) {
                if let Some(target) = last.jump_target {
                    if let Some(&dst) = offset_to_block.get(&target) {
                        edges.push(Edge {
                            src: blocks[i].id,
                            dst,
                            kind: EdgeKind::Jump,
                        });
                    }
                }
                continue;
            }

            if let Some(dst) = next_block_id {
                edges.push(Edge {
                    src: blocks[i].id,
                    dst,
                    kind: EdgeKind::Fallthrough,
                });
            }
        }

        for b in &mut blocks {
            b.is_loop_header = edges
                .iter()
                .any(|e| e.dst == b.id && e.src >= b.id && matches!(e.kind, EdgeKind::Cond | EdgeKind::Jump));
        }

        (blocks, edges)
    }

    fn prune_unreachable(
        blocks: Vec<BasicBlock>,
        edges: Vec<Edge>,
    ) -> (Vec<BasicBlock>, Vec<Edge>) {
        if blocks.is_empty() {
            return (blocks, edges);
        }
        let mut adj: HashMap<usize, Vec<usize>> = HashMap::new();
        for e in &edges {
            adj.entry(e.src).or_default().push(e.dst);
        }

        let mut visited = HashSet::new();
        let mut stack = vec![blocks[0].id];
        while let Some(b) = stack.pop() {
            if !visited.insert(b) {
                continue;
            }
            if let Some(succs) = adj.get(&b) {
                for &s in succs {
                    if !visited.contains(&s) {
                        stack.push(s);
                    }
                }
            }
        }

        let pruned_blocks: Vec<BasicBlock> = blocks.into_iter().filter(|b| visited.contains(&b.id)).collect();
        let pruned_edges: Vec<Edge> = edges
            .into_iter()
            .filter(|e| visited.contains(&e.src) && visited.contains(&e.dst))
            .collect();
        (pruned_blocks, pruned_edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode_table::OpClass;

    fn inst(offset: u32, opname: &str, op_class: OpClass, jump_target: Option<u32>) -> NormalizedInstruction {
        NormalizedInstruction {
            offset,
            opname: opname.to_string(),
            op_class,
            arg_token: String::new(),
            seq_token: op_class.as_str().to_string(),
            jump_target,
            raw_arg: 0,
        }
    }

    #[test]
    fn straight_line_is_single_block() {
        let insts = vec![
            inst(0, "LOAD_CONST", OpClass::Const, None),
            inst(2, "RETURN_VALUE", OpClass::Return, None),
        ];
        let cfg = CfgBuilder::build(&insts);
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.edge_count(), 0);
    }

    #[test]
    fn conditional_branch_emits_two_edges() {
        let insts = vec![
            inst(0, "LOAD_FAST", OpClass::Name, None),
            inst(2, "POP_JUMP_IF_FALSE", OpClass::Branch, Some(6)),
            inst(4, "RETURN_VALUE", OpClass::Return, None),
            inst(6, "RETURN_VALUE", OpClass::Return, None),
        ];
        let cfg = CfgBuilder::build(&insts);
        assert_eq!(cfg.block_count(), 3);
        assert_eq!(cfg.edge_count(), 2);
        let kinds: HashSet<_> = cfg.edges.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains("cond"));
        assert!(kinds.contains("fallthrough"));
    }

    #[test]
    fn unreachable_block_is_pruned() {
        let insts = vec![
            inst(0, "RETURN_VALUE", OpClass::Return, None),
            inst(2, "LOAD_CONST", OpClass::Const, None),
            inst(4, "RETURN_VALUE", OpClass::Return, None),
        ];
        let cfg = CfgBuilder::build(&insts);
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.edge_count(), 0);
    }

    #[test]
    fn unconditional_jump_emits_one_edge() {
        let insts = vec![
            inst(0, "JUMP_FORWARD", OpClass::Branch, Some(4)),
            inst(2, "LOAD_CONST", OpClass::Const, None),
            inst(4, "RETURN_VALUE", OpClass::Return, None),
        ];
        let cfg = CfgBuilder::build(&insts);
        // block at offset 2 is unreachable and pruned, leaving 2 blocks / 1 edge
        assert_eq!(cfg.block_count(), 2);
        assert_eq!(cfg.edge_count(), 1);
        assert_eq!(cfg.edges[0].kind.as_str(), "jump");
    }

    #[test]
    fn block_for_offset_finds_containing_block() {
        let insts = vec![
            inst(0, "LOAD_FAST", OpClass::Name, None),
            inst(2, "POP_JUMP_IF_FALSE", OpClass::Branch, Some(6)),
            inst(4, "RETURN_VALUE", OpClass::Return, None),
            inst(6, "RETURN_VALUE", OpClass::Return, None),
        ];
        let cfg = CfgBuilder::build(&insts);
        let block = cfg.block_for_offset(4).unwrap();
        assert_eq!(block.start_offset, 0);
    }
}
