//! First-diverging-instruction localization, with block membership and a
//! symmetric context window from both sides.

use serde::{Deserialize, Serialize};

use crate::cfg::Cfg;
use crate::instruction::Instruction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideContext {
    pub index: usize,
    pub opname: String,
    pub argrepr: String,
    pub block: Option<usize>,
    pub context: Vec<(usize, String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Localization {
    pub mismatch_index: usize,
    pub orig: SideContext,
    pub comp: SideContext,
}

pub struct Localizer {
    pub context_radius: usize,
}

impl Default for Localizer {
    fn default() -> Self {
        Self { context_radius: 8 }
    }
}

impl Localizer {
    pub fn new(context_radius: usize) -> Self {
        Self { context_radius }
    }

    pub fn locate(
        &self,
        orig: &[Instruction],
        comp: &[Instruction],
        orig_cfg: &Cfg,
        comp_cfg: &Cfg,
    ) -> Localization {
        let min_len = orig.len().min(comp.len());
        let mut idx = min_len;
        for i in 0..min_len {
            if orig[i].opname != comp[i].opname || orig[i].argrepr != comp[i].argrepr {
                idx = i;
                break;
            }
        }

        Localization {
            mismatch_index: idx,
            orig: self.side(orig, idx, orig_cfg),
            comp: self.side(comp, idx, comp_cfg),
        }
    }

    fn side(&self, insts: &[Instruction], idx: usize, cfg: &Cfg) -> SideContext {
        let len = insts.len();
        if idx >= len {
            return SideContext {
                index: idx,
                opname: String::new(),
                argrepr: String::new(),
                block: None,
                context: self.context_window(insts, idx),
            };
        }
        let instr = &insts[idx];
        let block = cfg.block_for_offset(instr.offset).map(|b| b.id);
        SideContext {
            index: idx,
            opname: instr.opname.clone(),
            argrepr: instr.argrepr.clone(),
            block,
            context: self.context_window(insts, idx),
        }
    }

    fn context_window(&self, insts: &[Instruction], idx: usize) -> Vec<(usize, String, String)> {
        let r = self.context_radius;
        let lo = idx.saturating_sub(r);
        let hi = (idx + r + 1).min(insts.len());
        (lo..hi)
            .map(|i| (i, insts[i].opname.clone(), insts[i].argrepr.clone()))
            .collect()
    }
}
