//! Pairs two `UnitAnalysis` streams by structural path and scores them
//! along five metrics, producing per-unit tiers and an overall verdict.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::analysis::UnitAnalysis;
use crate::error::VerifyError;
use crate::signatures::multiset_jaccard;
use crate::version::PyVersion;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub avg_ratio: f64,
    pub min_unit_ratio: f64,
    pub count: f64,
    pub block: f64,
    pub edge: f64,
    pub semantic: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            avg_ratio: 0.97,
            min_unit_ratio: 0.90,
            count: 0.95,
            block: 0.95,
            edge: 0.95,
            semantic: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Exact,
    SemanticEquiv,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Exact,
    Close,
    Mismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub path: String,
    pub len_orig: usize,
    pub len_comp: usize,
    pub seq_ratio: f64,
    pub count_jaccard: f64,
    pub block_jaccard: f64,
    pub edge_jaccard: f64,
    pub semantic_score: f64,
    pub exact: bool,
    pub tier: Tier,
    pub meta_mismatch: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub orig_version: (u16, u16),
    pub compiled_version: (u16, u16),
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_mismatch: Option<bool>,
    pub units_compared: usize,
    pub units_missing: Vec<String>,
    pub avg_seq_ratio: f64,
    pub min_seq_ratio: f64,
    pub avg_count_jaccard: f64,
    pub avg_block_jaccard: f64,
    pub avg_edge_jaccard: f64,
    pub avg_semantic_score: f64,
    pub exact_units: usize,
    pub verdict: Verdict,
    pub thresholds: Thresholds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub verdict: Verdict,
    pub summary: Summary,
    pub rows: Vec<ComparisonRow>,
}

/// Longest-common-subsequence ratio over two token sequences, matching
/// `difflib.SequenceMatcher.ratio()`'s edge cases: both empty -> 1.0,
/// exactly one empty -> 0.0, identical -> 1.0.
pub fn seq_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(a, b);
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let (n, m) = (a.len(), b.len());
    let mut prev = vec![0usize; m + 1];
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        for j in 1..=m {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

pub struct Comparator {
    pub thresholds: Thresholds,
}

impl Comparator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn compare(
        &self,
        orig: &[UnitAnalysis],
        comp: &[UnitAnalysis],
        orig_version: PyVersion,
        comp_version: PyVersion,
    ) -> ComparisonReport {
        if orig_version != comp_version {
            return ComparisonReport {
                verdict: Verdict::Mismatch,
                summary: Summary {
                    orig_version: orig_version.as_tuple(),
                    compiled_version: comp_version.as_tuple(),
                    version_mismatch: Some(true),
                    units_compared: 0,
                    units_missing: vec![],
                    avg_seq_ratio: 0.0,
                    min_seq_ratio: 0.0,
                    avg_count_jaccard: 0.0,
                    avg_block_jaccard: 0.0,
                    avg_edge_jaccard: 0.0,
                    avg_semantic_score: 0.0,
                    exact_units: 0,
                    verdict: Verdict::Mismatch,
                    thresholds: self.thresholds,
                    error: None,
                },
                rows: vec![],
            };
        }

        // Index comp analyses by path -> ordered occurrences, so the k-th
        // occurrence of a path in `orig` matches the k-th in `comp`.
        let mut comp_by_path: HashMap<&str, Vec<&UnitAnalysis>> = HashMap::new();
        for u in comp {
            comp_by_path.entry(u.path.as_str()).or_default().push(u);
        }
        let mut occurrence: HashMap<&str, usize> = HashMap::new();

        let mut rows = Vec::new();
        let mut missing = Vec::new();

        for o in orig {
            let idx = occurrence.entry(o.path.as_str()).or_insert(0);
            let candidate = comp_by_path
                .get(o.path.as_str())
                .and_then(|v| v.get(*idx))
                .copied();
            *idx += 1;

            let Some(c) = candidate else {
                missing.push(o.path.clone());
                continue;
            };

            rows.push(self.compare_units(o, c));
        }

        let units_compared = rows.len();
        let exact_units = rows.iter().filter(|r| r.exact).count();

        let (avg_seq_ratio, min_seq_ratio) = avg_min(rows.iter().map(|r| r.seq_ratio));
        let (avg_count_jaccard, _) = avg_min(rows.iter().map(|r| r.count_jaccard));
        let (avg_block_jaccard, _) = avg_min(rows.iter().map(|r| r.block_jaccard));
        let (avg_edge_jaccard, _) = avg_min(rows.iter().map(|r| r.edge_jaccard));
        let (avg_semantic_score, _) = avg_min(rows.iter().map(|r| r.semantic_score));

        let verdict = if units_compared == 0 || !missing.is_empty() {
            Verdict::Mismatch
        } else if rows.iter().all(|r| r.exact) {
            Verdict::Exact
        } else if avg_seq_ratio >= self.thresholds.avg_ratio
            && min_seq_ratio >= self.thresholds.min_unit_ratio
            && avg_count_jaccard >= self.thresholds.count
            && avg_block_jaccard >= self.thresholds.block
            && avg_edge_jaccard >= self.thresholds.edge
            && avg_semantic_score >= self.thresholds.semantic
        {
            Verdict::Close
        } else {
            Verdict::Mismatch
        };

        ComparisonReport {
            verdict,
            summary: Summary {
                orig_version: orig_version.as_tuple(),
                compiled_version: comp_version.as_tuple(),
                version_mismatch: None,
                units_compared,
                units_missing: missing,
                avg_seq_ratio,
                min_seq_ratio,
                avg_count_jaccard,
                avg_block_jaccard,
                avg_edge_jaccard,
                avg_semantic_score,
                exact_units,
                verdict,
                thresholds: self.thresholds,
                error: None,
            },
            rows,
        }
    }

    fn compare_units(&self, o: &UnitAnalysis, c: &UnitAnalysis) -> ComparisonRow {
        let seq = seq_ratio(&o.norm_ops, &c.norm_ops);
        let count_j = multiset_jaccard(&o.op_counts, &c.op_counts);
        let block_j = multiset_jaccard(&o.block_sig_counts, &c.block_sig_counts);
        let edge_j = multiset_jaccard(&o.edge_sig_counts, &c.edge_sig_counts);
        let semantic = 0.4 * block_j + 0.6 * edge_j;
        let exact = o.norm_ops == c.norm_ops;
        let meta_mismatch = o.meta.diff_keys(&c.meta);

        let tier = if exact {
            Tier::Exact
        } else if meta_mismatch.is_empty() && block_j >= self.thresholds.block && edge_j >= self.thresholds.edge {
            Tier::SemanticEquiv
        } else {
            Tier::Mismatch
        };

        ComparisonRow {
            path: o.path.clone(),
            len_orig: o.norm_ops.len(),
            len_comp: c.norm_ops.len(),
            seq_ratio: seq,
            count_jaccard: count_j,
            block_jaccard: block_j,
            edge_jaccard: edge_j,
            semantic_score: semantic,
            exact,
            tier,
            meta_mismatch,
        }
    }
}

/// Build a mismatch report for a failure that happened before the two
/// sides could even be disassembled (interpreter not found, recompilation
/// failed, artifact unreadable). Every outer driver folds such failures
/// into this shape instead of propagating a bare process error, so a
/// caller inspecting a `ComparisonReport` never has to special-case "it
/// didn't run" versus "it ran and mismatched".
pub fn error_report(thresholds: Thresholds, orig_version: Option<PyVersion>, err: &VerifyError) -> ComparisonReport {
    let version = orig_version.map(|v| v.as_tuple()).unwrap_or((0, 0));
    ComparisonReport {
        verdict: Verdict::Mismatch,
        summary: Summary {
            orig_version: version,
            compiled_version: version,
            version_mismatch: None,
            units_compared: 0,
            units_missing: vec![],
            avg_seq_ratio: 0.0,
            min_seq_ratio: 0.0,
            avg_count_jaccard: 0.0,
            avg_block_jaccard: 0.0,
            avg_edge_jaccard: 0.0,
            avg_semantic_score: 0.0,
            exact_units: 0,
            verdict: Verdict::Mismatch,
            thresholds,
            error: Some(err.to_string()),
        },
        rows: vec![],
    }
}

fn avg_min<I: Iterator<Item = f64>>(iter: I) -> (f64, f64) {
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut n = 0usize;
    for v in iter {
        sum += v;
        min = min.min(v);
        n += 1;
    }
    if n == 0 {
        (0.0, 0.0)
    } else {
        (sum / n as f64, min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn seq_ratio_both_empty_is_one() {
        assert_eq!(seq_ratio(&[], &[]), 1.0);
    }

    #[test]
    fn seq_ratio_one_empty_is_zero() {
        assert_eq!(seq_ratio(&toks(&["a"]), &[]), 0.0);
    }

    #[test]
    fn seq_ratio_identical_is_one() {
        let a = toks(&["a", "b", "c"]);
        assert_eq!(seq_ratio(&a, &a.clone()), 1.0);
    }

    #[test]
    fn seq_ratio_partial_overlap() {
        let a = toks(&["a", "b", "c"]);
        let b = toks(&["a", "x", "c"]);
        // LCS = 2 (a, c), ratio = 2*2/6
        assert!((seq_ratio(&a, &b) - (4.0 / 6.0)).abs() < 1e-9);
    }
}
