//! Batches per-artifact comparison reports into verdict counts and a
//! worst-N list. Explicitly consumes a manifest rather than walking a
//! directory tree itself — directory discovery stays out of scope.

use serde::{Deserialize, Serialize};

use crate::comparator::{ComparisonReport, Verdict};

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub orig: String,
    pub src: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRow {
    pub label: String,
    pub verdict: Verdict,
    pub avg_seq_ratio: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub exact: usize,
    pub close: usize,
    pub mismatch: usize,
    pub errored: usize,
    pub worst: Vec<BatchRow>,
}

pub struct ReportAggregator {
    pub worst_n: usize,
    rows: Vec<BatchRow>,
}

impl ReportAggregator {
    pub fn new(worst_n: usize) -> Self {
        Self { worst_n, rows: Vec::new() }
    }

    pub fn record(&mut self, label: String, report: &ComparisonReport) {
        self.rows.push(BatchRow {
            label,
            verdict: report.verdict,
            avg_seq_ratio: report.summary.avg_seq_ratio,
            error: None,
        });
    }

    pub fn record_error(&mut self, label: String, error: String) {
        self.rows.push(BatchRow {
            label,
            verdict: Verdict::Mismatch,
            avg_seq_ratio: 0.0,
            error: Some(error),
        });
    }

    pub fn finish(self) -> BatchSummary {
        let total = self.rows.len();
        let exact = self.rows.iter().filter(|r| r.verdict == Verdict::Exact).count();
        let close = self.rows.iter().filter(|r| r.verdict == Verdict::Close).count();
        let errored = self.rows.iter().filter(|r| r.error.is_some()).count();
        let mismatch = total - exact - close;

        let mut worst = self.rows.clone();
        worst.sort_by(|a, b| a.avg_seq_ratio.partial_cmp(&b.avg_seq_ratio).unwrap());
        worst.truncate(self.worst_n);

        BatchSummary { total, exact, close, mismatch, errored, worst }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{Summary, Thresholds};

    fn fake_report(verdict: Verdict, ratio: f64) -> ComparisonReport {
        ComparisonReport {
            verdict,
            summary: Summary {
                orig_version: (3, 11),
                compiled_version: (3, 11),
                version_mismatch: None,
                units_compared: 1,
                units_missing: vec![],
                avg_seq_ratio: ratio,
                min_seq_ratio: ratio,
                avg_count_jaccard: ratio,
                avg_block_jaccard: ratio,
                avg_edge_jaccard: ratio,
                avg_semantic_score: ratio,
                exact_units: if verdict == Verdict::Exact { 1 } else { 0 },
                verdict,
                thresholds: Thresholds::default(),
                error: None,
            },
            rows: vec![],
        }
    }

    #[test]
    fn worst_n_sorts_ascending_by_ratio() {
        let mut agg = ReportAggregator::new(2);
        agg.record("a".into(), &fake_report(Verdict::Close, 0.95));
        agg.record("b".into(), &fake_report(Verdict::Mismatch, 0.40));
        agg.record("c".into(), &fake_report(Verdict::Exact, 1.0));
        let summary = agg.finish();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.worst.len(), 2);
        assert_eq!(summary.worst[0].label, "b");
    }

    #[test]
    fn errored_entries_count_as_mismatch() {
        let mut agg = ReportAggregator::new(5);
        agg.record_error("broken".into(), "tool not found".into());
        let summary = agg.finish();
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.mismatch, 1);
    }
}
