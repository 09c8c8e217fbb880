use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::RunSummary;

pub const PASS_THRESHOLD_PERCENT: f64 = 80.0;
pub const GOOD_THRESHOLD_PERCENT: f64 = 90.0;
pub const EXCELLENT_THRESHOLD_PERCENT: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityVerdict {
    Excellent,
    Good,
    Acceptable,
    Poor,
}

impl QualityVerdict {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
        }
    }
}

impl fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn quality_verdict(rate_percent: f64) -> QualityVerdict {
    if rate_percent >= EXCELLENT_THRESHOLD_PERCENT {
        QualityVerdict::Excellent
    } else if rate_percent >= GOOD_THRESHOLD_PERCENT {
        QualityVerdict::Good
    } else if rate_percent >= PASS_THRESHOLD_PERCENT {
        QualityVerdict::Acceptable
    } else {
        QualityVerdict::Poor
    }
}

#[must_use]
pub fn gate_passes(rate_percent: f64) -> bool {
    rate_percent >= PASS_THRESHOLD_PERCENT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub rate_percent: f64,
    pub verdict: QualityVerdict,
    pub pass: bool,
    pub total_tested: usize,
    pub total_matched: usize,
    pub total_mismatched: usize,
    pub total_errors: usize,
    pub cancelled: bool,
    pub reasons: Vec<String>,
}

/// Applies the fixed threshold to a run. Errors and cancellation never
/// change the rate; they are reported alongside it.
#[must_use]
pub fn evaluate_gate(summary: &RunSummary) -> GateResult {
    let rate_percent = summary.overall_rate_percent();
    let pass = gate_passes(rate_percent);

    let mut reasons = Vec::new();
    if !pass {
        if summary.total_tested == 0 {
            reasons.push("no conclusive cases were tested".to_owned());
        } else {
            reasons.push(format!(
                "match rate {rate_percent:.2}% below required {PASS_THRESHOLD_PERCENT:.0}%"
            ));
        }
        if summary.total_errors > 0 {
            reasons.push(format!(
                "{} engine invocations failed and were excluded",
                summary.total_errors
            ));
        }
        if summary.cancelled {
            reasons.push("run was cancelled before completion".to_owned());
        }
    }

    GateResult {
        rate_percent,
        verdict: quality_verdict(rate_percent),
        pass,
        total_tested: summary.total_tested,
        total_matched: summary.total_matched,
        total_mismatched: summary.total_mismatched,
        total_errors: summary.total_errors,
        cancelled: summary.cancelled,
        reasons,
    }
}

pub(crate) fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}
