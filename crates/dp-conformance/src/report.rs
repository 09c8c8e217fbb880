use crate::aggregate::{CategoryTally, FileRate, RunSummary};
use crate::bench::{BenchmarkOutcome, BenchmarkSummary};
use crate::gate::GateResult;

const RULE: &str = "============================================================";

fn render_fingerprint(fingerprint: Option<&str>) -> String {
    fingerprint.map_or_else(|| "-".to_owned(), |fp| format!("{fp:?}"))
}

/// `names` joined, listing at most `limit` before summarizing the rest.
#[must_use]
pub fn render_file_list(names: &[String], limit: usize) -> String {
    let shown = names.iter().take(limit).cloned().collect::<Vec<_>>().join(", ");
    if names.len() > limit {
        format!("{shown} ... and {} more", names.len() - limit)
    } else {
        shown
    }
}

fn render_file_rate(rate: &FileRate) -> String {
    let errors = if rate.errors > 0 {
        format!(" errors={}", rate.errors)
    } else {
        String::new()
    };
    let interrupted = if rate.interrupted { " [interrupted]" } else { "" };
    format!(
        "  {}: {}/{} matches ({:.1}%){errors}{interrupted}",
        rate.file_name,
        rate.matched,
        rate.tested,
        rate.match_rate_percent()
    )
}

fn render_category(tally: &CategoryTally, list_limit: usize) -> Vec<String> {
    let mut lines = vec![format!("[{}] mode={}", tally.name, tally.mode)];
    if let Some(reason) = &tally.skipped_reason {
        lines.push(format!("  skipped: {reason}"));
        return lines;
    }
    lines.push(format!(
        "  files={} tested={} matched={} ({:.1}%) mismatched={} errors={}",
        tally.files_tested,
        tally.tested,
        tally.matched,
        tally.match_rate_percent(),
        tally.mismatched,
        tally.errors()
    ));
    lines.push(format!(
        "  exact={} partial={} expected_verdict_hits={}/{} (expect_positive={})",
        tally.exact, tally.partial, tally.expected_verdict_hits, tally.matched, tally.expect_positive
    ));
    lines.extend(tally.file_rates.iter().map(render_file_rate));
    if let Some(file) = &tally.interrupted_file {
        lines.push(format!("  interrupted in {file}"));
    }
    if !tally.files_with_mismatches.is_empty() {
        lines.push(format!(
            "  files with mismatches: {}",
            render_file_list(&tally.files_with_mismatches, list_limit)
        ));
    }
    if !tally.unreadable_files.is_empty() {
        lines.push(format!(
            "  unreadable files: {}",
            render_file_list(&tally.unreadable_files, list_limit)
        ));
    }
    for sample in &tally.mismatched_samples {
        lines.push(format!(
            "  mismatch {}: {:?} reference={}/{} candidate={}/{}",
            sample.location,
            sample.input_excerpt,
            sample.pair.reference.is_positive,
            render_fingerprint(sample.pair.reference.fingerprint.as_deref()),
            sample.pair.candidate.is_positive,
            render_fingerprint(sample.pair.candidate.fingerprint.as_deref()),
        ));
    }
    for record in tally.failures.records() {
        lines.push(format!("  error {}: {}", record.subject, record.detail));
    }
    lines
}

#[must_use]
pub fn render_run_report(summary: &RunSummary, gate: &GateResult, list_limit: usize) -> String {
    let mut lines = vec!["Differential parity report".to_owned(), RULE.to_owned()];
    for tally in summary.per_category.values() {
        lines.extend(render_category(tally, list_limit));
    }
    lines.push(RULE.to_owned());
    lines.push(format!(
        "total tested={} matched={} mismatched={} errors={} decode_fallbacks={}",
        summary.total_tested,
        summary.total_matched,
        summary.total_mismatched,
        summary.total_errors,
        summary.total_decode_fallbacks
    ));
    if !summary.skipped_categories.is_empty() {
        lines.push(format!(
            "skipped categories: {}",
            summary.skipped_categories.join(", ")
        ));
    }
    if summary.cancelled {
        lines.push("run cancelled; totals are partial".to_owned());
    }
    lines.push(render_gate(gate));
    lines.join("\n")
}

#[must_use]
pub fn render_gate(gate: &GateResult) -> String {
    let mut out = format!(
        "overall rate={:.2}% verdict={} gate={}",
        gate.rate_percent,
        gate.verdict,
        if gate.pass { "pass" } else { "fail" }
    );
    for reason in &gate.reasons {
        out.push_str("\n  reason: ");
        out.push_str(reason);
    }
    out
}

#[must_use]
pub fn render_bench_report(summary: &BenchmarkSummary) -> String {
    let mut lines = vec!["Engine round-trip benchmarks".to_owned(), RULE.to_owned()];
    for result in &summary.results {
        match &result.outcome {
            BenchmarkOutcome::Measured(stats) => lines.push(format!(
                "{} ({}): mean={:.1}us median={:.1}us stddev={:.1}us samples={} failed={}",
                result.name,
                result.mode,
                stats.mean_us,
                stats.median_us,
                stats.stddev_us,
                stats.samples,
                result.failed
            )),
            BenchmarkOutcome::NoData => lines.push(format!(
                "{} ({}): no data, {}/{} invocations failed",
                result.name, result.mode, result.failed, result.attempted
            )),
        }
    }
    lines.push(RULE.to_owned());
    if let (Some(mean_of_means), Some(mean_of_medians), Some(median_of_medians)) = (
        summary.mean_of_means_us,
        summary.mean_of_medians_us,
        summary.median_of_medians_us,
    ) {
        lines.push(format!("mean of means: {mean_of_means:.1}us"));
        lines.push(format!("mean of medians: {mean_of_medians:.1}us"));
        lines.push(format!("median of medians: {median_of_medians:.1}us"));
        lines.push("fastest cases:".to_owned());
        for (rank, case) in summary.fastest.iter().enumerate() {
            lines.push(format!("  {}. {}: {:.1}us", rank + 1, case.name, case.median_us));
        }
        lines.push("timings include process startup".to_owned());
    } else {
        lines.push("no benchmark produced data".to_owned());
    }
    if summary.cancelled {
        lines.push("benchmarks cancelled; remaining cases skipped".to_owned());
    }
    lines.join("\n")
}
