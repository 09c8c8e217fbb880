use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use dp_runtime::now_unix_ms;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::aggregate::RunSummary;
use crate::bench::BenchmarkSummary;
use crate::gate::{GateResult, QualityVerdict};
use crate::{HarnessConfig, HarnessError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRunArtifacts {
    pub run_summary_path: PathBuf,
    pub gate_result_path: PathBuf,
    pub mismatch_corpus_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftHistoryEntry {
    pub ts_unix_ms: u64,
    pub total_tested: usize,
    pub total_matched: usize,
    pub total_mismatched: usize,
    pub total_errors: usize,
    pub rate_percent: f64,
    pub verdict: QualityVerdict,
    pub gate_pass: bool,
    pub report_hash: String,
}

pub fn write_run_artifacts(
    config: &HarnessConfig,
    summary: &RunSummary,
    gate: &GateResult,
) -> Result<WrittenRunArtifacts, HarnessError> {
    let root = config.differential_artifact_root();
    fs::create_dir_all(&root)?;
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let run_summary_path = root.join("run_summary.json");
    let summary_payload = serde_json::json!({
        "generated_at": generated_at,
        "summary": summary,
    });
    fs::write(
        &run_summary_path,
        serde_json::to_string_pretty(&summary_payload)?,
    )?;

    let gate_result_path = root.join("gate_result.json");
    fs::write(&gate_result_path, serde_json::to_string_pretty(gate)?)?;

    let mismatch_corpus_path = root.join("mismatch_corpus.json");
    let mismatches = summary
        .per_category
        .values()
        .flat_map(|tally| {
            tally.mismatched_samples.iter().map(move |sample| {
                serde_json::json!({
                    "category": tally.name,
                    "mode": tally.mode,
                    "location": sample.location,
                    "input_excerpt": sample.input_excerpt,
                    "reference": sample.pair.reference,
                    "candidate": sample.pair.candidate,
                })
            })
        })
        .collect::<Vec<_>>();
    let mismatch_payload = serde_json::json!({
        "generated_at": generated_at,
        "mismatch_count": summary.total_mismatched,
        "logged_count": mismatches.len(),
        "mismatches": mismatches,
    });
    fs::write(
        &mismatch_corpus_path,
        serde_json::to_string_pretty(&mismatch_payload)?,
    )?;

    info!(root = %root.display(), "wrote differential artifacts");
    Ok(WrittenRunArtifacts {
        run_summary_path,
        gate_result_path,
        mismatch_corpus_path,
    })
}

/// Appends one JSONL row describing `summary` to the drift history. The
/// hash covers the serialized summary so identical runs hash identically.
pub fn append_drift_history(
    config: &HarnessConfig,
    summary: &RunSummary,
    gate: &GateResult,
) -> Result<PathBuf, HarnessError> {
    let history_path = config.drift_history_path();
    if let Some(parent) = history_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&history_path)?;

    let report_json = serde_json::to_vec(summary)?;
    let entry = DriftHistoryEntry {
        ts_unix_ms: now_unix_ms()?,
        total_tested: summary.total_tested,
        total_matched: summary.total_matched,
        total_mismatched: summary.total_mismatched,
        total_errors: summary.total_errors,
        rate_percent: gate.rate_percent,
        verdict: gate.verdict,
        gate_pass: gate.pass,
        report_hash: format!("sha256:{}", hash_bytes(&report_json)),
    };
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;

    Ok(history_path)
}

pub fn write_bench_artifacts(
    config: &HarnessConfig,
    summary: &BenchmarkSummary,
) -> Result<PathBuf, HarnessError> {
    let root = config.bench_artifact_root();
    fs::create_dir_all(&root)?;

    let path = root.join("bench_summary.json");
    let payload = serde_json::json!({
        "generated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "engine": config.engine.program,
        "summary": summary,
    });
    fs::write(&path, serde_json::to_string_pretty(&payload)?)?;
    info!(path = %path.display(), "wrote benchmark artifact");
    Ok(path)
}

fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(hex_digit(byte >> 4));
        out.push(hex_digit(byte & 0x0f));
    }
    out
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}
