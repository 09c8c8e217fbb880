#![forbid(unsafe_code)]

pub mod aggregate;
pub mod artifacts;
pub mod bench;
pub mod classify;
pub mod corpus;
pub mod gate;
pub mod invoker;
pub mod report;

use std::fs;
use std::path::{Path, PathBuf};

use dp_runtime::{CancelToken, RunLimits, RuntimeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub use aggregate::{
    CategoryTally, FileRate, FileTally, MismatchSample, RunOptions, RunSummary, run_category,
    run_differential, run_file,
};
pub use artifacts::{
    DriftHistoryEntry, WrittenRunArtifacts, append_drift_history, write_bench_artifacts,
    write_run_artifacts,
};
pub use bench::{
    BenchmarkCase, BenchmarkOutcome, BenchmarkPlan, BenchmarkResult, BenchmarkSample,
    BenchmarkSampler, BenchmarkStats, BenchmarkSummary, RankedCase, run_benchmarks,
    summarize_benchmarks, summarize_timings,
};
pub use classify::{classify, classify_outcome};
pub use corpus::{
    CategorySpec, CorpusLines, CorpusSource, FsCorpusSource, MemoryCorpus, PreparedLine,
    prepare_line,
};
pub use gate::{GateResult, QualityVerdict, evaluate_gate, gate_passes, quality_verdict};
pub use invoker::{
    EngineConfig, EngineInvoker, Invocation, InvocationFailure, SubprocessInvoker,
    parse_engine_output,
};
pub use report::{render_bench_report, render_file_list, render_gate, render_run_report};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Glob(#[from] globset::Error),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("corpus root is missing or not a directory: {}", .0.display())]
    CorpusMissing(PathBuf),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub corpus_root: PathBuf,
    pub artifact_root: PathBuf,
    pub engine: EngineConfig,
    pub limits: RunLimits,
    pub workers: usize,
    pub categories: Vec<CategorySpec>,
    pub benchmark: BenchmarkPlan,
}

impl HarnessConfig {
    /// Paths relative to the workspace root: the libinjection test data, the
    /// release comparison tool and `artifacts/`.
    #[must_use]
    pub fn default_paths() -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        Self {
            corpus_root: repo_root.join("libinjection-c/data"),
            artifact_root: repo_root.join("artifacts"),
            engine: EngineConfig {
                program: repo_root.join("target/release/compare"),
                ..EngineConfig::default()
            },
            limits: RunLimits::sampled(),
            workers: 1,
            categories: CategorySpec::default_set(),
            benchmark: BenchmarkPlan::default(),
        }
    }

    /// Reads a YAML config. Missing sections keep their defaults; relative
    /// paths are resolved against the config file's directory.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let mut config: Self = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.corpus_root = resolve_against(base, &config.corpus_root);
        config.artifact_root = resolve_against(base, &config.artifact_root);
        // A bare program name is left for PATH lookup.
        if config.engine.program.components().count() > 1 {
            config.engine.program = resolve_against(base, &config.engine.program);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        self.limits
            .validate()
            .map_err(|err| HarnessError::Config(err.to_string()))?;
        if self.engine.timeout_ms == 0 {
            return Err(HarnessError::Config(
                "engine.timeout_ms must be greater than zero".to_owned(),
            ));
        }
        if self.workers == 0 {
            return Err(HarnessError::Config(
                "workers must be greater than zero".to_owned(),
            ));
        }
        if self.categories.is_empty() {
            return Err(HarnessError::Config(
                "at least one category is required".to_owned(),
            ));
        }
        for category in &self.categories {
            category.matcher().map_err(|err| {
                HarnessError::Config(format!("category {}: {err}", category.name))
            })?;
        }
        if self.benchmark.measured_runs == 0 {
            return Err(HarnessError::Config(
                "benchmark.measured_runs must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn differential_artifact_root(&self) -> PathBuf {
        self.artifact_root.join("differential")
    }

    #[must_use]
    pub fn drift_history_path(&self) -> PathBuf {
        self.differential_artifact_root()
            .join("drift_history.jsonl")
    }

    #[must_use]
    pub fn bench_artifact_root(&self) -> PathBuf {
        self.artifact_root.join("bench")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub corpus_present: bool,
    pub corpus_file_count: usize,
    pub engine_present: bool,
}

/// Cheap preflight: is there a corpus to read and an engine to run.
#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let corpus_file_count = fs::read_dir(&config.corpus_root)
        .ok()
        .into_iter()
        .flat_map(|it| it.filter_map(Result::ok))
        .count();

    HarnessReport {
        suite: "smoke",
        corpus_present: config.corpus_root.is_dir(),
        corpus_file_count,
        engine_present: config.engine.program.exists(),
    }
}

/// Runs every configured category against the subprocess engine.
pub fn run_differential_suite(
    config: &HarnessConfig,
    cancel: &CancelToken,
) -> Result<RunSummary, HarnessError> {
    config.validate()?;
    let source = FsCorpusSource::new(&config.corpus_root);
    let invoker = SubprocessInvoker::new(config.engine.clone());
    let options = RunOptions {
        limits: config.limits,
        workers: config.workers,
        cancel: cancel.clone(),
    };
    info!(
        corpus = %config.corpus_root.display(),
        engine = %config.engine.program.display(),
        categories = config.categories.len(),
        workers = config.workers,
        "starting differential run"
    );
    run_differential(&source, &invoker, &config.categories, &options)
}

pub fn run_benchmark_suite(
    config: &HarnessConfig,
    cancel: &CancelToken,
) -> Result<BenchmarkSummary, HarnessError> {
    config.validate()?;
    if config.benchmark.cases.is_empty() {
        return Err(HarnessError::Config(
            "benchmark.cases must not be empty".to_owned(),
        ));
    }
    let invoker = SubprocessInvoker::new(config.engine.clone());
    info!(
        engine = %config.engine.program.display(),
        cases = config.benchmark.cases.len(),
        warmup_runs = config.benchmark.warmup_runs,
        measured_runs = config.benchmark.measured_runs,
        "starting benchmarks"
    );
    Ok(run_benchmarks(&invoker, &config.benchmark, cancel))
}

/// Routes Ctrl-C into `cancel` so an interrupted run still reports its
/// partial totals. A second interrupt exits immediately.
pub fn cancel_on_interrupt(cancel: &CancelToken) -> Result<(), HarnessError> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        warn!("interrupt received; finishing with partial results");
        cancel.cancel();
    })?;
    Ok(())
}

/// Installs the stderr fmt subscriber used by the binaries. `RUST_LOG`
/// overrides the default `info` level.
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}


#[cfg(test)]
mod tests {
    use std::fs;

    use dp_types::DetectorMode;

    use super::{HarnessConfig, HarnessError, run_smoke};

    #[test]
    fn default_config_is_valid_and_sampled() {
        let config = HarnessConfig::default_paths();
        config.validate().expect("valid");
        assert_eq!(config.limits.max_files_per_category, 10);
        assert_eq!(config.limits.max_cases_per_file, 20);
        assert_eq!(config.engine.timeout_ms, 5_000);
        assert!(config.corpus_root.ends_with("libinjection-c/data"));
    }

    #[test]
    fn yaml_overrides_sections_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("detparity.yaml");
        fs::write(
            &path,
            "corpus_root: corpus\n\
             engine:\n  program: bin/compare\n  timeout_ms: 250\n\
             limits:\n  max_cases_per_file: 5\n\
             workers: 4\n\
             categories:\n  - name: XSS\n    pattern: \"xss-*.txt\"\n    mode: xss\n",
        )
        .expect("write");

        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.corpus_root, dir.path().join("corpus"));
        assert_eq!(config.engine.program, dir.path().join("bin/compare"));
        assert_eq!(config.engine.timeout_ms, 250);
        assert_eq!(config.limits.max_cases_per_file, 5);
        assert_eq!(config.limits.max_files_per_category, 10);
        assert_eq!(config.workers, 4);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].mode, DetectorMode::Xss);
        assert!(config.categories[0].expect_positive);
        config.validate().expect("valid");
    }

    #[test]
    fn bare_program_name_is_left_for_path_lookup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("detparity.yaml");
        fs::write(&path, "engine:\n  program: compare\n").expect("write");
        let config = HarnessConfig::load(&path).expect("load");
        assert_eq!(config.engine.program, std::path::PathBuf::from("compare"));
    }

    #[test]
    fn zero_caps_and_empty_categories_are_rejected() {
        let mut config = HarnessConfig::default_paths();
        config.limits.max_cases_per_file = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        let mut config = HarnessConfig::default_paths();
        config.categories.clear();
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        let mut config = HarnessConfig::default_paths();
        config.engine.timeout_ms = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn smoke_reports_missing_corpus_and_engine() {
        let config = HarnessConfig {
            corpus_root: "/nonexistent/detparity/corpus".into(),
            ..HarnessConfig::default_paths()
        };
        let report = run_smoke(&config);
        assert_eq!(report.suite, "smoke");
        assert!(!report.corpus_present);
        assert_eq!(report.corpus_file_count, 0);
    }
}
