use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dp_conformance::{
    BenchmarkOutcome, BenchmarkResult, BenchmarkSampler, CategorySpec, EngineInvoker,
    FsCorpusSource, HarnessError, Invocation, InvocationFailure, QualityVerdict, RunOptions,
    evaluate_gate, run_differential,
};
use dp_runtime::{CancelToken, RunLimits};
use dp_types::{DetectorMode, EngineVerdict, VerdictPair};

/// In-process stand-in for the comparison tool: verdicts keyed by input.
struct ScriptedEngine {
    verdicts: HashMap<Vec<u8>, VerdictPair>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            verdicts: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn with(mut self, input: &str, pair: VerdictPair) -> Self {
        self.verdicts.insert(input.as_bytes().to_vec(), pair);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EngineInvoker for ScriptedEngine {
    fn invoke(&self, _mode: DetectorMode, input: &[u8]) -> Result<Invocation, InvocationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdicts
            .get(input)
            .cloned()
            .map(|pair| Invocation {
                pair,
                elapsed: Duration::from_micros(50),
            })
            .ok_or_else(|| InvocationFailure::Parse("no scripted verdict".to_owned()))
    }
}

fn exact() -> VerdictPair {
    VerdictPair::new(
        EngineVerdict::positive(Some("s&sos")),
        EngineVerdict::positive(Some("s&sos")),
    )
}

fn partial() -> VerdictPair {
    VerdictPair::new(
        EngineVerdict::positive(Some("s&sos")),
        EngineVerdict::positive(Some("s&so")),
    )
}

fn mismatch() -> VerdictPair {
    VerdictPair::new(EngineVerdict::positive(Some("1ovk")), EngineVerdict::negative())
}

fn sqli_only() -> Vec<CategorySpec> {
    vec![CategorySpec::new(
        "SQL Injection",
        "sqli-*.txt",
        DetectorMode::Sqli,
        true,
    )]
}

fn write_corpus(root: &Path, name: &str, lines: &[String]) {
    fs::write(root.join(name), lines.join("\n")).expect("write corpus file");
}

fn lines(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|n| format!("{prefix}{n}")).collect()
}

fn exhaustive() -> RunOptions {
    RunOptions::new(RunLimits::exhaustive())
}

#[test]
fn scenario_all_exact_is_excellent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inputs = lines("exact", 3);
    write_corpus(dir.path(), "sqli-a.txt", &inputs);
    let engine = inputs
        .iter()
        .fold(ScriptedEngine::new(), |engine, input| engine.with(input, exact()));

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &engine,
        &sqli_only(),
        &exhaustive(),
    )
    .expect("run");
    assert_eq!(summary.total_tested, 3);
    assert_eq!(summary.total_matched, 3);
    assert_eq!(summary.total_mismatched, 0);

    let gate = evaluate_gate(&summary);
    assert!(gate.pass);
    assert_eq!(gate.verdict, QualityVerdict::Excellent);
}

#[test]
fn scenario_eighty_percent_is_acceptable_and_passes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = ScriptedEngine::new();
    let mut corpus = Vec::new();
    for (n, pair) in std::iter::repeat_n(exact(), 7)
        .chain([partial()])
        .chain(std::iter::repeat_n(mismatch(), 2))
        .enumerate()
    {
        let input = format!("case{n}");
        engine = engine.with(&input, pair);
        corpus.push(input);
    }
    write_corpus(dir.path(), "sqli-b.txt", &corpus);

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &engine,
        &sqli_only(),
        &exhaustive(),
    )
    .expect("run");
    let tally = &summary.per_category["SQL Injection"];
    assert_eq!(tally.exact, 7);
    assert_eq!(tally.partial, 1);
    assert_eq!(summary.total_matched, 8);
    assert_eq!(summary.total_mismatched, 2);

    let gate = evaluate_gate(&summary);
    assert_eq!(gate.rate_percent, 80.0);
    assert!(gate.pass);
    assert_eq!(gate.verdict, QualityVerdict::Acceptable);
}

#[test]
fn scenario_forty_percent_is_poor_and_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let corpus = ["m0", "m1", "m2", "e0", "e1"].map(str::to_owned);
    write_corpus(dir.path(), "sqli-c.txt", &corpus);
    let engine = ScriptedEngine::new()
        .with("m0", mismatch())
        .with("m1", mismatch())
        .with("m2", mismatch())
        .with("e0", exact())
        .with("e1", exact());

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &engine,
        &sqli_only(),
        &exhaustive(),
    )
    .expect("run");
    let gate = evaluate_gate(&summary);
    assert_eq!(gate.rate_percent, 40.0);
    assert!(!gate.pass);
    assert_eq!(gate.verdict, QualityVerdict::Poor);
}

/// Returns a scripted outcome per call: `None` is a failed invocation.
struct SequenceEngine {
    outcomes: Vec<Option<u64>>,
    calls: AtomicUsize,
}

impl EngineInvoker for SequenceEngine {
    fn invoke(&self, _mode: DetectorMode, _input: &[u8]) -> Result<Invocation, InvocationFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.get(call).copied().flatten() {
            Some(micros) => Ok(Invocation {
                pair: VerdictPair::new(EngineVerdict::negative(), EngineVerdict::negative()),
                elapsed: Duration::from_micros(micros),
            }),
            None => Err(InvocationFailure::Timeout { timeout_ms: 5_000 }),
        }
    }
}

#[test]
fn scenario_benchmark_keeps_only_successful_measured_timings() {
    let mut outcomes = vec![Some(1_000_000); 5];
    outcomes.extend([
        Some(10),
        None,
        Some(12),
        Some(11),
        None,
        Some(13),
        Some(10),
        Some(12),
        Some(11),
        Some(10),
    ]);
    let engine = SequenceEngine {
        outcomes,
        calls: AtomicUsize::new(0),
    };

    let sample = BenchmarkSampler::new(&engine).measure(
        "boolean_injection",
        DetectorMode::Sqli,
        b"1' OR '1'='1",
        5,
        10,
    );
    assert_eq!(sample.timings.len(), 8);
    assert_eq!(sample.failed, 2);
    let result = BenchmarkResult::from_sample(&sample);
    let stats = result.stats().expect("measured");
    assert_eq!(stats.samples, 8);
    assert!(stats.mean_us < 20.0);
}

#[test]
fn scenario_benchmark_with_every_run_failing_reports_no_data() {
    let engine = SequenceEngine {
        outcomes: Vec::new(),
        calls: AtomicUsize::new(0),
    };
    let sample = BenchmarkSampler::new(&engine).measure("dead", DetectorMode::Sqli, b"x", 5, 10);
    assert!(sample.timings.is_empty());
    let result = BenchmarkResult::from_sample(&sample);
    assert_eq!(result.outcome, BenchmarkOutcome::NoData);
}

#[test]
fn repeated_runs_over_the_same_corpus_are_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inputs = lines("x", 30);
    write_corpus(dir.path(), "sqli-1.txt", &inputs[..15]);
    write_corpus(dir.path(), "sqli-2.txt", &inputs[15..]);
    let engine = inputs.iter().enumerate().fold(ScriptedEngine::new(), |engine, (n, input)| {
        engine.with(input, if n % 4 == 0 { mismatch() } else { exact() })
    });
    let source = FsCorpusSource::new(dir.path());
    let options = RunOptions::new(RunLimits::sampled());

    let first = run_differential(&source, &engine, &sqli_only(), &options).expect("first");
    let second = run_differential(&source, &engine, &sqli_only(), &options).expect("second");
    assert_eq!(first, second);
}

#[test]
fn sampled_limits_bound_work_per_file_and_category() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = ScriptedEngine::new();
    for file in 0..12 {
        let inputs = lines(&format!("f{file:02}-"), 25);
        for input in &inputs {
            engine = engine.with(input, exact());
        }
        write_corpus(dir.path(), &format!("sqli-{file:02}.txt"), &inputs);
    }

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &engine,
        &sqli_only(),
        &RunOptions::new(RunLimits::sampled()),
    )
    .expect("run");
    let tally = &summary.per_category["SQL Injection"];
    assert_eq!(tally.files_tested, 10);
    assert_eq!(tally.tested, 200);
    assert_eq!(engine.calls(), 200);
}

#[test]
fn parallel_workers_match_sequential_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut engine = ScriptedEngine::new();
    for file in 0..8 {
        let inputs = lines(&format!("p{file}-"), 9);
        for (n, input) in inputs.iter().enumerate() {
            let pair = if (n + file) % 3 == 0 { mismatch() } else { exact() };
            engine = engine.with(input, pair);
        }
        write_corpus(dir.path(), &format!("sqli-{file}.txt"), &inputs);
    }
    let source = FsCorpusSource::new(dir.path());

    let sequential = run_differential(&source, &engine, &sqli_only(), &exhaustive()).expect("run");
    let parallel = run_differential(
        &source,
        &engine,
        &sqli_only(),
        &RunOptions {
            workers: 4,
            ..exhaustive()
        },
    )
    .expect("run");
    assert_eq!(sequential, parallel);
}

#[test]
fn missing_corpus_root_aborts_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = run_differential(
        &FsCorpusSource::new(dir.path().join("absent")),
        &ScriptedEngine::new(),
        &CategorySpec::default_set(),
        &exhaustive(),
    );
    assert!(matches!(result, Err(HarnessError::CorpusMissing(_))));
}

#[test]
fn default_categories_skip_missing_files_and_keep_going() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_corpus(dir.path(), "false_positives.txt", &["hello world".to_owned()]);
    let engine = ScriptedEngine::new().with(
        "hello world",
        VerdictPair::new(EngineVerdict::negative(), EngineVerdict::negative()),
    );

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &engine,
        &CategorySpec::default_set(),
        &exhaustive(),
    )
    .expect("run");
    assert_eq!(
        summary.skipped_categories,
        vec!["SQL Injection".to_owned(), "XSS".to_owned()]
    );
    let false_positives = &summary.per_category["False Positives"];
    assert_eq!(false_positives.matched, 1);
    assert_eq!(false_positives.expected_verdict_hits, 1);
}

#[test]
fn expired_deadline_cancels_and_marks_the_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_corpus(dir.path(), "sqli-a.txt", &lines("c", 5));
    let options = RunOptions {
        cancel: CancelToken::with_deadline(Duration::ZERO),
        ..exhaustive()
    };

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &ScriptedEngine::new(),
        &sqli_only(),
        &options,
    )
    .expect("run");
    assert!(summary.cancelled);
    assert_eq!(summary.total_tested + summary.total_errors, 0);
    assert!(!evaluate_gate(&summary).pass);
}

#[test]
fn failed_invocations_are_counted_as_errors_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_corpus(
        dir.path(),
        "sqli-a.txt",
        &["known".to_owned(), "unknown".to_owned(), "%ZZ".to_owned()],
    );
    let engine = ScriptedEngine::new().with("known", exact());

    let summary = run_differential(
        &FsCorpusSource::new(dir.path()),
        &engine,
        &sqli_only(),
        &exhaustive(),
    )
    .expect("run");
    assert_eq!(summary.total_tested, 1);
    assert_eq!(summary.total_errors, 2);
    assert_eq!(summary.total_mismatched, 0);
    assert_eq!(summary.overall_rate_percent(), 100.0);
}
