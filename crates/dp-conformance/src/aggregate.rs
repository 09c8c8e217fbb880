use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use dp_runtime::{CancelToken, FailureLedger, RunLimits};
use dp_types::{AgreementTier, DetectorMode, SourceLocation, TestCase, VerdictPair};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::HarnessError;
use crate::classify::classify_outcome;
use crate::corpus::{CategorySpec, CorpusSource, PreparedLine, prepare_line};
use crate::gate::percent;
use crate::invoker::{EngineInvoker, Invocation, InvocationFailure};

const EXCERPT_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchSample {
    pub location: SourceLocation,
    pub input_excerpt: String,
    pub pair: VerdictPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTally {
    pub file_name: String,
    pub tested: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub exact: usize,
    pub partial: usize,
    pub expected_verdict_hits: usize,
    pub mismatched_samples: Vec<MismatchSample>,
    pub failures: FailureLedger,
    /// Set when the file could not be opened or a read failed part-way.
    pub read_error: Option<String>,
    pub interrupted: bool,
    sample_cap: usize,
}

impl FileTally {
    #[must_use]
    pub fn new(file_name: impl Into<String>, limits: &RunLimits) -> Self {
        Self {
            file_name: file_name.into(),
            tested: 0,
            matched: 0,
            mismatched: 0,
            exact: 0,
            partial: 0,
            expected_verdict_hits: 0,
            mismatched_samples: Vec::new(),
            failures: FailureLedger::with_capacity(limits.max_logged_mismatches_per_file),
            read_error: None,
            interrupted: false,
            sample_cap: limits.max_logged_mismatches_per_file,
        }
    }

    /// Classifies one case and updates the counters; returns the tier.
    pub fn record(
        &mut self,
        case: &TestCase,
        outcome: &Result<Invocation, InvocationFailure>,
        expect_positive: bool,
    ) -> AgreementTier {
        let tier = classify_outcome(outcome, case.mode);
        let invocation = match outcome {
            Ok(invocation) => invocation,
            Err(failure) => {
                if self.failures.records().len() < self.sample_cap {
                    warn!(
                        category = %case.category,
                        location = %case.location,
                        error = %failure,
                        "engine invocation failed"
                    );
                }
                self.failures
                    .record_invocation_failure(case.location.to_string(), failure.to_string());
                return tier;
            }
        };

        self.tested += 1;
        if tier.is_mismatch() {
            self.mismatched += 1;
            debug!(
                category = %case.category,
                location = %case.location,
                reference = invocation.pair.reference.is_positive,
                candidate = invocation.pair.candidate.is_positive,
                "detection mismatch"
            );
            if self.mismatched_samples.len() < self.sample_cap {
                self.mismatched_samples.push(MismatchSample {
                    location: case.location.clone(),
                    input_excerpt: case.excerpt(EXCERPT_CHARS),
                    pair: invocation.pair.clone(),
                });
            }
            return tier;
        }

        self.matched += 1;
        if tier == AgreementTier::ExactMatch {
            self.exact += 1;
        } else {
            self.partial += 1;
        }
        if invocation.pair.reference.is_positive == expect_positive {
            self.expected_verdict_hits += 1;
        }
        tier
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.failures.invocation_failures()
    }

    /// Lines submitted to the engines, conclusive or not.
    #[must_use]
    pub fn evaluated(&self) -> usize {
        self.tested + self.errors()
    }

    #[must_use]
    pub fn match_rate_percent(&self) -> f64 {
        percent(self.matched, self.tested)
    }

    #[must_use]
    pub fn rate(&self) -> FileRate {
        FileRate {
            file_name: self.file_name.clone(),
            tested: self.tested,
            matched: self.matched,
            errors: self.errors(),
            interrupted: self.interrupted,
        }
    }
}

/// Per-file counters kept on the category after the file is folded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRate {
    pub file_name: String,
    pub tested: usize,
    pub matched: usize,
    pub errors: usize,
    pub interrupted: bool,
}

impl FileRate {
    #[must_use]
    pub fn match_rate_percent(&self) -> f64 {
        percent(self.matched, self.tested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTally {
    pub name: String,
    pub mode: DetectorMode,
    pub expect_positive: bool,
    pub files_tested: usize,
    pub tested: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub exact: usize,
    pub partial: usize,
    pub expected_verdict_hits: usize,
    pub mismatched_samples: Vec<MismatchSample>,
    pub files_with_mismatches: Vec<String>,
    pub unreadable_files: Vec<String>,
    /// One entry per folded file, in file order.
    pub file_rates: Vec<FileRate>,
    /// The file cancellation cut short, if any.
    pub interrupted_file: Option<String>,
    pub failures: FailureLedger,
    /// Present when the category was skipped without running any case.
    pub skipped_reason: Option<String>,
    sample_cap: usize,
}

impl CategoryTally {
    #[must_use]
    pub fn new(spec: &CategorySpec, limits: &RunLimits) -> Self {
        Self {
            name: spec.name.clone(),
            mode: spec.mode,
            expect_positive: spec.expect_positive,
            files_tested: 0,
            tested: 0,
            matched: 0,
            mismatched: 0,
            exact: 0,
            partial: 0,
            expected_verdict_hits: 0,
            mismatched_samples: Vec::new(),
            files_with_mismatches: Vec::new(),
            unreadable_files: Vec::new(),
            file_rates: Vec::new(),
            interrupted_file: None,
            failures: FailureLedger::with_capacity(limits.max_category_samples),
            skipped_reason: None,
            sample_cap: limits.max_category_samples,
        }
    }

    #[must_use]
    pub fn skipped(spec: &CategorySpec, limits: &RunLimits, reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Self::new(spec, limits)
        }
    }

    /// Adds a finished file's counters. Samples are appended only while the
    /// category's displayed-subset cap has room.
    pub fn fold(&mut self, file: FileTally) {
        if let Some(err) = &file.read_error {
            self.unreadable_files.push(file.file_name.clone());
            warn!(category = %self.name, file = %file.file_name, error = %err, "corpus file read failed");
        }
        self.files_tested += 1;
        self.tested += file.tested;
        self.matched += file.matched;
        self.mismatched += file.mismatched;
        self.exact += file.exact;
        self.partial += file.partial;
        self.expected_verdict_hits += file.expected_verdict_hits;
        self.failures.absorb(&file.failures);
        if file.mismatched > 0 {
            self.files_with_mismatches.push(file.file_name.clone());
        }
        if file.interrupted && self.interrupted_file.is_none() {
            self.interrupted_file = Some(file.file_name.clone());
        }
        let rate = file.rate();

        info!(
            category = %self.name,
            file = %file.file_name,
            tested = file.tested,
            matched = file.matched,
            mismatched = file.mismatched,
            errors = rate.errors,
            rate = format_args!("{:.1}%", rate.match_rate_percent()),
            "file complete"
        );

        self.file_rates.push(rate);
        let room = self.sample_cap.saturating_sub(self.mismatched_samples.len());
        self.mismatched_samples
            .extend(file.mismatched_samples.into_iter().take(room));
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.failures.invocation_failures()
    }

    #[must_use]
    pub fn match_rate_percent(&self) -> f64 {
        percent(self.matched, self.tested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub per_category: BTreeMap<String, CategoryTally>,
    pub total_tested: usize,
    pub total_matched: usize,
    pub total_mismatched: usize,
    pub total_errors: usize,
    pub total_decode_fallbacks: usize,
    pub skipped_categories: Vec<String>,
    pub cancelled: bool,
}

impl RunSummary {
    #[must_use]
    pub fn from_categories(categories: Vec<CategoryTally>, cancelled: bool) -> Self {
        let mut summary = Self {
            per_category: BTreeMap::new(),
            total_tested: 0,
            total_matched: 0,
            total_mismatched: 0,
            total_errors: 0,
            total_decode_fallbacks: 0,
            skipped_categories: Vec::new(),
            cancelled,
        };
        for tally in categories {
            summary.total_tested += tally.tested;
            summary.total_matched += tally.matched;
            summary.total_mismatched += tally.mismatched;
            summary.total_errors += tally.errors();
            summary.total_decode_fallbacks += tally.failures.decode_fallbacks();
            if tally.skipped_reason.is_some() {
                summary.skipped_categories.push(tally.name.clone());
            }
            summary.per_category.insert(tally.name.clone(), tally);
        }
        summary
    }

    /// `total_matched / total_tested` as a percentage, 0 for an empty run.
    #[must_use]
    pub fn overall_rate_percent(&self) -> f64 {
        percent(self.total_matched, self.total_tested)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub limits: RunLimits,
    /// Worker threads per category; files are distributed across them.
    pub workers: usize,
    pub cancel: CancelToken,
}

impl RunOptions {
    #[must_use]
    pub fn new(limits: RunLimits) -> Self {
        Self {
            limits,
            workers: 1,
            cancel: CancelToken::new(),
        }
    }
}

/// Streams every category through the invoker and folds the verdicts into
/// a [`RunSummary`].
///
/// Only an unavailable corpus is an error. Categories without files are
/// skipped, per-case failures are tallied, and a cancelled run returns the
/// categories folded so far with `cancelled` set.
pub fn run_differential(
    source: &dyn CorpusSource,
    invoker: &dyn EngineInvoker,
    categories: &[CategorySpec],
    options: &RunOptions,
) -> Result<RunSummary, HarnessError> {
    source.check_available()?;

    let mut tallies = Vec::with_capacity(categories.len());
    for spec in categories {
        if options.cancel.is_cancelled() {
            warn!(category = %spec.name, "run cancelled before category started");
            break;
        }
        let tally = run_category(source, invoker, spec, options);
        info!(
            category = %tally.name,
            files = tally.files_tested,
            tested = tally.tested,
            matched = tally.matched,
            mismatched = tally.mismatched,
            errors = tally.errors(),
            rate = format_args!("{:.1}%", tally.match_rate_percent()),
            "category complete"
        );
        tallies.push(tally);
    }

    Ok(RunSummary::from_categories(
        tallies,
        options.cancel.is_cancelled(),
    ))
}

pub fn run_category(
    source: &dyn CorpusSource,
    invoker: &dyn EngineInvoker,
    spec: &CategorySpec,
    options: &RunOptions,
) -> CategoryTally {
    let limits = &options.limits;
    let files = match source.list_files(spec) {
        Ok(files) if files.is_empty() => {
            warn!(category = %spec.name, pattern = %spec.pattern, "no corpus files matched");
            return CategoryTally::skipped(
                spec,
                limits,
                format!("no files matched {}", spec.pattern),
            );
        }
        Ok(files) => files,
        Err(err) => {
            warn!(category = %spec.name, error = %err, "category skipped");
            return CategoryTally::skipped(spec, limits, err.to_string());
        }
    };
    let selected = files
        .into_iter()
        .take(limits.max_files_per_category)
        .collect::<Vec<_>>();

    let mut tally = CategoryTally::new(spec, limits);
    let workers = options.workers.max(1).min(selected.len().max(1));
    if workers == 1 {
        for file_name in &selected {
            if options.cancel.is_cancelled() {
                break;
            }
            tally.fold(run_file(source, invoker, spec, file_name, options));
        }
        return tally;
    }

    // Workers own their FileTally; this thread is the only writer of the
    // category tally and folds in file order.
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, FileTally)>();
    let mut finished = BTreeMap::new();
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let selected = &selected;
            scope.spawn(move || {
                loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    if idx >= selected.len() || options.cancel.is_cancelled() {
                        break;
                    }
                    let file = run_file(source, invoker, spec, &selected[idx], options);
                    if tx.send((idx, file)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);
        for (idx, file) in rx {
            finished.insert(idx, file);
        }
    });
    for file in finished.into_values() {
        tally.fold(file);
    }
    tally
}

/// Runs one file in line order until its case cap, EOF, a read error, or
/// cancellation.
pub fn run_file(
    source: &dyn CorpusSource,
    invoker: &dyn EngineInvoker,
    spec: &CategorySpec,
    file_name: &str,
    options: &RunOptions,
) -> FileTally {
    let limits = &options.limits;
    let mut tally = FileTally::new(file_name, limits);
    let lines = match source.open(file_name) {
        Ok(lines) => lines,
        Err(err) => {
            tally.read_error = Some(err.to_string());
            return tally;
        }
    };

    for (idx, line) in lines.enumerate() {
        if tally.evaluated() >= limits.max_cases_per_file {
            break;
        }
        if options.cancel.is_cancelled() {
            tally.interrupted = true;
            warn!(
                category = %spec.name,
                file = file_name,
                line = idx + 1,
                "file interrupted by cancellation"
            );
            break;
        }
        let raw = match line {
            Ok(raw) => raw,
            Err(err) => {
                tally.read_error = Some(err.to_string());
                break;
            }
        };
        let PreparedLine::Case {
            input,
            decode_fallback,
        } = prepare_line(&raw)
        else {
            continue;
        };
        if decode_fallback {
            tally.failures.note_decode_fallback();
        }

        let case = TestCase {
            input,
            category: spec.name.clone(),
            mode: spec.mode,
            location: SourceLocation {
                file: file_name.to_owned(),
                line: idx + 1,
            },
        };
        let outcome = invoker.invoke(case.mode, &case.input);
        tally.record(&case, &outcome, spec.expect_positive);
    }

    let unlogged = tally.errors().saturating_sub(tally.failures.records().len());
    if unlogged > 0 {
        warn!(
            category = %spec.name,
            file = file_name,
            unlogged,
            "further engine invocation failures not logged individually"
        );
    }
    tally
}
