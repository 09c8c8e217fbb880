use std::time::Duration;

use dp_runtime::CancelToken;
use dp_types::DetectorMode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::invoker::EngineInvoker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub name: String,
    #[serde(default = "default_bench_mode")]
    pub mode: DetectorMode,
    pub input: String,
}

fn default_bench_mode() -> DetectorMode {
    DetectorMode::Sqli
}

impl BenchmarkCase {
    #[must_use]
    pub fn new(name: impl Into<String>, mode: DetectorMode, input: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode,
            input: input.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkPlan {
    pub warmup_runs: usize,
    pub measured_runs: usize,
    /// How many cases the comparative report ranks as fastest.
    pub fastest: usize,
    pub cases: Vec<BenchmarkCase>,
}

impl Default for BenchmarkPlan {
    fn default() -> Self {
        let cases = [
            ("simple_select", "SELECT * FROM users WHERE id = 1"),
            ("union_attack", "' UNION SELECT 1,2,3--"),
            ("boolean_injection", "1' OR '1'='1"),
            ("time_based", "1' AND SLEEP(5)--"),
            ("comment_injection", "admin'--"),
            ("script_tag", "<script>alert('xss')</script>"),
            ("img_onerror", "<img src=x onerror=alert(1)>"),
            ("iframe_js", "<iframe src=javascript:alert(1)></iframe>"),
            ("safe_text", "Hello world"),
            ("safe_html", "<div>Hello <b>world</b></div>"),
        ]
        .into_iter()
        .map(|(name, input)| BenchmarkCase::new(name, DetectorMode::Sqli, input))
        .collect();

        Self {
            warmup_runs: 5,
            measured_runs: 100,
            fastest: 3,
            cases,
        }
    }
}

/// Measured timings for one input. Warm-up runs and failed invocations
/// contribute no timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkSample {
    pub name: String,
    pub mode: DetectorMode,
    pub input: Vec<u8>,
    pub timings: Vec<Duration>,
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStats {
    pub samples: usize,
    pub mean_us: f64,
    pub median_us: f64,
    pub stddev_us: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BenchmarkOutcome {
    Measured(BenchmarkStats),
    /// Every measured invocation failed.
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub mode: DetectorMode,
    pub attempted: usize,
    pub failed: usize,
    pub outcome: BenchmarkOutcome,
}

impl BenchmarkResult {
    #[must_use]
    pub fn from_sample(sample: &BenchmarkSample) -> Self {
        let outcome = match summarize_timings(&sample.timings) {
            Some(stats) => BenchmarkOutcome::Measured(stats),
            None => BenchmarkOutcome::NoData,
        };
        Self {
            name: sample.name.clone(),
            mode: sample.mode,
            attempted: sample.attempted,
            failed: sample.failed,
            outcome,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Option<&BenchmarkStats> {
        match &self.outcome {
            BenchmarkOutcome::Measured(stats) => Some(stats),
            BenchmarkOutcome::NoData => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCase {
    pub name: String,
    pub median_us: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub results: Vec<BenchmarkResult>,
    /// Aggregates over measured cases only; `None` when nothing was measured.
    pub mean_of_means_us: Option<f64>,
    pub mean_of_medians_us: Option<f64>,
    pub median_of_medians_us: Option<f64>,
    pub fastest: Vec<RankedCase>,
    pub cancelled: bool,
}

impl BenchmarkSummary {
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.results.iter().any(|result| result.stats().is_some())
    }
}

pub struct BenchmarkSampler<'a> {
    invoker: &'a dyn EngineInvoker,
}

impl<'a> BenchmarkSampler<'a> {
    #[must_use]
    pub fn new(invoker: &'a dyn EngineInvoker) -> Self {
        Self { invoker }
    }

    /// Runs `warmup_runs` discarded invocations, then `measured_runs` timed
    /// ones. The timing is the round trip reported by the invoker.
    pub fn measure(
        &self,
        name: &str,
        mode: DetectorMode,
        input: &[u8],
        warmup_runs: usize,
        measured_runs: usize,
    ) -> BenchmarkSample {
        for _ in 0..warmup_runs {
            let _ = self.invoker.invoke(mode, input);
        }

        let mut timings = Vec::with_capacity(measured_runs);
        let mut failed = 0;
        for _ in 0..measured_runs {
            match self.invoker.invoke(mode, input) {
                Ok(invocation) => timings.push(invocation.elapsed),
                Err(err) => {
                    failed += 1;
                    if failed == 1 {
                        warn!(case = name, error = %err, "benchmark invocation failed");
                    }
                }
            }
        }

        BenchmarkSample {
            name: name.to_owned(),
            mode,
            input: input.to_vec(),
            timings,
            attempted: measured_runs,
            failed,
        }
    }
}

/// Mean, median and sample standard deviation in microseconds; `None` for
/// an empty slice.
#[must_use]
pub fn summarize_timings(timings: &[Duration]) -> Option<BenchmarkStats> {
    if timings.is_empty() {
        return None;
    }
    let micros = timings
        .iter()
        .map(|timing| timing.as_secs_f64() * 1_000_000.0)
        .collect::<Vec<_>>();
    let n = micros.len();
    let mean = mean_f64(&micros);
    let stddev = if n < 2 {
        0.0
    } else {
        let variance = micros
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    };

    Some(BenchmarkStats {
        samples: n,
        mean_us: mean,
        median_us: median_f64(&micros),
        stddev_us: stddev,
    })
}

/// Comparative view across cases: aggregates of the per-case statistics and
/// the `fastest_n` measured cases ranked by median.
#[must_use]
pub fn summarize_benchmarks(results: Vec<BenchmarkResult>, fastest_n: usize) -> BenchmarkSummary {
    let measured = results
        .iter()
        .filter_map(|result| result.stats().map(|stats| (result.name.as_str(), stats)))
        .collect::<Vec<_>>();
    let means = measured
        .iter()
        .map(|(_, stats)| stats.mean_us)
        .collect::<Vec<_>>();
    let medians = measured
        .iter()
        .map(|(_, stats)| stats.median_us)
        .collect::<Vec<_>>();

    let mut ranked = measured
        .iter()
        .map(|(name, stats)| RankedCase {
            name: (*name).to_owned(),
            median_us: stats.median_us,
        })
        .collect::<Vec<_>>();
    // Stable sort keeps plan order among equal medians.
    ranked.sort_by(|left, right| left.median_us.total_cmp(&right.median_us));
    ranked.truncate(fastest_n);

    let has_data = !measured.is_empty();
    BenchmarkSummary {
        mean_of_means_us: has_data.then(|| mean_f64(&means)),
        mean_of_medians_us: has_data.then(|| mean_f64(&medians)),
        median_of_medians_us: has_data.then(|| median_f64(&medians)),
        fastest: ranked,
        results,
        cancelled: false,
    }
}

/// Measures every case of `plan` in order, stopping early on cancellation.
pub fn run_benchmarks(
    invoker: &dyn EngineInvoker,
    plan: &BenchmarkPlan,
    cancel: &CancelToken,
) -> BenchmarkSummary {
    let sampler = BenchmarkSampler::new(invoker);
    let mut results = Vec::with_capacity(plan.cases.len());
    let mut cancelled = false;
    for case in &plan.cases {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let sample = sampler.measure(
            &case.name,
            case.mode,
            case.input.as_bytes(),
            plan.warmup_runs,
            plan.measured_runs,
        );
        let result = BenchmarkResult::from_sample(&sample);
        match result.stats() {
            Some(stats) => info!(
                case = %result.name,
                samples = stats.samples,
                mean_us = format_args!("{:.1}", stats.mean_us),
                median_us = format_args!("{:.1}", stats.median_us),
                "benchmark complete"
            ),
            None => warn!(case = %result.name, failed = result.failed, "benchmark produced no data"),
        }
        results.push(result);
    }

    let mut summary = summarize_benchmarks(results, plan.fastest);
    summary.cancelled = cancelled;
    summary
}

fn mean_f64(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median_f64(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mid = n / 2;
    if n % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use dp_runtime::CancelToken;
    use dp_types::{DetectorMode, EngineVerdict, VerdictPair};

    use super::{
        BenchmarkCase, BenchmarkOutcome, BenchmarkPlan, BenchmarkResult, BenchmarkSampler,
        run_benchmarks, summarize_benchmarks, summarize_timings,
    };
    use crate::invoker::{EngineInvoker, Invocation, InvocationFailure};

    /// Replays a fixed list of outcomes in order, then fails.
    struct ScriptedInvoker {
        script: Vec<Option<u64>>,
        calls: AtomicUsize,
    }

    impl ScriptedInvoker {
        fn new(script: Vec<Option<u64>>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EngineInvoker for ScriptedInvoker {
        fn invoke(&self, _mode: DetectorMode, _input: &[u8]) -> Result<Invocation, InvocationFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(call).copied().flatten() {
                Some(micros) => Ok(Invocation {
                    pair: VerdictPair::new(EngineVerdict::negative(), EngineVerdict::negative()),
                    elapsed: Duration::from_micros(micros),
                }),
                None => Err(InvocationFailure::ExitStatus {
                    status: 1,
                    stderr: String::new(),
                }),
            }
        }
    }

    fn micros(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_micros).collect()
    }

    #[test]
    fn stats_use_sample_standard_deviation() {
        let stats = summarize_timings(&micros(&[10, 20, 30, 40])).expect("stats");
        assert_eq!(stats.samples, 4);
        assert!((stats.mean_us - 25.0).abs() < 1e-9);
        assert!((stats.median_us - 25.0).abs() < 1e-9);
        // sqrt(500 / 3)
        assert!((stats.stddev_us - 12.909_944_487).abs() < 1e-6);
    }

    #[test]
    fn single_sample_has_zero_stddev_and_empty_has_no_stats() {
        let stats = summarize_timings(&micros(&[7])).expect("stats");
        assert_eq!(stats.stddev_us, 0.0);
        assert_eq!(stats.median_us, 7.0);
        assert!(summarize_timings(&[]).is_none());
    }

    #[test]
    fn warmup_is_discarded_and_failures_are_not_timed() {
        // 2 warm-up runs (very slow), then 4 measured with one failure.
        let invoker = ScriptedInvoker::new(vec![Some(9_000), Some(9_000), Some(10), None, Some(30), Some(20)]);
        let sample = BenchmarkSampler::new(&invoker).measure("case", DetectorMode::Sqli, b"x", 2, 4);
        assert_eq!(sample.attempted, 4);
        assert_eq!(sample.failed, 1);
        assert_eq!(sample.timings, micros(&[10, 30, 20]));

        let result = BenchmarkResult::from_sample(&sample);
        assert_eq!(result.stats().expect("stats").median_us, 20.0);
    }

    #[test]
    fn all_failed_runs_yield_no_data() {
        let invoker = ScriptedInvoker::new(Vec::new());
        let sample = BenchmarkSampler::new(&invoker).measure("dead", DetectorMode::Xss, b"x", 1, 3);
        let result = BenchmarkResult::from_sample(&sample);
        assert_eq!(result.outcome, BenchmarkOutcome::NoData);
        assert_eq!(result.failed, 3);
    }

    #[test]
    fn comparative_summary_ranks_fastest_by_median_and_skips_no_data() {
        let result = |name: &str, timings: &[u64]| {
            BenchmarkResult::from_sample(&super::BenchmarkSample {
                name: name.to_owned(),
                mode: DetectorMode::Sqli,
                input: Vec::new(),
                timings: micros(timings),
                attempted: timings.len().max(1),
                failed: usize::from(timings.is_empty()),
            })
        };
        let summary = summarize_benchmarks(
            vec![
                result("slow", &[300]),
                result("dead", &[]),
                result("fast", &[100]),
                result("mid", &[200]),
            ],
            2,
        );
        assert_eq!(summary.results.len(), 4);
        assert_eq!(
            summary.fastest.iter().map(|case| case.name.as_str()).collect::<Vec<_>>(),
            vec!["fast", "mid"]
        );
        assert_eq!(summary.mean_of_medians_us, Some(200.0));
        assert_eq!(summary.median_of_medians_us, Some(200.0));
        assert_eq!(summary.mean_of_means_us, Some(200.0));
        assert!(summary.has_data());
    }

    #[test]
    fn summary_without_measurements_has_no_aggregates() {
        let summary = summarize_benchmarks(Vec::new(), 3);
        assert!(!summary.has_data());
        assert_eq!(summary.mean_of_medians_us, None);
        assert!(summary.fastest.is_empty());
    }

    #[test]
    fn default_plan_matches_the_reference_benchmark_set() {
        let plan = BenchmarkPlan::default();
        assert_eq!(plan.cases.len(), 10);
        assert_eq!((plan.warmup_runs, plan.measured_runs, plan.fastest), (5, 100, 3));
        assert_eq!(plan.cases[0].name, "simple_select");
    }

    #[test]
    fn cancelled_benchmarks_stop_before_the_next_case() {
        let invoker = ScriptedInvoker::new(vec![Some(5); 64]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let plan = BenchmarkPlan {
            warmup_runs: 0,
            measured_runs: 2,
            fastest: 1,
            cases: vec![BenchmarkCase::new("a", DetectorMode::Sqli, "1")],
        };
        let summary = run_benchmarks(&invoker, &plan, &cancel);
        assert!(summary.cancelled);
        assert!(summary.results.is_empty());
    }
}
