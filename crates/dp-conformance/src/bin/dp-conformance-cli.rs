#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use dp_conformance::{
    CategorySpec, HarnessConfig, append_drift_history, cancel_on_interrupt, evaluate_gate,
    init_logging, render_run_report, run_differential_suite, run_smoke, write_run_artifacts,
};
use dp_runtime::{CancelToken, RunLimits};

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("dp-conformance-cli error: {error}");
            ExitCode::from(2)
        }
    }
}

fn parse_usize(flag: &str, value: Option<String>) -> Result<usize, Box<dyn std::error::Error>> {
    let value = value.ok_or_else(|| format!("{flag} requires a number"))?;
    Ok(value
        .parse::<usize>()
        .map_err(|err| format!("{flag}: invalid number {value:?}: {err}"))?)
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let mut config_path: Option<PathBuf> = None;
    let mut corpus_root: Option<PathBuf> = None;
    let mut engine: Option<PathBuf> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut max_files: Option<usize> = None;
    let mut max_cases: Option<usize> = None;
    let mut max_logged: Option<usize> = None;
    let mut exhaustive = false;
    let mut workers: Option<usize> = None;
    let mut category_filter: Vec<String> = Vec::new();
    let mut max_duration_secs: Option<u64> = None;
    let mut write_artifacts = false;
    let mut write_drift_history = false;
    let mut json = false;
    let mut preflight = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().ok_or("--config requires a path")?.into());
            }
            "--corpus-root" => {
                corpus_root = Some(args.next().ok_or("--corpus-root requires a path")?.into());
            }
            "--engine" => {
                engine = Some(args.next().ok_or("--engine requires a path")?.into());
            }
            "--timeout-ms" => {
                timeout_ms = Some(parse_usize("--timeout-ms", args.next())? as u64);
            }
            "--max-files" => {
                max_files = Some(parse_usize("--max-files", args.next())?);
            }
            "--max-cases" => {
                max_cases = Some(parse_usize("--max-cases", args.next())?);
            }
            "--max-logged" => {
                max_logged = Some(parse_usize("--max-logged", args.next())?);
            }
            "--exhaustive" => {
                exhaustive = true;
            }
            "--workers" => {
                workers = Some(parse_usize("--workers", args.next())?);
            }
            "--category" => {
                category_filter.push(args.next().ok_or("--category requires a name")?);
            }
            "--max-duration-secs" => {
                max_duration_secs = Some(parse_usize("--max-duration-secs", args.next())? as u64);
            }
            "--write-artifacts" => {
                write_artifacts = true;
            }
            "--write-drift-history" => {
                write_drift_history = true;
            }
            "--json" => {
                json = true;
            }
            "--preflight" => {
                preflight = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(true);
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = match &config_path {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default_paths(),
    };
    if let Some(root) = corpus_root {
        config.corpus_root = root;
    }
    if let Some(program) = engine {
        config.engine.program = program;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.engine.timeout_ms = timeout_ms;
    }
    if exhaustive {
        config.limits = RunLimits {
            max_logged_mismatches_per_file: config.limits.max_logged_mismatches_per_file,
            max_category_samples: config.limits.max_category_samples,
            max_listed_mismatch_files: config.limits.max_listed_mismatch_files,
            ..RunLimits::exhaustive()
        };
    }
    if let Some(max_files) = max_files {
        config.limits.max_files_per_category = max_files;
    }
    if let Some(max_cases) = max_cases {
        config.limits.max_cases_per_file = max_cases;
    }
    if let Some(max_logged) = max_logged {
        config.limits.max_logged_mismatches_per_file = max_logged;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    if !category_filter.is_empty() {
        config.categories = select_categories(&config.categories, &category_filter)?;
    }

    if preflight {
        let report = run_smoke(&config);
        println!(
            "suite={} corpus_present={} corpus_files={} engine_present={}",
            report.suite, report.corpus_present, report.corpus_file_count, report.engine_present
        );
        return Ok(report.corpus_present && report.engine_present);
    }

    let cancel = match max_duration_secs {
        Some(secs) => CancelToken::with_deadline(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    cancel_on_interrupt(&cancel)?;
    let summary = run_differential_suite(&config, &cancel)?;
    let gate = evaluate_gate(&summary);

    if json {
        let payload = serde_json::json!({ "summary": summary, "gate": gate });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "{}",
            render_run_report(&summary, &gate, config.limits.max_listed_mismatch_files)
        );
    }

    if write_artifacts {
        let written = write_run_artifacts(&config, &summary, &gate)?;
        eprintln!(
            "wrote run_summary={} gate={} mismatch_corpus={}",
            written.run_summary_path.display(),
            written.gate_result_path.display(),
            written.mismatch_corpus_path.display()
        );
    }

    if write_artifacts || write_drift_history {
        let history_path = append_drift_history(&config, &summary, &gate)?;
        eprintln!("wrote drift_history={}", history_path.display());
    }

    Ok(gate.pass)
}

fn select_categories(
    available: &[CategorySpec],
    wanted: &[String],
) -> Result<Vec<CategorySpec>, Box<dyn std::error::Error>> {
    let mut selected = Vec::with_capacity(wanted.len());
    for name in wanted {
        let spec = available
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| format!("unknown category: {name}"))?;
        selected.push(spec.clone());
    }
    Ok(selected)
}

fn print_help() {
    println!(
        "dp-conformance-cli\n\
         Usage:\n\
         \tdp-conformance-cli [--config detparity.yaml] [--corpus-root DIR] [--engine PATH] [--exhaustive] [--write-artifacts]\n\
         Options:\n\
         \t--config <path>          YAML harness config (defaults to workspace paths)\n\
         \t--corpus-root <dir>      Directory holding sqli-*.txt, xss-*.txt, false_positives.txt\n\
         \t--engine <path>          Comparison tool invoked as `<path> <mode> --json -i <input>`\n\
         \t--timeout-ms <n>         Per-invocation timeout (default 5000)\n\
         \t--max-files <n>          Files sampled per category (default 10)\n\
         \t--max-cases <n>          Cases evaluated per file (default 20)\n\
         \t--max-logged <n>         Mismatches logged per file (default 3)\n\
         \t--exhaustive             Lift the file and case caps\n\
         \t--workers <n>            Worker threads per category (default 1)\n\
         \t--category <name>        Run only the named category; repeatable\n\
         \t--max-duration-secs <n>  Cancel the run after n seconds and report partial totals\n\
         \t--write-artifacts        Emit run summary, gate result and mismatch corpus JSON\n\
         \t--write-drift-history    Append the run to artifacts/differential/drift_history.jsonl\n\
         \t--json                   Print summary and gate as JSON instead of text\n\
         \t--preflight              Only check that the corpus and engine exist\n\
         \t-h, --help               Show this help\n\
         Ctrl-C stops after the in-flight case and reports partial totals; a second Ctrl-C exits.\n\
         Exit status: 0 gate passed, 1 gate failed, 2 error"
    );
}
