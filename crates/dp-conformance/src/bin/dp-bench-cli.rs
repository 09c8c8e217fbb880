#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use dp_conformance::{
    BenchmarkCase, HarnessConfig, cancel_on_interrupt, init_logging, render_bench_report,
    run_benchmark_suite, write_bench_artifacts,
};
use dp_runtime::CancelToken;
use dp_types::DetectorMode;

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("dp-bench-cli error: {error}");
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

/// `name=input` or `mode:name=input`, e.g. `xss:svg=<svg onload=1>`.
fn parse_case(value: &str) -> Result<BenchmarkCase, Box<dyn std::error::Error>> {
    let (head, input) = value
        .split_once('=')
        .ok_or_else(|| format!("--case expects name=input, got {value:?}"))?;
    let (mode, name) = match head.split_once(':') {
        Some((mode, name)) => (mode.parse::<DetectorMode>()?, name),
        None => (DetectorMode::Sqli, head),
    };
    if name.is_empty() {
        return Err(format!("--case has an empty name: {value:?}").into());
    }
    Ok(BenchmarkCase::new(name, mode, input))
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let mut config_path: Option<PathBuf> = None;
    let mut engine: Option<PathBuf> = None;
    let mut warmup: Option<usize> = None;
    let mut runs: Option<usize> = None;
    let mut fastest: Option<usize> = None;
    let mut cases: Vec<BenchmarkCase> = Vec::new();
    let mut write_artifacts = false;
    let mut json = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().ok_or("--config requires a path")?.into());
            }
            "--engine" => {
                engine = Some(args.next().ok_or("--engine requires a path")?.into());
            }
            "--warmup" => {
                warmup = Some(parse_usize("--warmup", args.next())?);
            }
            "--runs" => {
                runs = Some(parse_usize("--runs", args.next())?);
            }
            "--fastest" => {
                fastest = Some(parse_usize("--fastest", args.next())?);
            }
            "--case" => {
                cases.push(parse_case(&args.next().ok_or("--case requires name=input")?)?);
            }
            "--write-artifacts" => {
                write_artifacts = true;
            }
            "--json" => {
                json = true;
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
    if let Some(program) = engine {
        config.engine.program = program;
    }
    if let Some(warmup) = warmup {
        config.benchmark.warmup_runs = warmup;
    }
    if let Some(runs) = runs {
        config.benchmark.measured_runs = runs;
    }
    if let Some(fastest) = fastest {
        config.benchmark.fastest = fastest;
    }
    if !cases.is_empty() {
        config.benchmark.cases = cases;
    }

    let cancel = CancelToken::new();
    cancel_on_interrupt(&cancel)?;
    let summary = run_benchmark_suite(&config, &cancel)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", render_bench_report(&summary));
    }

    if write_artifacts {
        let path = write_bench_artifacts(&config, &summary)?;
        eprintln!("wrote bench_summary={}", path.display());
    }

    Ok(summary.has_data())
}

fn print_help() {
    println!(
        "dp-bench-cli\n\
         Usage:\n\
         \tdp-bench-cli [--config detparity.yaml] [--engine PATH] [--runs 100] [--case name=input]\n\
         Options:\n\
         \t--config <path>      YAML harness config (defaults to workspace paths)\n\
         \t--engine <path>      Comparison tool to time\n\
         \t--warmup <n>         Discarded warm-up runs per case (default 5)\n\
         \t--runs <n>           Measured runs per case (default 100)\n\
         \t--fastest <n>        Cases listed as fastest by median (default 3)\n\
         \t--case <spec>        name=input or mode:name=input; repeatable, replaces the default set\n\
         \t--write-artifacts    Write artifacts/bench/bench_summary.json\n\
         \t--json               Print the summary as JSON instead of text\n\
         \t-h, --help           Show this help\n\
         Exit status: 0 some case measured, 1 no data, 2 error"
    );
}
