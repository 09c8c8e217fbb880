#![forbid(unsafe_code)]

//! Facade over the detparity workspace crates.
//!
//! ```no_run
//! use detparity::prelude::*;
//!
//! let config = HarnessConfig::default_paths();
//! let summary = run_differential_suite(&config, &CancelToken::new())?;
//! let gate = evaluate_gate(&summary);
//! println!("{}", render_run_report(&summary, &gate, config.limits.max_listed_mismatch_files));
//! # Ok::<(), detparity::HarnessError>(())
//! ```

pub use dp_conformance::*;
pub use dp_runtime::{CancelToken, FailureKind, FailureLedger, FailureRecord, RunLimits, RuntimeError};
pub use dp_types::{
    AgreementTier, DetectorMode, EngineVerdict, SourceLocation, TestCase, TypeError, VerdictPair,
};

pub mod prelude {
    pub use dp_conformance::{
        CategorySpec, EngineInvoker, HarnessConfig, RunOptions, evaluate_gate, render_run_report,
        run_benchmark_suite, run_differential, run_differential_suite,
    };
    pub use dp_runtime::{CancelToken, RunLimits};
    pub use dp_types::{AgreementTier, DetectorMode, VerdictPair};
}
