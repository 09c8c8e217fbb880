#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sampling caps applied to one differential run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLimits {
    pub max_files_per_category: usize,
    pub max_cases_per_file: usize,
    pub max_logged_mismatches_per_file: usize,
    /// Displayed-subset cap when file samples are folded into a category.
    pub max_category_samples: usize,
    pub max_listed_mismatch_files: usize,
}

impl RunLimits {
    /// The bounded sampling used for routine parity runs.
    #[must_use]
    pub fn sampled() -> Self {
        Self {
            max_files_per_category: 10,
            max_cases_per_file: 20,
            max_logged_mismatches_per_file: 3,
            max_category_samples: 10,
            max_listed_mismatch_files: 3,
        }
    }

    /// Every file and every line; sample caps stay bounded.
    #[must_use]
    pub fn exhaustive() -> Self {
        Self {
            max_files_per_category: usize::MAX,
            max_cases_per_file: usize::MAX,
            ..Self::sampled()
        }
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_files_per_category == 0 {
            return Err(RuntimeError::InvalidLimit("max_files_per_category"));
        }
        if self.max_cases_per_file == 0 {
            return Err(RuntimeError::InvalidLimit("max_cases_per_file"));
        }
        Ok(())
    }

    /// Upper bound on `tested` for a single category.
    #[must_use]
    pub fn max_cases_per_category(&self) -> usize {
        self.max_files_per_category
            .saturating_mul(self.max_cases_per_file)
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self::sampled()
    }
}

/// Cooperative cancellation shared between the driver and worker threads.
///
/// Clones observe the same flag. A deadline, when set, trips the flag the
/// first time it is polled after expiry.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(budget: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        if self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.cancel();
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Invocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub subject: String,
    pub detail: String,
}

/// Counts every non-fatal failure of a run and retains a bounded number of
/// invocation-failure records. Decode fallbacks are counted, never stored.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLedger {
    capacity: usize,
    invocation_failures: usize,
    decode_fallbacks: usize,
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            invocation_failures: 0,
            decode_fallbacks: 0,
            records: Vec::new(),
        }
    }

    pub fn record_invocation_failure(
        &mut self,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.invocation_failures += 1;
        if self.records.len() < self.capacity {
            self.records.push(FailureRecord {
                kind: FailureKind::Invocation,
                subject: subject.into(),
                detail: detail.into(),
            });
        }
    }

    pub fn note_decode_fallback(&mut self) {
        self.decode_fallbacks += 1;
    }

    /// Adds `other`'s counters and appends its records while under this
    /// ledger's capacity.
    pub fn absorb(&mut self, other: &Self) {
        self.invocation_failures += other.invocation_failures;
        self.decode_fallbacks += other.decode_fallbacks;
        let room = self.capacity.saturating_sub(self.records.len());
        self.records
            .extend(other.records.iter().take(room).cloned());
    }

    #[must_use]
    pub fn invocation_failures(&self) -> usize {
        self.invocation_failures
    }

    #[must_use]
    pub fn decode_fallbacks(&self) -> usize {
        self.decode_fallbacks
    }

    #[must_use]
    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error("run limit {0} must be greater than zero")]
    InvalidLimit(&'static str),
}

pub fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}
