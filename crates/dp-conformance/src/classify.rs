use dp_types::{AgreementTier, DetectorMode, VerdictPair};

use crate::invoker::{Invocation, InvocationFailure};

/// Agreement tier for two verdicts on the same input.
///
/// Binary disagreement always wins: differing `is_positive` is a
/// `Mismatch` whatever the fingerprints say. Fingerprints are only compared
/// when both engines report a positive, and a fingerprint difference there
/// downgrades agreement to `PartialMatch` rather than failing it. The mode
/// does not change the rules.
#[must_use]
pub fn classify(pair: &VerdictPair, _mode: DetectorMode) -> AgreementTier {
    let VerdictPair {
        reference,
        candidate,
    } = pair;

    if reference.is_positive != candidate.is_positive {
        return AgreementTier::Mismatch;
    }
    if !reference.is_positive {
        return AgreementTier::ExactMatch;
    }
    if reference.fingerprint == candidate.fingerprint {
        AgreementTier::ExactMatch
    } else {
        AgreementTier::PartialMatch
    }
}

/// [`classify`] over an invocation result; a failed invocation is
/// `Inconclusive`.
#[must_use]
pub fn classify_outcome(
    outcome: &Result<Invocation, InvocationFailure>,
    mode: DetectorMode,
) -> AgreementTier {
    match outcome {
        Ok(invocation) => classify(&invocation.pair, mode),
        Err(_) => AgreementTier::Inconclusive,
    }
}
