#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    Sqli,
    Xss,
}

impl DetectorMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqli => "sqli",
            Self::Xss => "xss",
        }
    }
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorMode {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sqli" => Ok(Self::Sqli),
            "xss" => Ok(Self::Xss),
            other => Err(TypeError::UnknownDetectorMode(other.to_owned())),
        }
    }
}

/// One engine's answer for one input. `fingerprint: None` and
/// `fingerprint: Some("")` are different states.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineVerdict {
    pub is_positive: bool,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl EngineVerdict {
    #[must_use]
    pub fn negative() -> Self {
        Self {
            is_positive: false,
            fingerprint: None,
        }
    }

    #[must_use]
    pub fn positive(fingerprint: Option<&str>) -> Self {
        Self {
            is_positive: true,
            fingerprint: fingerprint.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictPair {
    pub reference: EngineVerdict,
    pub candidate: EngineVerdict,
}

impl VerdictPair {
    #[must_use]
    pub fn new(reference: EngineVerdict, candidate: EngineVerdict) -> Self {
        Self {
            reference,
            candidate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementTier {
    ExactMatch,
    PartialMatch,
    Mismatch,
    Inconclusive,
}

impl AgreementTier {
    /// Exact and partial agreement both count toward the matched total.
    #[must_use]
    pub fn is_match(self) -> bool {
        matches!(self, Self::ExactMatch | Self::PartialMatch)
    }

    #[must_use]
    pub fn is_mismatch(self) -> bool {
        matches!(self, Self::Mismatch)
    }

    #[must_use]
    pub fn is_inconclusive(self) -> bool {
        matches!(self, Self::Inconclusive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Vec<u8>,
    pub category: String,
    pub mode: DetectorMode,
    pub location: SourceLocation,
}

impl TestCase {
    /// Lossy, length-bounded rendering of the input for logs and samples.
    #[must_use]
    pub fn excerpt(&self, max_chars: usize) -> String {
        excerpt(&self.input, max_chars)
    }
}

#[must_use]
pub fn excerpt(input: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(input);
    if text.chars().count() <= max_chars {
        return text.into_owned();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown detector mode {0:?} (expected sqli or xss)")]
    UnknownDetectorMode(String),
}
