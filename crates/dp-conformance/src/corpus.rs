use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use dp_types::DetectorMode;
use globset::{Glob, GlobMatcher};
use percent_encoding::percent_decode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::HarnessError;

pub const COMMENT_MARKER: u8 = b'#';

/// A named slice of the corpus: which files belong to it, which detector
/// they exercise, and what verdict the inputs are expected to get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    /// Glob over file names directly under the corpus root.
    pub pattern: String,
    pub mode: DetectorMode,
    #[serde(default = "default_expect_positive")]
    pub expect_positive: bool,
}

fn default_expect_positive() -> bool {
    true
}

impl CategorySpec {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        mode: DetectorMode,
        expect_positive: bool,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            mode,
            expect_positive,
        }
    }

    /// The libinjection test-data layout: injection files per detector and a
    /// false-positive list that both engines should pass.
    #[must_use]
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::new("SQL Injection", "sqli-*.txt", DetectorMode::Sqli, true),
            Self::new("XSS", "xss-*.txt", DetectorMode::Xss, true),
            Self::new("False Positives", "false_positives.txt", DetectorMode::Sqli, false),
        ]
    }

    pub fn matcher(&self) -> Result<GlobMatcher, HarnessError> {
        Ok(Glob::new(&self.pattern)?.compile_matcher())
    }
}

/// Raw corpus lines in file order, newline and carriage return stripped.
/// Bytes are passed through untouched so non-UTF-8 inputs survive.
pub struct CorpusLines {
    reader: Box<dyn BufRead + Send>,
}

impl CorpusLines {
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }
}

impl Iterator for CorpusLines {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Enumerates corpus files per category and streams their lines.
pub trait CorpusSource: Send + Sync {
    /// Fails when the corpus as a whole is unusable; this aborts a run.
    fn check_available(&self) -> Result<(), HarnessError> {
        Ok(())
    }

    /// File names selected by `category`, sorted. Errors here only skip the
    /// category.
    fn list_files(&self, category: &CategorySpec) -> Result<Vec<String>, HarnessError>;

    fn open(&self, file_name: &str) -> Result<CorpusLines, HarnessError>;
}

#[derive(Debug, Clone)]
pub struct FsCorpusSource {
    root: PathBuf,
}

impl FsCorpusSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CorpusSource for FsCorpusSource {
    fn check_available(&self) -> Result<(), HarnessError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(HarnessError::CorpusMissing(self.root.clone()))
        }
    }

    fn list_files(&self, category: &CategorySpec) -> Result<Vec<String>, HarnessError> {
        let matcher = category.matcher()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(
                    category = %category.name,
                    file = %file_name.to_string_lossy(),
                    "skipping corpus file with a non-UTF-8 name"
                );
                continue;
            };
            if matcher.is_match(name) {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, file_name: &str) -> Result<CorpusLines, HarnessError> {
        let file = fs::File::open(self.root.join(file_name))?;
        Ok(CorpusLines::new(BufReader::new(file)))
    }
}

/// In-memory corpus keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(name, contents);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), contents.into());
    }
}

impl CorpusSource for MemoryCorpus {
    fn list_files(&self, category: &CategorySpec) -> Result<Vec<String>, HarnessError> {
        let matcher = category.matcher()?;
        Ok(self
            .files
            .keys()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect())
    }

    fn open(&self, file_name: &str) -> Result<CorpusLines, HarnessError> {
        let contents = self.files.get(file_name).cloned().ok_or_else(|| {
            HarnessError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("corpus file not found: {file_name}"),
            ))
        })?;
        Ok(CorpusLines::new(Cursor::new(contents)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedLine {
    /// Blank or comment line; carries no test case.
    Skip,
    Case {
        input: Vec<u8>,
        /// The decoded form was not valid UTF-8 and the raw line is used.
        decode_fallback: bool,
    },
}

/// Trims a raw corpus line, drops blanks and comments, and percent-decodes
/// what is left.
#[must_use]
pub fn prepare_line(raw: &[u8]) -> PreparedLine {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() || trimmed[0] == COMMENT_MARKER {
        return PreparedLine::Skip;
    }
    match percent_decode(trimmed).decode_utf8() {
        Ok(decoded) => PreparedLine::Case {
            input: decoded.into_owned().into_bytes(),
            decode_fallback: false,
        },
        Err(_) => PreparedLine::Case {
            input: trimmed.to_vec(),
            decode_fallback: true,
        },
    }
}
