//! Comparison of declared and observed effects.

use std::path::PathBuf;

use crate::capture::{ObservedEffects, Termination};
use crate::effects::{CodeKind, Content, ContentMode, EffectRecord, StdStream, comparable_bytes};
use crate::trace_categories;

/// Comparison of the expected code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeComparison {
    /// The observed code equals the expected one.
    Matches,
    /// The observed code differs from the expected one.
    Differs {
        /// Kind of code compared.
        kind: CodeKind,
        /// The expected value.
        expected: i32,
        /// The observed value.
        observed: i32,
    },
    /// The values agree, but the test terminated in a way its code kind does
    /// not account for (e.g. a signal while an exit status was expected).
    AbnormalTermination {
        /// Kind of code compared.
        kind: CodeKind,
        /// How the test actually terminated.
        termination: Termination,
    },
}

impl CodeComparison {
    /// Returns whether this comparison indicates a failure.
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Matches)
    }
}

/// Comparison of one stream's or file's content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentComparison {
    /// Contents match.
    Matches,
    /// Contents differ. Both sides hold the bytes that took part in the comparison.
    Differs {
        /// How the content was compared.
        mode: ContentMode,
        /// Expected bytes.
        expected: Vec<u8>,
        /// Observed bytes.
        observed: Vec<u8>,
    },
    /// A declared file was not produced.
    Missing {
        /// How the content would have been compared.
        mode: ContentMode,
        /// Expected bytes.
        expected: Vec<u8>,
    },
}

impl ContentComparison {
    /// Returns whether this comparison indicates a failure.
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Matches)
    }
}

/// Comparison of one declared file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileComparison {
    /// Path of the file.
    pub path: PathBuf,
    /// Result of comparing its content.
    pub content: ContentComparison,
}

/// Full comparison of one test's effects. Every category is always evaluated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectComparison {
    /// Comparison of the expected code.
    pub code: CodeComparison,
    /// Comparison of stdout.
    pub stdout: ContentComparison,
    /// Comparison of stderr.
    pub stderr: ContentComparison,
    /// Comparison of every declared file, in declaration order.
    pub files: Vec<FileComparison>,
}

impl EffectComparison {
    /// Returns whether any category indicates a failure.
    pub fn is_failure(&self) -> bool {
        self.code.is_failure()
            || self.stdout.is_failure()
            || self.stderr.is_failure()
            || self.files.iter().any(|f| f.content.is_failure())
    }

    /// Number of categories that indicate a failure; each file counts separately.
    pub fn discrepancy_count(&self) -> usize {
        usize::from(self.code.is_failure())
            + usize::from(self.stdout.is_failure())
            + usize::from(self.stderr.is_failure())
            + self.files.iter().filter(|f| f.content.is_failure()).count()
    }

    /// The comparison of an output stream; stdin is never compared.
    pub const fn stream(&self, stream: StdStream) -> Option<&ContentComparison> {
        match stream {
            StdStream::Stdin => None,
            StdStream::Stdout => Some(&self.stdout),
            StdStream::Stderr => Some(&self.stderr),
        }
    }
}

/// Compares a record's declared effects against what was observed.
pub fn compare(record: &EffectRecord, observed: &ObservedEffects) -> EffectComparison {
    let comparison = EffectComparison {
        code: compare_code(record, observed),
        stdout: compare_content(
            record.stdio(StdStream::Stdout),
            Some(observed.output(StdStream::Stdout)),
        ),
        stderr: compare_content(
            record.stdio(StdStream::Stderr),
            Some(observed.output(StdStream::Stderr)),
        ),
        files: record
            .files
            .iter()
            .zip(&observed.files)
            .map(|(expected, found)| FileComparison {
                path: expected.path.clone(),
                content: compare_content(&expected.content, found.content.as_deref()),
            })
            .collect(),
    };

    tracing::debug!(
        target: trace_categories::COMPARE,
        "test '{}': {} discrepancies",
        record.name,
        comparison.discrepancy_count()
    );

    comparison
}

fn compare_code(record: &EffectRecord, observed: &ObservedEffects) -> CodeComparison {
    let kind = record.expected_code.kind;
    let expected = record.expected_code.value;

    if expected != observed.code {
        CodeComparison::Differs {
            kind,
            expected,
            observed: observed.code,
        }
    } else if is_unaccounted_termination(kind, observed.termination) {
        CodeComparison::AbnormalTermination {
            kind,
            termination: observed.termination,
        }
    } else {
        CodeComparison::Matches
    }
}

/// Whether a termination signals failure that the code kind cannot express.
const fn is_unaccounted_termination(kind: CodeKind, termination: Termination) -> bool {
    match (kind, termination) {
        (CodeKind::ExitStatus | CodeKind::ErrNo, Termination::Signaled(_)) => true,
        (CodeKind::ErrNo | CodeKind::Signal, Termination::Exited(status)) => status != 0,
        _ => false,
    }
}

/// Compares declared content with observed bytes, if any were observed.
pub fn compare_content(expected: &Content, observed: Option<&[u8]>) -> ContentComparison {
    let mode = expected.mode();
    let expected = expected.comparable();

    let Some(observed) = observed else {
        return ContentComparison::Missing {
            mode,
            expected: expected.to_vec(),
        };
    };

    let observed = comparable_bytes(observed, mode);
    if expected == observed {
        ContentComparison::Matches
    } else {
        ContentComparison::Differs {
            mode,
            expected: expected.to_vec(),
            observed: observed.to_vec(),
        }
    }
}
