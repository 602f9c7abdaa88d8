//! Reporting of test results.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use colored::Colorize;

use crate::comparison::{CodeComparison, ContentComparison, EffectComparison};
use crate::config::{DiffStyle, HarnessConfig, OutputFormat};
use crate::effects::{CodeKind, ContentMode, StdStream};
use crate::error::Error;
use crate::util::{write_byte_diff, write_diff, write_positional_diff};

const DETAIL_INDENT: usize = 4;
const DIFF_INDENT: usize = 8;

/// Result of running a single test case.
#[derive(Clone, Debug)]
pub struct TestCaseResult {
    /// Name of the test case.
    pub name: String,
    /// The comparison result.
    pub comparison: EffectComparison,
    /// Whether differences are printed when the test fails.
    pub show_diff: bool,
    /// How long the test took to execute and compare.
    pub duration: Duration,
}

impl TestCaseResult {
    /// Returns whether the test failed.
    pub fn is_failure(&self) -> bool {
        self.comparison.is_failure()
    }

    /// Writes the status line of this result and, for failures, the
    /// differences found. Passing tests are only mentioned when `verbose`.
    pub fn write_details<W: Write>(
        &self,
        writer: &mut W,
        verbose: bool,
        diff_style: DiffStyle,
    ) -> std::io::Result<()> {
        if !self.is_failure() {
            if verbose {
                writeln!(writer, "{} {}", "[ PASS ]".green(), self.name)?;
            }
            return Ok(());
        }

        writeln!(writer, "{} {}", "[ FAIL ]".bright_red(), self.name.italic())?;

        if !self.show_diff {
            return Ok(());
        }

        self.write_code_details(writer)?;

        for stream in StdStream::OUTPUTS {
            if let Some(content) = self.comparison.stream(stream) {
                write_content_details(writer, stream.name(), content, diff_style)?;
            }
        }

        for file in &self.comparison.files {
            write_content_details(writer, &file_label(&file.path), &file.content, diff_style)?;
        }

        Ok(())
    }

    fn write_code_details<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let indent = " ".repeat(DETAIL_INDENT);

        match &self.comparison.code {
            CodeComparison::Matches => Ok(()),
            CodeComparison::Differs {
                kind,
                expected,
                observed,
            } => writeln!(
                writer,
                "{indent}code {}: expected {}, got {}",
                "DIFFERS".bright_red(),
                kind.describe(*expected).cyan(),
                kind.describe(*observed).bright_red()
            ),
            CodeComparison::AbnormalTermination { kind, termination } => writeln!(
                writer,
                "{indent}code {}: {} while checking {}",
                "ABNORMAL".bright_red(),
                termination.describe().bright_red(),
                match kind {
                    CodeKind::ErrNo => "errno",
                    CodeKind::ExitStatus => "the exit status",
                    CodeKind::Signal => "the terminating signal",
                }
            ),
        }
    }
}

fn file_label(path: &Path) -> String {
    std::format!("file {}", path.display())
}

fn write_content_details<W: Write>(
    writer: &mut W,
    label: &str,
    comparison: &ContentComparison,
    diff_style: DiffStyle,
) -> std::io::Result<()> {
    let indent = " ".repeat(DETAIL_INDENT);

    match comparison {
        ContentComparison::Matches => Ok(()),
        ContentComparison::Missing { mode, expected } => {
            writeln!(writer, "{indent}{label} {}", "not produced".bright_red())?;
            if *mode == ContentMode::Text && !expected.is_empty() {
                writeln!(writer, "{indent}expected content:")?;
                writeln!(
                    writer,
                    "{}",
                    indent::indent_all_by(DIFF_INDENT, String::from_utf8_lossy(expected))
                )?;
            }
            Ok(())
        }
        ContentComparison::Differs {
            mode: ContentMode::Blob,
            expected,
            observed,
        } => {
            writeln!(
                writer,
                "{indent}{label} {} ({} bytes expected, {} observed):",
                "DIFFERS".bright_red(),
                expected.len(),
                observed.len()
            )?;
            write_byte_diff(writer, DIFF_INDENT, expected, observed)
        }
        ContentComparison::Differs {
            mode: ContentMode::Text,
            expected,
            observed,
        } => {
            writeln!(writer, "{indent}{label} {}:", "DIFFERS".bright_red())?;

            match diff_style {
                DiffStyle::Positional => {
                    write_positional_diff(writer, DIFF_INDENT, expected, observed)
                }
                DiffStyle::Unified => write_diff(writer, DIFF_INDENT, expected, observed),
            }
        }
    }
}

/// Writes per-test results and the final summary in the configured format.
pub struct Reporter<W: Write> {
    writer: W,
    format: OutputFormat,
    verbose: bool,
    diff_style: DiffStyle,
    separator: String,
    results: Vec<TestCaseResult>,
}

impl<W: Write> Reporter<W> {
    /// Creates a reporter writing to `writer`.
    pub fn new(writer: W, config: &HarnessConfig) -> Self {
        Self {
            writer,
            format: config.format,
            verbose: config.verbose,
            diff_style: config.diff_style,
            separator: "=".repeat(config.separator_width),
            results: vec![],
        }
    }

    /// Reports the result of one test.
    pub fn report(&mut self, result: TestCaseResult) -> Result<(), Error> {
        match self.format {
            OutputFormat::Pretty => {
                result.write_details(&mut self.writer, self.verbose, self.diff_style)?;
            }
            OutputFormat::Terse => (),
            OutputFormat::Junit => self.results.push(result),
        }
        Ok(())
    }

    /// Writes the summary of the run.
    pub fn summarize(&mut self, passed: usize, total: usize) -> Result<(), Error> {
        match self.format {
            OutputFormat::Pretty | OutputFormat::Terse => {
                self.write_summary(passed, total)?;
                Ok(())
            }
            OutputFormat::Junit => self.write_junit(),
        }
    }

    fn write_summary(&mut self, passed: usize, total: usize) -> std::io::Result<()> {
        let status = if passed == total {
            "[ PASS ]".green()
        } else {
            "[ FAIL ]".bright_red()
        };

        writeln!(self.writer, "{}\n", self.separator)?;
        writeln!(
            self.writer,
            "{status} success rate: {}% [{passed}/{total}]",
            success_rate(passed, total)
        )?;
        self.writer.flush()
    }

    fn write_junit(&mut self) -> Result<(), Error> {
        let mut suite = junit_report::TestSuite::new(env!("CARGO_PKG_NAME"));

        for r in &self.results {
            let duration: junit_report::Duration = r.duration.try_into().unwrap_or_default();
            let mut test_case = if r.is_failure() {
                junit_report::TestCase::failure(&r.name, duration, "test failure", "failed")
            } else {
                junit_report::TestCase::success(&r.name, duration)
            };

            let mut output_buf: Vec<u8> = vec![];
            r.write_details(&mut output_buf, true, self.diff_style)?;

            let output = String::from_utf8_lossy(&output_buf).into_owned();
            test_case.set_system_out(strip_ansi_escapes::strip_str(output).as_str());

            suite.add_testcase(test_case);
        }

        let mut report = junit_report::Report::new();
        report.add_testsuite(suite);

        report
            .write_xml(&mut self.writer)
            .map_err(|e| Error::Report(e.to_string()))?;
        writeln!(self.writer)?;
        self.writer.flush()?;

        Ok(())
    }
}

/// Percentage of passed tests, rounded down; an empty run counts as fully successful.
pub const fn success_rate(passed: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        passed * 100 / total
    }
}
