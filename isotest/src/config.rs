//! Configuration types for the test harness.

use clap::Parser;

use crate::events::TraceEvent;

/// Default width of the separator printed before the summary.
pub const DEFAULT_SEPARATOR_WIDTH: usize = 80;

/// Output format for test results.
#[derive(Clone, Copy, Default, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Status lines, diffs and a summary.
    #[default]
    Pretty,
    /// `JUnit` XML format.
    Junit,
    /// Summary line only.
    Terse,
}

/// How differing text content is rendered.
#[derive(Clone, Copy, Default, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum DiffStyle {
    /// Line pairs compared position by position.
    #[default]
    Positional,
    /// A unified, line-based diff.
    Unified,
}

/// Include/exclude filters on test names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestFilter {
    /// Patterns for tests to be included; if any are given, only matching tests run.
    pub include: Vec<String>,
    /// Patterns for tests to be excluded.
    pub exclude: Vec<String>,
    /// Whether patterns must match the whole name instead of a substring.
    pub exact: bool,
}

impl TestFilter {
    /// Returns whether a test should run based on include/exclude filters.
    pub fn should_run_test(&self, name: &str) -> bool {
        if self.include.is_empty() && self.exclude.is_empty() {
            return true;
        }

        // If any include filters were given, then we are in opt-in mode.
        if !self.include.is_empty() && !self.test_matches_filters(name, &self.include) {
            return false;
        }

        // In all cases, exclude filters may be used to exclude tests.
        !self.test_matches_filters(name, &self.exclude)
    }

    fn test_matches_filters(&self, name: &str, filters: &[String]) -> bool {
        if self.exact {
            filters.iter().any(|f| f == name)
        } else {
            filters.iter().any(|filter| name.contains(filter.as_str()))
        }
    }
}

/// Configuration for a harness run.
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Output format.
    pub format: OutputFormat,
    /// Whether passing tests are reported too.
    pub verbose: bool,
    /// Whether output is colorized; `None` leaves it to the terminal.
    pub color: Option<bool>,
    /// How text diffs are rendered.
    pub diff_style: DiffStyle,
    /// Width of the separator printed before the summary.
    pub separator_width: usize,
    /// Which tests run.
    pub filter: TestFilter,
    /// Whether tests are only listed, not run.
    pub list_only: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
            verbose: false,
            color: None,
            diff_style: DiffStyle::Positional,
            separator_width: DEFAULT_SEPARATOR_WIDTH,
            filter: TestFilter::default(),
            list_only: false,
        }
    }
}

impl HarnessConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets whether passing tests are reported.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Forces color on or off.
    #[must_use]
    pub const fn with_color(mut self, color: bool) -> Self {
        self.color = Some(color);
        self
    }

    /// Sets how text diffs are rendered.
    #[must_use]
    pub const fn with_diff_style(mut self, diff_style: DiffStyle) -> Self {
        self.diff_style = diff_style;
        self
    }

    /// Sets the separator width.
    #[must_use]
    pub const fn with_separator_width(mut self, width: usize) -> Self {
        self.separator_width = width;
        self
    }

    /// Sets the name filter.
    #[must_use]
    pub fn with_filter(mut self, filter: TestFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Only lists the tests instead of running them.
    #[must_use]
    pub const fn with_list_only(mut self, list_only: bool) -> Self {
        self.list_only = list_only;
        self
    }
}

/// Command-line options for a test binary built on the harness.
#[derive(Clone, Parser, Debug)]
#[clap(version, about, disable_help_flag = true, disable_version_flag = true)]
pub struct TestOptions {
    /// Display usage information.
    #[clap(long = "help", action = clap::ArgAction::HelpLong)]
    pub help: Option<bool>,

    /// Output format for test results.
    #[clap(long = "format", default_value = "pretty")]
    pub format: OutputFormat,

    /// Display details regarding successful test cases.
    #[clap(short = 'v', long = "verbose", env = "ISOTEST_VERBOSE")]
    pub verbose: bool,

    /// List available tests without running them.
    #[clap(long = "list")]
    pub list_tests_only: bool,

    /// Exactly match filters (not just substring match).
    #[clap(long = "exact")]
    pub exact_match: bool,

    /// Colorize output?
    #[clap(long = "color", default_value_t = clap::ColorChoice::Auto)]
    pub color: clap::ColorChoice,

    /// How differing text is rendered.
    #[clap(long = "diff-style", default_value = "positional")]
    pub diff_style: DiffStyle,

    /// Width of the separator printed before the summary.
    #[clap(long = "separator-width", default_value_t = DEFAULT_SEPARATOR_WIDTH)]
    pub separator_width: usize,

    /// Enable debug tracing for the given area of the harness.
    #[clap(long = "trace", value_name = "EVENT")]
    pub trace_events: Vec<TraceEvent>,

    /// Show output from test cases (for compatibility only, has no effect).
    #[clap(long = "show-output")]
    pub show_output: bool,

    /// Capture output? (for compatibility only, has no effect).
    #[clap(long = "nocapture")]
    pub no_capture: bool,

    /// Unstable flags (for compatibility only, has no effect).
    #[clap(short = 'Z')]
    pub unstable_flag: Vec<String>,

    /// Patterns for tests to be excluded.
    #[clap(long = "skip")]
    pub exclude_filters: Vec<String>,

    /// Patterns for tests to be included.
    pub include_filters: Vec<String>,
}

impl TestOptions {
    /// Converts the parsed options into a harness configuration.
    pub fn to_config(&self) -> HarnessConfig {
        let config = HarnessConfig::new()
            .with_format(self.format)
            .with_verbose(self.verbose)
            .with_diff_style(self.diff_style)
            .with_separator_width(self.separator_width)
            .with_list_only(self.list_tests_only)
            .with_filter(TestFilter {
                include: self.include_filters.clone(),
                exclude: self.exclude_filters.clone(),
                exact: self.exact_match,
            });

        match self.color {
            clap::ColorChoice::Always => config.with_color(true),
            clap::ColorChoice::Never => config.with_color(false),
            clap::ColorChoice::Auto => config,
        }
    }
}

#[cfg(test)]
#[expect(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filters_include_then_exclude() {
        let filter = TestFilter {
            include: vec!["pipe".into()],
            exclude: vec!["slow".into()],
            exact: false,
        };

        assert!(filter.should_run_test("pipe_roundtrip"));
        assert!(!filter.should_run_test("pipe_slow"));
        assert!(!filter.should_run_test("fork"));
        assert!(TestFilter::default().should_run_test("anything"));
    }

    #[test]
    fn exact_filters_match_whole_names() {
        let filter = TestFilter {
            include: vec!["pipe".into()],
            exclude: vec![],
            exact: true,
        };

        assert!(filter.should_run_test("pipe"));
        assert!(!filter.should_run_test("pipe_roundtrip"));
    }

    #[test]
    fn options_convert_to_config() -> anyhow::Result<()> {
        let options = TestOptions::try_parse_from([
            "tests",
            "--format",
            "terse",
            "--color",
            "never",
            "--diff-style",
            "unified",
            "--skip",
            "slow",
            "--exact",
            "--nocapture",
            "--trace",
            "capture",
            "stdin",
        ])?;
        let config = options.to_config();

        assert_eq!(config.format, OutputFormat::Terse);
        assert_eq!(config.color, Some(false));
        assert_eq!(config.diff_style, DiffStyle::Unified);
        assert_eq!(config.separator_width, DEFAULT_SEPARATOR_WIDTH);
        assert_eq!(
            config.filter,
            TestFilter {
                include: vec!["stdin".into()],
                exclude: vec!["slow".into()],
                exact: true,
            }
        );
        assert_eq!(options.trace_events, vec![TraceEvent::Capture]);
        assert!(!config.list_only);
        Ok(())
    }

    #[test]
    fn defaults_match_an_empty_command_line() -> anyhow::Result<()> {
        let config = TestOptions::try_parse_from(["tests"])?.to_config();

        assert_eq!(config.format, OutputFormat::Pretty);
        assert_eq!(config.diff_style, DiffStyle::Positional);
        assert_eq!(config.color, None);
        assert_eq!(config.filter, TestFilter::default());
        Ok(())
    }
}
