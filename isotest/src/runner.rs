//! The run loop: hooks, the run context and the harness that owns them.

use std::io::Write;
use std::time::Instant;

use crate::capture;
use crate::comparison;
use crate::config::{HarnessConfig, OutputFormat};
use crate::effects::{EffectFlags, EffectRecord, EffectSpec};
use crate::error::Error;
use crate::events::TraceEventConfig;
use crate::registry::TestRegistry;
use crate::reporting::{Reporter, TestCaseResult};
use crate::sys::{NixSys, Sys};
use crate::trace_categories;

/// A lifecycle callback.
pub type Hook = Box<dyn FnMut()>;

/// Optional callbacks fired around a run. Unset hooks do nothing.
#[derive(Default)]
pub struct Hooks {
    init: Option<Hook>,
    clean: Option<Hook>,
    before: Option<Hook>,
    after: Option<Hook>,
}

impl Hooks {
    /// Sets the hook fired once before the first test.
    pub fn init(&mut self, hook: impl FnMut() + 'static) -> &mut Self {
        self.init = Some(Box::new(hook));
        self
    }

    /// Sets the hook fired once after the summary.
    pub fn clean(&mut self, hook: impl FnMut() + 'static) -> &mut Self {
        self.clean = Some(Box::new(hook));
        self
    }

    /// Sets the hook fired before every test.
    pub fn before(&mut self, hook: impl FnMut() + 'static) -> &mut Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Sets the hook fired after every test.
    pub fn after(&mut self, hook: impl FnMut() + 'static) -> &mut Self {
        self.after = Some(Box::new(hook));
        self
    }

    fn fire(hook: &mut Option<Hook>) {
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// State owned by the loop for the duration of one run.
struct RunContext<W: Write> {
    reporter: Reporter<W>,
    total: usize,
    failed: usize,
}

impl<W: Write> RunContext<W> {
    const fn new(reporter: Reporter<W>) -> Self {
        Self {
            reporter,
            total: 0,
            failed: 0,
        }
    }

    fn record(&mut self, result: TestCaseResult) -> Result<(), Error> {
        self.total += 1;
        if result.is_failure() {
            self.failed += 1;
        }
        self.reporter.report(result)
    }

    fn summarize(mut self) -> Result<usize, Error> {
        self.reporter
            .summarize(self.total - self.failed, self.total)?;
        Ok(self.failed)
    }
}

/// Registered tests plus everything needed to run them.
pub struct Harness {
    registry: TestRegistry,
    config: HarnessConfig,
    hooks: Hooks,
    sys: Box<dyn Sys>,
    tracing: Option<TraceEventConfig>,
}

impl Harness {
    /// Creates a harness with no tests, no hooks and real system calls.
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            registry: TestRegistry::new(),
            config,
            hooks: Hooks::default(),
            sys: Box::new(NixSys),
            tracing: None,
        }
    }

    /// Routes every system call of the capture pipeline through `sys`.
    #[must_use]
    pub fn with_sys(mut self, sys: impl Sys + 'static) -> Self {
        self.sys = Box::new(sys);
        self
    }

    /// Keeps the installed tracing configuration alive for the run.
    #[must_use]
    pub fn with_tracing(mut self, tracing: TraceEventConfig) -> Self {
        self.tracing = Some(tracing);
        self
    }

    /// The tracing configuration, if one was installed.
    pub const fn tracing_mut(&mut self) -> Option<&mut TraceEventConfig> {
        self.tracing.as_mut()
    }

    /// The configuration of this harness.
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The lifecycle hooks.
    pub const fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// The pending tests.
    pub const fn registry(&self) -> &TestRegistry {
        &self.registry
    }

    /// Prepares a test from `spec` and queues it.
    pub fn register(&mut self, spec: &EffectSpec) -> Result<(), Error> {
        self.registry.register(spec)
    }

    /// Runs every pending test, writing diagnostics to stderr (or the JUnit
    /// report to stdout). Returns the number of failed tests.
    ///
    /// # Threads
    ///
    /// Tests are forked from the calling process, which must therefore be
    /// single-threaded: call this from the `main` of a `harness = false`
    /// binary, never from a libtest `#[test]`.
    pub fn run(&mut self) -> Result<usize, Error> {
        if self.config.list_only {
            self.list(std::io::stdout().lock())?;
            return Ok(0);
        }

        match self.config.format {
            OutputFormat::Junit => self.run_with(std::io::stdout()),
            OutputFormat::Pretty | OutputFormat::Terse => self.run_with(std::io::stderr()),
        }
    }

    /// Writes `<name>: test` for every pending test that passes the filter.
    pub fn list<W: Write>(&mut self, mut writer: W) -> Result<(), Error> {
        self.apply_filter();
        for record in self.registry.iter() {
            writeln!(writer, "{}: test", record.name)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Runs every pending test, reporting to `writer`. Returns the number of
    /// failed tests.
    ///
    /// Hooks are not fired at all when no test is pending.
    ///
    /// # Threads
    ///
    /// Tests are forked from the calling process, which must therefore be
    /// single-threaded: call this from the `main` of a `harness = false`
    /// binary, never from a libtest `#[test]`.
    pub fn run_with<W: Write>(&mut self, writer: W) -> Result<usize, Error> {
        if let Some(color) = self.config.color {
            colored::control::set_override(color);
        }

        self.apply_filter();
        if self.registry.is_empty() {
            tracing::debug!(target: trace_categories::RUNNER, "no tests to run");
            return Ok(0);
        }

        tracing::debug!(target: trace_categories::RUNNER, "running {} tests", self.registry.count());

        let mut context = RunContext::new(Reporter::new(writer, &self.config));

        Hooks::fire(&mut self.hooks.init);

        while let Some(record) = self.registry.take_next() {
            Hooks::fire(&mut self.hooks.before);
            let result = self.run_one(&record)?;
            context.record(result)?;
            Hooks::fire(&mut self.hooks.after);
        }

        let failed = context.summarize()?;

        Hooks::fire(&mut self.hooks.clean);

        Ok(failed)
    }

    fn apply_filter(&mut self) {
        let filter = &self.config.filter;
        self.registry.retain(|record| {
            let keep = filter.should_run_test(&record.name);
            if !keep {
                tracing::debug!(target: trace_categories::RUNNER, "filtered out test '{}'", record.name);
            }
            keep
        });
    }

    fn run_one(&self, record: &EffectRecord) -> Result<TestCaseResult, Error> {
        tracing::debug!(target: trace_categories::RUNNER, "running test '{}'", record.name);

        let start = Instant::now();
        let observed = capture::execute(record, self.sys.as_ref())?;
        let comparison = comparison::compare(record, &observed);

        Ok(TestCaseResult {
            name: record.name.clone(),
            comparison,
            show_diff: !record.has_flag(EffectFlags::NO_DIFF),
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
#[expect(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use crate::config::TestFilter;
    use crate::sys::SysOp;
    use nix::errno::Errno;
    use nix::sys::wait::WaitStatus;
    use nix::unistd::{ForkResult, Pid};
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
    use std::rc::Rc;

    /// Every system call fails.
    struct Exhausted;

    impl Sys for Exhausted {
        fn pipe(&self) -> Result<(OwnedFd, OwnedFd), Errno> {
            Err(Errno::EMFILE)
        }

        unsafe fn fork(&self) -> Result<ForkResult, Errno> {
            Err(Errno::EAGAIN)
        }

        fn dup(&self, _fd: BorrowedFd<'_>) -> Result<OwnedFd, Errno> {
            Err(Errno::EMFILE)
        }

        fn dup2(&self, _src: BorrowedFd<'_>, _target: RawFd) -> Result<(), Errno> {
            Err(Errno::EBADF)
        }

        fn close(&self, _fd: OwnedFd) -> Result<(), Errno> {
            Err(Errno::EIO)
        }

        fn read(&self, _fd: BorrowedFd<'_>, _buf: &mut [u8]) -> Result<usize, Errno> {
            Err(Errno::EIO)
        }

        fn write(&self, _fd: BorrowedFd<'_>, _buf: &[u8]) -> Result<usize, Errno> {
            Err(Errno::EIO)
        }

        fn waitpid(&self, _pid: Pid) -> Result<WaitStatus, Errno> {
            Err(Errno::ECHILD)
        }
    }

    fn body() {}

    fn counting_hooks(harness: &mut Harness) -> Rc<Cell<usize>> {
        let fired = Rc::new(Cell::new(0));
        let counter = || {
            let fired = Rc::clone(&fired);
            move || fired.set(fired.get() + 1)
        };

        harness
            .hooks_mut()
            .init(counter())
            .clean(counter())
            .before(counter())
            .after(counter());
        fired
    }

    #[test]
    fn empty_run_fires_no_hooks() -> anyhow::Result<()> {
        let mut harness = Harness::new(HarnessConfig::new());
        let fired = counting_hooks(&mut harness);

        let mut out = vec![];
        assert_eq!(harness.run_with(&mut out)?, 0);
        assert_eq!(fired.get(), 0);
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn filtering_everything_out_is_an_empty_run() -> anyhow::Result<()> {
        let config = HarnessConfig::new().with_filter(TestFilter {
            include: vec!["nothing-matches".into()],
            ..TestFilter::default()
        });
        let mut harness = Harness::new(config).with_sys(Exhausted);
        let fired = counting_hooks(&mut harness);
        harness.register(&EffectSpec::new("a", body))?;

        assert_eq!(harness.run_with(vec![])?, 0);
        assert_eq!(fired.get(), 0);
        assert!(harness.registry().is_empty());
        Ok(())
    }

    #[test]
    #[allow(clippy::panic)]
    fn infrastructure_errors_end_the_run() -> anyhow::Result<()> {
        let mut harness = Harness::new(HarnessConfig::new()).with_sys(Exhausted);
        harness.register(&EffectSpec::new("doomed", body))?;

        match harness.run_with(vec![]) {
            Err(Error::Infrastructure { op, test, source }) => {
                assert_eq!(op, SysOp::Pipe);
                assert_eq!(test, "doomed");
                assert_eq!(source, Errno::EMFILE);
            }
            other => panic!("expected infrastructure error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn list_prints_filtered_names() -> anyhow::Result<()> {
        let config = HarnessConfig::new()
            .with_list_only(true)
            .with_filter(TestFilter {
                exclude: vec!["skip".into()],
                ..TestFilter::default()
            });
        let mut harness = Harness::new(config);
        harness.register(&EffectSpec::new("first", body))?;
        harness.register(&EffectSpec::new("skipped", body))?;

        let mut out = vec![];
        harness.list(&mut out)?;
        assert_eq!(String::from_utf8(out)?, "first: test\n");
        Ok(())
    }
}
