//! Run loop tests: accounting, hooks and reporting over real forked tests.

#![cfg(unix)]

use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Result, ensure};
use isotest::{EffectFlags, EffectSpec, Harness, HarnessConfig, OutputFormat};
use nix::sys::signal::Signal;

fn clean_exit() {}

fn says_hello() {
    println!("hello");
}

fn aborts() {
    std::process::abort();
}

/// Runs the harness, returning the failure count and everything it reported.
fn run(harness: &mut Harness) -> Result<(usize, String)> {
    let mut out = vec![];
    let failures = harness.run_with(&mut out)?;
    Ok((failures, String::from_utf8(out)?))
}

fn plain(config: HarnessConfig) -> HarnessConfig {
    config.with_color(false)
}

fn status_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter(|line| line.starts_with("[ FAIL ]") || line.starts_with("[ PASS ]"))
        .filter(|line| !line.contains("success rate"))
        .collect()
}

fn abort_with_wrong_expected_signal_is_the_only_failure() -> Result<()> {
    let mut harness = Harness::new(plain(HarnessConfig::new()));
    harness.register(&EffectSpec::new("A", clean_exit).exit_status(0))?;
    harness.register(
        &EffectSpec::new("B", aborts).expect_code(isotest::ExpectedCode {
            kind: isotest::CodeKind::Signal,
            value: 0,
        }),
    )?;

    let (failures, output) = run(&mut harness)?;

    ensure!(failures == 1, "{failures} failures:\n{output}");
    ensure!(status_lines(&output) == ["[ FAIL ] B"], "{output}");
    ensure!(!output.contains(" A"), "{output}");
    ensure!(
        output.ends_with("\n\n[ FAIL ] success rate: 50% [1/2]\n"),
        "{output}"
    );
    Ok(())
}

fn failures_are_counted_and_hooks_fire_once() -> Result<()> {
    const TOTAL: usize = 5;
    const MISMATCHED: usize = 2;

    let mut harness = Harness::new(plain(HarnessConfig::new()));
    for i in 0..TOTAL {
        let spec = EffectSpec::new(std::format!("test-{i}"), says_hello);
        let spec = if i < MISMATCHED {
            spec.stdout("goodbye")
        } else {
            spec.stdout("hello")
        };
        harness.register(&spec)?;
    }

    let counters: [Rc<Cell<usize>>; 4] = Default::default();
    let counter = |index: usize| {
        let cell = Rc::clone(&counters[index]);
        move || cell.set(cell.get() + 1)
    };
    harness
        .hooks_mut()
        .init(counter(0))
        .clean(counter(1))
        .before(counter(2))
        .after(counter(3));

    let (failures, output) = run(&mut harness)?;
    let fired: Vec<_> = counters.iter().map(|c| c.get()).collect();

    ensure!(failures == MISMATCHED, "{failures} failures:\n{output}");
    ensure!(fired == [1, 1, TOTAL, TOTAL], "hooks fired {fired:?}");
    ensure!(harness.registry().is_empty());
    Ok(())
}

fn no_diff_suppresses_only_the_details() -> Result<()> {
    let mut harness = Harness::new(plain(HarnessConfig::new()));
    harness.register(&EffectSpec::new("with-diff", says_hello).stdout("goodbye"))?;
    harness.register(
        &EffectSpec::new("without-diff", says_hello)
            .stdout("goodbye")
            .with_flags(EffectFlags::NO_DIFF),
    )?;

    let (failures, output) = run(&mut harness)?;

    ensure!(failures == 2, "{output}");
    ensure!(status_lines(&output).len() == 2, "{output}");
    ensure!(output.matches("stdout DIFFERS").count() == 1, "{output}");
    ensure!(output.matches("expected: goodbye").count() == 1, "{output}");
    Ok(())
}

fn verbose_mode_lists_passing_tests() -> Result<()> {
    let mut harness = Harness::new(plain(HarnessConfig::new().with_verbose(true)));
    harness.register(&EffectSpec::new("passes", says_hello).stdout("hello"))?;

    let (failures, output) = run(&mut harness)?;

    ensure!(failures == 0);
    ensure!(status_lines(&output) == ["[ PASS ] passes"], "{output}");
    ensure!(output.contains("[ PASS ] success rate: 100% [1/1]"), "{output}");
    Ok(())
}

fn signal_expectation_passes_for_matching_abort() -> Result<()> {
    let mut harness = Harness::new(plain(HarnessConfig::new()));
    harness.register(&EffectSpec::new("abort", aborts).signal(Signal::SIGABRT))?;

    let (failures, output) = run(&mut harness)?;

    ensure!(failures == 0, "{output}");
    ensure!(status_lines(&output).is_empty(), "{output}");
    Ok(())
}

fn junit_report_covers_every_test() -> Result<()> {
    let config = plain(HarnessConfig::new().with_format(OutputFormat::Junit));
    let mut harness = Harness::new(config);
    harness.register(&EffectSpec::new("good", says_hello).stdout("hello"))?;
    harness.register(&EffectSpec::new("bad", says_hello).stdout("nope"))?;

    let (failures, output) = run(&mut harness)?;

    ensure!(failures == 1);
    ensure!(output.contains("name=\"good\""), "{output}");
    ensure!(output.contains("name=\"bad\""), "{output}");
    ensure!(!output.contains("success rate"), "{output}");
    Ok(())
}

fn main() -> Result<()> {
    type Check = fn() -> Result<()>;

    let checks: &[(&str, Check)] = &[
        (
            "abort_with_wrong_expected_signal_is_the_only_failure",
            abort_with_wrong_expected_signal_is_the_only_failure,
        ),
        (
            "failures_are_counted_and_hooks_fire_once",
            failures_are_counted_and_hooks_fire_once,
        ),
        ("no_diff_suppresses_only_the_details", no_diff_suppresses_only_the_details),
        ("verbose_mode_lists_passing_tests", verbose_mode_lists_passing_tests),
        (
            "signal_expectation_passes_for_matching_abort",
            signal_expectation_passes_for_matching_abort,
        ),
        ("junit_report_covers_every_test", junit_report_covers_every_test),
    ];

    let mut failed = 0;
    for (name, check) in checks {
        match check() {
            Ok(()) => eprintln!("{name} ... ok"),
            Err(e) => {
                eprintln!("{name} ... FAILED: {e:#}");
                failed += 1;
            }
        }
    }

    ensure!(failed == 0, "{failed} of {} checks failed", checks.len());
    Ok(())
}
