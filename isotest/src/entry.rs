//! Entry points for test binaries built with `harness = false`.

use std::process::ExitCode;

use clap::Parser;

use crate::config::TestOptions;
use crate::events::TraceEventConfig;
use crate::runner::Harness;

/// Exit code reported when the harness itself failed.
pub const INFRASTRUCTURE_FAILURE_EXIT_CODE: u8 = 255;

/// Largest failure count representable in the exit code.
pub const MAX_REPORTED_FAILURES: u8 = 254;

/// Parses the command line, installs tracing and returns a harness
/// configured accordingly, with no tests registered yet.
pub fn harness_from_args() -> Harness {
    let options = TestOptions::parse();
    let tracing = TraceEventConfig::init(&options.trace_events);
    Harness::new(options.to_config()).with_tracing(tracing)
}

/// Runs the harness and converts the outcome into a process exit code: the
/// number of failed tests (saturating), or 255 if the harness itself failed.
pub fn run_main(mut harness: Harness) -> ExitCode {
    match harness.run() {
        Ok(failures) => ExitCode::from(exit_code_for(failures)),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(INFRASTRUCTURE_FAILURE_EXIT_CODE)
        }
    }
}

fn exit_code_for(failures: usize) -> u8 {
    u8::try_from(failures)
        .unwrap_or(MAX_REPORTED_FAILURES)
        .min(MAX_REPORTED_FAILURES)
}
