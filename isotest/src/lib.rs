//! Process-isolating unit-test harness.
//!
//! Each registered test body runs in a forked child (or, on request, in the
//! calling process) with its standard streams redirected into pipes. The
//! harness feeds declared stdin content, then collects stdout, stderr, the
//! exit status or terminating signal, the value of `errno` and the content
//! of declared files, and compares all of them against the test's declared
//! effects. Discrepancies are reported as failed tests; failures of the
//! harness itself end the run with an [`Error`].
//!
//! Test binaries are declared with `harness = false` and drive the harness
//! from `main`:
//!
//! ```no_run
//! use isotest::{EffectSpec, harness_from_args, run_main};
//!
//! fn greet() {
//!     println!("  hello  ");
//! }
//!
//! fn main() -> std::process::ExitCode {
//!     let mut harness = harness_from_args();
//!     if let Err(e) = harness.register(&EffectSpec::new("greet", greet).stdout("hello")) {
//!         eprintln!("error: {e}");
//!         return std::process::ExitCode::FAILURE;
//!     }
//!     run_main(harness)
//! }
//! ```

#![cfg(unix)]

pub mod capture;
pub mod comparison;
pub mod config;
pub mod effects;
mod entry;
mod error;
pub mod events;
mod pipes;
pub mod registry;
pub mod reporting;
pub mod runner;
pub mod sys;
mod trace_categories;
mod util;

pub use capture::{ObservedEffects, ObservedFile, Termination};
pub use comparison::EffectComparison;
pub use config::{DiffStyle, HarnessConfig, OutputFormat, TestFilter, TestOptions};
pub use effects::{
    CAPTURE_CEILING, CodeKind, Content, ContentMode, ContentSource, EffectFlags, EffectRecord,
    EffectSpec, ExpectedCode, FILE_EFFECT_CAPACITY, StdStream, TestFn,
};
pub use entry::{
    INFRASTRUCTURE_FAILURE_EXIT_CODE, MAX_REPORTED_FAILURES, harness_from_args, run_main,
};
pub use error::Error;
pub use runner::{Harness, Hooks};
pub use sys::{NixSys, Sys, SysOp};
