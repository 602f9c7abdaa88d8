//! Executes a test body and captures its observable effects.
//!
//! One pipe is opened per standard stream plus a side channel that carries
//! the value of `errno` (or a setup failure) out of the isolated execution
//! context. By default the body runs in a forked child; with
//! [`EffectFlags::NO_FORK`] it runs in the calling process with the standard
//! descriptors temporarily redirected. Output is collected only after the
//! body has finished, so it is never partially observed.

use std::io::{BufRead, Write};
use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use nix::unistd::ForkResult;

use crate::effects::{
    CAPTURE_CEILING, CodeKind, EffectFlags, EffectRecord, StdStream, read_bounded_file,
    strip_captured,
};
use crate::error::Error;
use crate::pipes::{End, Pipe, SavedDescriptors, SysFailure};
use crate::sys::{Sys, SysOp};
use crate::trace_categories;

/// Exit status of a forked child that could not set up its redirections.
const CHILD_SETUP_FAILURE_STATUS: i32 = 127;

/// How the test body's execution context ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The forked child exited normally with the given status.
    Exited(i32),
    /// The forked child was terminated by the given signal.
    Signaled(i32),
    /// The body ran in-process and returned.
    InProcess,
}

impl Termination {
    /// The normal-exit status, or 0 if the context did not exit normally.
    pub const fn exit_status(self) -> i32 {
        match self {
            Self::Exited(status) => status,
            Self::Signaled(_) | Self::InProcess => 0,
        }
    }

    /// The terminating signal, or 0 if the context was not signaled.
    pub const fn signal(self) -> i32 {
        match self {
            Self::Signaled(signal) => signal,
            Self::Exited(_) | Self::InProcess => 0,
        }
    }

    /// The observed code of the given kind, given the `errno` reported by the body.
    pub const fn code(self, kind: CodeKind, errno: i32) -> i32 {
        match kind {
            CodeKind::ErrNo => errno,
            CodeKind::ExitStatus => self.exit_status(),
            CodeKind::Signal => self.signal(),
        }
    }

    /// Human-readable description.
    pub fn describe(self) -> String {
        match self {
            Self::Exited(status) => std::format!("exited with status {status}"),
            Self::Signaled(signal) => std::format!(
                "terminated by {}",
                CodeKind::Signal.describe(signal)
            ),
            Self::InProcess => String::from("returned in-process"),
        }
    }
}

/// A declared file, as found on disk after the test ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedFile {
    /// Path of the file.
    pub path: PathBuf,
    /// Content of the file up to the capture ceiling, or `None` if it could not be read.
    pub content: Option<Vec<u8>>,
}

/// Effects observed while running one test.
///
/// Observations never hold stdin: it is input owned by the record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedEffects {
    /// How the execution context ended.
    pub termination: Termination,
    /// The observed value for the record's expected code kind.
    pub code: i32,
    /// Captured standard output, after the stripping policy.
    pub stdout: Vec<u8>,
    /// Captured standard error, after the stripping policy.
    pub stderr: Vec<u8>,
    /// Declared files, in declaration order.
    pub files: Vec<ObservedFile>,
}

impl ObservedEffects {
    /// Captured content of an output stream; empty for stdin.
    pub fn output(&self, stream: StdStream) -> &[u8] {
        match stream {
            StdStream::Stdin => &[],
            StdStream::Stdout => &self.stdout,
            StdStream::Stderr => &self.stderr,
        }
    }
}

/// What the execution context reports over the side channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SideRecord {
    /// The body returned; `errno` had this value.
    Errno(i32),
    /// The child could not prepare its redirections or report its errno.
    SetupFailed(SysFailure),
}

impl SideRecord {
    const LEN: usize = 6;
    const TAG_ERRNO: u8 = 0;
    const TAG_SETUP_FAILED: u8 = 1;

    fn encode(self) -> [u8; Self::LEN] {
        let (tag, op, value) = match self {
            Self::Errno(value) => (Self::TAG_ERRNO, 0, value),
            Self::SetupFailed(failure) => (
                Self::TAG_SETUP_FAILED,
                failure.op.to_wire(),
                failure.errno as i32,
            ),
        };

        let mut buf = [0; Self::LEN];
        buf[0] = tag;
        buf[1] = op;
        buf[2..].copy_from_slice(&value.to_ne_bytes());
        buf
    }

    fn decode(buf: &[u8; Self::LEN]) -> Option<Self> {
        let value = i32::from_ne_bytes([buf[2], buf[3], buf[4], buf[5]]);
        match buf[0] {
            Self::TAG_ERRNO => Some(Self::Errno(value)),
            Self::TAG_SETUP_FAILED => Some(Self::SetupFailed(SysFailure::new(
                SysOp::from_wire(buf[1])?,
                Errno::from_raw(value),
            ))),
            _ => None,
        }
    }
}

/// The pipes used for one execution.
struct CapturePipes {
    stdio: [Pipe; 3],
    side: Pipe,
}

impl CapturePipes {
    fn open(sys: &dyn Sys) -> Result<Self, SysFailure> {
        Ok(Self {
            stdio: [Pipe::open(sys)?, Pipe::open(sys)?, Pipe::open(sys)?],
            side: Pipe::open(sys)?,
        })
    }

    fn stream(&mut self, stream: StdStream) -> &mut Pipe {
        &mut self.stdio[stream.index()]
    }

    /// Points the standard descriptors at the pipes and feeds stdin.
    fn redirect(&mut self, sys: &dyn Sys, stdin_content: &[u8]) -> Result<(), SysFailure> {
        let stdin = self.stream(StdStream::Stdin);
        stdin.duplicate_onto(sys, End::Read, StdStream::Stdin.fd())?;
        stdin.close(sys, End::Read)?;
        stdin.write_exact(sys, stdin_content)?;
        stdin.close(sys, End::Write)?;

        for stream in StdStream::OUTPUTS {
            let pipe = self.stream(stream);
            pipe.duplicate_onto(sys, End::Write, stream.fd())?;
            pipe.close(sys, End::Write)?;
        }

        Ok(())
    }

    /// Reports the body's outcome over the side channel and closes its write end.
    fn send(&mut self, sys: &dyn Sys, record: SideRecord) -> Result<(), SysFailure> {
        self.side.write_exact(sys, &record.encode())?;
        self.side.close(sys, End::Write)
    }

    fn receive(&self, sys: &dyn Sys, test: &str) -> Result<Option<SideRecord>, Error> {
        let mut buf = [0; SideRecord::LEN];
        let filled = self
            .side
            .read_exact(sys, &mut buf)
            .map_err(|f| f.for_test(test))?;

        match filled {
            0 => Ok(None),
            SideRecord::LEN => SideRecord::decode(&buf)
                .map(Some)
                .ok_or_else(|| Error::SideChannel(test.to_owned())),
            _ => Err(Error::SideChannel(test.to_owned())),
        }
    }

    fn close_all(&mut self, sys: &dyn Sys) -> Result<(), SysFailure> {
        for pipe in &mut self.stdio {
            pipe.close_both(sys)?;
        }
        self.side.close_both(sys)
    }
}

/// Runs the record's test body and collects everything it did.
///
/// Any failure of the underlying system calls is returned as
/// [`Error::Infrastructure`]; it is never folded into the observation.
///
/// # Threads
///
/// Unless the record is [`EffectFlags::NO_FORK`], this forks. It must not be
/// called from a multi-threaded process (a libtest `#[test]`, for one): the
/// child would inherit locks held by threads that no longer exist.
pub fn execute(record: &EffectRecord, sys: &dyn Sys) -> Result<ObservedEffects, Error> {
    let test = record.name.as_str();

    // Anything still buffered would otherwise be duplicated into the child
    // or land in the capture pipes.
    flush_std_streams();

    let mut pipes = CapturePipes::open(sys).map_err(|f| f.for_test(test))?;

    let termination = if record.has_flag(EffectFlags::NO_FORK) {
        run_in_process(record, sys, &mut pipes)?
    } else {
        run_forked(record, sys, &mut pipes)?
    };

    let errno = match pipes.receive(sys, test)? {
        Some(SideRecord::Errno(errno)) => errno,
        Some(SideRecord::SetupFailed(failure)) => return Err(failure.for_test(test)),
        None => {
            tracing::debug!(target: trace_categories::CAPTURE, "test '{test}' ended without reporting errno");
            0
        }
    };

    let mut outputs = [vec![], vec![]];
    for (slot, stream) in outputs.iter_mut().zip(StdStream::OUTPUTS) {
        let captured = pipes
            .stream(stream)
            .read_bounded(sys, CAPTURE_CEILING)
            .map_err(|f| f.for_test(test))?;
        *slot = strip_captured(record.flags, record.stdio(stream).mode(), captured);
    }
    let [stdout, stderr] = outputs;

    pipes.close_all(sys).map_err(|f| f.for_test(test))?;

    let files = record
        .files
        .iter()
        .map(|file| ObservedFile {
            path: file.path.clone(),
            content: match read_bounded_file(&file.path) {
                Ok(content) => Some(content),
                Err(e) => {
                    tracing::debug!(target: trace_categories::CAPTURE, "test '{test}': cannot read {}: {e}", file.path.display());
                    None
                }
            },
        })
        .collect();

    let code = termination.code(record.expected_code.kind, errno);
    tracing::debug!(target: trace_categories::CAPTURE, "test '{test}' {}; observed code {code}", termination.describe());

    Ok(ObservedEffects {
        termination,
        code,
        stdout,
        stderr,
        files,
    })
}

fn flush_std_streams() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

fn run_forked(
    record: &EffectRecord,
    sys: &dyn Sys,
    pipes: &mut CapturePipes,
) -> Result<Termination, Error> {
    let test = record.name.as_str();

    // SAFETY: the harness runs tests from a single thread; the child only
    // touches its own copies of the pipes before running the test body, and
    // never returns into the caller.
    let fork_result = unsafe { sys.fork() }.map_err(|e| Error::infra(SysOp::Fork, test, e))?;

    let child = match fork_result {
        ForkResult::Child => run_child(record, sys, pipes),
        ForkResult::Parent { child } => child,
    };

    tracing::debug!(target: trace_categories::CAPTURE, "forked pid {child} for test '{test}'");

    let close_parent_ends = |pipes: &mut CapturePipes| -> Result<(), SysFailure> {
        pipes.stream(StdStream::Stdin).close_both(sys)?;
        for stream in StdStream::OUTPUTS {
            pipes.stream(stream).close(sys, End::Write)?;
        }
        pipes.side.close(sys, End::Write)
    };
    close_parent_ends(pipes).map_err(|f| f.for_test(test))?;

    loop {
        match sys.waitpid(child) {
            Ok(WaitStatus::Exited(_, status)) => return Ok(Termination::Exited(status)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(Termination::Signaled(signal as i32));
            }
            Ok(other) => {
                tracing::debug!(target: trace_categories::CAPTURE, "test '{test}': ignoring wait status {other:?}");
            }
            Err(e) => return Err(Error::infra(SysOp::Wait, test, e)),
        }
    }
}

fn run_child(record: &EffectRecord, sys: &dyn Sys, pipes: &mut CapturePipes) -> ! {
    if let Err(failure) = pipes.redirect(sys, record.stdio(StdStream::Stdin).as_bytes()) {
        let _ = pipes.send(sys, SideRecord::SetupFailed(failure));
        exit_child(CHILD_SETUP_FAILURE_STATUS);
    }

    Errno::clear();
    if std::panic::catch_unwind(record.wrapper).is_err() {
        // A panic escaping the body counts as a failed assertion.
        std::process::abort();
    }
    let errno = Errno::last_raw();

    flush_std_streams();

    match pipes.send(sys, SideRecord::Errno(errno)) {
        Ok(()) => exit_child(0),
        Err(failure) => {
            // Surfaces in the parent as an infrastructure error.
            let _ = pipes.send(sys, SideRecord::SetupFailed(failure));
            exit_child(CHILD_SETUP_FAILURE_STATUS)
        }
    }
}

/// Ends the forked child without running exit handlers or flushing state
/// shared with the parent.
fn exit_child(status: i32) -> ! {
    // SAFETY: _exit only terminates the calling process.
    unsafe { nix::libc::_exit(status) }
}

/// Discards whatever the body left in std's stdin buffer, so the next
/// in-process test starts reading from its own pipe. Must run while
/// descriptor 0 is still the (closed for writing) stdin pipe.
fn drain_stdin_buffer() {
    let mut stdin = std::io::stdin().lock();
    loop {
        let buffered = match stdin.fill_buf() {
            Ok(buf) if !buf.is_empty() => buf.len(),
            _ => break,
        };
        stdin.consume(buffered);
    }
}

/// Runs the body in the calling process. A fatal signal or `exit` inside the
/// body ends the whole run; a panic is resumed once descriptors are restored.
fn run_in_process(
    record: &EffectRecord,
    sys: &dyn Sys,
    pipes: &mut CapturePipes,
) -> Result<Termination, Error> {
    const STANDARD_FDS: [RawFd; 3] = [
        StdStream::Stdin.fd(),
        StdStream::Stdout.fd(),
        StdStream::Stderr.fd(),
    ];

    let test = record.name.as_str();
    let saved = SavedDescriptors::save(sys, &STANDARD_FDS).map_err(|f| f.for_test(test))?;

    if let Err(failure) = pipes.redirect(sys, record.stdio(StdStream::Stdin).as_bytes()) {
        let _ = saved.restore(sys);
        return Err(failure.for_test(test));
    }

    Errno::clear();
    let outcome = std::panic::catch_unwind(record.wrapper);
    let errno = Errno::last_raw();

    flush_std_streams();
    drain_stdin_buffer();
    saved.restore(sys).map_err(|f| f.for_test(test))?;

    if let Err(payload) = outcome {
        std::panic::resume_unwind(payload);
    }

    pipes
        .send(sys, SideRecord::Errno(errno))
        .map_err(|f| f.for_test(test))?;

    Ok(Termination::InProcess)
}
