//! System-call seam for the capture pipeline.
//!
//! The capture pipeline never calls process or descriptor primitives
//! directly; it goes through a [`Sys`] implementation. [`NixSys`] forwards to
//! the operating system. Other implementations (for example a fault
//! injector in a test suite) only need to honor the usual convention:
//! report failure through the returned [`Errno`], exactly as the real call
//! would.

use std::fmt::Display;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use nix::unistd::{ForkResult, Pid};

/// Identifies a system operation performed by the harness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SysOp {
    /// Creating a pipe.
    Pipe,
    /// Forking the isolated execution context.
    Fork,
    /// Duplicating a descriptor.
    Dup,
    /// Duplicating a descriptor onto a specific number.
    Dup2,
    /// Closing a descriptor.
    Close,
    /// Reading from a descriptor.
    Read,
    /// Writing to a descriptor.
    Write,
    /// Waiting for the isolated execution context to terminate.
    Wait,
}

impl SysOp {
    /// All operations, in wire order.
    pub const ALL: [Self; 8] = [
        Self::Pipe,
        Self::Fork,
        Self::Dup,
        Self::Dup2,
        Self::Close,
        Self::Read,
        Self::Write,
        Self::Wait,
    ];

    /// Returns the name of the operation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Fork => "fork",
            Self::Dup => "dup",
            Self::Dup2 => "dup2",
            Self::Close => "close",
            Self::Read => "read",
            Self::Write => "write",
            Self::Wait => "wait",
        }
    }

    pub(crate) const fn to_wire(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_wire(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }
}

impl Display for SysOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process and descriptor primitives used by the capture pipeline.
pub trait Sys {
    /// Creates a pipe, returning its `(read, write)` ends.
    fn pipe(&self) -> Result<(OwnedFd, OwnedFd), Errno>;

    /// Forks the calling process.
    ///
    /// # Safety
    ///
    /// Same contract as [`nix::unistd::fork`]: the child of a multi-threaded
    /// process may only rely on state that is consistent without the other
    /// threads.
    unsafe fn fork(&self) -> Result<ForkResult, Errno>;

    /// Duplicates a descriptor onto the lowest free number.
    fn dup(&self, fd: BorrowedFd<'_>) -> Result<OwnedFd, Errno>;

    /// Duplicates `src` onto the descriptor number `target`.
    fn dup2(&self, src: BorrowedFd<'_>, target: RawFd) -> Result<(), Errno>;

    /// Closes a descriptor, reporting any failure.
    fn close(&self, fd: OwnedFd) -> Result<(), Errno>;

    /// Reads into `buf`, returning the number of bytes read (0 at end of file).
    fn read(&self, fd: BorrowedFd<'_>, buf: &mut [u8]) -> Result<usize, Errno>;

    /// Writes from `buf`, returning the number of bytes written.
    fn write(&self, fd: BorrowedFd<'_>, buf: &[u8]) -> Result<usize, Errno>;

    /// Blocks until the given child terminates.
    fn waitpid(&self, pid: Pid) -> Result<WaitStatus, Errno>;
}

/// [`Sys`] implementation backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct NixSys;

impl Sys for NixSys {
    fn pipe(&self) -> Result<(OwnedFd, OwnedFd), Errno> {
        nix::unistd::pipe()
    }

    unsafe fn fork(&self) -> Result<ForkResult, Errno> {
        // SAFETY: the caller upholds the contract of `fork`.
        unsafe { nix::unistd::fork() }
    }

    fn dup(&self, fd: BorrowedFd<'_>) -> Result<OwnedFd, Errno> {
        // SAFETY: `fd` is a valid, borrowed descriptor for the duration of the call.
        let duplicated = Errno::result(unsafe { nix::libc::dup(fd.as_raw_fd()) })?;

        // SAFETY: `dup` succeeded, so `duplicated` is a fresh descriptor nobody else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(duplicated) })
    }

    fn dup2(&self, src: BorrowedFd<'_>, target: RawFd) -> Result<(), Errno> {
        // SAFETY: `src` is valid for the duration of the call; replacing `target`
        // is the whole point of the call and callers own that number.
        Errno::result(unsafe { nix::libc::dup2(src.as_raw_fd(), target) })?;
        Ok(())
    }

    fn close(&self, fd: OwnedFd) -> Result<(), Errno> {
        let raw = fd.into_raw_fd();

        // SAFETY: ownership of `raw` was released by `into_raw_fd` above, so it is
        // closed exactly once.
        Errno::result(unsafe { nix::libc::close(raw) })?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn read(&self, fd: BorrowedFd<'_>, buf: &mut [u8]) -> Result<usize, Errno> {
        loop {
            // SAFETY: `buf` is a valid, writable region of `buf.len()` bytes.
            let result = Errno::result(unsafe {
                nix::libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
            });

            match result {
                Ok(count) => return Ok(count as usize),
                Err(Errno::EINTR) => (),
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn write(&self, fd: BorrowedFd<'_>, buf: &[u8]) -> Result<usize, Errno> {
        loop {
            // SAFETY: `buf` is a valid, readable region of `buf.len()` bytes.
            let result = Errno::result(unsafe {
                nix::libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len())
            });

            match result {
                Ok(count) => return Ok(count as usize),
                Err(Errno::EINTR) => (),
                Err(e) => return Err(e),
            }
        }
    }

    fn waitpid(&self, pid: Pid) -> Result<WaitStatus, Errno> {
        loop {
            match nix::sys::wait::waitpid(pid, None) {
                Err(Errno::EINTR) => (),
                result => return result,
            }
        }
    }
}
