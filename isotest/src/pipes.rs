//! Pipe pairs used to move data across the isolation boundary.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;

use crate::error::Error;
use crate::sys::{Sys, SysOp};

/// A failed system operation, not yet attributed to a test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SysFailure {
    pub op: SysOp,
    pub errno: Errno,
}

impl SysFailure {
    pub const fn new(op: SysOp, errno: Errno) -> Self {
        Self { op, errno }
    }

    /// Attributes the failure to the named test.
    pub fn for_test(self, test: &str) -> Error {
        Error::infra(self.op, test, self.errno)
    }
}

fn op(op: SysOp) -> impl Fn(Errno) -> SysFailure {
    move |errno| SysFailure::new(op, errno)
}

/// Which end of a pipe an operation applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum End {
    Read,
    Write,
}

/// A unidirectional pipe whose ends can be closed independently.
#[derive(Debug)]
pub(crate) struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    /// Opens a new pipe.
    pub fn open(sys: &dyn Sys) -> Result<Self, SysFailure> {
        let (read, write) = sys.pipe().map_err(op(SysOp::Pipe))?;
        Ok(Self {
            read: Some(read),
            write: Some(write),
        })
    }

    fn end(&self, end: End) -> Option<BorrowedFd<'_>> {
        match end {
            End::Read => self.read.as_ref().map(AsFd::as_fd),
            End::Write => self.write.as_ref().map(AsFd::as_fd),
        }
    }

    fn require(&self, end: End, failing_op: SysOp) -> Result<BorrowedFd<'_>, SysFailure> {
        self.end(end)
            .ok_or(SysFailure::new(failing_op, Errno::EBADF))
    }

    /// Closes one end of the pipe. Closing an already closed end does nothing.
    pub fn close(&mut self, sys: &dyn Sys, end: End) -> Result<(), SysFailure> {
        let fd = match end {
            End::Read => self.read.take(),
            End::Write => self.write.take(),
        };

        match fd {
            Some(fd) => sys.close(fd).map_err(op(SysOp::Close)),
            None => Ok(()),
        }
    }

    /// Closes both ends of the pipe.
    pub fn close_both(&mut self, sys: &dyn Sys) -> Result<(), SysFailure> {
        self.close(sys, End::Read)?;
        self.close(sys, End::Write)
    }

    /// Duplicates one end of the pipe onto the given descriptor number.
    pub fn duplicate_onto(&self, sys: &dyn Sys, end: End, target: RawFd) -> Result<(), SysFailure> {
        let fd = self.require(end, SysOp::Dup2)?;
        sys.dup2(fd, target).map_err(op(SysOp::Dup2))
    }

    /// Writes all of `bytes` into the write end.
    pub fn write_exact(&self, sys: &dyn Sys, mut bytes: &[u8]) -> Result<(), SysFailure> {
        let fd = self.require(End::Write, SysOp::Write)?;

        while !bytes.is_empty() {
            let written = sys.write(fd, bytes).map_err(op(SysOp::Write))?;
            if written == 0 {
                return Err(SysFailure::new(SysOp::Write, Errno::EIO));
            }
            bytes = &bytes[written..];
        }

        Ok(())
    }

    /// Fills `buf` from the read end, stopping early only at end of file.
    /// Returns the number of bytes read.
    pub fn read_exact(&self, sys: &dyn Sys, buf: &mut [u8]) -> Result<usize, SysFailure> {
        let fd = self.require(End::Read, SysOp::Read)?;

        let mut filled = 0;
        while filled < buf.len() {
            let count = sys.read(fd, &mut buf[filled..]).map_err(op(SysOp::Read))?;
            if count == 0 {
                break;
            }
            filled += count;
        }

        Ok(filled)
    }

    /// Reads from the read end until end of file or until `limit` bytes have
    /// been collected. Anything beyond `limit` is left unread.
    pub fn read_bounded(&self, sys: &dyn Sys, limit: usize) -> Result<Vec<u8>, SysFailure> {
        let mut buf = vec![0; limit];
        let filled = self.read_exact(sys, &mut buf)?;
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Duplicates of standard descriptors, saved so they can be restored after
/// an in-process redirection.
#[derive(Debug)]
pub(crate) struct SavedDescriptors {
    saved: Vec<(RawFd, OwnedFd)>,
}

impl SavedDescriptors {
    /// Duplicates each of the given descriptors.
    pub fn save(sys: &dyn Sys, fds: &[RawFd]) -> Result<Self, SysFailure> {
        let mut saved = Vec::with_capacity(fds.len());
        for fd in fds {
            // SAFETY: standard descriptors stay open for the life of the process;
            // the borrow only lasts for the `dup` call.
            let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
            saved.push((*fd, sys.dup(borrowed).map_err(op(SysOp::Dup))?));
        }
        Ok(Self { saved })
    }

    /// Puts every saved descriptor back in place and closes the duplicates.
    ///
    /// Every descriptor is restored even if an earlier one fails; the first
    /// failure is returned.
    pub fn restore(self, sys: &dyn Sys) -> Result<(), SysFailure> {
        let mut first_failure = None;

        for (target, saved) in self.saved {
            let result = sys
                .dup2(saved.as_fd(), target)
                .map_err(op(SysOp::Dup2))
                .and_then(|()| sys.close(saved).map_err(op(SysOp::Close)));

            if let Err(failure) = result {
                first_failure.get_or_insert(failure);
            }
        }

        first_failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[expect(clippy::panic_in_result_fn)]
mod tests {
    use super::*;
    use crate::sys::NixSys;
    use pretty_assertions::assert_eq;

    #[test]
    fn bounded_read_stops_at_limit() -> anyhow::Result<()> {
        let sys = NixSys;
        let mut pipe = Pipe::open(&sys).map_err(|f| f.for_test("bounded"))?;

        pipe.write_exact(&sys, b"0123456789")
            .map_err(|f| f.for_test("bounded"))?;
        pipe.close(&sys, End::Write).map_err(|f| f.for_test("bounded"))?;

        let head = pipe.read_bounded(&sys, 4).map_err(|f| f.for_test("bounded"))?;
        assert_eq!(head, b"0123");

        let rest = pipe.read_bounded(&sys, 64).map_err(|f| f.for_test("bounded"))?;
        assert_eq!(rest, b"456789");

        pipe.close_both(&sys).map_err(|f| f.for_test("bounded"))?;
        Ok(())
    }

    #[test]
    fn operations_on_closed_ends_fail_with_ebadf() -> anyhow::Result<()> {
        let sys = NixSys;
        let mut pipe = Pipe::open(&sys).map_err(|f| f.for_test("closed"))?;
        pipe.close_both(&sys).map_err(|f| f.for_test("closed"))?;

        assert_eq!(
            pipe.write_exact(&sys, b"x"),
            Err(SysFailure::new(SysOp::Write, Errno::EBADF))
        );
        assert_eq!(
            pipe.read_bounded(&sys, 1),
            Err(SysFailure::new(SysOp::Read, Errno::EBADF))
        );
        assert_eq!(pipe.close(&sys, End::Read), Ok(()));
        Ok(())
    }
}
