//! Operating System specific abstractions
//!
//! Everything with a `_raw` suffix, plus [`raw_exit`] and [`set_errno`],
//! neither allocates nor takes locks, so it may be called from a freshly
//! forked child or from inside an allocator.

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::{
    errno::Errno,
    sys::wait::{WaitStatus, waitpid},
    unistd::Pid,
};

use crate::Error;

/// Child Process Handle
#[derive(Debug)]
pub struct ChildHandle {
    /// The process id
    pub pid: Pid,
}

impl ChildHandle {
    /// Block until this particular child changes state and return how it ended.
    ///
    /// Retries on `EINTR`. Never reaps a different child.
    pub fn wait(&self) -> Result<WaitStatus, Error> {
        loop {
            match waitpid(self.pid, None) {
                Err(Errno::EINTR) => {}
                Err(err) => {
                    return Err(Error::os(format!("waitpid({}): {}", self.pid, err.desc())));
                }
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    return Ok(status);
                }
                // stopped/continued: keep waiting for the real end
                Ok(_) => {}
            }
        }
    }
}

/// The `ForkResult` (result of a fork)
#[derive(Debug)]
pub enum ForkResult {
    /// The fork finished, we are the parent process.
    /// The child has the handle `ChildHandle`.
    Parent(ChildHandle),
    /// The fork finished, we are the child process.
    Child,
}

/// Unix has forks.
/// # Safety
/// In a multi-threaded parent the child may only use async-signal-safe
/// functions until it execs or exits: no allocation, no locks.
pub unsafe fn fork() -> Result<ForkResult, Error> {
    match unsafe { nix::unistd::fork() } {
        Ok(nix::unistd::ForkResult::Parent { child }) => {
            Ok(ForkResult::Parent(ChildHandle { pid: child }))
        }
        Ok(nix::unistd::ForkResult::Child) => Ok(ForkResult::Child),
        Err(err) => Err(Error::os(format!("fork: {}", err.desc()))),
    }
}

/// Duplicates `fd` onto the lowest free descriptor `>= floor`, close-on-exec.
pub fn dup_above(fd: BorrowedFd<'_>, floor: RawFd) -> Result<OwnedFd, Error> {
    match unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, floor) } {
        -1 => Err(Error::last_os_error(format!(
            "Error calling fcntl({}, F_DUPFD_CLOEXEC, {floor})",
            fd.as_raw_fd()
        ))),
        new_fd => Ok(unsafe { OwnedFd::from_raw_fd(new_fd) }),
    }
}

/// `dup2` that reports the bare [`Errno`].
///
/// # Safety
/// The fds need to be legal fds; `device` is silently closed first.
pub unsafe fn dup2_raw(fd: RawFd, device: RawFd) -> Result<(), Errno> {
    Errno::result(unsafe { libc::dup2(fd, device) }).map(drop)
}

/// Writes all of `buf` to `fd`, retrying on `EINTR` and short writes.
pub fn write_all_raw(fd: RawFd, mut buf: &[u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        let res = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if res < 0 {
            let err = Errno::last();
            if err != Errno::EINTR {
                return Err(err);
            }
        } else {
            buf = &buf[res as usize..];
        }
    }
    Ok(())
}

/// Sets the calling thread's `errno`.
pub fn set_errno(code: i32) {
    unsafe {
        #[cfg(any(target_os = "linux", target_os = "emscripten"))]
        {
            *libc::__errno_location() = code;
        }
        #[cfg(target_os = "android")]
        {
            *libc::__errno() = code;
        }
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly"
        ))]
        {
            *libc::__error() = code;
        }
        #[cfg(any(target_os = "openbsd", target_os = "netbsd"))]
        {
            *libc::__errno() = code;
        }
    }
}

/// Ends the process immediately: no atexit handlers, no destructors, no
/// stdio flushing.
pub fn raw_exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}
