//! # trace
//! Where allocation traces go. Every allocator entry point writes one line
//! here; the sink is purely observational and swallows its own failures.
use core::{ffi::CStr, fmt};
use std::{
    fs::File,
    io::Write,
    os::fd::{FromRawFd, RawFd},
};

use checkrt_core::stackfmt::StackWriter;

use crate::config::{ENV_TRACE, getenv};

/// Longest trace line we bother to write, newline included.
const TRACE_LINE_MAX: usize = 256;

/// An optional output stream for trace lines.
#[derive(Debug, Default)]
pub struct TraceSink {
    out: Option<File>,
}

impl TraceSink {
    /// A sink that drops everything.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { out: None }
    }

    /// A sink writing to an already open file.
    #[must_use]
    pub fn to_file(file: File) -> Self {
        Self { out: Some(file) }
    }

    /// Opens the destination named by `CHECKRT_TRACE`, if any.
    #[must_use]
    pub fn from_env() -> Self {
        getenv(ENV_TRACE).map_or_else(Self::disabled, Self::from_destination)
    }

    /// Opens `dst`: `&<fd>` adopts an inherited descriptor if it is open,
    /// anything else is a path to create or truncate. Failure leaves the
    /// sink disabled.
    #[must_use]
    pub fn from_destination(dst: &CStr) -> Self {
        let bytes = dst.to_bytes();
        if let Some(fd) = bytes.strip_prefix(b"&").filter(|rest| !rest.is_empty()) {
            return parse_fd(fd)
                .filter(|&fd| unsafe { libc::fcntl(fd, libc::F_GETFD) } >= 0)
                .map_or_else(Self::disabled, |fd| Self {
                    out: Some(unsafe { File::from_raw_fd(fd) }),
                });
        }

        let fd = unsafe {
            libc::open(
                dst.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                0o666 as libc::c_uint,
            )
        };
        if fd < 0 {
            Self::disabled()
        } else {
            Self {
                out: Some(unsafe { File::from_raw_fd(fd) }),
            }
        }
    }

    /// Whether lines go anywhere.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.out.is_some()
    }

    /// Writes one line. Never allocates, never fails.
    pub fn line(&self, args: fmt::Arguments<'_>) {
        let Some(mut out) = self.out.as_ref() else {
            return;
        };
        let mut buf = StackWriter::<TRACE_LINE_MAX>::new();
        let _ = fmt::Write::write_fmt(&mut buf, args);
        let _ = out.write_all(buf.as_bytes());
        let _ = out.write_all(b"\n");
    }
}

fn parse_fd(digits: &[u8]) -> Option<RawFd> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let mut fd: RawFd = 0;
    for &digit in digits {
        fd = fd.checked_mul(10)?.checked_add(RawFd::from(digit - b'0'))?;
    }
    Some(fd)
}
