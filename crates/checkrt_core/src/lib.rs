/*!
Shared plumbing for the `checkrt` test runtime.

This crate holds the pieces both halves of the runtime lean on: the
[`Error`] type, thin unix wrappers in [`os`], a formatter that never
touches the heap in [`stackfmt`], the stderr [`SimpleStderrLogger`], and
the check-reporting collaborator in [`report`].
*/
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]

pub mod os;
pub mod report;
pub mod stackfmt;

use core::{
    fmt::{self, Display},
    time,
};
use std::{
    ffi::NulError,
    io,
    time::{SystemTime, UNIX_EPOCH},
};

use log::{Metadata, Record};

pub use report::{CheckReporter, Tally};

/// Main error struct for `checkrt`
#[derive(Debug)]
pub enum Error {
    /// File related error
    File(io::Error),
    /// A system call failed; carries the OS-provided reason.
    Os(String),
    /// You're holding it wrong
    IllegalState(String),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String),
    /// Something else happened
    Unknown(String),
}

impl Error {
    /// File related error
    #[must_use]
    pub fn file(arg: io::Error) -> Self {
        Error::File(arg)
    }
    /// A system call failed
    #[must_use]
    pub fn os<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Os(arg.into())
    }
    /// Builds an [`Error::Os`] from `errno`, prefixed with what we were doing.
    #[must_use]
    pub fn last_os_error<S>(context: S) -> Self
    where
        S: Into<String>,
    {
        let err = io::Error::last_os_error();
        Error::Os(format!("{}: {err}", context.into()))
    }
    /// You're holding it wrong
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into())
    }
    /// The argument passed to this method or function is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into())
    }
    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into())
    }

    /// The short, human-readable reason, without the variant prefix.
    ///
    /// This is what ends up after `reason:` in an error report.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::File(err) => err.to_string(),
            Self::Os(s)
            | Self::IllegalState(s)
            | Self::IllegalArgument(s)
            | Self::Unknown(s) => s.clone(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::File(err) => write!(f, "File IO failed: {err}"),
            Self::Os(s) => write!(f, "OS error: {s}"),
            Self::IllegalState(s) => write!(f, "Illegal state: {s}"),
            Self::IllegalArgument(s) => write!(f, "Illegal argument: {s}"),
            Self::Unknown(s) => write!(f, "Unknown error: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(err) => Some(err),
            _ => None,
        }
    }
}

/// Create a `checkrt` Error from io Error
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::file(err)
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Self::os(err.desc())
    }
}

impl From<NulError> for Error {
    fn from(err: NulError) -> Self {
        Self::illegal_argument(format!(
            "argument contains an interior nul byte at {}",
            err.nul_position()
        ))
    }
}

/// Current time
#[must_use]
#[inline]
pub fn current_time() -> time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Stderr logger
pub static CHECKRT_STDERR_LOGGER: SimpleStderrLogger = SimpleStderrLogger::new();

/// A simple logger struct that logs to stderr when used with [`log::set_logger`].
///
/// Output goes to stderr because stdout of a test program is frequently the
/// very thing under test.
#[derive(Debug)]
pub struct SimpleStderrLogger {}

impl Default for SimpleStderrLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleStderrLogger {
    /// Create a new [`log::Log`] logger that will write log to stderr
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// register stderr logger
    pub fn set_logger() -> Result<(), Error> {
        log::set_logger(&CHECKRT_STDERR_LOGGER)
            .map_err(|_| Error::unknown("Failed to register logger"))
    }
}

impl log::Log for SimpleStderrLogger {
    #[inline]
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        eprintln!(
            "[{:?}] {}: {}",
            current_time(),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}
