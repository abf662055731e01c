//! # config
//! Environment-driven configuration of the budget.
//!
//! Variables are read with `getenv(3)` directly: `std::env::var` builds a
//! `String`, and this code runs inside the allocator.
use core::ffi::CStr;

use checkrt_core::{
    os::{raw_exit, write_all_raw},
    stackfmt::StackWriter,
};
use thiserror::Error;

/// Total budget, in bytes with an optional unit suffix.
pub const ENV_LIMIT_TOTAL: &CStr = c"CHECKRT_ALLOC_LIMIT_TOTAL";
/// Deprecated spelling of [`ENV_LIMIT_TOTAL`].
pub const ENV_LIMIT_TOTAL_OLD: &CStr = c"CHECKRT_ALLOC_LIMIT";
/// Peak budget, in bytes with an optional unit suffix.
pub const ENV_LIMIT_PEAK: &CStr = c"CHECKRT_ALLOC_LIMIT_PEAK";
/// Deprecated spelling of [`ENV_LIMIT_PEAK`].
pub const ENV_LIMIT_PEAK_OLD: &CStr = c"CHECKRT_HEAP_LIMIT";
/// Where allocation traces go: a path, or `&<fd>`.
pub const ENV_TRACE: &CStr = c"CHECKRT_TRACE";

/// Exit code for a budget variable we could not understand.
pub const CONFIG_ERROR_EXIT: i32 = 254;
/// Exit code for when the ledger itself cannot get memory.
pub const LEDGER_FAILURE_EXIT: i32 = 255;

/// Why a budget value was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitParseError {
    /// The value does not start with a decimal number.
    #[error("expected a decimal number")]
    NotANumber,
    /// The number does not fit in `usize` once scaled.
    #[error("limit does not fit in usize")]
    Overflow,
    /// Something other than `b`, `k`, `m` or `g` follows the number.
    #[error("unknown unit suffix")]
    BadSuffix,
}

/// How the budget should behave, as decided by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitConfig {
    /// Grant everything the real allocator grants.
    NoLimit,
    /// Limit the bytes ever granted.
    Total(usize),
    /// Limit the bytes live at once.
    Peak(usize),
}

/// A budget variable that is set but malformed.
#[derive(Debug, Clone, Copy)]
pub struct BadLimitVar {
    /// The variable name
    pub name: &'static CStr,
    /// Its raw value
    pub value: &'static [u8],
    /// What was wrong with it
    pub error: LimitParseError,
}

/// Parses `<decimal>[ ][b|k|m|g][b]`, surrounding whitespace allowed.
///
/// Returns `Ok(None)` for a value that is empty or all whitespace, which
/// counts as unset.
pub fn parse_limit(value: &[u8]) -> Result<Option<usize>, LimitParseError> {
    let mut rest = value.trim_ascii_start();
    if rest.is_empty() {
        return Ok(None);
    }

    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return Err(LimitParseError::NotANumber);
    }
    let mut size: usize = 0;
    for &digit in &rest[..digits] {
        size = size
            .checked_mul(10)
            .and_then(|n| n.checked_add(usize::from(digit - b'0')))
            .ok_or(LimitParseError::Overflow)?;
    }
    rest = rest[digits..].trim_ascii_start();

    let shift = match rest.first().map(u8::to_ascii_lowercase) {
        None | Some(b'b') => 0,
        Some(b'k') => 10,
        Some(b'm') => 20,
        Some(b'g') => 30,
        Some(_) => return Err(LimitParseError::BadSuffix),
    };
    if let Some((_, tail)) = rest.split_first() {
        rest = tail;
        if shift != 0 && matches!(rest.first(), Some(b'b' | b'B')) {
            rest = &rest[1..];
        }
    }
    if !rest.trim_ascii().is_empty() {
        return Err(LimitParseError::BadSuffix);
    }

    size.checked_mul(1 << shift)
        .map(Some)
        .ok_or(LimitParseError::Overflow)
}

/// The value of an environment variable, without allocating.
///
/// The result borrows the process environment; nothing in this crate
/// modifies the environment while it is held.
#[must_use]
pub fn getenv(name: &CStr) -> Option<&'static CStr> {
    let value = unsafe { libc::getenv(name.as_ptr()) };
    if value.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(value) })
    }
}

fn read_limit(name: &'static CStr) -> Result<Option<usize>, BadLimitVar> {
    let Some(value) = getenv(name).map(CStr::to_bytes) else {
        return Ok(None);
    };
    parse_limit(value).map_err(|error| BadLimitVar { name, value, error })
}

impl LimitConfig {
    /// Reads the budget variables: a total limit wins over a peak limit,
    /// and each primary name wins over its deprecated alias.
    pub fn from_env() -> Result<Self, BadLimitVar> {
        for name in [ENV_LIMIT_TOTAL, ENV_LIMIT_TOTAL_OLD] {
            if let Some(n) = read_limit(name)? {
                return Ok(Self::Total(n));
            }
        }
        for name in [ENV_LIMIT_PEAK, ENV_LIMIT_PEAK_OLD] {
            if let Some(n) = read_limit(name)? {
                return Ok(Self::Peak(n));
            }
        }
        Ok(Self::NoLimit)
    }

    /// Like [`LimitConfig::from_env`], but a malformed variable ends the
    /// process with [`CONFIG_ERROR_EXIT`].
    #[must_use]
    pub fn from_env_or_exit() -> Self {
        Self::from_env().unwrap_or_else(|bad| bad.exit())
    }
}

impl BadLimitVar {
    /// Prints the diagnostic to stderr and exits with [`CONFIG_ERROR_EXIT`].
    ///
    /// Uses `_exit`: atexit handlers could allocate, and the budget is not
    /// configured yet.
    pub fn exit(&self) -> ! {
        use core::fmt::Write;

        let mut msg = StackWriter::<512>::new();
        let _ = writeln!(
            msg,
            "checkrt_alloc: could not understand {} value: '{}' ({})",
            self.name.to_string_lossy(),
            self.value.escape_ascii(),
            self.error
        );
        let _ = write_all_raw(libc::STDERR_FILENO, msg.as_bytes());
        raw_exit(CONFIG_ERROR_EXIT)
    }
}
