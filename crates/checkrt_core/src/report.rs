//! The check-reporting collaborator.
//!
//! The harness never decides how results are tallied or summarised. It
//! calls exactly one of [`CheckReporter::record_pass`],
//! [`CheckReporter::record_fail`] or [`CheckReporter::record_error`] per
//! completed check and hands over human-readable detail lines through
//! [`CheckReporter::detail`].

use core::{fmt, panic::Location};

/// Receives the outcome of every check.
pub trait CheckReporter {
    /// A check passed.
    fn record_pass(&mut self);

    /// A check failed at `location`.
    fn record_fail(&mut self, location: &Location<'_>);

    /// A check could not be completed at all.
    ///
    /// `context` names the operation that broke (`check_exec`, ...) and
    /// `message` carries the OS-provided reason, if there was one.
    fn record_error(&mut self, location: &Location<'_>, context: &str, message: Option<&str>);

    /// One line of explanation attached to the most recent outcome.
    fn detail(&mut self, line: fmt::Arguments<'_>) {
        eprintln!("{line}");
    }
}

/// A [`CheckReporter`] that counts.
///
/// Headers and detail lines are echoed to stderr in the classic
/// `Check failed (file:line):` layout unless built with [`Tally::quiet`];
/// either way detail lines are kept in [`Tally::details`].
#[derive(Debug, Default, Clone)]
pub struct Tally {
    /// Number of passed checks
    pub passed: u32,
    /// Number of failed checks
    pub failed: u32,
    /// Number of checks that could not be completed
    pub errored: u32,
    /// Every detail line reported so far
    pub details: Vec<String>,
    quiet: bool,
}

impl Tally {
    /// A tally that echoes to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tally that only records.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// Total number of checks seen.
    #[must_use]
    pub fn checks(&self) -> u32 {
        self.passed + self.failed + self.errored
    }

    /// Whether any detail line contains `needle`.
    #[must_use]
    pub fn mentions(&self, needle: &str) -> bool {
        self.details.iter().any(|line| line.contains(needle))
    }
}

impl CheckReporter for Tally {
    fn record_pass(&mut self) {
        self.passed += 1;
    }

    fn record_fail(&mut self, location: &Location<'_>) {
        self.failed += 1;
        if !self.quiet {
            eprintln!("\nCheck failed ({}:{}):", location.file(), location.line());
        }
    }

    fn record_error(&mut self, location: &Location<'_>, context: &str, message: Option<&str>) {
        self.errored += 1;
        if let Some(message) = message {
            self.details.push(format!("reason: {message}"));
        }
        if self.quiet {
            return;
        }
        eprint!("\nError in {context} ({}:{})", location.file(), location.line());
        match message {
            Some(message) => eprintln!(":\n  reason: {message}"),
            None => eprintln!(),
        }
    }

    fn detail(&mut self, line: fmt::Arguments<'_>) {
        let line = line.to_string();
        if !self.quiet {
            eprintln!("  {line}");
        }
        self.details.push(line);
    }
}

#[cfg(test)]
mod tests {
    use core::panic::Location;

    use super::{CheckReporter, Tally};

    #[test]
    fn test_tally_counts_each_kind() {
        let here = Location::caller();
        let mut tally = Tally::quiet();
        tally.record_pass();
        tally.record_fail(here);
        tally.record_error(here, "check_exec", Some("No such file or directory"));
        tally.detail(format_args!("have: {}", 1));

        assert_eq!((tally.passed, tally.failed, tally.errored), (1, 1, 1));
        assert_eq!(tally.checks(), 3);
        assert!(tally.mentions("No such file"));
        assert!(tally.mentions("have: 1"));
    }
}
