//! Turns a [`ChildOutcome`] into exactly one verdict for the reporter.

use core::{fmt, panic::Location};

use checkrt_core::CheckReporter;

use crate::{
    runner::{ChildOutcome, Termination},
    spec::{Expect, ProcSpec},
};

/// Renders bytes as a C string literal: quoted, with `\n`-style escapes
/// and `\xNN` for anything else unprintable.
#[derive(Debug, Clone, Copy)]
pub struct CLiteral<'a>(pub &'a [u8]);

impl fmt::Display for CLiteral<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for &byte in self.0 {
            match byte {
                0x07 => f.write_str("\\a")?,
                0x08 => f.write_str("\\b")?,
                0x0c => f.write_str("\\f")?,
                b'\n' => f.write_str("\\n")?,
                b'\r' => f.write_str("\\r")?,
                b'\t' => f.write_str("\\t")?,
                0x0b => f.write_str("\\v")?,
                b'\\' => f.write_str("\\\\")?,
                b'"' => f.write_str("\\\"")?,
                b' ' | 0x21..=0x7e => write!(f, "{}", char::from(byte))?,
                _ => write!(f, "\\x{byte:02x}")?,
            }
        }
        f.write_str("\"")
    }
}

/// Collects the sub-checks of one run into a single pass or fail.
///
/// The first mismatch is recorded as the failure; later ones only add
/// detail lines.
struct Verdict<'r, R: CheckReporter + ?Sized> {
    reporter: &'r mut R,
    location: &'static Location<'static>,
    failed: bool,
}

impl<'r, R: CheckReporter + ?Sized> Verdict<'r, R> {
    fn new(reporter: &'r mut R, location: &'static Location<'static>) -> Self {
        Self {
            reporter,
            location,
            failed: false,
        }
    }

    fn mismatch(&mut self, explain: impl FnOnce(&mut R)) {
        if self.failed {
            self.reporter.detail(format_args!("additional failure:"));
        } else {
            self.failed = true;
            self.reporter.record_fail(self.location);
        }
        explain(self.reporter);
    }

    fn finish(self) {
        if !self.failed {
            self.reporter.record_pass();
        }
    }
}

fn compare_channel<R: CheckReporter + ?Sized>(
    verdict: &mut Verdict<'_, R>,
    name: &str,
    expect: &Expect,
    have: Option<&[u8]>,
) {
    let Expect::Exact(want) = expect else {
        return;
    };
    let have = have.unwrap_or_default();
    if have == want.as_slice() {
        return;
    }
    verdict.mismatch(|reporter| {
        reporter.detail(format_args!("have: {}  (from: actual {name})", CLiteral(have)));
        reporter.detail(format_args!("want: {}  (from: expected {name})", CLiteral(want)));
    });
}

/// Reports `outcome` against `spec`.
///
/// A launch failure is an error rather than a failure, and nothing else
/// about that run is compared, since each run is counted exactly once.
/// Otherwise status (or signal), stdout and stderr are all compared and
/// folded into one verdict.
pub fn report_outcome<R: CheckReporter + ?Sized>(
    reporter: &mut R,
    location: &'static Location<'static>,
    context: &str,
    launcher: &str,
    outcome: &ChildOutcome,
    spec: &ProcSpec,
) {
    let mut verdict = Verdict::new(reporter, location);

    match &outcome.termination {
        Termination::LaunchFailed { reason } => {
            verdict
                .reporter
                .record_error(location, context, Some(reason.as_str()));
            verdict
                .reporter
                .detail(format_args!("{launcher}: could not execute"));
            return;
        }
        Termination::Exited(code) => {
            let code = *code;
            if code != spec.status {
                verdict.mismatch(|reporter| {
                    reporter.detail(format_args!("have: {code}  (from: actual exit code)"));
                    reporter.detail(format_args!(
                        "want: {}  (from: expected exit code)",
                        spec.status
                    ));
                });
            }
        }
        Termination::Signaled(signal) => {
            let signal = *signal;
            verdict.mismatch(|reporter| {
                reporter.detail(format_args!("{launcher}: exit with signal: {signal}"));
                reporter.detail(format_args!(
                    "have: {signal}  (from: actual termination signal)"
                ));
                reporter.detail(format_args!("want: 0  (from: expected termination signal)"));
            });
        }
    }

    compare_channel(&mut verdict, "stdout", &spec.stdout, outcome.stdout.as_deref());
    compare_channel(&mut verdict, "stderr", &spec.stderr, outcome.stderr.as_deref());
    verdict.finish();
}
