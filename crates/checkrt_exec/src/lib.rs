/*!
Run a program the way a grader would and check what it did.

```no_run
use checkrt_core::Tally;
use checkrt_exec::{ProcSpec, check_command, check_exec};

let mut tally = Tally::new();
check_command(&mut tally, "echo hello world", &ProcSpec::builder().stdout("hello world\n").build());
check_exec(
    &mut tally,
    &["grep", "-E", " "],
    &ProcSpec::builder()
        .stdin("spaceless\nspace full\n")
        .stdout("space full\n")
        .stderr("")
        .build(),
);
```

Each check runs the program once, with stdin, stdout and stderr replaced
by unlinked temp files and a fourth file on fd 3 for exec diagnostics.
The run produces exactly one of pass, fail, or error on the reporter:
a program that could not be executed at all is an error, not a failure.
*/
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]

pub mod channel;
pub mod compare;
pub mod runner;
pub mod spec;

use std::ffi::OsStr;

use checkrt_core::CheckReporter;

pub use compare::report_outcome;
pub use runner::{COULD_NOT_EXEC, ChildOutcome, DEFAULT_LAUNCHER, Runner, Termination};
pub use spec::{ANY_OUTPUT, Expect, ProcSpec};

/// Runs `argv` (the program is looked up on `PATH`) and checks it
/// against `spec`.
#[track_caller]
pub fn check_exec<R, S>(reporter: &mut R, argv: &[S], spec: &ProcSpec)
where
    R: CheckReporter + ?Sized,
    S: AsRef<OsStr>,
{
    Runner::default().check(reporter, "check_exec", argv, None, spec);
}

/// Like [`check_exec`], with `env1` (`KEY=value`) added to the child's
/// environment.
#[track_caller]
pub fn check_exec_env<R, S>(reporter: &mut R, argv: &[S], env1: &str, spec: &ProcSpec)
where
    R: CheckReporter + ?Sized,
    S: AsRef<OsStr>,
{
    Runner::default().check(reporter, "check_exec", argv, Some(OsStr::new(env1)), spec);
}

/// Runs `command` with `/bin/sh -c` and checks it against `spec`.
#[track_caller]
pub fn check_command<R>(reporter: &mut R, command: &str, spec: &ProcSpec)
where
    R: CheckReporter + ?Sized,
{
    Runner::default().check(reporter, "check_command", &["/bin/sh", "-c", command], None, spec);
}
