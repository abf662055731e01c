//! Forks, wires the temp channels onto fds 0-3, execs, and waits.
//!
//! Everything the child needs (paths, argv, envp) is built in the parent
//! before the fork. Between `fork` and `execve` the child only calls
//! `dup2`, `write` and `_exit`: another thread of the parent may have held
//! the malloc lock at fork time.

use core::{ffi::c_char, fmt::Write as _, panic::Location, ptr};
use std::{
    ffi::{CString, OsStr, OsString},
    os::{fd::RawFd, unix::ffi::OsStrExt},
    path::{Path, PathBuf},
};

use checkrt_core::{
    CheckReporter, Error,
    os::{ChildHandle, ForkResult, dup2_raw, fork, raw_exit, write_all_raw},
    stackfmt::StackWriter,
};
use log::{debug, warn};
use nix::{errno::Errno, sys::wait::WaitStatus};
use typed_builder::TypedBuilder;

use crate::{
    channel::{Channel, DIAGNOSTIC_FD, TempChannels},
    compare::report_outcome,
    spec::ProcSpec,
};

/// Exit code a child uses when it could not exec its target.
pub const COULD_NOT_EXEC: i32 = 252;

/// The launcher that resolves the target through `PATH`.
pub const DEFAULT_LAUNCHER: &str = "/usr/bin/env";

/// How a child ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Ran and exited with this code.
    Exited(i32),
    /// Killed by this signal.
    Signaled(i32),
    /// Never got to run; the reason comes from the diagnostic channel.
    LaunchFailed {
        /// `"<errno> <description>"` as written by the child
        reason: String,
    },
}

/// Everything observed about one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutcome {
    /// How the child ended
    pub termination: Termination,
    /// Captured stdout, if the expectation asked for it
    pub stdout: Option<Vec<u8>>,
    /// Captured stderr, if the expectation asked for it
    pub stderr: Option<Vec<u8>>,
}

impl ChildOutcome {
    /// Whether the child ran and called `exit`.
    #[must_use]
    pub fn terminated_normally(&self) -> bool {
        matches!(self.termination, Termination::Exited(_))
    }

    /// The exit code, if the child exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// The fatal signal, if there was one.
    #[must_use]
    pub fn signal(&self) -> Option<i32> {
        match self.termination {
            Termination::Signaled(sig) => Some(sig),
            _ => None,
        }
    }
}

/// Null-terminated pointer array over owned C strings.
#[derive(Debug)]
struct CStrVec {
    owned: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStrVec {
    fn new(owned: Vec<CString>) -> Self {
        let ptrs = owned
            .iter()
            .map(|s| s.as_ptr())
            .chain(Some(ptr::null()))
            .collect();
        Self { owned, ptrs }
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

/// What the child will exec, fully prepared.
#[derive(Debug)]
struct ExecPlan {
    path: CString,
    argv: CStrVec,
    envp: CStrVec,
}

fn cstring(s: impl AsRef<OsStr>) -> Result<CString, Error> {
    Ok(CString::new(s.as_ref().as_bytes())?)
}

/// The `PATH` the child will see.
fn child_path(env1: Option<&OsStr>) -> Option<OsString> {
    env1.and_then(|entry| entry.as_bytes().strip_prefix(b"PATH="))
        .map(|value| OsStr::from_bytes(value).to_os_string())
        .or_else(|| std::env::var_os("PATH"))
}

/// The `KEY` of a `KEY=value` entry.
fn env_key(entry: &OsStr) -> Option<&[u8]> {
    let bytes = entry.as_bytes();
    bytes.iter().position(|&b| b == b'=').map(|eq| &bytes[..eq])
}

/// Runs programs under a launcher and captures what they do.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Runner {
    /// Program prefixed to every argv; it finds the target on `PATH`.
    #[builder(default = PathBuf::from(DEFAULT_LAUNCHER), setter(into))]
    launcher: PathBuf,
}

impl Default for Runner {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Runner {
    /// The launcher path
    #[must_use]
    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    /// Builds argv and envp for the child.
    ///
    /// `env1` replaces any inherited entry with the same key, so the child
    /// sees exactly one `PATH` and it is the one the lookup used.
    ///
    /// The target is looked up on the child's `PATH` first. If it cannot be
    /// found, the child execs it directly instead of through the launcher,
    /// so the failure surfaces as a failed exec rather than as whatever
    /// status the launcher would pick.
    fn plan<S: AsRef<OsStr>>(&self, argv: &[S], env1: Option<&OsStr>) -> Result<ExecPlan, Error> {
        let Some(target) = argv.first() else {
            return Err(Error::illegal_argument("argv must name a program"));
        };
        let cwd = std::env::current_dir()?;
        let found = which::which_in(target, child_path(env1), cwd).is_ok();

        let mut args = Vec::with_capacity(argv.len() + 1);
        let path = if found {
            args.push(cstring(&self.launcher)?);
            cstring(&self.launcher)?
        } else {
            debug!("{} not found on PATH", target.as_ref().to_string_lossy());
            cstring(target)?
        };
        for arg in argv {
            args.push(cstring(arg)?);
        }

        let replaced = env1.and_then(env_key);
        let mut env = std::env::vars_os()
            .filter(|(key, _)| Some(key.as_bytes()) != replaced)
            .map(|(key, value)| {
                let mut entry = key;
                entry.push("=");
                entry.push(value);
                cstring(entry)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(entry) = env1 {
            env.push(cstring(entry)?);
        }

        Ok(ExecPlan {
            path,
            argv: CStrVec::new(args),
            envp: CStrVec::new(env),
        })
    }

    /// Runs `argv` with one optional extra `KEY=value` environment entry,
    /// feeding and capturing stdio as `spec` asks.
    ///
    /// An `Err` means the run itself could not be arranged (temp files,
    /// fork, wait); a target that could not be executed is an `Ok` with
    /// [`Termination::LaunchFailed`].
    pub fn run<S: AsRef<OsStr>>(
        &self,
        argv: &[S],
        env1: Option<&OsStr>,
        spec: &ProcSpec,
    ) -> Result<ChildOutcome, Error> {
        let channels = TempChannels::create()?;
        if let Some(stdin) = &spec.stdin {
            channels.seed_stdin(stdin)?;
        }
        let plan = self.plan(argv, env1)?;
        let fds = channels.raw_fds();

        let child = match unsafe { fork() }? {
            ForkResult::Child => exec_child(&plan, fds),
            ForkResult::Parent(child) => child,
        };
        debug!("spawned {} for {:?}", child.pid, plan.argv.owned);

        let termination = classify(&child, &channels)?;
        if let Termination::LaunchFailed { reason } = &termination {
            warn!(
                "{}: could not execute: {reason}",
                self.launcher.display()
            );
            return Ok(ChildOutcome {
                termination,
                stdout: None,
                stderr: None,
            });
        }

        let capture = |wanted: bool, channel: Channel| {
            wanted.then(|| channels.read_back(channel)).transpose()
        };
        Ok(ChildOutcome {
            stdout: capture(spec.stdout.is_captured(), Channel::Stdout)?,
            stderr: capture(spec.stderr.is_captured(), Channel::Stderr)?,
            termination,
        })
    }

    /// Runs `argv` and reports the result against `spec` at the caller's
    /// location. `context` names the check in error reports.
    #[track_caller]
    pub fn check<R, S>(
        &self,
        reporter: &mut R,
        context: &str,
        argv: &[S],
        env1: Option<&OsStr>,
        spec: &ProcSpec,
    ) where
        R: CheckReporter + ?Sized,
        S: AsRef<OsStr>,
    {
        let location = Location::caller();
        match self.run(argv, env1, spec) {
            Ok(outcome) => report_outcome(
                reporter,
                location,
                context,
                &self.launcher().to_string_lossy(),
                &outcome,
                spec,
            ),
            Err(err) => {
                warn!("{context}: {err}");
                reporter.record_error(location, context, Some(&err.reason()));
            }
        }
    }
}

fn classify(child: &ChildHandle, channels: &TempChannels) -> Result<Termination, Error> {
    let status = child.wait()?;
    debug!("child {} finished: {status:?}", child.pid);
    Ok(match status {
        WaitStatus::Exited(_, COULD_NOT_EXEC) => {
            let diagnostic = channels.read_back(Channel::Diagnostic)?;
            let reason = diagnostic.trim_ascii_end();
            if reason.is_empty() {
                Termination::Exited(COULD_NOT_EXEC)
            } else {
                Termination::LaunchFailed {
                    reason: String::from_utf8_lossy(reason).into_owned(),
                }
            }
        }
        WaitStatus::Exited(_, code) => Termination::Exited(code),
        WaitStatus::Signaled(_, signal, _) => Termination::Signaled(signal as i32),
        other => {
            return Err(Error::illegal_state(format!(
                "unexpected wait status {other:?}"
            )));
        }
    })
}

/// Writes `"<errno> <description>\n"` to `fd` and exits with
/// [`COULD_NOT_EXEC`].
fn launch_failed(fd: RawFd, errno: Errno) -> ! {
    let mut msg = StackWriter::<256>::new();
    let _ = writeln!(msg, "{} {}", errno as i32, errno.desc());
    let _ = write_all_raw(fd, msg.as_bytes());
    raw_exit(COULD_NOT_EXEC)
}

/// The child side: never returns.
fn exec_child(plan: &ExecPlan, fds: [RawFd; 4]) -> ! {
    let diagnostic = fds[Channel::Diagnostic.child_fd() as usize];
    for (child_fd, fd) in (0..).zip(fds) {
        if unsafe { dup2_raw(fd, child_fd) }.is_err() {
            launch_failed(diagnostic, Errno::last());
        }
    }

    unsafe {
        libc::execve(plan.path.as_ptr(), plan.argv.as_ptr(), plan.envp.as_ptr());
    }
    let errno = Errno::last();

    let _ = unsafe { dup2_raw(DIAGNOSTIC_FD, libc::STDERR_FILENO) };
    launch_failed(libc::STDERR_FILENO, errno)
}
