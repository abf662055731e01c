//! The expectation a child process is checked against.

use typed_builder::TypedBuilder;

/// What to do with one captured output channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Expect {
    /// Do not look at the channel at all.
    #[default]
    Skip,
    /// Capture the channel, but accept anything in it.
    Any,
    /// The channel must contain exactly these bytes.
    Exact(Vec<u8>),
}

/// Accept any output on a channel.
pub const ANY_OUTPUT: Expect = Expect::Any;

impl Expect {
    /// Whether the channel needs to be read back after the run.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        !matches!(self, Self::Skip)
    }
}

impl From<&str> for Expect {
    fn from(s: &str) -> Self {
        Self::Exact(s.as_bytes().to_vec())
    }
}

impl From<String> for Expect {
    fn from(s: String) -> Self {
        Self::Exact(s.into_bytes())
    }
}

impl From<&[u8]> for Expect {
    fn from(bytes: &[u8]) -> Self {
        Self::Exact(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Expect {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Exact(bytes)
    }
}

impl From<Option<&str>> for Expect {
    fn from(s: Option<&str>) -> Self {
        s.map_or(Self::Skip, Self::from)
    }
}

/// Expected exit status, standard input, and captured output of a run.
///
/// ```
/// use checkrt_exec::{ANY_OUTPUT, ProcSpec};
///
/// let spec = ProcSpec::builder()
///     .stdin("spaceless\nspace full\n")
///     .stdout("space full\n")
///     .stderr(ANY_OUTPUT)
///     .build();
/// assert_eq!(spec.status, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct ProcSpec {
    /// Expected exit code
    #[builder(default)]
    pub status: i32,
    /// Fed to the child's stdin; `None` leaves stdin empty
    #[builder(default, setter(strip_option, into))]
    pub stdin: Option<Vec<u8>>,
    /// Expected stdout
    #[builder(default, setter(into))]
    pub stdout: Expect,
    /// Expected stderr
    #[builder(default, setter(into))]
    pub stderr: Expect,
}

impl ProcSpec {
    /// Exit status 0, no input, and nothing at all on stdout or stderr.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            status: 0,
            stdin: Some(Vec::new()),
            stdout: Expect::Exact(Vec::new()),
            stderr: Expect::Exact(Vec::new()),
        }
    }

    /// Only the exit status matters.
    #[must_use]
    pub fn status(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}
