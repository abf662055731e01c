//! Anonymous temp files standing in for a child's stdio.
//!
//! Each file is unlinked as soon as it exists, so nothing is left on disk
//! whichever way a run ends; closing the handle is all the cleanup there is.

use std::{
    fs::File,
    io::{Read, Seek, Write},
    os::fd::{AsFd, AsRawFd, RawFd},
};

use checkrt_core::{Error, os::dup_above};

/// Number of channels handed to a child.
pub const CHANNEL_COUNT: usize = 4;

/// The descriptor the diagnostic channel lands on in the child.
pub const DIAGNOSTIC_FD: RawFd = 3;

/// One of the four child-side descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// fd 0
    Stdin,
    /// fd 1
    Stdout,
    /// fd 2
    Stderr,
    /// fd 3: why an exec failed
    Diagnostic,
}

impl Channel {
    /// The descriptor this channel becomes in the child.
    #[must_use]
    pub fn child_fd(self) -> RawFd {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
            Self::Diagnostic => DIAGNOSTIC_FD,
        }
    }
}

/// Four seekable, growable backing stores, one per [`Channel`].
#[derive(Debug)]
pub struct TempChannels {
    stdin: File,
    stdout: File,
    stderr: File,
    diagnostic: File,
}

/// A fresh temp file whose descriptor sits above the child-side range, so
/// wiring one channel in the child never clobbers another.
fn open_channel() -> Result<File, Error> {
    let file = tempfile::tempfile()?;
    let moved = dup_above(file.as_fd(), CHANNEL_COUNT as RawFd)?;
    Ok(File::from(moved))
}

impl TempChannels {
    /// Creates all four channels, or none: whatever was created before a
    /// failure is closed again on the way out.
    pub fn create() -> Result<Self, Error> {
        Ok(Self {
            stdin: open_channel()?,
            stdout: open_channel()?,
            stderr: open_channel()?,
            diagnostic: open_channel()?,
        })
    }

    fn file(&self, channel: Channel) -> &File {
        match channel {
            Channel::Stdin => &self.stdin,
            Channel::Stdout => &self.stdout,
            Channel::Stderr => &self.stderr,
            Channel::Diagnostic => &self.diagnostic,
        }
    }

    /// Raw descriptors in child-fd order.
    #[must_use]
    pub fn raw_fds(&self) -> [RawFd; CHANNEL_COUNT] {
        [
            self.stdin.as_raw_fd(),
            self.stdout.as_raw_fd(),
            self.stderr.as_raw_fd(),
            self.diagnostic.as_raw_fd(),
        ]
    }

    /// Fills the stdin channel and rewinds it for the child.
    pub fn seed_stdin(&self, content: &[u8]) -> Result<(), Error> {
        let mut file = &self.stdin;
        file.write_all(content)?;
        file.rewind()?;
        Ok(())
    }

    /// Everything written to `channel`, from the start.
    pub fn read_back(&self, channel: Channel) -> Result<Vec<u8>, Error> {
        let mut file = self.file(channel);
        file.rewind()?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        Ok(content)
    }
}
