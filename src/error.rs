use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use nix::errno::Errno;


pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Binary = {binary:?} is not instrumented (no `{}` symbol)", crate::symbols::MARKER)]
    NotInstrumented { binary: PathBuf },

    #[error("Could not run symbol tool = {program:?}")]
    SymbolToolSpawn { program: String, source: io::Error },

    #[error("Symbol tool = {program:?} failed with {status}")]
    SymbolToolFailed { program: String, status: ExitStatus },

    #[error("Symbol tool produced no symbols for binary = {binary:?}")]
    NoSymbols { binary: PathBuf },

    #[error("Trace channel operation interrupted")]
    Interrupted,

    #[error("Trace channel = {name} failed")]
    Channel { name: String, source: nix::Error },

    #[error("Could not spawn traced program = {program:?}")]
    Spawn { program: String, source: io::Error },

    #[error("Malformed trace message = {message:?}")]
    Protocol { message: String },

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),
}

impl Error {
    /// True if the failed operation can simply be retried.
    ///
    /// Blocking channel calls return this when a signal arrives mid-call.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::Channel { source, .. } => *source == Errno::EINTR,
            Error::OS(errno) => *errno == Errno::EINTR,
            _ => false,
        }
    }
}

pub(crate) trait ResultExt<T> {
    fn channel(self, name: &str) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, nix::Error> {
    fn channel(self, name: &str) -> Result<T> {
        self.map_err(|source| match source {
            Errno::EINTR => Error::Interrupted,
            source => Error::Channel { name: name.to_owned(), source },
        })
    }
}
