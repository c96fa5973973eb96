use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// CinderDB errors.
///
/// Variants are cloneable so a poisoned sink can replay its stored error on
/// every subsequent operation; I/O causes are flattened to strings at
/// construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A filesystem fault during an append, fsync, truncate, or rename.
    /// Fatal to the writer that raised it.
    Write { path: PathBuf, cause: String },
    /// A filesystem fault on the read side (reader handles, reopen).
    Read { path: PathBuf, cause: String },
    /// Invalid data, typically decoding errors or corruption.
    InvalidData(String),
    /// A lifecycle violation: an operation invoked from a state that does
    /// not permit it (commit after abort, append after prepare, unsorted
    /// keys).
    InvalidState(String),
    /// An IO error not attributable to a specific component file.
    IO(String),
    /// Several errors accumulated across the commit or abort pipeline.
    Multiple(Vec<Error>),
}

impl Error {
    pub fn write(path: impl AsRef<Path>, err: io::Error) -> Self {
        Error::Write {
            path: path.as_ref().to_path_buf(),
            cause: err.to_string(),
        }
    }

    pub fn read(path: impl AsRef<Path>, err: io::Error) -> Self {
        Error::Read {
            path: path.as_ref().to_path_buf(),
            cause: err.to_string(),
        }
    }

    /// Folds a step result into an accumulated error, chaining failures into
    /// `Error::Multiple`. Every pipeline step runs regardless of earlier
    /// failures; the caller returns the final accumulated value.
    pub fn accumulate(acc: Option<Error>, result: Result<()>) -> Option<Error> {
        match (acc, result) {
            (acc, Ok(())) => acc,
            (None, Err(e)) => Some(e),
            (Some(Error::Multiple(mut errors)), Err(e)) => {
                errors.push(e);
                Some(Error::Multiple(errors))
            }
            (Some(prev), Err(e)) => Some(Error::Multiple(vec![prev, e])),
        }
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Write { path, cause } => {
                write!(f, "write error on {}: {cause}", path.display())
            }
            Error::Read { path, cause } => {
                write!(f, "read error on {}: {cause}", path.display())
            }
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::Multiple(errors) => {
                write!(f, "multiple errors:")?;
                for e in errors {
                    write!(f, " [{e}]")?;
                }
                Ok(())
            }
        }
    }
}

/// A CinderDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::InvalidData(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
