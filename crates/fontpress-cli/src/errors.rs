use core::fmt;
use std::{error, io, path::PathBuf};

/// Error that aborts a [`run()`](crate::run()).
///
/// Failures to read individual scanned files are not errors; they are logged
/// and counted in [`Collection::files_skipped`](crate::Collection::files_skipped).
#[derive(Debug)]
#[non_exhaustive]
pub enum RunError {
    /// Source directory or font file is missing or unreadable.
    Input {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Font could not be parsed, subset or written.
    Font(fontpress::Error),
}

impl fmt::Display for RunError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input { path, source } => {
                write!(formatter, "cannot read `{}`: {source}", path.display())
            }
            Self::Font(err) => fmt::Display::fmt(err, formatter),
        }
    }
}

impl error::Error for RunError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Input { source, .. } => Some(source),
            Self::Font(err) => Some(err),
        }
    }
}

impl From<fontpress::Error> for RunError {
    fn from(err: fontpress::Error) -> Self {
        Self::Font(err)
    }
}

impl RunError {
    pub(crate) fn input(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Input { path, source }
    }
}
