//! Typed link errors.
//!
//! Most errors in this crate travel as `anyhow::Error` with context attached,
//! the same way the rest of the code propagates failures. The conditions a
//! caller may want to tell apart (bad magic, unsupported input kind, merge
//! conflicts, ...) are modelled here as a concrete enum so they survive the
//! trip through `anyhow` and can be recovered with `downcast_ref`.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum LinkError {
    /// The input is a kind of file we refuse to link (native relocatable or
    /// executable object, or a bitcode executable used as an input).
    UnsupportedInput { path: PathBuf, detail: String },
    /// A unit's target triple is not in the portable architecture family.
    ArchitectureMismatch { path: PathBuf, triple: String },
    /// The external merge service rejected a combination of units.
    MergeConflict { ident: String, message: String },
    /// A native shared object or native archive was seen without
    /// `--link-native-binary`.
    NativeBinaryDisallowed { path: PathBuf },
    /// The file does not start with the archive magic.
    NotAnArchive { path: PathBuf },
    /// The stream does not start with the bitcode wrapper magic.
    NotAWrapper,
    /// I/O ended before the length declared by a header.
    TruncatedHeader,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnsupportedInput { path, detail } => {
                write!(f, "cannot link '{}': {}", path.display(), detail)
            }
            LinkError::ArchitectureMismatch { path, triple } => {
                write!(f, "cannot link '{}', triple: {}", path.display(), triple)
            }
            LinkError::MergeConflict { ident, message } => {
                write!(f, "cannot link in module '{ident}': {message}")
            }
            LinkError::NativeBinaryDisallowed { path } => {
                write!(
                    f,
                    "cannot link native binaries with bitcode: {}",
                    path.display()
                )
            }
            LinkError::NotAnArchive { path } => {
                write!(f, "'{}' is not an archive", path.display())
            }
            LinkError::NotAWrapper => write!(f, "input is not a bitcode wrapper"),
            LinkError::TruncatedHeader => write!(f, "could not read bitcode header"),
        }
    }
}

impl std::error::Error for LinkError {}
