//! The error type shared by all Upspin crates.
//!
//! Every error carries a closed-set [`Kind`], the operation that produced it,
//! and where possible the path it concerns. `FollowLink` and `BrokenLink`
//! errors additionally carry the link's directory entry so resolvers can
//! continue the walk without a second lookup.

use std::fmt;

use crate::entry::DirEntry;
use crate::path::PathName;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of error categories.
///
/// Servers and clients agree on these; everything more specific travels in
/// the error's message or cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Kind {
    #[error("invalid operation")]
    Invalid,
    #[error("permission denied")]
    Permission,
    #[error("I/O error")]
    Io,
    #[error("item already exists")]
    Exist,
    #[error("item does not exist")]
    NotExist,
    #[error("item is a directory")]
    IsDir,
    #[error("item is not a directory")]
    NotDir,
    #[error("directory not empty")]
    NotEmpty,
    #[error("information withheld")]
    Private,
    #[error("internal error")]
    Internal,
    #[error("cannot decrypt data")]
    CannotDecrypt,
    #[error("transient error")]
    Transient,
    #[error("link target does not exist")]
    BrokenLink,
    #[error("path traverses a link")]
    FollowLink,
    #[error("too many links in path")]
    LinkLoop,
    #[error("information expired")]
    Expired,
}

/// An error with Upspin context attached.
///
/// Built with the `Error::new(kind)` constructor and the chained setters,
/// mirroring how call sites accumulate context as an operation unwinds.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    op: Option<String>,
    path: Option<PathName>,
    msg: Option<String>,
    entry: Option<Box<DirEntry>>,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            op: None,
            path: None,
            msg: None,
            entry: None,
            cause: None,
        }
    }

    /// Shorthand for an `Invalid` error with a message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(Kind::Invalid).msg(msg)
    }

    /// A `FollowLink` error carrying the link entry encountered mid-path.
    pub fn follow_link(entry: DirEntry) -> Self {
        let path = entry.name.clone();
        Self::new(Kind::FollowLink).path(path).entry(entry)
    }

    pub fn op(mut self, op: impl Into<String>) -> Self {
        if self.op.is_none() {
            self.op = Some(op.into());
        }
        self
    }

    pub fn path(mut self, path: impl Into<PathName>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    pub fn msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn entry(mut self, entry: DirEntry) -> Self {
        self.entry = Some(Box::new(entry));
        self
    }

    pub fn cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is(&self, kind: Kind) -> bool {
        self.kind == kind
    }

    /// The directory entry attached to a `FollowLink`/`BrokenLink` error.
    pub fn link_entry(&self) -> Option<&DirEntry> {
        self.entry.as_deref()
    }

    /// Consumes the error, yielding the attached entry if any.
    pub fn into_link_entry(self) -> Option<DirEntry> {
        self.entry.map(|e| *e)
    }

    pub fn path_name(&self) -> Option<&PathName> {
        self.path.as_ref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if let Some(op) = &self.op {
            write!(f, "{op}")?;
            sep = ": ";
        }
        if let Some(path) = &self.path {
            write!(f, "{sep}{path}")?;
            sep = ": ";
        }
        write!(f, "{sep}{}", self.kind)?;
        if let Some(msg) = &self.msg {
            write!(f, ": {msg}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => Kind::NotExist,
            std::io::ErrorKind::AlreadyExists => Kind::Exist,
            std::io::ErrorKind::PermissionDenied => Kind::Permission,
            _ => Kind::Io,
        };
        Error::new(kind).cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_accumulates_context() {
        let err = Error::new(Kind::NotExist)
            .op("Lookup")
            .path("ann@example.com/foo");
        assert_eq!(
            err.to_string(),
            "Lookup: ann@example.com/foo: item does not exist"
        );
    }

    #[test]
    fn first_op_and_path_win() {
        let err = Error::new(Kind::Io).op("inner").op("outer").path("a@b.com/x");
        assert!(err.to_string().starts_with("inner: "));
    }

    #[test]
    fn io_error_kind_mapping() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(err.is(Kind::NotExist));
    }
}
