#![warn(missing_docs)]

//! Shared error taxonomy for the QuayFS semantics layer.
//!
//! Every fallible operation in the lock manager, the filesystem layer,
//! and the gateway adapter returns [`FsError`]. The kind is a closed set
//! so protocol front-ends can map failures onto errno or HTTP status
//! without matching on message text; the message and optional source
//! exist for diagnostics only.

use std::error::Error as StdError;
use std::fmt;

/// Result alias used by every QuayFS layer.
pub type Result<T> = std::result::Result<T, FsError>;

/// The closed set of error kinds surfaced by QuayFS operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The named entity does not exist.
    NotFound,
    /// The caller lacks the unix permission bits for the operation.
    PermissionDenied,
    /// The caller lacks ownership for a chown-class operation.
    NotPermitted,
    /// The named entity already exists.
    Exists,
    /// The operation does not apply to a directory.
    IsDir,
    /// A directory was required but something else was found.
    NotDir,
    /// A regular file was required but something else was found.
    NotFile,
    /// The directory is not empty.
    NotEmpty,
    /// Hard links to directories are not allowed.
    LinkDir,
    /// A basename or path exceeds the permitted length.
    NameTooLong,
    /// A mode value does not fit in 32 bits.
    InvalidFileMode,
    /// A user id value does not fit in 32 bits.
    InvalidUserId,
    /// A group id value does not fit in 32 bits.
    InvalidGroupId,
    /// A request argument is malformed.
    InvalidArgument,
    /// Optimistic-concurrency mismatch or non-blocking lock contention.
    TryAgain,
    /// A byte-range unlock matched no held lock.
    NoData,
    /// The named stream does not exist on the inode.
    StreamNotFound,
    /// Symlink following exceeded the traversal budget.
    TooManySymlinks,
    /// The operation is not supported by this layer.
    NotSupported,
    /// An I/O failure in the inode collaborator.
    Io,
    /// The operation referenced a volume that is not mounted.
    BadMountVolume,
}

impl ErrorKind {
    /// Returns the canonical name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotPermitted => "operation not permitted",
            ErrorKind::Exists => "already exists",
            ErrorKind::IsDir => "is a directory",
            ErrorKind::NotDir => "not a directory",
            ErrorKind::NotFile => "not a file",
            ErrorKind::NotEmpty => "directory not empty",
            ErrorKind::LinkDir => "hard link to directory",
            ErrorKind::NameTooLong => "name too long",
            ErrorKind::InvalidFileMode => "invalid file mode",
            ErrorKind::InvalidUserId => "invalid user id",
            ErrorKind::InvalidGroupId => "invalid group id",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::TryAgain => "try again",
            ErrorKind::NoData => "no data",
            ErrorKind::StreamNotFound => "stream not found",
            ErrorKind::TooManySymlinks => "too many symlinks",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::Io => "i/o error",
            ErrorKind::BadMountVolume => "bad mount volume",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a kind from the closed set, a human-readable message,
/// and an optional wrapped cause.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FsError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl FsError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches a wrapped cause for diagnostics.
    pub fn with_source(
        mut self,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this error is of the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Shorthand for [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for [`ErrorKind::PermissionDenied`].
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    /// Shorthand for [`ErrorKind::NotPermitted`].
    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotPermitted, message)
    }

    /// Shorthand for [`ErrorKind::Exists`].
    pub fn exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exists, message)
    }

    /// Shorthand for [`ErrorKind::IsDir`].
    pub fn is_dir(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IsDir, message)
    }

    /// Shorthand for [`ErrorKind::NotDir`].
    pub fn not_dir(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotDir, message)
    }

    /// Shorthand for [`ErrorKind::NotFile`].
    pub fn not_file(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFile, message)
    }

    /// Shorthand for [`ErrorKind::NotEmpty`].
    pub fn not_empty(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotEmpty, message)
    }

    /// Shorthand for [`ErrorKind::LinkDir`].
    pub fn link_dir(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LinkDir, message)
    }

    /// Shorthand for [`ErrorKind::NameTooLong`].
    pub fn name_too_long(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameTooLong, message)
    }

    /// Shorthand for [`ErrorKind::InvalidFileMode`].
    pub fn invalid_file_mode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFileMode, message)
    }

    /// Shorthand for [`ErrorKind::InvalidUserId`].
    pub fn invalid_user_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidUserId, message)
    }

    /// Shorthand for [`ErrorKind::InvalidGroupId`].
    pub fn invalid_group_id(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidGroupId, message)
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Shorthand for [`ErrorKind::TryAgain`].
    pub fn try_again(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TryAgain, message)
    }

    /// Shorthand for [`ErrorKind::NoData`].
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoData, message)
    }

    /// Shorthand for [`ErrorKind::StreamNotFound`].
    pub fn stream_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamNotFound, message)
    }

    /// Shorthand for [`ErrorKind::TooManySymlinks`].
    pub fn too_many_symlinks(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TooManySymlinks, message)
    }

    /// Shorthand for [`ErrorKind::NotSupported`].
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, message)
    }

    /// Shorthand for [`ErrorKind::Io`].
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// Shorthand for [`ErrorKind::BadMountVolume`].
    pub fn bad_mount_volume(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadMountVolume, message)
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        FsError::new(ErrorKind::Io, err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = FsError::not_found("no such inode 42");
        assert_eq!(format!("{}", err), "not found: no such inode 42");
    }

    #[test]
    fn test_kind_accessor() {
        let err = FsError::try_again("lock is busy");
        assert_eq!(err.kind(), ErrorKind::TryAgain);
        assert!(err.is(ErrorKind::TryAgain));
        assert!(!err.is(ErrorKind::NotFound));
    }

    #[test]
    fn test_source_chain() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = FsError::io("read failed").with_source(cause);
        let source = err.source().expect("source should be present");
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: FsError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_kind_names_unique() {
        use std::collections::HashSet;
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::NotPermitted,
            ErrorKind::Exists,
            ErrorKind::IsDir,
            ErrorKind::NotDir,
            ErrorKind::NotFile,
            ErrorKind::NotEmpty,
            ErrorKind::LinkDir,
            ErrorKind::NameTooLong,
            ErrorKind::InvalidFileMode,
            ErrorKind::InvalidUserId,
            ErrorKind::InvalidGroupId,
            ErrorKind::InvalidArgument,
            ErrorKind::TryAgain,
            ErrorKind::NoData,
            ErrorKind::StreamNotFound,
            ErrorKind::TooManySymlinks,
            ErrorKind::NotSupported,
            ErrorKind::Io,
            ErrorKind::BadMountVolume,
        ];
        let names: HashSet<&str> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), kinds.len());
    }
}
