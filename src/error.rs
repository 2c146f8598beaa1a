use thiserror::Error;

/// Recoverable failures reported to callers. Structural damage (magic
/// mismatch, bitmap/pointer divergence, gaps in a pointer chain) is not
/// represented here; those panic instead of limping on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("region already holds a file system")]
    AlreadyInitialized,
    #[error("region base is not page-aligned")]
    MisalignedBase,
    #[error("invalid initialization mode")]
    InvalidMode,
    #[error("backing memory provider failed")]
    EnvironmentFailure,
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("search permission denied")]
    NoExecPermission,
    #[error("file name too long")]
    NameTooLong,
    #[error("out of inodes")]
    OutOfInodes,
    #[error("out of open-file records or descriptors")]
    OutOfFiles,
    #[error("cannot grow the backing region")]
    CannotGrow,
    #[error("permission denied")]
    AccessDenied,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("end of directory")]
    EndOfDirectory,
    #[error("too many links")]
    TooManyLinks,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("file too large")]
    FileTooBig,
    #[error("offset not representable")]
    Overflow,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("not an absolute path")]
    NotAbsolutePath,
    #[error("destination buffer too small")]
    RangeError,
    #[error("too many processes attached")]
    TooManyProcesses,
}

pub type Result<T> = core::result::Result<T, FsError>;
