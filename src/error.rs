use thiserror::Error;

/// A POSIX-style filesystem error, as returned by every [`crate::inode_fs::InodeFs`]
/// operation. `code` mirrors the errno name a real syscall would set
/// (`ENOENT`, `EEXIST`, ...), `syscall` names the operation that raised it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{syscall} {path}: {message} ({code})")]
pub struct FsError {
    pub code: &'static str,
    pub syscall: &'static str,
    pub path: String,
    pub message: String,
}

impl FsError {
    pub fn new(code: &'static str, syscall: &'static str, path: impl Into<String>) -> Self {
        let path = path.into();
        let message = describe(code, &path);
        Self {
            code,
            syscall,
            path,
            message,
        }
    }
}

fn describe(code: &str, path: &str) -> String {
    match code {
        "ENOENT" => format!("no such file or directory: {path}"),
        "EEXIST" => format!("file exists: {path}"),
        "ENOTDIR" => format!("not a directory: {path}"),
        "EISDIR" => format!("is a directory: {path}"),
        "ENOTEMPTY" => format!("directory not empty: {path}"),
        "EINVAL" => format!("invalid argument: {path}"),
        "EPERM" => format!("operation not permitted: {path}"),
        "ENOSYS" => format!("function not implemented: {path}"),
        _ => format!("{code}: {path}"),
    }
}

/// Errors raised by the [`crate::policy::AccessPolicy`] / [`crate::protected_fs::ProtectedFs`]
/// layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("permission denied: {operation} {path}: {reason}")]
    PermissionDenied {
        code: &'static str,
        operation: String,
        path: String,
        reason: String,
    },
}

impl PolicyError {
    pub fn denied(operation: impl Into<String>, path: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::PermissionDenied {
            code: "EACCES",
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Aggregate error type for the crate, covering storage failures alongside
/// the two domain-specific taxonomies above.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("internal storage error: {0}")]
    Storage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Error::Storage(value.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::Storage(value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::InvalidInput {
            Error::InvalidRequest(value.to_string())
        } else {
            Error::Storage(value.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
