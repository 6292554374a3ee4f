//! Error taxonomy shared by the storage engine, the naming client, and the
//! peering client. Kinds, not type names: callers match on the kind, not on
//! which subsystem raised it.

use std::fmt;

pub type CResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Requested key/keygroup/item does not exist. Terminal, caller-visible.
    NotFound(String),

    /// An identifier violates the `|`-separator encoding rule, or is empty
    /// where non-empty is required.
    BadKey(String),

    /// Creating something that already exists, in a context where that is
    /// an error (strict-mode keygroup creation).
    AlreadyExists(String),

    /// The coordination store or a peer was unreachable or timed out.
    /// Retryable at the caller's discretion.
    Unavailable(String),

    /// Permission lookup came back empty; the decision is the caller's.
    PermissionDenied(String),

    /// Anything else: storage or transport failure outside the classes
    /// above. Carries a diagnostic context string.
    Internal(String),
}

impl Error {
    pub fn internal(context: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Error::Internal(format!("{}: {}", context, cause))
    }

    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        Error::NotFound(format!("{} not found: {}", kind, id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::BadKey(msg) => write!(f, "bad key: {}", msg),
            Error::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            Error::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            Error::PermissionDenied(msg) => write!(f, "permission denied: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(err.to_string())
        } else {
            Error::Internal(err.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(format!("encoding failure: {}", err))
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::NotFound => Error::NotFound(status.message().to_string()),
            Code::AlreadyExists => Error::AlreadyExists(status.message().to_string()),
            Code::Unavailable | Code::DeadlineExceeded => {
                Error::Unavailable(status.message().to_string())
            }
            Code::PermissionDenied => Error::PermissionDenied(status.message().to_string()),
            _ => Error::Internal(format!("rpc failed ({:?}): {}", status.code(), status.message())),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Unavailable(err.to_string())
    }
}
