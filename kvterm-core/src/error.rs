use std::fmt::{Display, Formatter};

use crate::{
    codec, env, handle, options,
    status::{Outcome, Status, StoreError},
    txn,
};

/// A `Result` type that all API calls in kvterm will return.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible error cases that can be return by API calls in kvterm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The input has the wrong shape for the declared encoding.
    TypeError,
    /// The input is outside an enumerated set of options.
    DomainError,
    /// The handle has been closed.
    PermissionError,
    /// A buffer could not be allocated.
    ResourceError,
    /// The store resolved a lock conflict by failing this operation, it may be retried.
    Deadlock,
    /// The environment is damaged and has to be recovered.
    RecoveryRequired,
    /// Any other error reported by the store, see [`Error::status`].
    PackageError,
    /// A transaction was requested on an environment without transaction support.
    NotInitialized,
}

#[derive(Debug)]
pub struct Error {
    code: ErrorCode,
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl Display for ErrorCode {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::TypeError => "type error",
            Self::DomainError => "domain error",
            Self::PermissionError => "permission error",
            Self::ResourceError => "resource error",
            Self::Deadlock => "deadlock",
            Self::RecoveryRequired => "run recovery",
            Self::PackageError => "store error",
            Self::NotInitialized => "not initialized",
        })
    }
}

impl Error {
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The raw store status, if the error was reported by the store.
    #[inline]
    pub fn status(&self) -> Option<Status> {
        self.source.downcast_ref::<StoreError>().map(|e| e.0)
    }

    /// Whether the failed operation may succeed when retried.
    #[inline]
    pub fn is_deadlock(&self) -> bool {
        matches!(self.code, ErrorCode::Deadlock)
    }
}

impl Display for Error {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.source)
    }
}

impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<Status> for Error {
    fn from(value: Status) -> Self {
        let code = match value.outcome() {
            Outcome::Deadlock => {
                tracing::warn!(status = value.raw(), "throwing deadlock exception");
                ErrorCode::Deadlock
            }
            Outcome::RecoveryRequired => {
                tracing::error!(status = value.raw(), "store needs recovery");
                ErrorCode::RecoveryRequired
            }
            _ => {
                tracing::debug!(status = value.raw(), "throwing store error");
                ErrorCode::PackageError
            }
        };
        Self {
            code,
            source: Box::new(StoreError(value)),
        }
    }
}

impl From<codec::Error> for Error {
    #[inline]
    fn from(value: codec::Error) -> Self {
        let code = match value {
            codec::Error::Allocation(_) => ErrorCode::ResourceError,
            _ => ErrorCode::TypeError,
        };
        Self {
            code,
            source: Box::new(value),
        }
    }
}

impl From<options::UnknownOption> for Error {
    #[inline]
    fn from(value: options::UnknownOption) -> Self {
        Self {
            code: ErrorCode::DomainError,
            source: Box::new(value),
        }
    }
}

impl From<options::WrongType> for Error {
    #[inline]
    fn from(value: options::WrongType) -> Self {
        Self {
            code: ErrorCode::TypeError,
            source: Box::new(value),
        }
    }
}

impl From<handle::Closed> for Error {
    #[inline]
    fn from(value: handle::Closed) -> Self {
        Self {
            code: ErrorCode::PermissionError,
            source: Box::new(value),
        }
    }
}

impl From<txn::NotInitialized> for Error {
    #[inline]
    fn from(value: txn::NotInitialized) -> Self {
        Self {
            code: ErrorCode::NotInitialized,
            source: Box::new(value),
        }
    }
}

impl From<env::AlreadyInitialized> for Error {
    #[inline]
    fn from(value: env::AlreadyInitialized) -> Self {
        Self {
            code: ErrorCode::PackageError,
            source: Box::new(value),
        }
    }
}
