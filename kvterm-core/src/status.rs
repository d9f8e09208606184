use std::{
    fmt::{Display, Formatter},
    io, result,
};

use thiserror::Error;

/// A raw status code as returned by the native store.
///
/// Zero is success, negative values are store specific conditions and positive values
/// are system error numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    pub const SUCCESS: Self = Self(0);
    pub const KEYEMPTY: Self = Self(-30995);
    pub const KEYEXIST: Self = Self(-30994);
    pub const LOCK_DEADLOCK: Self = Self(-30993);
    pub const NOSERVER: Self = Self(-30989);
    pub const NOTFOUND: Self = Self(-30988);
    pub const OLD_VERSION: Self = Self(-30987);
    pub const RUNRECOVERY: Self = Self(-30973);

    pub const ENOENT: Self = Self(libc::ENOENT);
    pub const EIO: Self = Self(libc::EIO);
    pub const EACCES: Self = Self(libc::EACCES);
    pub const EINVAL: Self = Self(libc::EINVAL);

    #[inline]
    pub const fn from_raw(code: i32) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Maps an I/O error onto its system error number.
    #[inline]
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::ENOENT,
            io::ErrorKind::PermissionDenied => Self::EACCES,
            _ => err.raw_os_error().map(Self).unwrap_or(Self::EIO),
        }
    }

    /// A human readable description of the status.
    pub fn message(self) -> String {
        let text = match self {
            Self::SUCCESS => "Successful return: 0",
            Self::KEYEMPTY => "DB_KEYEMPTY: Non-existent key/data pair",
            Self::KEYEXIST => "DB_KEYEXIST: Key/data pair already exists",
            Self::LOCK_DEADLOCK => {
                "DB_LOCK_DEADLOCK: Locker killed to resolve a deadlock"
            }
            Self::NOSERVER => "DB_NOSERVER: No message dispatch call-back function has been configured",
            Self::NOTFOUND => "DB_NOTFOUND: No matching key/data pair found",
            Self::OLD_VERSION => "DB_OLDVERSION: Database requires a version upgrade",
            Self::RUNRECOVERY => "DB_RUNRECOVERY: Fatal error, run database recovery",
            Self(code) if code > 0 => return io::Error::from_raw_os_error(code).to_string(),
            Self(code) => return format!("Unknown error: {code}"),
        };
        text.to_string()
    }

    /// Classifies the status.
    ///
    /// Deadlock and run-recovery are told apart from the other negative codes, which all
    /// count as a normal failure of the operation.
    pub fn outcome(self) -> Outcome {
        match self {
            Self::SUCCESS => Outcome::Success,
            Self::LOCK_DEADLOCK => Outcome::Deadlock,
            Self::RUNRECOVERY => Outcome::RecoveryRequired,
            Self(code) if code < 0 => Outcome::NotFound,
            Self(code) => Outcome::Other(code, self.message()),
        }
    }
}

impl Display for Status {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.0)
    }
}

/// The classification of a [`Status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A normal negative result, never raised.
    NotFound,
    /// The operation lost a lock conflict and may be retried.
    Deadlock,
    /// The environment is damaged and must be recovered.
    RecoveryRequired,
    Other(i32, String),
}

/// The error source carried by every error that originated in the native store.
#[derive(Error, Debug)]
#[error("{0}")]
pub(crate) struct StoreError(pub(crate) Status);

pub(crate) type StoreResult<T> = result::Result<T, Status>;

/// Translation of raw store results for read paths.
pub(crate) trait Translate<T> {
    /// Turns the not-found family into `None` and everything else but success into an error.
    fn found(self) -> crate::Result<Option<T>>;
}

impl<T> Translate<T> for StoreResult<T> {
    #[inline]
    fn found(self) -> crate::Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(status) if status.outcome() == Outcome::NotFound => {
                tracing::trace!(status = status.raw(), "store reported a normal failure");
                Ok(None)
            }
            Err(status) => Err(status.into()),
        }
    }
}
