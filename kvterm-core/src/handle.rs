use std::{
    cmp::Ordering,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::{Arc, RwLock},
};

use thiserror::Error;

use crate::{codec::Encoding, env::Environment, error::Result, native::NativeDb};

#[derive(Error, Debug)]
#[error("the database handle is closed")]
pub(crate) struct Closed;

/// A handle to an open database.
///
/// Cloning a handle acquires another reference to the same database, dropping the last
/// reference closes it if it was not closed explicitly. Handles compare, order and hash
/// by identity.
#[derive(Clone)]
pub struct Db(pub(crate) Arc<DbHandle>);

pub(crate) struct DbHandle {
    native: RwLock<Option<Arc<NativeDb>>>,
    pub(crate) env: Environment,
    pub(crate) key: Encoding,
    pub(crate) value: Encoding,
    pub(crate) duplicates: bool,
}

impl Db {
    pub(crate) fn new(env: Environment, native: NativeDb, key: Encoding, value: Encoding) -> Self {
        let duplicates = native.duplicates();
        Self(Arc::new(DbHandle {
            native: RwLock::new(Some(Arc::new(native))),
            env,
            key,
            value,
            duplicates,
        }))
    }

    /// The native database, as long as the handle is open.
    #[inline]
    pub(crate) fn native(&self) -> Result<Arc<NativeDb>> {
        self.0
            .native
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Closed.into())
    }

    /// Invalidates the handle, returning the database it referred to.
    #[inline]
    pub(crate) fn invalidate(&self) -> Result<Arc<NativeDb>> {
        self.0.native.write().unwrap().take().ok_or_else(|| Closed.into())
    }

    /// Check if the handle refers to an open database.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.0.native.read().unwrap().is_some()
    }

    #[inline]
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Db {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Db {}

impl PartialOrd for Db {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Db {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl Hash for Db {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl Display for Db {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<db>({:#x})", self.addr())
    }
}

impl Debug for Db {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("open", &self.is_open())
            .field("key", &self.0.key)
            .field("value", &self.0.value)
            .field("duplicates", &self.0.duplicates)
            .finish()
    }
}

impl Drop for DbHandle {
    fn drop(&mut self) {
        let native = self.native.get_mut().unwrap().take();
        if let Some(native) = native {
            if let Err(status) = native.close() {
                tracing::error!(%status, "failed to close database on release");
            }
        }
    }
}
