use std::path::Path;

use crate::{
    codec::Encoding,
    cursor::{Enumerate, Lookup},
    env::{self, Environment},
    error::Result,
    handle::Db,
    native::{NativeDb, Stat},
    options::{DbOptions, Mode},
    signal::nosig,
    status::Translate,
    term::Term,
    txn,
};

impl DbOptions {
    /// Open a database with the current options.
    #[inline]
    pub fn open(&self, path: impl AsRef<Path>, mode: Mode) -> Result<Db> {
        Db::open(path, mode, self)
    }
}

impl Db {
    /// Open the database at the given file path.
    ///
    /// The database is opened in the default environment if [`init`](crate::init) was
    /// called, in a private environment of its own otherwise.
    #[inline]
    pub fn open(path: impl AsRef<Path>, mode: Mode, options: &DbOptions) -> Result<Self> {
        let env = env::default_env().unwrap_or_else(Environment::private);
        Self::open_in(&env, path, mode, options)
    }

    /// Open the database at the given file path in an environment.
    pub fn open_in(
        env: &Environment,
        path: impl AsRef<Path>,
        mode: Mode,
        options: &DbOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let native = nosig(|| {
            NativeDb::open(
                &env.0,
                path,
                options.database.as_deref(),
                mode,
                options.access_method,
                options.duplicates,
            )
        })?;

        let db = Self::new(env.clone(), native, options.key, options.value);
        tracing::debug!(db = %db, path = %path.display(), ?mode, "opened database handle");
        Ok(db)
    }

    /// Close the database. Every later operation on the handle fails with
    /// [`ErrorCode::PermissionError`](crate::ErrorCode::PermissionError).
    pub fn close(&self) -> Result<()> {
        let native = self.invalidate()?;
        tracing::debug!(db = %self, "closing database handle");
        nosig(|| native.close()).map_err(Into::into)
    }

    /// Store a value under the key. Without duplicates, a value stored before is replaced.
    pub fn put(&self, key: &Term, value: &Term) -> Result<()> {
        let native = self.native()?;
        let key = self.0.key.encode(key)?;
        let value = self.0.value.encode(value)?;
        let txn = txn::current_for(&self.0.env)?;
        nosig(|| native.put(txn.as_deref(), key.as_bytes(), value.as_bytes())).map_err(Into::into)
    }

    /// Delete the key with every value stored under it.
    ///
    /// Returns false if the key did not exist.
    pub fn delete(&self, key: &Term) -> Result<bool> {
        let native = self.native()?;
        let key = self.0.key.encode(key)?;
        let txn = txn::current_for(&self.0.env)?;
        let deleted = nosig(|| native.del(txn.as_deref(), key.as_bytes())).found()?;
        Ok(deleted.is_some())
    }

    /// Delete the values under the key that match `value`, one at a time.
    ///
    /// Each matching value is deleted as the returned iterator yields it, dropping the
    /// iterator early leaves the remaining ones in place.
    #[inline]
    pub fn delete_value(&self, key: &Term, value: &Term) -> Result<Lookup> {
        let key = self.0.key.encode(key)?;
        Lookup::new(self, key, Some(value.clone()))
    }

    /// Every value stored under the key, in stored order. Empty if the key does not exist.
    #[inline]
    pub fn get_all(&self, key: &Term) -> Result<Vec<Term>> {
        self.get(key)?.collect()
    }

    /// The values stored under the key, yielded lazily.
    #[inline]
    pub fn get(&self, key: &Term) -> Result<Lookup> {
        let key = self.0.key.encode(key)?;
        Lookup::new(self, key, None)
    }

    /// Every key/value pair of the database, yielded lazily.
    #[inline]
    pub fn enumerate(&self) -> Result<Enumerate> {
        Enumerate::new(self)
    }

    /// Write the database to its file.
    #[inline]
    pub fn sync(&self) -> Result<()> {
        let native = self.native()?;
        nosig(|| native.sync()).map_err(Into::into)
    }

    /// Statistics of the database, as seen by the current transaction.
    pub fn stat(&self) -> Result<Stat> {
        let native = self.native()?;
        let txn = txn::current_for(&self.0.env)?;
        nosig(|| native.stat(txn.as_deref())).map_err(Into::into)
    }

    #[inline]
    pub fn key_encoding(&self) -> Encoding {
        self.0.key
    }

    #[inline]
    pub fn value_encoding(&self) -> Encoding {
        self.0.value
    }

    /// Whether several values can be stored under one key.
    #[inline]
    pub fn duplicates(&self) -> bool {
        self.0.duplicates
    }

    /// The environment the database was opened in.
    #[inline]
    pub fn environment(&self) -> &Environment {
        &self.0.env
    }
}
