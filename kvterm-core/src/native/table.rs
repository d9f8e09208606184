use std::{
    path::{Path, PathBuf},
    rc::Rc,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    native::{
        external_key,
        file::{self, TableImage},
        internal_key,
        lock::LockGuard,
        NativeCursor, NativeEnv, NativeTxn, Records,
    },
    options::{AccessMethod, Mode},
    status::{Status, StoreResult},
};

/// Serializes every read-modify-write of database files in the process.
static FILES: Mutex<()> = Mutex::new(());

/// The shared state of one database, whichever handles it is opened through.
pub(crate) struct Table {
    pub(crate) id: u64,
    path: PathBuf,
    name: Option<String>,
    pub(crate) method: AccessMethod,
    pub(crate) duplicates: bool,
    committed: Mutex<Records>,
    unsaved: AtomicBool,
    pub(crate) cursors: AtomicUsize,
}

impl Table {
    #[inline]
    pub(crate) fn view<R>(&self, f: impl FnOnce(&Records) -> R) -> R {
        f(&self.committed.lock().unwrap())
    }

    #[inline]
    pub(crate) fn snapshot(&self) -> Records {
        self.committed.lock().unwrap().clone()
    }

    /// Applies a write directly to the committed records.
    pub(crate) fn update<R>(
        &self,
        f: impl FnOnce(&mut Records) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let result = f(&mut self.committed.lock().unwrap())?;
        self.unsaved.store(true, Ordering::Release);
        Ok(result)
    }

    /// Replaces the committed records with the ones of a committed transaction.
    #[inline]
    pub(crate) fn publish(&self, records: Records) {
        *self.committed.lock().unwrap() = records;
        self.unsaved.store(true, Ordering::Release);
    }

    /// Writes the committed records into the database file.
    pub(crate) fn flush(&self) -> StoreResult<()> {
        let _files = FILES.lock().unwrap();
        if !self.unsaved.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = file::load(&self.path).and_then(|image| {
            let mut image = image.unwrap_or_default();
            image.databases.insert(
                self.name.clone(),
                TableImage {
                    method: self.method,
                    duplicates: self.duplicates,
                    records: self.snapshot(),
                },
            );
            file::store(&self.path, &image)
        });
        if result.is_err() {
            self.unsaved.store(true, Ordering::Release);
        }
        tracing::trace!(path = %self.path.display(), database = ?self.name, ok = result.is_ok(), "flushed table");
        result
    }

    /// An unknown access method adopts the stored settings.
    fn compatible(&self, method: AccessMethod, duplicates: bool) -> bool {
        method == AccessMethod::Unknown || (method == self.method && duplicates == self.duplicates)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(status) = self.flush() {
            tracing::error!(path = %self.path.display(), %status, "failed to flush table on drop");
        }
    }
}

/// Statistics of an open database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Number of distinct keys.
    pub keys: usize,
    /// Number of key/value pairs, counting every duplicate.
    pub records: usize,
    /// Number of cursors currently open on the database.
    pub cursors: usize,
}

/// An open database.
pub(crate) struct NativeDb {
    pub(crate) env: Arc<NativeEnv>,
    pub(crate) table: Arc<Table>,
    read_only: bool,
    closed: AtomicBool,
}

impl NativeDb {
    /// Opens the database `name` within the file at `path`, the unnamed one for `None`.
    pub(crate) fn open(
        env: &Arc<NativeEnv>,
        path: &Path,
        name: Option<&str>,
        mode: Mode,
        method: AccessMethod,
        duplicates: bool,
    ) -> StoreResult<Self> {
        env.check()?;
        if method == AccessMethod::Recno && duplicates {
            tracing::error!("record number databases do not support duplicates");
            return Err(Status::EINVAL);
        }

        let path = env.resolve(path);
        let key = (path.clone(), name.map(str::to_string));
        let mut tables = env.tables.lock().unwrap();

        let table = match tables.get(&key).and_then(|table| table.upgrade()) {
            Some(table) => table,
            None => {
                let table = Arc::new(Self::load(env, &path, name, mode, method, duplicates)?);
                tables.insert(key, Arc::downgrade(&table));
                table
            }
        };
        drop(tables);

        if !table.compatible(method, duplicates) {
            tracing::error!(
                path = %path.display(),
                stored = %table.method,
                requested = %method,
                "database opened with incompatible settings"
            );
            return Err(Status::EINVAL);
        }

        tracing::debug!(path = %path.display(), database = ?name, method = %table.method, "opened database");
        Ok(Self {
            env: env.clone(),
            table,
            read_only: mode == Mode::Read,
            closed: AtomicBool::new(false),
        })
    }

    fn load(
        env: &NativeEnv,
        path: &Path,
        name: Option<&str>,
        mode: Mode,
        method: AccessMethod,
        duplicates: bool,
    ) -> StoreResult<Table> {
        let stored = {
            let _files = FILES.lock().unwrap();
            file::load(path)?
        };
        let stored = stored.and_then(|mut image| image.databases.remove(&name.map(str::to_string)));

        let (method, duplicates, records, unsaved) = match stored {
            Some(image) => (image.method, image.duplicates, image.records, false),
            None if mode == Mode::Read => return Err(Status::ENOENT),
            None if method == AccessMethod::Unknown => return Err(Status::EINVAL),
            None => (method, duplicates, Records::new(), true),
        };

        let table = Table {
            id: env.next_table_id(),
            path: path.to_path_buf(),
            name: name.map(str::to_string),
            method,
            duplicates,
            committed: Mutex::new(records),
            unsaved: AtomicBool::new(unsaved),
            cursors: AtomicUsize::new(0),
        };
        // A created database exists on disk from now on.
        table.flush()?;
        Ok(table)
    }

    #[inline]
    pub(crate) fn check(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Status::EINVAL);
        }
        self.env.check()
    }

    #[inline]
    pub(crate) fn method(&self) -> AccessMethod {
        self.table.method
    }

    #[inline]
    pub(crate) fn duplicates(&self) -> bool {
        self.table.duplicates
    }

    /// Runs `f` over the records as seen by the transaction.
    pub(crate) fn view<R>(
        &self,
        txn: Option<&NativeTxn>,
        f: impl FnOnce(&Records) -> R,
    ) -> StoreResult<R> {
        self.check()?;
        match txn {
            Some(txn) => {
                self.check_txn(txn)?;
                Ok(txn.view(&self.table, f))
            }
            None => Ok(self.table.view(f)),
        }
    }

    /// Runs a write over the records, within the transaction or as its own unit.
    pub(crate) fn modify<R>(
        &self,
        txn: Option<&NativeTxn>,
        f: impl FnOnce(&mut Records) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.check()?;
        if self.read_only {
            return Err(Status::EACCES);
        }

        match txn {
            Some(txn) => {
                self.check_txn(txn)?;
                txn.write(&self.table, f)
            }
            None if self.env.transactional() => {
                // Auto-commit, every such write rewrites the file.
                let _lock = LockGuard::acquire(&self.env)?;
                let result = self.table.update(f)?;
                self.table.flush().map_err(|status| {
                    self.env.panic();
                    status
                })?;
                Ok(result)
            }
            None => self.table.update(f),
        }
    }

    fn check_txn(&self, txn: &NativeTxn) -> StoreResult<()> {
        txn.check()?;
        if txn.env_id() != self.env.id {
            tracing::error!(txn = txn.id, "transaction belongs to another environment");
            return Err(Status::EINVAL);
        }
        Ok(())
    }

    /// The first value stored under `key`.
    pub(crate) fn get(&self, txn: Option<&NativeTxn>, key: &[u8]) -> StoreResult<Vec<u8>> {
        let key = internal_key(self.table.method, key)?;
        self.view(txn, |records| {
            records
                .seek(key.as_ref())
                .map(|(_, value)| value.to_vec())
                .ok_or(Status::NOTFOUND)
        })?
    }

    /// Stores a value under `key`, appended after the existing ones for duplicates.
    pub(crate) fn put(&self, txn: Option<&NativeTxn>, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let key = internal_key(self.table.method, key)?;
        let duplicates = self.table.duplicates;
        self.modify(txn, |records| {
            records.put(key.into_owned(), value, duplicates);
            Ok(())
        })
    }

    /// Removes `key` with every value stored under it.
    pub(crate) fn del(&self, txn: Option<&NativeTxn>, key: &[u8]) -> StoreResult<()> {
        let key = internal_key(self.table.method, key)?;
        self.modify(txn, |records| {
            if records.remove_key(key.as_ref()) {
                Ok(())
            } else {
                Err(Status::NOTFOUND)
            }
        })
    }

    pub(crate) fn cursor(self: &Arc<Self>, txn: Option<Rc<NativeTxn>>) -> StoreResult<NativeCursor> {
        self.check()?;
        if let Some(txn) = &txn {
            self.check_txn(txn)?;
        }
        Ok(NativeCursor::new(self.clone(), txn))
    }

    pub(crate) fn stat(&self, txn: Option<&NativeTxn>) -> StoreResult<Stat> {
        let (keys, records) = self.view(txn, |records| (records.keys(), records.len()))?;
        Ok(Stat {
            keys,
            records,
            cursors: self.table.cursors.load(Ordering::Acquire),
        })
    }

    /// Flushes the database to its file.
    pub(crate) fn sync(&self) -> StoreResult<()> {
        self.check()?;
        self.table.flush()
    }

    pub(crate) fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Status::EINVAL);
        }
        self.env.check()?;
        if !self.env.transactional() {
            self.table.flush()?;
        }
        Ok(())
    }

    /// Whether the database can still be used.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn external_key(&self, key: &[u8]) -> Vec<u8> {
        external_key(self.table.method, key)
    }
}

impl Drop for NativeDb {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(status) = self.close() {
                tracing::error!(%status, "failed to close database on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use super::NativeDb;
    use crate::{
        native::NativeEnv,
        options::{AccessMethod, Mode},
        status::Status,
    };

    fn open(path: &str, mode: Mode, duplicates: bool) -> Result<NativeDb, Status> {
        let env = NativeEnv::private();
        NativeDb::open(&env, path.as_ref(), None, mode, AccessMethod::Btree, duplicates)
    }

    #[test]
    fn test_put_get_del() {
        let path = "target/native_table_crud.db";
        _ = fs::remove_file(path);

        let db = open(path, Mode::Update, true).unwrap();
        db.put(None, b"k", b"1").unwrap();
        db.put(None, b"k", b"2").unwrap();
        assert_eq!(db.get(None, b"k").unwrap(), b"1");
        let stat = db.stat(None).unwrap();
        assert_eq!((stat.keys, stat.records, stat.cursors), (1, 2, 0));

        db.del(None, b"k").unwrap();
        assert_eq!(db.get(None, b"k").unwrap_err(), Status::NOTFOUND);
        assert_eq!(db.del(None, b"k").unwrap_err(), Status::NOTFOUND);

        db.close().unwrap();
        assert_eq!(db.close().unwrap_err(), Status::EINVAL);
        assert_eq!(db.get(None, b"k").unwrap_err(), Status::EINVAL);
        _ = fs::remove_file(path);
    }

    #[test]
    fn test_persistence_and_modes() {
        let path = "target/native_table_modes.db";
        _ = fs::remove_file(path);
        assert_eq!(open(path, Mode::Read, false).err(), Some(Status::ENOENT));

        let db = open(path, Mode::Update, false).unwrap();
        db.put(None, b"k", b"1").unwrap();
        db.put(None, b"k", b"2").unwrap();
        db.close().unwrap();
        drop(db);

        let db = open(path, Mode::Read, false).unwrap();
        assert_eq!(db.get(None, b"k").unwrap(), b"2");
        assert_eq!(db.put(None, b"k", b"3").unwrap_err(), Status::EACCES);
        drop(db);

        assert_eq!(open(path, Mode::Update, true).err(), Some(Status::EINVAL));
        _ = fs::remove_file(path);
    }

    #[test]
    fn test_shared_tables() {
        let path = "target/native_table_shared.db";
        _ = fs::remove_file(path);

        let env = NativeEnv::private();
        let a = NativeDb::open(&env, path.as_ref(), Some("a"), Mode::Update, AccessMethod::Hash, false)
            .unwrap();
        let b = NativeDb::open(&env, path.as_ref(), Some("b"), Mode::Update, AccessMethod::Btree, false)
            .unwrap();
        let again =
            NativeDb::open(&env, path.as_ref(), Some("a"), Mode::Update, AccessMethod::Unknown, false)
                .unwrap();
        assert!(Arc::ptr_eq(&a.table, &again.table));
        assert_eq!(again.method(), AccessMethod::Hash);

        a.put(None, b"k", b"a").unwrap();
        assert_eq!(again.get(None, b"k").unwrap(), b"a");
        assert_eq!(b.get(None, b"k").unwrap_err(), Status::NOTFOUND);
        _ = fs::remove_file(path);
    }
}
