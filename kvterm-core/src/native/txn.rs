use std::{
    cell::{Cell, RefCell},
    collections::{hash_map::Entry, HashMap},
    mem,
    rc::Rc,
    sync::Arc,
};

use crate::{
    native::{lock::LockGuard, table::Table, NativeEnv, Records},
    status::{Status, StoreResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Committed,
    Aborted,
}

/// A working copy of one table, private to a transaction until it commits.
struct Pending {
    table: Arc<Table>,
    records: Records,
}

/// A native transaction, possibly nested in a parent.
///
/// Writes are made on per-table copies. Committing a child hands its copies to the
/// parent, committing a root transaction publishes them. A root transaction holds the
/// environment write lock until it is resolved.
pub(crate) struct NativeTxn {
    pub(crate) id: u32,
    env: Arc<NativeEnv>,
    parent: Option<Rc<NativeTxn>>,
    state: Cell<State>,
    dirty: RefCell<HashMap<u64, Pending>>,
    lock: RefCell<Option<LockGuard>>,
}

impl NativeTxn {
    pub(crate) fn begin(env: &Arc<NativeEnv>, parent: Option<Rc<NativeTxn>>) -> StoreResult<Self> {
        env.check()?;
        if !env.transactional() {
            return Err(Status::EINVAL);
        }
        if let Some(parent) = &parent {
            parent.check()?;
            if parent.env.id != env.id {
                return Err(Status::EINVAL);
            }
        }

        let lock = match parent {
            Some(_) => None,
            None => Some(LockGuard::acquire(env)?),
        };
        Ok(Self {
            id: env.next_txn_id(),
            env: env.clone(),
            parent,
            state: Cell::new(State::Active),
            dirty: Default::default(),
            lock: RefCell::new(lock),
        })
    }

    #[inline]
    pub(crate) fn env_id(&self) -> u64 {
        self.env.id
    }

    /// Fails unless the transaction and all of its ancestors are unresolved.
    pub(crate) fn check(&self) -> StoreResult<()> {
        if self.state.get() != State::Active {
            return Err(Status::EINVAL);
        }
        self.env.check()?;
        match &self.parent {
            Some(parent) => parent.check(),
            None => Ok(()),
        }
    }

    pub(crate) fn view<R>(&self, table: &Table, f: impl FnOnce(&Records) -> R) -> R {
        if let Some(pending) = self.dirty.borrow().get(&table.id) {
            return f(&pending.records);
        }
        match &self.parent {
            Some(parent) => parent.view(table, f),
            None => table.view(f),
        }
    }

    pub(crate) fn write<R>(
        &self,
        table: &Arc<Table>,
        f: impl FnOnce(&mut Records) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut dirty = self.dirty.borrow_mut();
        let pending = match dirty.entry(table.id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let records = match &self.parent {
                    Some(parent) => parent.view(table, |records| records.clone()),
                    None => table.snapshot(),
                };
                entry.insert(Pending {
                    table: table.clone(),
                    records,
                })
            }
        };
        f(&mut pending.records)
    }

    pub(crate) fn commit(&self) -> StoreResult<()> {
        self.check()?;
        self.state.set(State::Committed);
        let dirty = mem::take(&mut *self.dirty.borrow_mut());

        let result = match &self.parent {
            Some(parent) => {
                parent.dirty.borrow_mut().extend(dirty);
                Ok(())
            }
            None => self.publish(dirty),
        };
        self.lock.borrow_mut().take();
        tracing::trace!(txn = self.id, ok = result.is_ok(), "committed transaction");
        result
    }

    fn publish(&self, dirty: HashMap<u64, Pending>) -> StoreResult<()> {
        let tables = dirty
            .into_values()
            .map(|pending| {
                pending.table.publish(pending.records);
                pending.table
            })
            .collect::<Vec<_>>();

        for table in tables {
            if let Err(status) = table.flush() {
                self.env.panic();
                return Err(status);
            }
        }
        Ok(())
    }

    pub(crate) fn abort(&self) -> StoreResult<()> {
        if self.state.get() != State::Active {
            return Err(Status::EINVAL);
        }
        self.state.set(State::Aborted);
        self.dirty.borrow_mut().clear();
        self.lock.borrow_mut().take();
        tracing::trace!(txn = self.id, "aborted transaction");
        self.env.check()
    }
}

impl Drop for NativeTxn {
    fn drop(&mut self) {
        if self.state.get() == State::Active {
            tracing::debug!(txn = self.id, "aborting unresolved transaction");
            _ = self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, rc::Rc, sync::Arc, thread, time::Duration};

    use super::NativeTxn;
    use crate::{
        env::EnvOptions,
        native::{NativeDb, NativeEnv},
        options::{AccessMethod, Mode},
        status::Status,
    };

    fn setup(path: &str) -> (Arc<NativeEnv>, NativeDb) {
        _ = fs::remove_file(path);
        let mut options = EnvOptions::new();
        options.init_txn(true).lock_timeout(Duration::from_millis(50));
        let env = NativeEnv::open(&options).unwrap();
        let db = NativeDb::open(&env, path.as_ref(), None, Mode::Update, AccessMethod::Btree, false)
            .unwrap();
        (env, db)
    }

    #[test]
    fn test_nested_visibility() {
        let path = "target/native_txn_nested.db";
        let (env, db) = setup(path);

        let root = Rc::new(NativeTxn::begin(&env, None).unwrap());
        db.put(Some(&root), b"a", b"1").unwrap();

        let child = NativeTxn::begin(&env, Some(root.clone())).unwrap();
        db.put(Some(&child), b"b", b"2").unwrap();
        assert_eq!(db.get(Some(&child), b"a").unwrap(), b"1");
        assert_eq!(db.get(Some(&root), b"b").unwrap_err(), Status::NOTFOUND);
        child.commit().unwrap();
        assert_eq!(db.get(Some(&root), b"b").unwrap(), b"2");

        let aborted = NativeTxn::begin(&env, Some(root.clone())).unwrap();
        db.put(Some(&aborted), b"c", b"3").unwrap();
        aborted.abort().unwrap();
        assert_eq!(db.get(Some(&root), b"c").unwrap_err(), Status::NOTFOUND);
        assert_eq!(aborted.commit().unwrap_err(), Status::EINVAL);

        assert_eq!(db.get(None, b"a").unwrap_err(), Status::NOTFOUND);
        root.commit().unwrap();
        assert_eq!(db.get(None, b"a").unwrap(), b"1");
        assert_eq!(db.get(None, b"b").unwrap(), b"2");
        _ = fs::remove_file(path);
    }

    #[test]
    fn test_lock_timeout() {
        let path = "target/native_txn_timeout.db";
        let (env, db) = setup(path);
        let db = Arc::new(db);

        let root = NativeTxn::begin(&env, None).unwrap();
        db.put(Some(&root), b"a", b"1").unwrap();

        let other = db.clone();
        let denied = thread::spawn(move || other.put(None, b"a", b"2"))
            .join()
            .unwrap();
        assert_eq!(denied, Err(Status::LOCK_DEADLOCK));

        root.abort().unwrap();
        let other = db.clone();
        thread::spawn(move || other.put(None, b"a", b"2").unwrap())
            .join()
            .unwrap();
        assert_eq!(db.get(None, b"a").unwrap(), b"2");
        _ = fs::remove_file(path);
    }

    #[test]
    fn test_not_transactional() {
        let env = NativeEnv::private();
        assert_eq!(NativeTxn::begin(&env, None).err(), Some(Status::EINVAL));
    }
}
