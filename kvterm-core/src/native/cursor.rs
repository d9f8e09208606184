use std::{
    rc::Rc,
    sync::{atomic::Ordering, Arc},
};

use crate::{
    native::{internal_key, records::Found, NativeDb, NativeTxn, Records},
    status::{Status, StoreResult},
};

struct Position {
    key: Vec<u8>,
    seq: u64,
}

/// A cursor over the records of a database, as seen by its transaction.
///
/// The position is kept as a key plus the sequence number of a record under that key,
/// and is resolved against the records again on each call. Once the record at the
/// position is deleted, by this cursor or any other, [`next`](Self::next) moves on to
/// the record that followed it.
pub(crate) struct NativeCursor {
    db: Arc<NativeDb>,
    txn: Option<Rc<NativeTxn>>,
    position: Option<Position>,
    closed: bool,
}

type Pair = (Vec<u8>, Vec<u8>);

impl NativeCursor {
    pub(crate) fn new(db: Arc<NativeDb>, txn: Option<Rc<NativeTxn>>) -> Self {
        db.table.cursors.fetch_add(1, Ordering::AcqRel);
        Self {
            db,
            txn,
            position: None,
            closed: false,
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.closed {
            return Err(Status::EINVAL);
        }
        match &self.txn {
            Some(txn) => txn.check(),
            None => Ok(()),
        }
    }

    fn view<R>(&self, f: impl FnOnce(&Records) -> R) -> StoreResult<R> {
        self.check()?;
        self.db.view(self.txn.as_deref(), f)
    }

    /// Moves to a found record.
    fn land(&mut self, found: Option<(Vec<u8>, u64, Vec<u8>)>) -> StoreResult<Pair> {
        let (key, seq, value) = found.ok_or(Status::NOTFOUND)?;
        let pair = (self.db.external_key(&key), value);
        self.position = Some(Position { key, seq });
        Ok(pair)
    }

    /// Moves to the first record.
    pub(crate) fn first(&mut self) -> StoreResult<Pair> {
        let found = self.view(|records| records.first().map(owned))?;
        self.land(found)
    }

    /// Moves to the first value stored under exactly `key`.
    pub(crate) fn set(&mut self, key: &[u8]) -> StoreResult<Vec<u8>> {
        let key = internal_key(self.db.method(), key)?.into_owned();
        let found = self.view(|records| {
            records
                .seek(&key)
                .map(|(seq, value)| (key.clone(), seq, value.to_vec()))
        })?;
        self.land(found).map(|(_, value)| value)
    }

    /// Moves to the next record, the first one if the cursor is not positioned yet.
    pub(crate) fn next(&mut self) -> StoreResult<Pair> {
        let Some(position) = &self.position else {
            return self.first();
        };

        let found = self.view(|records| records.after(&position.key, position.seq).map(owned))?;
        self.land(found)
    }

    /// Deletes the record at the current position, the cursor stays in place.
    pub(crate) fn del(&mut self) -> StoreResult<()> {
        self.check()?;
        let position = self.position.as_ref().ok_or(Status::EINVAL)?;

        self.db.modify(self.txn.as_deref(), |records| {
            if records.remove(&position.key, position.seq) {
                Ok(())
            } else {
                Err(Status::KEYEMPTY)
            }
        })
    }

    pub(crate) fn close(&mut self) -> StoreResult<()> {
        if self.closed {
            return Err(Status::EINVAL);
        }
        self.closed = true;
        self.position = None;
        self.db.table.cursors.fetch_sub(1, Ordering::AcqRel);
        if self.db.is_closed() {
            return Err(Status::EINVAL);
        }
        Ok(())
    }
}

impl Drop for NativeCursor {
    #[inline]
    fn drop(&mut self) {
        if !self.closed {
            _ = self.close();
        }
    }
}

#[inline]
fn owned((key, seq, value): Found<'_>) -> (Vec<u8>, u64, Vec<u8>) {
    (key.to_vec(), seq, value.to_vec())
}
