use std::{mem, rc::Rc, sync::Arc};

use crate::{
    codec::Dbt,
    error::Result,
    handle::{Closed, Db},
    native::{NativeCursor, NativeDb, NativeTxn},
    signal::nosig,
    status::Translate,
    term::Term,
    txn,
};

fn open_cursor(native: &Arc<NativeDb>, txn: Option<Rc<NativeTxn>>) -> Result<NativeCursor> {
    let cursor = nosig(|| native.cursor(txn))?;
    tracing::debug!(table = native.table.id, "created cursor");
    Ok(cursor)
}

fn close_cursor(mut cursor: NativeCursor) -> Result<()> {
    let result = nosig(|| cursor.close());
    tracing::debug!(ok = result.is_ok(), "destroyed cursor");
    result.map_err(Into::into)
}

/// A scan over every key/value pair of a database, duplicates included.
///
/// The scan holds a cursor until it is exhausted, fails, is closed or dropped. Once it
/// ended, [`next`](Iterator::next) returns `None`.
pub struct Enumerate {
    db: Db,
    cursor: Option<NativeCursor>,
}

impl Enumerate {
    pub(crate) fn new(db: &Db) -> Result<Self> {
        let native = db.native()?;
        let txn = txn::current_for(&db.0.env)?;
        Ok(Self {
            db: db.clone(),
            cursor: Some(open_cursor(&native, txn)?),
        })
    }

    /// Ends the scan early, releasing its cursor.
    #[inline]
    pub fn close(&mut self) -> Result<()> {
        match self.cursor.take() {
            Some(cursor) => close_cursor(cursor),
            None => Ok(()),
        }
    }

    fn decode(&self, key: &[u8], value: &[u8]) -> Result<(Term, Term)> {
        Ok((self.db.0.key.decode(key)?, self.db.0.value.decode(value)?))
    }

    fn fail<T>(&mut self, err: crate::Error) -> Option<Result<T>> {
        if let Some(cursor) = self.cursor.take() {
            _ = close_cursor(cursor);
        }
        Some(Err(err))
    }
}

impl Iterator for Enumerate {
    type Item = Result<(Term, Term)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.as_ref()?;
        if !self.db.is_open() {
            return self.fail(Closed.into());
        }

        // An unpositioned cursor moves to the first record.
        let cursor = self.cursor.as_mut()?;
        match nosig(|| cursor.next()).found() {
            Ok(Some((key, value))) => match self.decode(&key, &value) {
                Ok(pair) => Some(Ok(pair)),
                Err(err) => self.fail(err),
            },
            Ok(None) => {
                _ = self.close();
                None
            }
            Err(err) => self.fail(err),
        }
    }
}

impl Drop for Enumerate {
    #[inline]
    fn drop(&mut self) {
        _ = self.close();
    }
}

enum State {
    /// A database without duplicates is read with a single point fetch.
    Unique {
        native: Arc<NativeDb>,
        txn: Option<Rc<NativeTxn>>,
    },
    Cursor {
        cursor: NativeCursor,
        started: bool,
    },
    Done,
}

/// The values stored under one key, in stored order.
///
/// A lookup created by [`Db::delete_value`] only yields the values matching its pattern,
/// and deletes each of them as it is yielded.
pub struct Lookup {
    db: Db,
    key: Dbt,
    pattern: Option<Term>,
    state: State,
}

impl Lookup {
    pub(crate) fn new(db: &Db, key: Dbt, pattern: Option<Term>) -> Result<Self> {
        let native = db.native()?;
        let txn = txn::current_for(&db.0.env)?;
        let state = if db.0.duplicates {
            State::Cursor {
                cursor: open_cursor(&native, txn)?,
                started: false,
            }
        } else {
            State::Unique { native, txn }
        };

        Ok(Self {
            db: db.clone(),
            key,
            pattern,
            state,
        })
    }

    /// Ends the lookup early, releasing its cursor.
    #[inline]
    pub fn close(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, State::Done) {
            State::Cursor { cursor, .. } => close_cursor(cursor),
            _ => Ok(()),
        }
    }

    fn fetch(&self, native: &NativeDb, txn: Option<&NativeTxn>) -> Result<Option<Term>> {
        let key = self.key.as_bytes();
        let Some(bytes) = nosig(|| native.get(txn, key)).found()? else {
            return Ok(None);
        };

        let value = self.db.0.value.decode(&bytes)?;
        match &self.pattern {
            None => Ok(Some(value)),
            Some(pattern) if pattern.matches(&value) => {
                nosig(|| native.del(txn, key))?;
                Ok(Some(value))
            }
            Some(_) => Ok(None),
        }
    }

    fn step(&self, cursor: &mut NativeCursor, started: bool) -> Result<Option<Term>> {
        let mut bytes = if started {
            self.advance(cursor)?
        } else {
            nosig(|| cursor.set(self.key.as_bytes())).found()?
        };

        while let Some(value) = bytes {
            let value = self.db.0.value.decode(&value)?;
            match &self.pattern {
                None => return Ok(Some(value)),
                Some(pattern) if pattern.matches(&value) => {
                    // Delete the record just found, before the cursor moves on.
                    nosig(|| cursor.del())?;
                    return Ok(Some(value));
                }
                Some(_) => bytes = self.advance(cursor)?,
            }
        }
        Ok(None)
    }

    /// The next value under the key, `None` once the cursor reached another key.
    fn advance(&self, cursor: &mut NativeCursor) -> Result<Option<Vec<u8>>> {
        let pair = nosig(|| cursor.next()).found()?;
        Ok(pair.and_then(|(key, value)| (key == self.key.as_bytes()).then_some(value)))
    }
}

impl Iterator for Lookup {
    type Item = Result<Term>;

    fn next(&mut self) -> Option<Self::Item> {
        let state = mem::replace(&mut self.state, State::Done);
        if matches!(state, State::Done) {
            return None;
        }
        if !self.db.is_open() {
            if let State::Cursor { cursor, .. } = state {
                _ = close_cursor(cursor);
            }
            return Some(Err(Closed.into()));
        }

        match state {
            State::Unique { native, txn } => self.fetch(&native, txn.as_deref()).transpose(),
            State::Cursor {
                mut cursor,
                started,
            } => match self.step(&mut cursor, started) {
                Ok(Some(value)) => {
                    self.state = State::Cursor {
                        cursor,
                        started: true,
                    };
                    Some(Ok(value))
                }
                Ok(None) => {
                    _ = close_cursor(cursor);
                    None
                }
                Err(err) => {
                    _ = close_cursor(cursor);
                    Some(Err(err))
                }
            },
            State::Done => None,
        }
    }
}

impl Drop for Lookup {
    #[inline]
    fn drop(&mut self) {
        _ = self.close();
    }
}
