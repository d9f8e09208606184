use std::{collections::BTreeMap, ops::Bound};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Record {
    seq: u64,
    value: Vec<u8>,
}

/// The records of one database: key bytes to the values under the key, in insertion order.
///
/// Every value carries a sequence number unique within the database. Cursors are
/// positioned by key and sequence number, so records inserted or removed around a
/// cursor never move it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Records {
    entries: BTreeMap<Vec<u8>, Vec<Record>>,
    next_seq: u64,
}

/// A record as found by a cursor: key, sequence number and value.
pub(crate) type Found<'a> = (&'a [u8], u64, &'a [u8]);

impl Records {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys.
    #[inline]
    pub(crate) fn keys(&self) -> usize {
        self.entries.len()
    }

    /// Number of records, counting every duplicate.
    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Stores a value under `key`.
    ///
    /// With duplicates the value is appended after the existing ones, otherwise it
    /// replaces the stored value in place.
    pub(crate) fn put(&mut self, key: Vec<u8>, value: &[u8], duplicates: bool) {
        let values = self.entries.entry(key).or_default();
        match values.first_mut() {
            Some(record) if !duplicates => record.value = value.to_vec(),
            _ => {
                values.push(Record {
                    seq: self.next_seq,
                    value: value.to_vec(),
                });
                self.next_seq += 1;
            }
        }
    }

    /// Removes `key` with every value stored under it.
    #[inline]
    pub(crate) fn remove_key(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes the single record `seq` stored under `key`.
    pub(crate) fn remove(&mut self, key: &[u8], seq: u64) -> bool {
        let Some(values) = self.entries.get_mut(key) else {
            return false;
        };
        let Some(idx) = values.iter().position(|record| record.seq == seq) else {
            return false;
        };

        values.remove(idx);
        if values.is_empty() {
            self.entries.remove(key);
        }
        true
    }

    /// The value of the record `seq` under `key`, if it is still stored.
    pub(crate) fn get(&self, key: &[u8], seq: u64) -> Option<&[u8]> {
        self.entries
            .get(key)?
            .iter()
            .find(|record| record.seq == seq)
            .map(|record| record.value.as_slice())
    }

    /// The first record stored under exactly `key`.
    pub(crate) fn seek(&self, key: &[u8]) -> Option<(u64, &[u8])> {
        let record = self.entries.get(key)?.first()?;
        Some((record.seq, &record.value))
    }

    /// The first record of the database.
    pub(crate) fn first(&self) -> Option<Found<'_>> {
        let (key, values) = self.entries.iter().next()?;
        let record = values.first()?;
        Some((key, record.seq, &record.value))
    }

    /// The record following the one `seq` under `key`, whether or not that one is still
    /// stored.
    pub(crate) fn after(&self, key: &[u8], seq: u64) -> Option<Found<'_>> {
        if let Some((key, values)) = self.entries.get_key_value(key) {
            // Sequence numbers grow in insertion order within a key.
            if let Some(record) = values.iter().find(|record| record.seq > seq) {
                return Some((key, record.seq, &record.value));
            }
        }

        self.entries
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .find_map(|(key, values)| {
                let record = values.first()?;
                Some((key.as_slice(), record.seq, record.value.as_slice()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::Records;

    fn records() -> Records {
        let mut records = Records::new();
        for (key, value) in [("a", "1"), ("b", "1"), ("b", "2"), ("c", "1")] {
            records.put(key.as_bytes().to_vec(), value.as_bytes(), true);
        }
        records
    }

    #[test]
    fn test_stable_positions() {
        let mut records = records();
        assert_eq!((records.keys(), records.len()), (3, 4));

        let (key, seq, value) = records.seek(b"b").map(|(seq, v)| (b"b", seq, v)).unwrap();
        assert_eq!(value, b"1");
        let next = records.after(key, seq).map(|(_, seq, _)| seq).unwrap();

        // Removing the record a position refers to leaves its successor in place.
        assert!(records.remove(key, seq));
        assert!(!records.remove(key, seq));
        assert_eq!(records.get(key, seq), None);
        assert_eq!(records.after(key, seq), Some((&b"b"[..], next, &b"2"[..])));

        assert!(records.remove(key, next));
        assert_eq!(records.after(key, next).map(|(key, _, _)| key), Some(&b"c"[..]));
        assert_eq!(records.keys(), 2);
    }

    #[test]
    fn test_replace_in_place() {
        let mut records = Records::new();
        records.put(b"k".to_vec(), b"1", false);
        let (seq, _) = records.seek(b"k").unwrap();
        records.put(b"k".to_vec(), b"2", false);
        assert_eq!(records.seek(b"k"), Some((seq, &b"2"[..])));
        assert_eq!(records.len(), 1);

        assert!(records.remove_key(b"k"));
        assert!(!records.remove_key(b"k"));
        assert_eq!(records.first(), None);
    }
}
