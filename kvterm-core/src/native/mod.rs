//! The embedded store behind the binding.
//!
//! Records of a database are kept in an ordered map from key bytes to the values under
//! that key, in insertion order. Every call reports failures as a raw [`Status`].

use std::{borrow::Cow, mem};

use libc::c_long;

use crate::{
    options::AccessMethod,
    status::{Status, StoreResult},
};

mod cursor;
mod env;
mod file;
mod lock;
mod records;
mod table;
mod txn;

pub(crate) use cursor::NativeCursor;
pub(crate) use env::NativeEnv;
pub(crate) use records::Records;
pub use table::Stat;
pub(crate) use table::NativeDb;
pub(crate) use txn::NativeTxn;

/// Maps a caller key to the form it is stored under.
///
/// Record numbers are given as a native `u32` or `c_long` and stored big-endian, so the
/// byte order of the map is the numeric order.
pub(crate) fn internal_key(method: AccessMethod, key: &[u8]) -> StoreResult<Cow<'_, [u8]>> {
    if method != AccessMethod::Recno {
        return Ok(Cow::Borrowed(key));
    }

    let recno = match key.len() {
        4 => {
            let bytes = <[u8; 4]>::try_from(key).map_err(|_| Status::EINVAL)?;
            i64::from(u32::from_ne_bytes(bytes))
        }
        n if n == mem::size_of::<c_long>() => {
            let bytes =
                <[u8; mem::size_of::<c_long>()]>::try_from(key).map_err(|_| Status::EINVAL)?;
            c_long::from_ne_bytes(bytes) as i64
        }
        _ => return Err(Status::EINVAL),
    };
    if recno < 1 {
        tracing::debug!(recno, "invalid record number");
        return Err(Status::EINVAL);
    }
    Ok(Cow::Owned((recno as u64).to_be_bytes().to_vec()))
}

/// Maps a stored key back to the form handed to callers.
pub(crate) fn external_key(method: AccessMethod, key: &[u8]) -> Vec<u8> {
    if method != AccessMethod::Recno {
        return key.to_vec();
    }
    let mut bytes = [0; mem::size_of::<u64>()];
    bytes.copy_from_slice(key);
    (u64::from_be_bytes(bytes) as c_long).to_ne_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use std::mem;

    use libc::c_long;

    use super::{external_key, internal_key};
    use crate::{options::AccessMethod, status::Status};

    #[test]
    fn test_recno_keys() {
        let (seven, seven_long, two) = (
            7u32.to_ne_bytes(),
            (7 as c_long).to_ne_bytes(),
            (2 as c_long).to_ne_bytes(),
        );
        let short = internal_key(AccessMethod::Recno, &seven).unwrap();
        let long = internal_key(AccessMethod::Recno, &seven_long).unwrap();
        assert_eq!(short, long);
        assert!(internal_key(AccessMethod::Recno, &two).unwrap() < long);

        let external = external_key(AccessMethod::Recno, &long);
        assert_eq!(external.len(), mem::size_of::<c_long>());
        assert_eq!(external, (7 as c_long).to_ne_bytes());

        assert_eq!(
            internal_key(AccessMethod::Recno, &0u32.to_ne_bytes()).unwrap_err(),
            Status::EINVAL
        );
        assert_eq!(
            internal_key(AccessMethod::Recno, b"abc").unwrap_err(),
            Status::EINVAL
        );
        assert_eq!(&*internal_key(AccessMethod::Btree, b"abc").unwrap(), b"abc");
    }
}
