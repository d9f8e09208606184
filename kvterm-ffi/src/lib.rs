#![allow(clippy::missing_safety_doc)]

//! C interface to kvterm.
//!
//! Keys, values and option lists cross the boundary in the structured term byte form.
//! Every call reports its outcome through an `FFICallState`. Bytes returned to the
//! caller are owned by it and released with `kvterm_bytes_dealloc`.
//!
//! Multi-answer reads follow a first/next/prune protocol. The first call returns an
//! iterator along with its first answer, or null when there is none. A next call that
//! runs out of answers, or fails, releases the iterator. An iterator that is no longer
//! wanted is released with the matching prune call.

mod bytes;
mod ffi_call;

macro_rules! check_null_ptr {
    ($ptr:expr) => {
        if $ptr.is_null() {
            return Ok(crate::ffi_call::FFIDefault::default());
        }
    };
}

pub mod env {
    use kvterm::EnvOptions;

    use crate::{
        bytes::FFIBytesRef,
        ffi_call::{ffi_call, FFICallState},
    };

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_init(options: FFIBytesRef, call_state: &mut FFICallState) {
        ffi_call(call_state, || {
            let options = EnvOptions::from_terms(&options.into_terms()?)?;
            kvterm::init(&options)
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_shutdown(call_state: &mut FFICallState) {
        ffi_call(call_state, kvterm::shutdown)
    }
}

pub mod db {
    use std::ffi::c_void;

    use kvterm::{Db, DbOptions, Mode, Term};

    use crate::{
        bytes::{FFIBytes, FFIBytesRef},
        ffi_call::{ffi_call, FFICallState},
    };

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_open(
        path: FFIBytesRef,
        mode: FFIBytesRef,
        options: FFIBytesRef,
        call_state: &mut FFICallState,
    ) -> *mut c_void {
        ffi_call(call_state, || {
            let mode: Mode = mode.into_str()?.parse()?;
            let options = DbOptions::from_terms(&options.into_terms()?)?;
            Db::open(path.into_str()?, mode, &options)
                .map(Box::new)
                .map(Box::into_raw)
                .map(|ptr| ptr as *mut c_void)
        })
    }

    /// Closes the database. The handle stays valid until released.
    #[no_mangle]
    pub unsafe extern "C" fn kvterm_close(db: *const c_void, call_state: &mut FFICallState) {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            db.close()
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_is_open(db: *const c_void, call_state: &mut FFICallState) -> u8 {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            Ok(db.is_open() as u8)
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_db_release(db: *mut c_void, call_state: &mut FFICallState) {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            drop(Box::from_raw(db as *mut Db));
            Ok(())
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_put(
        db: *const c_void,
        key: FFIBytesRef,
        value: FFIBytesRef,
        call_state: &mut FFICallState,
    ) {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            db.put(&key.into_term()?, &value.into_term()?)
        })
    }

    /// Returns 1 if the key existed.
    #[no_mangle]
    pub unsafe extern "C" fn kvterm_delete(
        db: *const c_void,
        key: FFIBytesRef,
        call_state: &mut FFICallState,
    ) -> u8 {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            Ok(db.delete(&key.into_term()?)? as u8)
        })
    }

    /// Every value under the key, as one list term.
    #[no_mangle]
    pub unsafe extern "C" fn kvterm_get_all(
        db: *const c_void,
        key: FFIBytesRef,
        call_state: &mut FFICallState,
    ) -> FFIBytes {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            let values = db.get_all(&key.into_term()?)?;
            FFIBytes::from_term(&Term::List(values))
        })
    }
}

pub mod cursor {
    use std::{ffi::c_void, ptr};

    use kvterm::{Db, Enumerate, Lookup};

    use crate::{
        bytes::{store, FFIBytes, FFIBytesRef},
        ffi_call::{ffi_call, FFICallState},
    };

    /// Yields the first answer of a fresh iterator. The iterator is dropped when it has
    /// none, or when producing it failed.
    unsafe fn first<I, F>(mut iter: I, yield_answer: F) -> kvterm::Result<*mut c_void>
    where
        I: Iterator,
        F: FnOnce(I::Item) -> kvterm::Result<()>,
    {
        match iter.next() {
            Some(answer) => {
                yield_answer(answer)?;
                Ok(Box::into_raw(Box::new(iter)) as *mut c_void)
            }
            None => Ok(ptr::null_mut()),
        }
    }

    /// Resumes an iterator, releasing it once it has no further answer.
    unsafe fn next<I, F>(iter: *mut c_void, yield_answer: F) -> kvterm::Result<u8>
    where
        I: Iterator,
        F: FnOnce(I::Item) -> kvterm::Result<()>,
    {
        let answer = (*(iter as *mut I)).next();
        let result = match answer {
            Some(answer) => yield_answer(answer).map(|_| 1),
            None => Ok(0),
        };
        if !matches!(result, Ok(1)) {
            drop(Box::from_raw(iter as *mut I));
        }
        result
    }

    #[inline]
    unsafe fn yield_value(slot: *mut FFIBytes) -> impl FnOnce(kvterm::Result<kvterm::Term>) -> kvterm::Result<()> {
        move |answer| {
            store(slot, FFIBytes::from_term(&answer?)?);
            Ok(())
        }
    }

    #[inline]
    unsafe fn yield_pair(
        key_slot: *mut FFIBytes,
        value_slot: *mut FFIBytes,
    ) -> impl FnOnce(kvterm::Result<(kvterm::Term, kvterm::Term)>) -> kvterm::Result<()> {
        move |answer| {
            let (key, value) = answer?;
            let (key, value) = (FFIBytes::from_term(&key)?, FFIBytes::from_term(&value)?);
            store(key_slot, key);
            store(value_slot, value);
            Ok(())
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_get_first(
        db: *const c_void,
        key: FFIBytesRef,
        value: *mut FFIBytes,
        call_state: &mut FFICallState,
    ) -> *mut c_void {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            first(db.get(&key.into_term()?)?, yield_value(value))
        })
    }

    /// Starts deleting the values under `key` that match `pattern`, yielding the first one
    /// deleted.
    #[no_mangle]
    pub unsafe extern "C" fn kvterm_del_first(
        db: *const c_void,
        key: FFIBytesRef,
        pattern: FFIBytesRef,
        value: *mut FFIBytes,
        call_state: &mut FFICallState,
    ) -> *mut c_void {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            let lookup = db.delete_value(&key.into_term()?, &pattern.into_term()?)?;
            first(lookup, yield_value(value))
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_lookup_next(
        lookup: *mut c_void,
        value: *mut FFIBytes,
        call_state: &mut FFICallState,
    ) -> u8 {
        ffi_call(call_state, || {
            check_null_ptr!(lookup);
            next::<Lookup, _>(lookup, yield_value(value))
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_lookup_prune(lookup: *mut c_void, call_state: &mut FFICallState) {
        ffi_call(call_state, || {
            check_null_ptr!(lookup);
            let mut lookup = Box::from_raw(lookup as *mut Lookup);
            lookup.close()
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_enum_first(
        db: *const c_void,
        key: *mut FFIBytes,
        value: *mut FFIBytes,
        call_state: &mut FFICallState,
    ) -> *mut c_void {
        ffi_call(call_state, || {
            check_null_ptr!(db);
            let db = &*(db as *const Db);
            first(db.enumerate()?, yield_pair(key, value))
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_enum_next(
        scan: *mut c_void,
        key: *mut FFIBytes,
        value: *mut FFIBytes,
        call_state: &mut FFICallState,
    ) -> u8 {
        ffi_call(call_state, || {
            check_null_ptr!(scan);
            next::<Enumerate, _>(scan, yield_pair(key, value))
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn kvterm_enum_prune(scan: *mut c_void, call_state: &mut FFICallState) {
        ffi_call(call_state, || {
            check_null_ptr!(scan);
            let mut scan = Box::from_raw(scan as *mut Enumerate);
            scan.close()
        })
    }
}

pub mod tx {
    use std::ffi::c_void;

    /// A unit of work, returning non-zero on success.
    pub type FFIUnitOfWork = extern "C" fn(context: *mut c_void) -> u8;

    use crate::ffi_call::{ffi_call, FFICallState};

    enum Failure {
        Declined,
        Store(kvterm::Error),
    }

    impl From<kvterm::Error> for Failure {
        #[inline]
        fn from(value: kvterm::Error) -> Self {
            Self::Store(value)
        }
    }

    /// Runs `work` in a transaction of the default environment.
    ///
    /// Returns 1 if the transaction committed and 0 if `work` failed and it was aborted.
    #[no_mangle]
    pub unsafe extern "C" fn kvterm_transaction(
        work: FFIUnitOfWork,
        context: *mut c_void,
        call_state: &mut FFICallState,
    ) -> u8 {
        ffi_call(call_state, || {
            let result = kvterm::transaction(|| match work(context) {
                0 => Err(Failure::Declined),
                _ => Ok(()),
            });
            match result {
                Ok(()) => Ok(1),
                Err(Failure::Declined) => Ok(0),
                Err(Failure::Store(err)) => Err(err),
            }
        })
    }
}

pub mod logging {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    use crate::{
        bytes::FFIBytesRef,
        ffi_call::{ffi_call, FFICallState},
    };

    /// Installs the global log subscriber, with JSON lines if `json` is non-zero.
    ///
    /// `RUST_LOG` overrides `level`. Returns 0 if a subscriber was installed already.
    #[no_mangle]
    pub unsafe extern "C" fn kvterm_init_logging(
        json: u8,
        level: FFIBytesRef,
        call_state: &mut FFICallState,
    ) -> u8 {
        ffi_call(call_state, || {
            let level = level.into_str()?;
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

            let installed = if json != 0 {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_target(true).with_thread_ids(true))
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_target(true).with_thread_ids(true))
                    .try_init()
            };
            Ok(installed.is_ok() as u8)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{ffi::c_void, fs, ptr, sync::Mutex};

    use kvterm::Term;

    use crate::{
        bytes::{FFIBytes, FFIBytesRef},
        cursor::*,
        db::*,
        env::*,
        ffi_call::{FFICallCode, FFICallState},
        tx::*,
    };

    /// Held by tests opening databases, which land in the default environment once it
    /// is initialized.
    static DEFAULT_ENV: Mutex<()> = Mutex::new(());

    #[inline]
    fn bytes_ref(bytes: &[u8]) -> FFIBytesRef {
        FFIBytesRef::new(bytes)
    }

    fn open(path: &str, options: &[u8], state: &mut FFICallState) -> *mut c_void {
        _ = fs::remove_file(path);
        let db = unsafe {
            kvterm_open(
                bytes_ref(path.as_bytes()),
                bytes_ref(b"update"),
                bytes_ref(options),
                state,
            )
        };
        assert_eq!(state.code(), FFICallCode::FFICallSuccess);
        assert!(!db.is_null());
        db
    }

    unsafe fn get_all(db: *const c_void, key: &[u8], state: &mut FFICallState) -> Term {
        let values = kvterm_get_all(db, bytes_ref(key), state);
        assert_eq!(state.code(), FFICallCode::FFICallSuccess);
        values.into_term().unwrap()
    }

    unsafe fn release(db: *mut c_void, state: &mut FFICallState) {
        kvterm_close(db, state);
        assert_eq!(state.code(), FFICallCode::FFICallSuccess);
        kvterm_db_release(db, state);
    }

    struct Work {
        db: *const c_void,
        key: Vec<u8>,
        value: Vec<u8>,
        commit: u8,
    }

    extern "C" fn put_then_decide(context: *mut c_void) -> u8 {
        let work = unsafe { &*(context as *const Work) };
        let mut state = FFICallState::new();
        unsafe { kvterm_put(work.db, bytes_ref(&work.key), bytes_ref(&work.value), &mut state) };
        match state.code() {
            FFICallCode::FFICallSuccess => work.commit,
            _ => 0,
        }
    }

    #[test]
    fn test_lookup_protocol() {
        let _default_env = DEFAULT_ENV.lock().unwrap();
        let path = "target/ffi_lookup.db";
        _ = fs::remove_file(path);

        let options = Term::List(vec![Term::compound("duplicates", [Term::atom("true")])])
            .to_bytes()
            .unwrap();
        let key = Term::atom("k").to_bytes().unwrap();
        let values: Vec<_> = (1..=3).map(|i| Term::Integer(i).to_bytes().unwrap()).collect();
        let mut state = FFICallState::new();

        unsafe {
            let db = kvterm_open(
                bytes_ref(path.as_bytes()),
                bytes_ref(b"update"),
                bytes_ref(&options),
                &mut state,
            );
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            assert!(!db.is_null());

            for value in &values {
                kvterm_put(db, bytes_ref(&key), bytes_ref(value), &mut state);
                assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            }

            let mut answer = FFIBytes::null();
            let lookup = kvterm_get_first(db, bytes_ref(&key), &mut answer, &mut state);
            assert!(!lookup.is_null());
            answer.dealloc();

            let mut answer = FFIBytes::null();
            assert_eq!(kvterm_lookup_next(lookup, &mut answer, &mut state), 1);
            answer.dealloc();
            kvterm_lookup_prune(lookup, &mut state);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);

            let missing = Term::atom("missing").to_bytes().unwrap();
            let lookup = kvterm_get_first(db, bytes_ref(&missing), ptr::null_mut(), &mut state);
            assert!(lookup.is_null());
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);

            let scan = kvterm_enum_first(db, ptr::null_mut(), ptr::null_mut(), &mut state);
            assert!(!scan.is_null());
            for _ in 1..values.len() {
                assert_eq!(kvterm_enum_next(scan, ptr::null_mut(), ptr::null_mut(), &mut state), 1);
            }
            // The scan released itself once exhausted.
            assert_eq!(kvterm_enum_next(scan, ptr::null_mut(), ptr::null_mut(), &mut state), 0);

            assert_eq!(kvterm_delete(db, bytes_ref(&key), &mut state), 1);
            kvterm_close(db, &mut state);
            assert_eq!(kvterm_is_open(db, &mut state), 0);

            kvterm_put(db, bytes_ref(&key), bytes_ref(&values[0]), &mut state);
            assert_eq!(state.code(), FFICallCode::FFICallErrPermission);
            kvterm_db_release(db, &mut state);
        }

        _ = fs::remove_file(path);
    }

    #[test]
    fn test_bad_options() {
        let options = Term::List(vec![Term::compound("colour", [Term::atom("red")])])
            .to_bytes()
            .unwrap();
        let mut state = FFICallState::new();

        unsafe {
            let db = kvterm_open(
                bytes_ref(b"target/ffi_bad.db"),
                bytes_ref(b"update"),
                bytes_ref(&options),
                &mut state,
            );
            assert!(db.is_null());
            assert_eq!(state.code(), FFICallCode::FFICallErrDomain);

            let db = kvterm_open(
                bytes_ref(b"target/ffi_bad.db"),
                bytes_ref(b"sideways"),
                bytes_ref(&[]),
                &mut state,
            );
            assert!(db.is_null());
            assert_eq!(state.code(), FFICallCode::FFICallErrDomain);
        }
    }

    #[test]
    fn test_delete_protocol() {
        let _default_env = DEFAULT_ENV.lock().unwrap();
        let path = "target/ffi_delete.db";
        let options = Term::compound("duplicates", [Term::atom("true")]).to_bytes().unwrap();
        let key = Term::atom("k").to_bytes().unwrap();
        let (two, nine, any) = (
            Term::Integer(2).to_bytes().unwrap(),
            Term::Integer(9).to_bytes().unwrap(),
            Term::Variable(0).to_bytes().unwrap(),
        );
        let mut state = FFICallState::new();

        unsafe {
            let db = open(path, &options, &mut state);
            for i in 1..=3 {
                let value = Term::Integer(i).to_bytes().unwrap();
                kvterm_put(db, bytes_ref(&key), bytes_ref(&value), &mut state);
            }

            // The only match is yielded by the first call, the next one ends the deletion.
            let mut answer = FFIBytes::null();
            let deleting =
                kvterm_del_first(db, bytes_ref(&key), bytes_ref(&two), &mut answer, &mut state);
            assert!(!deleting.is_null());
            assert_eq!(answer.into_term().unwrap(), Term::Integer(2));
            assert_eq!(kvterm_lookup_next(deleting, ptr::null_mut(), &mut state), 0);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            assert_eq!(
                get_all(db, &key, &mut state),
                Term::List(vec![Term::Integer(1), Term::Integer(3)])
            );

            let (key_ref, nine_ref) = (bytes_ref(&key), bytes_ref(&nine));
            let deleting = kvterm_del_first(db, key_ref, nine_ref, ptr::null_mut(), &mut state);
            assert!(deleting.is_null());
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);

            // Pruning stops deleting after the values yielded so far.
            let (key_ref, any_ref) = (bytes_ref(&key), bytes_ref(&any));
            let deleting = kvterm_del_first(db, key_ref, any_ref, ptr::null_mut(), &mut state);
            assert!(!deleting.is_null());
            kvterm_lookup_prune(deleting, &mut state);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            assert_eq!(get_all(db, &key, &mut state), Term::List(vec![Term::Integer(3)]));

            release(db, &mut state);
        }
        _ = fs::remove_file(path);
    }

    #[test]
    fn test_transactions() {
        let _default_env = DEFAULT_ENV.lock().unwrap();
        let path = "target/ffi_transactions.db";
        let key = Term::atom("k").to_bytes().unwrap();
        let mut work = Work {
            db: ptr::null(),
            key: key.clone(),
            value: Term::Integer(1).to_bytes().unwrap(),
            commit: 1,
        };
        let context = &mut work as *mut Work as *mut c_void;
        let mut state = FFICallState::new();

        unsafe {
            // Transactions need an initialized default environment.
            assert_eq!(kvterm_transaction(put_then_decide, context, &mut state), 0);
            assert_eq!(state.code(), FFICallCode::FFICallErrNotInitialized);

            let options = Term::compound("init_txn", [Term::atom("true")]).to_bytes().unwrap();
            kvterm_init(bytes_ref(&options), &mut state);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            let db = open(path, &[], &mut state);
            (*(context as *mut Work)).db = db;

            assert_eq!(kvterm_transaction(put_then_decide, context, &mut state), 1);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            assert_eq!(get_all(db, &key, &mut state), Term::List(vec![Term::Integer(1)]));

            // A unit of work returning 0 is rolled back.
            (*(context as *mut Work)).value = Term::Integer(2).to_bytes().unwrap();
            (*(context as *mut Work)).commit = 0;
            assert_eq!(kvterm_transaction(put_then_decide, context, &mut state), 0);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
            assert_eq!(get_all(db, &key, &mut state), Term::List(vec![Term::Integer(1)]));

            release(db, &mut state);
            kvterm_shutdown(&mut state);
            assert_eq!(state.code(), FFICallCode::FFICallSuccess);
        }
        _ = fs::remove_file(path);
    }
}
