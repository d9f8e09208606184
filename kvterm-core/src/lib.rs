//! A term-level binding to an embedded transactional key-value store, written in Rust.
//!
//! `kvterm` stores values of a logic-programming host, [`Term`]s, in databases with
//! B-tree, hash or record-number access. Keys and values are converted to bytes under a
//! declared [`Encoding`], databases may keep several values under one key, and every
//! read that can produce more than one answer is a lazy, resumable iterator which can be
//! dropped at any point.
//!
//! # Open Database
//!
//! ```
//! use kvterm::{AccessMethod, DbOptions, Encoding, Mode, Result};
//! # fn try_main() -> Result<()> {
//! # _ = std::fs::remove_file("target/doc_open.db");
//!
//! // Keys are atoms, values are any term, several values may share a key.
//! let db = DbOptions::new()
//!     .access_method(AccessMethod::Btree)
//!     .duplicates(true)
//!     .key(Encoding::Atom)
//!     .open("target/doc_open.db", Mode::Update)?;
//!
//! assert!(db.is_open());
//! db.close()?;
//! assert!(!db.is_open());
//! # Ok(())
//! # }
//! # fn main() { try_main().unwrap(); }
//! ```
//! A database is also closed when its last handle is dropped.
//!
//! # Put, Get, Delete
//!
//! ```
//! # use kvterm::{DbOptions, Mode, Result, Term};
//! # fn try_main() -> Result<()> {
//! # _ = std::fs::remove_file("target/doc_crud.db");
//! let db = DbOptions::new()
//!     .duplicates(true)
//!     .open("target/doc_crud.db", Mode::Update)?;
//!
//! let key = Term::atom("colour");
//! db.put(&key, &Term::atom("red"))?;
//! db.put(&key, &Term::atom("green"))?;
//!
//! // Values under a key are kept in insertion order.
//! assert_eq!(db.get_all(&key)?, [Term::atom("red"), Term::atom("green")]);
//!
//! // Lazy lookup, stopping after the first answer.
//! let first = db.get(&key)?.next().transpose()?;
//! assert_eq!(first, Some(Term::atom("red")));
//!
//! // Delete the values matching a pattern, one at a time.
//! for removed in db.delete_value(&key, &Term::atom("red"))? {
//!     assert_eq!(removed?, Term::atom("red"));
//! }
//! assert_eq!(db.get_all(&key)?, [Term::atom("green")]);
//!
//! // Delete the key with all of its values.
//! assert!(db.delete(&key)?);
//! assert!(db.get_all(&key)?.is_empty());
//! # Ok(())
//! # }
//! # fn main() { try_main().unwrap(); }
//! ```
//!
//! # Transaction
//!
//! Transactions need an environment with transaction support. Units of work run with
//! [`Environment::transaction`] commit when they return `Ok` and abort when they return
//! `Err` or panic. Transactions nest: a unit of work run inside another one becomes
//! durable only when the outermost one commits.
//!
//! ```
//! # use kvterm::{Db, DbOptions, EnvOptions, Error, Mode, Result, Term};
//! # fn try_main() -> Result<()> {
//! # _ = std::fs::remove_file("target/doc_txn.db");
//! let env = EnvOptions::new().init_txn(true).open()?;
//! let db = Db::open_in(&env, "target/doc_txn.db", Mode::Update, &DbOptions::new())?;
//! let key = Term::atom("k");
//!
//! let aborted: Result<()> = env.transaction(|| {
//!     env.transaction(|| db.put(&key, &Term::Integer(1)))?;
//!     Err(Error::from(kvterm::Status::EINVAL))
//! });
//! assert!(aborted.is_err());
//! assert!(db.get_all(&key)?.is_empty());
//!
//! env.transaction(|| db.put(&key, &Term::Integer(2)))?;
//! assert_eq!(db.get_all(&key)?, [Term::Integer(2)]);
//! # Ok(())
//! # }
//! # fn main() { try_main().unwrap(); }
//! ```
//!
//! ## Attention
//!
//! ❗️ Transactions belong to the thread that started them, and so do the iterators
//! created within them. Neither can be sent to another thread.
//!
//! ❗️ An outermost transaction holds the write lock of its environment until it ends.
//! Writes from other threads wait for it, and give up with
//! [`ErrorCode::Deadlock`] once the configured lock timeout passes.
//!
//! # Enumerate
//!
//! ```
//! # use kvterm::{DbOptions, Mode, Result, Term};
//! # fn try_main() -> Result<()> {
//! # _ = std::fs::remove_file("target/doc_enum.db");
//! # let db = DbOptions::new().open("target/doc_enum.db", Mode::Update)?;
//! # db.put(&Term::Integer(1), &Term::atom("one"))?;
//! for pair in db.enumerate()? {
//!     let (key, value) = pair?;
//!     println!("{key} => {value}");
//! }
//!
//! // Stopping early releases the cursor right away.
//! let mut scan = db.enumerate()?;
//! _ = scan.next();
//! scan.close()?;
//! # Ok(())
//! # }
//! # fn main() { try_main().unwrap(); }
//! ```
//!

mod codec;
mod cursor;
mod db;
mod env;
mod error;
mod handle;
mod native;
mod options;
mod signal;
mod status;
mod term;
mod txn;

pub use crate::{
    codec::Encoding,
    cursor::{Enumerate, Lookup},
    env::{default_env, init, shutdown, EnvFlags, EnvOptions, Environment, Server},
    error::{Error, ErrorCode, Result},
    handle::Db,
    native::Stat,
    options::{AccessMethod, DbOptions, Mode},
    status::{Outcome, Status},
    term::Term,
    txn::{transaction, transaction_depth},
};
