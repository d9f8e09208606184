use std::{cell::RefCell, mem, rc::Rc};

use thiserror::Error;

use crate::{
    env::{self, Environment},
    error::{Error, Result},
    native::NativeTxn,
    signal::nosig,
    status::Status,
};

#[derive(Error, Debug)]
#[error("the environment is not initialized for transactions")]
pub(crate) struct NotInitialized;

/// An entry of the transaction stack.
struct Transaction {
    id: u32,
    native: Rc<NativeTxn>,
    env: Environment,
}

/// The transactions of one thread, innermost last.
struct TxnStack(RefCell<Vec<Transaction>>);

impl Drop for TxnStack {
    fn drop(&mut self) {
        let leaked = self.0.get_mut().len();
        assert_eq!(leaked, 0, "thread exited with {leaked} unresolved transactions");
    }
}

thread_local! {
    static STACK: TxnStack = TxnStack(RefCell::new(Vec::new()));
}

/// Begins a transaction nested in the current one and pushes it.
fn begin(env: &Environment) -> Result<u32> {
    if !env.is_transactional() {
        return Err(NotInitialized.into());
    }

    STACK.with(|stack| {
        let mut stack = stack.0.borrow_mut();
        let parent = match stack.last() {
            Some(top) if top.env != *env => {
                tracing::error!(txn = top.id, "nested transaction in another environment");
                return Err(Status::EINVAL.into());
            }
            top => top.map(|top| top.native.clone()),
        };

        let native = nosig(|| NativeTxn::begin(&env.0, parent))?;
        let id = native.id;
        tracing::debug!(txn = id, depth = stack.len(), "began transaction");
        stack.push(Transaction {
            id,
            native: Rc::new(native),
            env: env.clone(),
        });
        Ok(id)
    })
}

/// Pops the transaction `id`, which has to be the current one.
fn pop(id: u32) -> Transaction {
    STACK.with(|stack| {
        let top = stack.0.borrow_mut().pop();
        match top {
            Some(top) if top.id == id => top,
            top => panic!(
                "transaction {id} is not the current one, found {:?}",
                top.map(|t| t.id)
            ),
        }
    })
}

fn commit(id: u32) -> Result<()> {
    let txn = pop(id);
    tracing::debug!(txn = id, "committing transaction");
    nosig(|| txn.native.commit()).map_err(Into::into)
}

fn abort(id: u32) -> Result<()> {
    let txn = pop(id);
    tracing::debug!(txn = id, "aborting transaction");
    nosig(|| txn.native.abort()).map_err(Into::into)
}

/// Aborts the transaction if the unit of work unwinds.
struct Unresolved(u32);

impl Drop for Unresolved {
    fn drop(&mut self) {
        if let Err(err) = abort(self.0) {
            tracing::error!(txn = self.0, error = %err, "failed to abort transaction");
        }
    }
}

/// Runs `f` in a new transaction of `env`, nested in the thread's current one.
fn run<T, E, F>(env: &Environment, f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<Error>,
{
    let id = begin(env)?;
    let guard = Unresolved(id);
    let result = f();
    mem::forget(guard);

    match result {
        Ok(value) => {
            commit(id)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(abort_err) = abort(id) {
                tracing::error!(txn = id, error = %abort_err, "failed to abort transaction");
            }
            Err(err)
        }
    }
}

impl Environment {
    /// Runs a unit of work in a transaction.
    ///
    /// The transaction is nested in the calling thread's current transaction, if any. It
    /// commits when `f` returns `Ok` and aborts when `f` returns `Err` or panics. The
    /// writes of a nested transaction become visible to other threads only once every
    /// enclosing transaction has committed. Committing the outermost transaction writes
    /// each database it changed to its file once.
    ///
    /// Fails with [`ErrorCode::NotInitialized`](crate::ErrorCode::NotInitialized) if the
    /// environment has no transaction support.
    #[inline]
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        run(self, f)
    }
}

/// Runs a unit of work in a transaction of the default environment.
///
/// See [`Environment::transaction`].
pub fn transaction<T, E, F>(f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<Error>,
{
    let env = env::default_env().ok_or_else(|| Error::from(NotInitialized))?;
    run(&env, f)
}

/// The number of transactions the calling thread is nested in.
#[inline]
pub fn transaction_depth() -> usize {
    STACK.with(|stack| stack.0.borrow().len())
}

/// The calling thread's current transaction, to run an operation on a database of `env` in.
pub(crate) fn current_for(env: &Environment) -> Result<Option<Rc<NativeTxn>>> {
    STACK.with(|stack| match stack.0.borrow().last() {
        None => Ok(None),
        Some(top) if top.env == *env => Ok(Some(top.native.clone())),
        Some(top) => {
            tracing::error!(txn = top.id, "database is not in the environment of the transaction");
            Err(Status::EINVAL.into())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{panic, time::Duration};

    use super::{current_for, transaction_depth};
    use crate::{env::EnvOptions, Environment, Error, ErrorCode, Result};

    fn txn_env() -> Environment {
        let mut options = EnvOptions::new();
        options.init_txn(true).lock_timeout(Duration::from_millis(100));
        Environment::open(&options).unwrap()
    }

    #[test]
    fn test_stack_depth() -> Result<()> {
        let env = txn_env();
        assert_eq!(transaction_depth(), 0);
        assert!(current_for(&env)?.is_none());

        env.transaction(|| {
            assert_eq!(transaction_depth(), 1);
            env.transaction(|| {
                assert_eq!(transaction_depth(), 2);
                assert!(current_for(&env)?.is_some());
                Ok::<_, Error>(())
            })?;
            assert_eq!(transaction_depth(), 1);
            Ok::<_, Error>(())
        })?;
        assert_eq!(transaction_depth(), 0);
        Ok(())
    }

    #[test]
    fn test_abort_paths() {
        let env = txn_env();

        let result: std::result::Result<(), &str> = {
            #[derive(Debug)]
            struct Failed;
            impl From<Error> for Failed {
                fn from(_: Error) -> Self {
                    Failed
                }
            }
            env.transaction(|| Err(Failed)).map_err(|_| "failed")
        };
        assert_eq!(result, Err("failed"));
        assert_eq!(transaction_depth(), 0);

        let unwound = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            env.transaction(|| -> Result<()> { panic!("unit of work failed") })
        }));
        assert!(unwound.is_err());
        assert_eq!(transaction_depth(), 0);
    }

    #[test]
    fn test_foreign_environment() {
        let env = txn_env();
        let other = txn_env();

        let err = env
            .transaction(|| other.transaction(|| Ok::<_, Error>(())))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PackageError);
        assert_eq!(err.status(), Some(crate::Status::EINVAL));

        let err = env
            .transaction(|| current_for(&other).map(drop))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PackageError);
        assert_eq!(transaction_depth(), 0);
    }

    #[test]
    fn test_not_initialized() {
        let env = Environment::open(&EnvOptions::new()).unwrap();
        let err = env.transaction(|| Ok::<_, Error>(())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInitialized);
        assert_eq!(transaction_depth(), 0);
    }
}
