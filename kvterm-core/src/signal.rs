/// Defers delivery of `SIGINT` to the calling thread while alive.
///
/// The previous signal mask is restored on drop, so the guard also covers early returns
/// and unwinding out of a store call.
pub(crate) struct NoSig {
    #[cfg(unix)]
    old: libc::sigset_t,
}

#[cfg(unix)]
impl NoSig {
    pub(crate) fn new() -> Self {
        unsafe {
            let mut set = std::mem::zeroed::<libc::sigset_t>();
            let mut old = std::mem::zeroed::<libc::sigset_t>();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGINT);
            libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut old);
            Self { old }
        }
    }
}

#[cfg(unix)]
impl Drop for NoSig {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.old, std::ptr::null_mut());
        }
    }
}

#[cfg(not(unix))]
impl NoSig {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {}
    }
}

/// Runs a native store call with `SIGINT` deferred.
#[inline]
pub(crate) fn nosig<T>(call: impl FnOnce() -> T) -> T {
    let _guard = NoSig::new();
    call()
}

#[cfg(all(test, unix))]
mod tests {
    use super::{nosig, NoSig};

    fn sigint_blocked() -> bool {
        unsafe {
            let mut current = std::mem::zeroed::<libc::sigset_t>();
            libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), &mut current);
            libc::sigismember(&current, libc::SIGINT) == 1
        }
    }

    #[test]
    fn test_guard_restores_mask() {
        assert!(!sigint_blocked());
        {
            let _outer = NoSig::new();
            assert!(sigint_blocked());
            nosig(|| assert!(sigint_blocked()));
            // The nested guard restores the outer guard's mask.
            assert!(sigint_blocked());
        }
        assert!(!sigint_blocked());

        let result = std::panic::catch_unwind(|| nosig(|| panic!("store call failed")));
        assert!(result.is_err());
        assert!(!sigint_blocked());
    }
}
