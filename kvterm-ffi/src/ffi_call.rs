use std::{panic, ptr, thread};

use kvterm::ErrorCode;

use crate::bytes::FFIBytes;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FFICallCode {
    FFICallSuccess = 0,
    FFICallPanic,
    FFICallErrType,
    FFICallErrDomain,
    FFICallErrPermission,
    FFICallErrResource,
    FFICallErrDeadlock,
    FFICallErrRecovery,
    FFICallErrPackage,
    FFICallErrNotInitialized,
}

use FFICallCode::*;

#[repr(C)]
pub struct FFICallState {
    code: FFICallCode,
    /// The raw store status of a failed call, 0 if the store did not report one.
    status: i32,
    err_desc: FFIBytes,
}

pub(crate) fn ffi_call<T, F>(state: &mut FFICallState, call: F) -> T
where
    T: FFIDefault,
    F: FnOnce() -> kvterm::Result<T> + panic::UnwindSafe,
{
    let result = panic::catch_unwind(call);
    *state = result.call_state();
    result
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or(FFIDefault::default())
}

trait FFICallResult {
    fn call_state(&self) -> FFICallState;
}

impl<T> FFICallResult for thread::Result<T>
where
    T: FFICallResult,
{
    fn call_state(&self) -> FFICallState {
        match self {
            Ok(result) => result.call_state(),
            Err(err) => {
                let err_desc = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    if let Some(s) = err.downcast_ref::<&'static str>() {
                        s.to_string()
                    } else if let Some(s) = err.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "panic!".to_string()
                    }
                    .into()
                }))
                .unwrap_or_default();
                tracing::error!("call panicked across the foreign boundary");

                FFICallState {
                    code: FFICallPanic,
                    status: 0,
                    err_desc,
                }
            }
        }
    }
}

impl<T> FFICallResult for kvterm::Result<T> {
    #[inline]
    fn call_state(&self) -> FFICallState {
        match self {
            Ok(_) => FFICallState {
                code: FFICallSuccess,
                status: 0,
                err_desc: FFIBytes::null(),
            },
            Err(err) => err.call_state(),
        }
    }
}

impl FFICallResult for kvterm::Error {
    fn call_state(&self) -> FFICallState {
        let code = match self.code() {
            ErrorCode::TypeError => FFICallErrType,
            ErrorCode::DomainError => FFICallErrDomain,
            ErrorCode::PermissionError => FFICallErrPermission,
            ErrorCode::ResourceError => FFICallErrResource,
            ErrorCode::Deadlock => FFICallErrDeadlock,
            ErrorCode::RecoveryRequired => FFICallErrRecovery,
            ErrorCode::PackageError => FFICallErrPackage,
            ErrorCode::NotInitialized => FFICallErrNotInitialized,
        };
        let status = self.status().map_or(0, |s| s.raw());
        let err_desc = self.to_string().into();

        FFICallState {
            code,
            status,
            err_desc,
        }
    }
}

pub(crate) trait FFIDefault {
    fn default() -> Self;
}

impl<T> FFIDefault for *mut T {
    #[inline]
    fn default() -> Self {
        ptr::null_mut()
    }
}

impl FFIDefault for () {
    #[inline]
    fn default() -> Self {}
}

impl FFIDefault for u8 {
    #[inline]
    fn default() -> Self {
        0
    }
}

impl FFIDefault for FFIBytes {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
impl FFICallState {
    pub(crate) fn new() -> Self {
        Self {
            code: FFICallSuccess,
            status: 0,
            err_desc: FFIBytes::null(),
        }
    }

    pub(crate) fn code(&self) -> FFICallCode {
        self.code
    }

    pub(crate) fn status(&self) -> i32 {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use kvterm::Status;

    use super::{ffi_call, FFICallCode, FFICallState};

    #[test]
    fn test_call_codes() {
        let mut state = FFICallState::new();

        let value: u8 = ffi_call(&mut state, || Ok(7));
        assert_eq!((value, state.code()), (7, FFICallCode::FFICallSuccess));

        let value: u8 = ffi_call(&mut state, || Err(Status::LOCK_DEADLOCK.into()));
        assert_eq!((value, state.code()), (0, FFICallCode::FFICallErrDeadlock));
        assert_eq!(state.status(), Status::LOCK_DEADLOCK.raw());

        let value: u8 = ffi_call(&mut state, || panic!("boom"));
        assert_eq!((value, state.code()), (0, FFICallCode::FFICallPanic));
        assert_eq!(state.status(), 0);
    }
}
