use std::{ffi::c_void, mem::ManuallyDrop, ptr, slice, str};

use kvterm::{Status, Term};

use crate::ffi_call::{ffi_call, FFICallState};

#[repr(C)]
pub struct FFIBytesRef {
    ptr: *const c_void,
    length: u32,
}

impl FFIBytesRef {
    #[cfg(test)]
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr().cast(),
            length: bytes.len() as u32,
        }
    }

    #[inline]
    pub(crate) unsafe fn into_slice<'a>(self) -> &'a [u8] {
        if self.ptr.is_null() {
            return &[];
        }
        slice::from_raw_parts(self.ptr as *const u8, self.length as usize)
    }

    #[inline]
    pub(crate) unsafe fn into_str<'a>(self) -> kvterm::Result<&'a str> {
        str::from_utf8(self.into_slice()).map_err(|_| Status::EINVAL.into())
    }

    #[inline]
    pub(crate) unsafe fn into_term(self) -> kvterm::Result<Term> {
        Term::from_bytes(self.into_slice())
    }

    /// An option list. Empty bytes stand for the empty list, a single option may be
    /// passed without the enclosing list.
    pub(crate) unsafe fn into_terms(self) -> kvterm::Result<Vec<Term>> {
        if self.length == 0 {
            return Ok(Vec::new());
        }
        Ok(match self.into_term()? {
            Term::List(terms) => terms,
            term => vec![term],
        })
    }
}

#[repr(C)]
pub struct FFIBytes {
    ptr: *mut c_void,
    length: u32,
    capacity: u32,
}

impl FFIBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            length: bytes.len().try_into().expect("length cannot fit into u32"),
            capacity: bytes
                .capacity()
                .try_into()
                .expect("capacity cannot fit into u32"),
            ptr: ManuallyDrop::new(bytes).as_mut_ptr() as *mut c_void,
        }
    }

    #[inline]
    pub(crate) fn from_term(term: &Term) -> kvterm::Result<Self> {
        term.to_bytes().map(Self::new)
    }

    #[inline]
    pub(crate) const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            length: 0,
            capacity: 0,
        }
    }

    #[cfg(test)]
    pub(crate) unsafe fn into_term(self) -> kvterm::Result<Term> {
        Term::from_bytes(&self.lift())
    }

    #[inline]
    pub(crate) unsafe fn dealloc(self) {
        drop(self.lift());
    }

    unsafe fn lift(self) -> Vec<u8> {
        if self.ptr.is_null() {
            return Vec::new();
        }
        assert!(self.length <= self.capacity);
        Vec::from_raw_parts(
            self.ptr as *mut u8,
            self.length as usize,
            self.capacity as usize,
        )
    }
}

impl Default for FFIBytes {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T> From<T> for FFIBytes
where
    T: Into<Vec<u8>>,
{
    #[inline]
    fn from(value: T) -> Self {
        Self::new(value.into())
    }
}

/// Writes `bytes` to the output slot, if one was given.
#[inline]
pub(crate) unsafe fn store(slot: *mut FFIBytes, bytes: FFIBytes) {
    if slot.is_null() {
        bytes.dealloc();
    } else {
        slot.write(bytes);
    }
}

#[no_mangle]
pub unsafe extern "C" fn kvterm_bytes_dealloc(bytes: FFIBytes, call_state: &mut FFICallState) {
    ffi_call(call_state, || {
        bytes.dealloc();
        Ok(())
    })
}
