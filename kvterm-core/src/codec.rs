//! Conversion between host terms and the byte buffers handed to the store.

use std::{
    fmt::{Display, Formatter},
    mem, str,
};

use libc::c_long;
use thiserror::Error;

use crate::term::Term;

/// The declared representation of keys or values in a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// Any term, in a self-describing serialized form.
    #[default]
    Term,
    /// An atom as UTF-8 text, without terminator.
    Atom,
    /// Text as ISO Latin-1 bytes, without transcoding.
    Blob,
    /// UTF-8 text with a trailing NUL.
    CString,
    /// A native endian C `long`.
    CLong,
}

impl Display for Encoding {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Term => "term",
            Self::Atom => "atom",
            Self::Blob => "c_blob",
            Self::CString => "c_string",
            Self::CLong => "c_long",
        })
    }
}

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("expected {expected} for the {encoding} encoding, found {found}")]
    Unexpected {
        encoding: Encoding,
        expected: &'static str,
        found: &'static str,
    },
    #[error("character {0:?} cannot be represented in ISO Latin-1")]
    NotLatin1(char),
    #[error("text with an embedded NUL cannot be stored as c_string")]
    InteriorNul,
    #[error("integer {0} does not fit into a C long")]
    IntegerRange(i64),
    #[error("failed to allocate a buffer of {0} bytes")]
    Allocation(usize),
    #[error("stored bytes are not valid for the {0} encoding")]
    Malformed(Encoding),
    #[error(transparent)]
    Serialization(#[from] bincode::Error),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

/// An encoded key or value, owned until the store call that consumes it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dbt(Vec<u8>);

impl Dbt {
    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Encoding {
    /// Encodes a term into a buffer under this encoding.
    pub(crate) fn encode(self, term: &Term) -> Result<Dbt> {
        let data = match self {
            Self::Term => {
                let mut data = buffer(bincode::serialized_size(term)? as usize)?;
                bincode::serialize_into(&mut data, term)?;
                data
            }
            Self::Atom => match term {
                Term::Atom(s) => copy_bytes(s.as_bytes(), 0)?,
                other => return Err(self.unexpected("atom", other)),
            },
            Self::Blob => {
                let text = self.text(term)?;
                let mut data = buffer(text.len())?;
                for c in text.chars() {
                    let byte = u8::try_from(u32::from(c)).map_err(|_| Error::NotLatin1(c))?;
                    data.push(byte);
                }
                data
            }
            Self::CString => {
                let text = self.text(term)?;
                if text.as_bytes().contains(&0) {
                    return Err(Error::InteriorNul);
                }
                // The stored length accounts for the terminator.
                let mut data = copy_bytes(text.as_bytes(), 1)?;
                data.push(0);
                data
            }
            Self::CLong => match term {
                Term::Integer(i) => {
                    let value = c_long::try_from(*i).map_err(|_| Error::IntegerRange(*i))?;
                    copy_bytes(&value.to_ne_bytes(), 0)?
                }
                other => return Err(self.unexpected("integer", other)),
            },
        };
        Ok(Dbt(data))
    }

    /// Decodes bytes read from the store. The bytes are not retained.
    pub(crate) fn decode(self, bytes: &[u8]) -> Result<Term> {
        match self {
            Self::Term => bincode::deserialize(bytes).map_err(Into::into),
            Self::Atom => str::from_utf8(bytes)
                .map(Term::atom)
                .map_err(|_| Error::Malformed(self)),
            Self::Blob => Ok(Term::String(bytes.iter().map(|&b| char::from(b)).collect())),
            Self::CString => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                str::from_utf8(&bytes[..end])
                    .map(Term::atom)
                    .map_err(|_| Error::Malformed(self))
            }
            Self::CLong => <[u8; mem::size_of::<c_long>()]>::try_from(bytes)
                .map(|raw| Term::Integer(c_long::from_ne_bytes(raw) as i64))
                .map_err(|_| Error::Malformed(self)),
        }
    }

    #[inline]
    fn text(self, term: &Term) -> Result<&str> {
        term.text().ok_or_else(|| self.unexpected("text", term))
    }

    #[inline]
    fn unexpected(self, expected: &'static str, found: &Term) -> Error {
        Error::Unexpected {
            encoding: self,
            expected,
            found: found.kind(),
        }
    }
}

impl Term {
    /// Serializes the term into the structured byte form.
    #[inline]
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(Encoding::Term.encode(self)?.0)
    }

    /// Deserializes a term from the structured byte form.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(Encoding::Term.decode(bytes)?)
    }
}

fn buffer(capacity: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| Error::Allocation(capacity))?;
    Ok(data)
}

#[inline]
fn copy_bytes(bytes: &[u8], extra: usize) -> Result<Vec<u8>> {
    let mut data = buffer(bytes.len() + extra)?;
    data.extend_from_slice(bytes);
    Ok(data)
}
