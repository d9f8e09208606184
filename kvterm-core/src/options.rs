use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{codec::Encoding, term::Term};

/// The mode a database is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Open an existing database read-only.
    Read,
    /// Open for reading and writing, creating the database if it does not exist.
    Update,
}

/// The access method of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessMethod {
    #[default]
    Btree,
    Hash,
    /// Records keyed by record number.
    Recno,
    /// Adopts the access method of an existing database.
    Unknown,
}

#[derive(Error, Debug)]
#[error("unknown {kind}: {value:?}")]
pub(crate) struct UnknownOption {
    pub(crate) kind: &'static str,
    pub(crate) value: String,
}

impl UnknownOption {
    #[inline]
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

#[derive(Error, Debug)]
#[error("expected {expected}, found {found}")]
pub(crate) struct WrongType {
    pub(crate) expected: &'static str,
    pub(crate) found: String,
}

impl WrongType {
    #[inline]
    pub(crate) fn new(expected: &'static str, found: &Term) -> Self {
        Self {
            expected,
            found: found.to_string(),
        }
    }
}

impl FromStr for Mode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            _ => Err(UnknownOption::new("io_mode", s).into()),
        }
    }
}

impl FromStr for AccessMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btree" => Ok(Self::Btree),
            "hash" => Ok(Self::Hash),
            "recno" => Ok(Self::Recno),
            "unknown" => Ok(Self::Unknown),
            _ => Err(UnknownOption::new("db_type", s).into()),
        }
    }
}

impl Display for AccessMethod {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Btree => "btree",
            Self::Hash => "hash",
            Self::Recno => "recno",
            Self::Unknown => "unknown",
        })
    }
}

impl FromStr for Encoding {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "term" => Ok(Self::Term),
            "atom" => Ok(Self::Atom),
            "c_blob" => Ok(Self::Blob),
            "c_string" => Ok(Self::CString),
            "c_long" => Ok(Self::CLong),
            _ => Err(UnknownOption::new("type", s).into()),
        }
    }
}

/// The options for opening a database.
#[derive(Debug, Clone, Default)]
pub struct DbOptions {
    pub(crate) access_method: AccessMethod,
    pub(crate) duplicates: bool,
    pub(crate) database: Option<String>,
    pub(crate) key: Encoding,
    pub(crate) value: Encoding,
}

impl DbOptions {
    /// Creates a new DbOptions instance with default values.
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the access method. By default, it is [`AccessMethod::Btree`].
    #[inline]
    pub fn access_method(&mut self, method: AccessMethod) -> &mut Self {
        self.access_method = method;
        self
    }

    /// Allow multiple values under one key, kept in insertion order.
    #[inline]
    pub fn duplicates(&mut self, flag: bool) -> &mut Self {
        self.duplicates = flag;
        self
    }

    /// Open a named database within the file instead of the unnamed one.
    #[inline]
    pub fn database(&mut self, name: impl Into<String>) -> &mut Self {
        self.database = Some(name.into());
        self
    }

    /// Set the encoding of keys. By default, it is [`Encoding::Term`].
    #[inline]
    pub fn key(&mut self, encoding: Encoding) -> &mut Self {
        self.key = encoding;
        self
    }

    /// Set the encoding of values. By default, it is [`Encoding::Term`].
    #[inline]
    pub fn value(&mut self, encoding: Encoding) -> &mut Self {
        self.value = encoding;
        self
    }

    /// Applies a `name(value)` option as found in an option list.
    pub fn set(&mut self, name: &str, value: &str) -> crate::Result<&mut Self> {
        match name {
            "type" => self.access_method = value.parse()?,
            "duplicates" => self.duplicates = parse_bool(value)?,
            "database" => self.database = Some(value.to_string()),
            "key" => self.key = value.parse()?,
            "value" => self.value = value.parse()?,
            _ => return Err(UnknownOption::new("db_option", name).into()),
        }
        Ok(self)
    }

    /// Builds the options from an option list such as `[type(hash), duplicates(true)]`.
    pub fn from_terms(options: &[Term]) -> crate::Result<Self> {
        let mut this = Self::new();
        for term in options {
            let (name, arg) = unary(term, "db_option")?;
            match name {
                "duplicates" => this.duplicates = bool_arg(arg)?,
                _ => {
                    this.set(name, text_arg(arg)?)?;
                }
            }
        }
        Ok(this)
    }
}

/// Splits an option `name(Arg)` into its parts.
pub(crate) fn unary<'a>(term: &'a Term, kind: &'static str) -> crate::Result<(&'a str, &'a Term)> {
    match term {
        Term::Compound(name, args) if args.len() == 1 => Ok((name.as_str(), &args[0])),
        _ => Err(WrongType::new(kind, term).into()),
    }
}

pub(crate) fn text_arg(term: &Term) -> crate::Result<&str> {
    term.text().ok_or_else(|| WrongType::new("text", term).into())
}

pub(crate) fn int_arg(term: &Term) -> crate::Result<i64> {
    match term {
        Term::Integer(value) => Ok(*value),
        _ => Err(WrongType::new("integer", term).into()),
    }
}

/// A non-negative integer argument.
pub(crate) fn size_arg(term: &Term) -> crate::Result<u64> {
    let value = int_arg(term)?;
    u64::try_from(value).map_err(|_| UnknownOption::new("size", value.to_string()).into())
}

pub(crate) fn bool_arg(term: &Term) -> crate::Result<bool> {
    match term {
        Term::Atom(value) => parse_bool(value),
        _ => Err(WrongType::new("bool", term).into()),
    }
}

pub(crate) fn parse_bool(value: &str) -> crate::Result<bool> {
    match value {
        "true" | "on" => Ok(true),
        "false" | "off" => Ok(false),
        _ => Err(UnknownOption::new("bool", value).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessMethod, DbOptions, Mode};
    use crate::{codec::Encoding, ErrorCode, Term};

    #[test]
    fn test_parse() {
        assert_eq!("read".parse::<Mode>().unwrap(), Mode::Read);
        assert_eq!("hash".parse::<AccessMethod>().unwrap(), AccessMethod::Hash);
        assert_eq!("c_long".parse::<Encoding>().unwrap(), Encoding::CLong);

        for err in [
            "append".parse::<Mode>().unwrap_err(),
            "queue".parse::<AccessMethod>().unwrap_err(),
            "c_double".parse::<Encoding>().unwrap_err(),
        ] {
            assert_eq!(err.code(), ErrorCode::DomainError);
        }
    }

    #[test]
    fn test_set() {
        let mut options = DbOptions::new();
        options
            .set("type", "recno")
            .unwrap()
            .set("key", "c_long")
            .unwrap()
            .set("duplicates", "false")
            .unwrap()
            .set("database", "names")
            .unwrap();

        assert_eq!(options.access_method, AccessMethod::Recno);
        assert_eq!(options.key, Encoding::CLong);
        assert_eq!(options.value, Encoding::Term);
        assert!(!options.duplicates);
        assert_eq!(options.database.as_deref(), Some("names"));

        let err = options.set("page_size", "4096").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DomainError);
        let err = options.set("duplicates", "maybe").unwrap_err();
        assert_eq!(err.code(), ErrorCode::DomainError);
    }

    #[test]
    fn test_from_terms() {
        let options = DbOptions::from_terms(&[
            Term::compound("type", [Term::atom("hash")]),
            Term::compound("duplicates", [Term::atom("true")]),
            Term::compound("value", [Term::atom("c_string")]),
            Term::compound("database", [Term::string("names")]),
        ])
        .unwrap();
        assert_eq!(options.access_method, AccessMethod::Hash);
        assert!(options.duplicates);
        assert_eq!(options.key, Encoding::Term);
        assert_eq!(options.value, Encoding::CString);
        assert_eq!(options.database.as_deref(), Some("names"));

        let err = DbOptions::from_terms(&[Term::atom("duplicates")]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeError);
        let err = DbOptions::from_terms(&[Term::compound("duplicates", [Term::Integer(1)])])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeError);
        let err = DbOptions::from_terms(&[Term::compound("key", [Term::atom("c_double")])])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DomainError);
    }
}
