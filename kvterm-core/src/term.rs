use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A value of the host runtime, in tagged form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Atom(String),
    Integer(i64),
    Float(f64),
    String(String),
    /// An unbound variable, numbered within the term it occurs in.
    Variable(u32),
    List(Vec<Term>),
    /// A compound term with its functor name and arguments.
    Compound(String, Vec<Term>),
}

impl Term {
    #[inline]
    pub fn atom(name: impl Into<String>) -> Self {
        Self::Atom(name.into())
    }

    #[inline]
    pub fn string(text: impl Into<String>) -> Self {
        Self::String(text.into())
    }

    #[inline]
    pub fn compound(name: impl Into<String>, args: impl IntoIterator<Item = Term>) -> Self {
        Self::Compound(name.into(), args.into_iter().collect())
    }

    /// The textual content of an atom or a string.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Atom(s) | Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the two terms can be made equal by binding variables.
    ///
    /// Each variable occurrence matches on its own, bindings are not carried between
    /// occurrences.
    pub fn matches(&self, other: &Term) -> bool {
        match (self, other) {
            (Self::Variable(_), _) | (_, Self::Variable(_)) => true,
            (Self::List(a), Self::List(b)) => matches_all(a, b),
            (Self::Compound(f, a), Self::Compound(g, b)) => f == g && matches_all(a, b),
            (a, b) => a == b,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Atom(_) => "atom",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Variable(_) => "variable",
            Self::List(_) => "list",
            Self::Compound(..) => "compound",
        }
    }
}

impl From<i64> for Term {
    #[inline]
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Term {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<Term>> for Term {
    #[inline]
    fn from(value: Vec<Term>) -> Self {
        Self::List(value)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atom(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Variable(n) => write!(f, "_G{n}"),
            Self::List(items) => {
                f.write_str("[")?;
                write_args(f, items)?;
                f.write_str("]")
            }
            Self::Compound(name, args) => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
        }
    }
}

#[inline]
fn matches_all(a: &[Term], b: &[Term]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.matches(b))
}

fn write_args(f: &mut Formatter<'_>, args: &[Term]) -> std::fmt::Result {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            f.write_str(",")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Term;

    #[test]
    fn test_display() {
        let term = Term::compound(
            "point",
            [Term::Integer(1), Term::List(vec![Term::atom("a"), Term::string("b")])],
        );
        assert_eq!(term.to_string(), r#"point(1,[a,"b"])"#);
        assert_eq!(Term::Variable(3).to_string(), "_G3");
    }

    #[test]
    fn test_matches() {
        let stored = Term::compound("pair", [Term::atom("a"), Term::Integer(2)]);
        assert!(stored.matches(&stored.clone()));
        assert!(Term::Variable(0).matches(&stored));
        assert!(Term::compound("pair", [Term::atom("a"), Term::Variable(0)]).matches(&stored));
        assert!(!Term::compound("pair", [Term::atom("b"), Term::Variable(0)]).matches(&stored));
        assert!(!Term::compound("pair", [Term::atom("a")]).matches(&stored));
        assert!(!Term::Integer(2).matches(&Term::Float(2.0)));
    }
}
