//! Value kinds and concrete scalar atoms.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Set of value kinds a value may still take.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kind(u16);

impl Kind {
    pub const BOTTOM: Kind = Kind(0);
    pub const NULL: Kind = Kind(1);
    pub const BOOL: Kind = Kind(1 << 1);
    pub const INT: Kind = Kind(1 << 2);
    pub const FLOAT: Kind = Kind(1 << 3);
    pub const STRING: Kind = Kind(1 << 4);
    pub const BYTES: Kind = Kind(1 << 5);
    pub const LIST: Kind = Kind(1 << 6);
    pub const STRUCT: Kind = Kind(1 << 7);
    pub const NUMBER: Kind = Kind(Self::INT.0 | Self::FLOAT.0);
    pub const TOP: Kind = Kind(0xff);

    const NAMES: [(Kind, &'static str); 8] = [
        (Kind::NULL, "null"),
        (Kind::BOOL, "bool"),
        (Kind::INT, "int"),
        (Kind::FLOAT, "float"),
        (Kind::STRING, "string"),
        (Kind::BYTES, "bytes"),
        (Kind::LIST, "list"),
        (Kind::STRUCT, "struct"),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every kind in `other` is also in `self`.
    pub fn contains(self, other: Kind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Kind) -> bool {
        self.0 & other.0 != 0
    }

    /// Kind named by a predeclared identifier.
    pub fn from_name(name: &str) -> Option<Kind> {
        match name {
            "number" => Some(Kind::NUMBER),
            _ => Self::NAMES
                .iter()
                .find(|(_, n)| *n == name)
                .map(|(kind, _)| *kind),
        }
    }
}

impl BitAnd for Kind {
    type Output = Kind;

    fn bitand(self, rhs: Kind) -> Kind {
        Kind(self.0 & rhs.0)
    }
}

impl BitOr for Kind {
    type Output = Kind;

    fn bitor(self, rhs: Kind) -> Kind {
        Kind(self.0 | rhs.0)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Kind::TOP {
            return write!(f, "_");
        }
        if self.is_empty() {
            return write!(f, "_|_");
        }
        let mut names = Vec::new();
        let mut rest = *self;
        if rest.contains(Kind::NUMBER) {
            names.push("number");
            rest = Kind(rest.0 & !Kind::NUMBER.0);
        }
        for (kind, name) in Self::NAMES {
            if rest.contains(kind) {
                names.push(name);
            }
        }
        write!(f, "{}", names.join("|"))
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind({})", self)
    }
}

/// A concrete scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    String(String),
}

impl Atom {
    pub fn kind(&self) -> Kind {
        match self {
            Atom::Null => Kind::NULL,
            Atom::Bool(_) => Kind::BOOL,
            Atom::Int(_) => Kind::INT,
            Atom::Float(_) => Kind::FLOAT,
            Atom::String(_) => Kind::STRING,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Atom::Int(i) => Some(*i as f64),
            Atom::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering for numbers (across int and float) and strings.
    pub fn compare(&self, other: &Atom) -> Option<Ordering> {
        match (self, other) {
            (Atom::Int(a), Atom::Int(b)) => Some(a.cmp(b)),
            (Atom::String(a), Atom::String(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Equality as observed by `==`: numbers compare by value.
    pub fn equals(&self, other: &Atom) -> bool {
        match (self, other) {
            (Atom::Null, Atom::Null) => true,
            (Atom::Bool(a), Atom::Bool(b)) => a == b,
            (Atom::String(a), Atom::String(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// JSON form of the atom, `None` for numbers JSON cannot hold exactly.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Atom::Null => Some(serde_json::Value::Null),
            Atom::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Atom::Int(i) => i64::try_from(*i)
                .map(serde_json::Value::from)
                .or_else(|_| u64::try_from(*i).map(serde_json::Value::from))
                .ok(),
            Atom::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            Atom::String(s) => Some(serde_json::Value::String(s.clone())),
        }
    }

    /// Atom for a JSON number, keeping integers that only fit in `u64`.
    pub fn from_json_number(n: &serde_json::Number) -> Atom {
        if let Some(i) = n.as_i64() {
            Atom::Int(i128::from(i))
        } else if let Some(u) = n.as_u64() {
            Atom::Int(i128::from(u))
        } else {
            Atom::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    /// Floats must stay finite.
    pub(crate) fn checked_float(value: f64) -> Result<Atom, crate::error::Error> {
        if value.is_finite() {
            Ok(Atom::Float(value))
        } else {
            Err(crate::error::Error::conflict("value out of range"))
        }
    }

    /// Text used when the atom is interpolated into a string.
    pub fn interpolated(&self) -> Option<String> {
        match self {
            Atom::Null => None,
            Atom::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Null => write!(f, "null"),
            Atom::Bool(b) => write!(f, "{}", b),
            Atom::Int(i) => write!(f, "{}", i),
            Atom::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{:.1}", v),
            Atom::Float(v) => write!(f, "{}", v),
            Atom::String(s) => {
                let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                write!(f, "{}", quoted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(Kind::TOP.to_string(), "_");
        assert_eq!(Kind::NUMBER.to_string(), "number");
        assert_eq!((Kind::STRING | Kind::NULL).to_string(), "null|string");
        assert_eq!(Kind::STRUCT.to_string(), "struct");
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(Kind::from_name("int"), Some(Kind::INT));
        assert_eq!(Kind::from_name("number"), Some(Kind::NUMBER));
        assert_eq!(Kind::from_name("nope"), None);
    }

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert!(Atom::Int(1).equals(&Atom::Float(1.0)));
        assert!(!Atom::Int(1).equals(&Atom::String("1".into())));
    }

    #[test]
    fn test_json_out_of_range() {
        assert_eq!(Atom::Int(i128::from(u64::MAX)).to_json(), Some(serde_json::json!(u64::MAX)));
        assert_eq!(Atom::Int(i128::from(u64::MAX) + 1).to_json(), None);
        assert_eq!(Atom::Float(f64::INFINITY).to_json(), None);
        assert!(Atom::checked_float(f64::NAN).is_err());
    }

    #[test]
    fn test_from_json_number() {
        let n = serde_json::Number::from(u64::MAX);
        assert_eq!(Atom::from_json_number(&n), Atom::Int(i128::from(u64::MAX)));
        let n = serde_json::Number::from_f64(1.5).unwrap();
        assert_eq!(Atom::from_json_number(&n), Atom::Float(1.5));
    }

    #[test]
    fn test_atom_display() {
        assert_eq!(Atom::Float(2.0).to_string(), "2.0");
        assert_eq!(Atom::String("a\"b".into()).to_string(), "\"a\\\"b\"");
    }
}
