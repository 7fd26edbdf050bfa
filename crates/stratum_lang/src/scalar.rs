//! Scalar part of a value: kind set, optional atom and pending constraints.

use crate::atom::{Atom, Kind};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundOp {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    NotEqual,
}

/// A non-concrete restriction on a scalar.
#[derive(Debug, Clone)]
pub enum Constraint {
    Bound(BoundOp, Atom),
    Regex { negated: bool, regex: Regex },
}

impl Constraint {
    pub fn regex(pattern: &str, negated: bool) -> Result<Self, String> {
        Regex::new(pattern)
            .map(|regex| Constraint::Regex { negated, regex })
            .map_err(|e| format!("invalid regular expression {:?}: {}", pattern, e))
    }

    /// Kinds a value satisfying this constraint can have.
    pub fn kind(&self) -> Kind {
        match self {
            Constraint::Bound(BoundOp::NotEqual, _) => Kind::TOP,
            Constraint::Bound(_, atom) if atom.as_f64().is_some() => Kind::NUMBER,
            Constraint::Bound(_, atom) => atom.kind(),
            Constraint::Regex { .. } => Kind::STRING,
        }
    }

    pub fn check(&self, atom: &Atom) -> bool {
        match self {
            Constraint::Bound(BoundOp::NotEqual, bound) => !atom.equals(bound),
            Constraint::Bound(op, bound) => match atom.compare(bound) {
                Some(ordering) => match op {
                    BoundOp::Less => ordering == Ordering::Less,
                    BoundOp::LessOrEqual => ordering != Ordering::Greater,
                    BoundOp::Greater => ordering == Ordering::Greater,
                    BoundOp::GreaterOrEqual => ordering != Ordering::Less,
                    BoundOp::NotEqual => unreachable!("handled above"),
                },
                None => false,
            },
            Constraint::Regex { negated, regex } => match atom {
                Atom::String(s) => regex.is_match(s) != *negated,
                _ => false,
            },
        }
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constraint::Bound(a, x), Constraint::Bound(b, y)) => a == b && x == y,
            (
                Constraint::Regex { negated: a, regex: x },
                Constraint::Regex { negated: b, regex: y },
            ) => a == b && x.as_str() == y.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Bound(op, atom) => {
                let op = match op {
                    BoundOp::Less => "<",
                    BoundOp::LessOrEqual => "<=",
                    BoundOp::Greater => ">",
                    BoundOp::GreaterOrEqual => ">=",
                    BoundOp::NotEqual => "!=",
                };
                write!(f, "{}{}", op, atom)
            }
            Constraint::Regex { negated, regex } => {
                let op = if *negated { "!~" } else { "=~" };
                write!(f, "{}{}", op, Atom::String(regex.as_str().to_string()))
            }
        }
    }
}

/// The scalar lattice element tracked for every vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub kind: Kind,
    pub atom: Option<Atom>,
    pub constraints: Vec<Constraint>,
}

impl Default for Scalar {
    fn default() -> Self {
        Self::top()
    }
}

impl Scalar {
    pub fn top() -> Self {
        Self {
            kind: Kind::TOP,
            atom: None,
            constraints: Vec::new(),
        }
    }

    pub fn from_kind(kind: Kind) -> Self {
        Self {
            kind,
            ..Self::top()
        }
    }

    pub fn from_atom(atom: Atom) -> Self {
        Self {
            kind: atom.kind(),
            atom: Some(atom),
            constraints: Vec::new(),
        }
    }

    pub fn from_constraint(constraint: Constraint) -> Self {
        Self {
            kind: constraint.kind(),
            atom: None,
            constraints: vec![constraint],
        }
    }

    pub fn is_concrete(&self) -> bool {
        self.atom.is_some()
    }

    /// Meet of two scalars, or the conflict message.
    pub fn unify(&self, other: &Scalar) -> Result<Scalar, String> {
        let kind = self.kind & other.kind;
        if kind.is_empty() {
            // Concrete side first.
            let (a, b) = if self.atom.is_some() && other.atom.is_none() {
                (self, other)
            } else {
                (other, self)
            };
            return Err(format!(
                "conflicting values {} and {} (mismatched types {} and {})",
                a.describe(),
                b.describe(),
                a.kind,
                b.kind
            ));
        }

        let atom = match (&self.atom, &other.atom) {
            (Some(a), Some(b)) => {
                if a != b {
                    return Err(format!("conflicting values {} and {}", b, a));
                }
                Some(a.clone())
            }
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        let mut constraints = self.constraints.clone();
        for c in &other.constraints {
            if !constraints.contains(c) {
                constraints.push(c.clone());
            }
        }

        let kind = match &atom {
            Some(a) => kind & a.kind(),
            None => kind,
        };
        if let Some(a) = &atom {
            if let Some(c) = constraints.iter().find(|c| !c.check(a)) {
                return Err(format!("invalid value {} (out of bound {})", a, c));
            }
            // A concrete value makes the constraints redundant.
            constraints.clear();
        }

        Ok(Scalar {
            kind,
            atom,
            constraints,
        })
    }

    /// Short human-readable form used in diagnostics.
    pub fn describe(&self) -> String {
        if let Some(atom) = &self.atom {
            return atom.to_string();
        }
        let base = if self.kind == Kind::STRUCT {
            "{...}".to_string()
        } else if self.kind == Kind::LIST {
            "[...]".to_string()
        } else {
            self.kind.to_string()
        };
        if self.constraints.is_empty() {
            return base;
        }
        let constraints: Vec<String> = self.constraints.iter().map(|c| c.to_string()).collect();
        let implied = self
            .constraints
            .iter()
            .fold(Kind::TOP, |acc, c| acc & c.kind());
        if implied == self.kind {
            constraints.join(" & ")
        } else {
            format!("{} & {}", base, constraints.join(" & "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_conflict_message() {
        let a = Scalar::from_kind(Kind::STRUCT);
        let b = Scalar::from_atom(Atom::Int(0));
        let err = a.unify(&b).unwrap_err();
        assert_eq!(
            err,
            "conflicting values 0 and {...} (mismatched types int and struct)"
        );
    }

    #[test]
    fn test_atom_conflict() {
        let a = Scalar::from_atom(Atom::String("a".into()));
        let b = Scalar::from_atom(Atom::String("b".into()));
        assert!(a.unify(&b).unwrap_err().starts_with("conflicting values"));
    }

    #[test]
    fn test_bound_violation() {
        let bound = Scalar::from_constraint(Constraint::Bound(BoundOp::Greater, Atom::Int(10)));
        let err = bound.unify(&Scalar::from_atom(Atom::Int(5))).unwrap_err();
        assert_eq!(err, "invalid value 5 (out of bound >10)");
    }

    #[test]
    fn test_regex_constraint() {
        let re = Scalar::from_constraint(Constraint::regex("^bar$", false).unwrap());
        assert!(re.unify(&Scalar::from_atom(Atom::String("bar".into()))).is_ok());
        assert!(re.unify(&Scalar::from_atom(Atom::String("brr".into()))).is_err());
        assert!(re.unify(&Scalar::from_atom(Atom::Int(1))).is_err());
    }

    #[test]
    fn test_kind_narrowing() {
        let number = Scalar::from_kind(Kind::NUMBER);
        let int = number.unify(&Scalar::from_kind(Kind::INT)).unwrap();
        assert_eq!(int.kind, Kind::INT);
        assert!(!int.is_concrete());
    }

    #[test]
    fn test_describe_constraints() {
        let s = Scalar::from_kind(Kind::STRING)
            .unify(&Scalar::from_constraint(
                Constraint::Bound(BoundOp::NotEqual, Atom::String(String::new())),
            ))
            .unwrap();
        assert_eq!(s.describe(), "string & !=\"\"");
    }
}
