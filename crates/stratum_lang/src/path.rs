//! Field paths such as `template.items[0]."cnrm.cloud.google.com/name"`.

use crate::ast::Label;
use crate::error::Error;
use crate::parser::parse_path;
use std::fmt;
use std::str::FromStr;

/// A sequence of labels selecting a value below a root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    labels: Vec<Label>,
}

impl Path {
    /// The empty path, selecting the root itself.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_labels(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Parses a dotted path. Labels are identifiers, quoted strings or list
    /// indexes, either dotted or in brackets.
    pub fn parse(text: &str) -> Result<Self, Error> {
        parse_path(text).map(Self::from_labels)
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut labels = self.labels.clone();
        labels.extend(other.labels.iter().cloned());
        Path { labels }
    }

    /// String form of each label, as used in diagnostics.
    pub fn selectors(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.to_string()).collect()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selectors().join("."))
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted() {
        let path = Path::parse("template.items").unwrap();
        assert_eq!(
            path.labels(),
            &[
                Label::Regular("template".into()),
                Label::Regular("items".into())
            ]
        );
        assert_eq!(path.to_string(), "template.items");
    }

    #[test]
    fn test_parse_quoted_and_index() {
        let path = Path::parse("a.\"b/c\"[2].#D").unwrap();
        assert_eq!(
            path.labels(),
            &[
                Label::Regular("a".into()),
                Label::Regular("b/c".into()),
                Label::Index(2),
                Label::Definition("#D".into()),
            ]
        );
    }

    #[test]
    fn test_empty_is_root() {
        assert!(Path::parse("").unwrap().is_root());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(Path::parse("a.").is_err());
        assert!(Path::parse("a b").is_err());
        assert!(Path::parse("a[").is_err());
    }
}
