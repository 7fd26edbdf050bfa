//! Diagnostics produced while loading, compiling and evaluating sources.

use std::fmt;
use std::sync::Arc;

/// Result type for engine operations that can report several diagnostics.
pub type LangResult<T> = std::result::Result<T, Errors>;

/// Broad category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed source text.
    Parse,
    /// Package could not be located or read.
    Load,
    /// Unresolvable reference or import.
    Build,
    /// Values that cannot be unified, closedness and bound violations.
    Conflict,
    /// Value is not (yet) concrete enough for the requested operation.
    Incomplete,
}

/// A source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pos {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn new(file: Arc<str>, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// Position for values that did not come from source text (fills, JSON).
    pub fn synthetic() -> Self {
        Self {
            file: Arc::from(""),
            line: 0,
            column: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file.is_empty()
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.path, .message, .positions))]
pub struct Error {
    pub kind: ErrorKind,
    /// Field path the diagnostic applies to, outermost label first.
    pub path: Vec<String>,
    pub message: String,
    pub positions: Vec<Pos>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: Vec::new(),
            message: message.into(),
            positions: Vec::new(),
        }
    }

    pub fn parse(pos: Pos, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message).at(pos)
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Load, message)
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Build, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Incomplete, message)
    }

    /// Attaches a source position; synthetic positions are dropped.
    pub fn at(mut self, pos: Pos) -> Self {
        if !pos.is_synthetic() && !self.positions.contains(&pos) {
            self.positions.push(pos);
        }
        self
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    /// Prefixes the message, keeping kind, path and positions.
    pub fn wrap(mut self, context: &str) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn is_incomplete(&self) -> bool {
        self.kind == ErrorKind::Incomplete
    }

    /// Dotted field path, empty for the root.
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }

    /// True if the diagnostic is located at or below `prefix`.
    pub fn is_under(&self, prefix: &[String]) -> bool {
        self.path.len() >= prefix.len() && self.path[..prefix.len()] == *prefix
    }
}

/// `path: message:` followed by one indented line per position.
fn describe(path: &[String], message: &str, positions: &[Pos]) -> String {
    let mut out = String::new();
    if !path.is_empty() {
        out.push_str(&path.join("."));
        out.push_str(": ");
    }
    out.push_str(message);
    if !positions.is_empty() {
        out.push(':');
        for pos in positions {
            out.push_str(&format!("\n    {}", pos));
        }
    }
    out
}

/// A non-empty list of diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_lines(.0))]
pub struct Errors(Vec<Error>);

fn join_lines(errors: &[Error]) -> String {
    errors
        .iter()
        .map(Error::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl Errors {
    /// Builds a list, returning `None` when `errors` is empty.
    pub fn from_vec(errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(errors))
        }
    }

    pub fn first(&self) -> &Error {
        &self.0[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Error> {
        self.0
    }
}

impl From<Error> for Errors {
    fn from(err: Error) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_path_and_positions() {
        let err = Error::conflict("field not allowed")
            .with_path(vec!["resource".into(), "foo".into()])
            .at(Pos::new(Arc::from("./template.cue"), 3, 2));
        assert_eq!(
            err.to_string(),
            "resource.foo: field not allowed:\n    ./template.cue:3:2"
        );
    }

    #[test]
    fn test_synthetic_positions_are_dropped() {
        let err = Error::incomplete("incomplete value string").at(Pos::synthetic());
        assert!(err.positions.is_empty());
        assert_eq!(err.to_string(), "incomplete value string");
    }

    #[test]
    fn test_is_under() {
        let err = Error::conflict("x").with_path(vec!["a".into(), "b".into()]);
        assert!(err.is_under(&["a".to_string()]));
        assert!(!err.is_under(&["b".to_string()]));
    }

    #[test]
    fn test_errors_display_one_per_line() {
        let errors = Errors::from_vec(vec![
            Error::conflict("conflicting values 1 and 2").with_path(vec!["a".into()]),
            Error::build("reference \"b\" not found"),
        ])
        .unwrap();
        assert_eq!(
            errors.to_string(),
            "a: conflicting values 1 and 2\nreference \"b\" not found"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(errors);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_errors_from_empty_vec() {
        assert!(Errors::from_vec(Vec::new()).is_none());
    }
}
