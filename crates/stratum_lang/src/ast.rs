//! Syntax tree produced by the parser and consumed by the evaluator.

use crate::atom::Atom;
use crate::error::Pos;
use crate::scalar::{BoundOp, Scalar};
use std::fmt;
use std::sync::Arc;

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct File {
    pub filename: Arc<str>,
    pub package: Option<String>,
    pub imports: Vec<ImportSpec>,
    /// The file body as a struct literal.
    pub body: Arc<Expr>,
}

impl File {
    /// Package name, `_` for files without a package clause.
    pub fn package_name(&self) -> &str {
        self.package.as_deref().unwrap_or("_")
    }
}

#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub alias: Option<String>,
    pub path: String,
    pub pos: Pos,
}

impl ImportSpec {
    /// Identifier the import is bound to within the file.
    pub fn binding_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        if let Some((_, qualifier)) = self.path.rsplit_once(':') {
            return qualifier.to_string();
        }
        self.path
            .rsplit('/')
            .next()
            .unwrap_or(self.path.as_str())
            .to_string()
    }
}

/// A field label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Regular(String),
    /// `#Name`
    Definition(String),
    /// `_name` or `_#name`
    Hidden(String),
    /// `let name = ...`
    Let(String),
    Index(usize),
}

impl Label {
    /// Label for an identifier as written in source.
    pub fn from_identifier(name: &str) -> Self {
        if name.starts_with('#') {
            Label::Definition(name.to_string())
        } else if name.starts_with('_') {
            Label::Hidden(name.to_string())
        } else {
            Label::Regular(name.to_string())
        }
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, Label::Regular(_) | Label::Index(_))
    }

    pub fn is_definition(&self) -> bool {
        match self {
            Label::Definition(_) => true,
            Label::Hidden(name) => name.starts_with("_#"),
            _ => false,
        }
    }

    /// Name a reference identifier must have to resolve to this label.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Label::Regular(name) if is_identifier(name) => Some(name),
            Label::Definition(name) | Label::Hidden(name) | Label::Let(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Regular(name) if is_identifier(name) => write!(f, "{}", name),
            Label::Regular(name) => {
                write!(f, "{}", Atom::String(name.clone()))
            }
            Label::Definition(name) | Label::Hidden(name) | Label::Let(name) => {
                write!(f, "{}", name)
            }
            Label::Index(i) => write!(f, "{}", i),
        }
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !matches!(
            name,
            "true" | "false" | "null" | "package" | "import" | "let" | "for" | "in" | "if"
        )
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Arc<Self> {
        Arc::new(Self { kind, pos })
    }

    pub fn synthetic(kind: ExprKind) -> Arc<Self> {
        Self::new(kind, Pos::synthetic())
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Identifier(_) | ExprKind::Selector(..) | ExprKind::Index(..)
        )
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Atom),
    Interpolation(Vec<InterpolationPart>),
    Top,
    Bottom,
    Identifier(String),
    Selector(Arc<Expr>, Label),
    Index(Arc<Expr>, Arc<Expr>),
    Call(Arc<Expr>, Vec<Arc<Expr>>),
    Unary(UnaryOp, Arc<Expr>),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    Struct(Vec<Decl>),
    List(ListLit),
    Paren(Arc<Expr>),
    /// Pre-evaluated scalar, produced when a value is turned back into
    /// an expression.
    Scalar(Scalar),
    /// Closes the struct produced by the inner expression.
    Closed(Arc<Expr>),
}

#[derive(Debug, Clone)]
pub enum InterpolationPart {
    Text(String),
    Expr(Arc<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    /// `*x`, marks a default disjunct.
    Default,
    Bound(BoundOp),
    Match,
    NotMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Disjunction,
    Unification,
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Match,
    NotMatch,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Disjunction => 1,
            BinaryOp::Unification => 2,
            BinaryOp::Or => 3,
            BinaryOp::And => 4,
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Less
            | BinaryOp::LessOrEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterOrEqual
            | BinaryOp::Match
            | BinaryOp::NotMatch => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldConstraint {
    Regular,
    Optional,
    Required,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Field {
        label: Label,
        constraint: FieldConstraint,
        value: Arc<Expr>,
    },
    /// Field whose label is computed: `"\(name)": v` or `(expr): v`.
    DynamicField {
        label: Arc<Expr>,
        constraint: FieldConstraint,
        value: Arc<Expr>,
    },
    Pattern {
        pattern: Arc<Expr>,
        value: Arc<Expr>,
    },
    Let {
        name: String,
        value: Arc<Expr>,
    },
    Ellipsis(Option<Arc<Expr>>),
    Embed(Arc<Expr>),
    Comprehension(Arc<Comprehension>),
}

#[derive(Debug, Clone)]
pub struct Comprehension {
    pub clauses: Vec<Clause>,
    /// Struct literal emitted once per iteration.
    pub body: Arc<Expr>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    For {
        key: Option<String>,
        value: String,
        source: Arc<Expr>,
    },
    If(Arc<Expr>),
}

#[derive(Debug, Clone)]
pub enum ListElem {
    Expr(Arc<Expr>),
    Comprehension(Arc<Comprehension>),
}

#[derive(Debug, Clone)]
pub struct ListLit {
    pub elems: Vec<ListElem>,
    /// `None`: closed list. `Some(None)`: `...`. `Some(Some(t))`: `...t`.
    pub rest: Option<Option<Arc<Expr>>>,
}

/// Nests `expr` under `path` as a chain of single-field struct literals.
pub(crate) fn wrap_in_path(path: &[Label], expr: Arc<Expr>) -> Arc<Expr> {
    path.iter().rev().fold(expr, |value, label| {
        Expr::synthetic(ExprKind::Struct(vec![Decl::Field {
            label: label.clone(),
            constraint: FieldConstraint::Regular,
            value,
        }]))
    })
}

/// Converts a JSON document into an expression.
pub(crate) fn json_to_expr(value: &serde_json::Value) -> Arc<Expr> {
    let kind = match value {
        serde_json::Value::Null => ExprKind::Literal(Atom::Null),
        serde_json::Value::Bool(b) => ExprKind::Literal(Atom::Bool(*b)),
        serde_json::Value::Number(n) => ExprKind::Literal(Atom::from_json_number(n)),
        serde_json::Value::String(s) => ExprKind::Literal(Atom::String(s.clone())),
        serde_json::Value::Array(items) => ExprKind::List(ListLit {
            elems: items
                .iter()
                .map(|item| ListElem::Expr(json_to_expr(item)))
                .collect(),
            rest: None,
        }),
        serde_json::Value::Object(map) => ExprKind::Struct(
            map.iter()
                .map(|(key, item)| Decl::Field {
                    label: Label::Regular(key.clone()),
                    constraint: FieldConstraint::Regular,
                    value: json_to_expr(item),
                })
                .collect(),
        ),
    };
    Expr::synthetic(kind)
}
