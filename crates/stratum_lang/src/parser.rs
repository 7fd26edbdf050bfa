//! Parser from tokens to syntax trees.

use crate::ast::{
    BinaryOp, Clause, Comprehension, Decl, Expr, ExprKind, FieldConstraint, File, ImportSpec,
    InterpolationPart, Label, ListElem, ListLit, UnaryOp,
};
use crate::atom::Atom;
use crate::context::Limits;
use crate::error::{Error, Errors, Pos};
use crate::lexer::{tokenize, Span, Spanned, Token};
use crate::scalar::BoundOp;
use chumsky::{input::ValueInput, pratt::*, prelude::*};
use std::fmt;
use std::sync::Arc;

type Extra<'src> = extra::Err<Rich<'src, Token<'src>, Span>>;

/// Parses a complete source file.
pub fn parse_file(filename: &str, src: &str) -> Result<File, Errors> {
    parse_source(filename, src, Limits::default().max_depth)
}

/// Parses a source file, rejecting nesting deeper than `max_depth`.
pub(crate) fn parse_source(filename: &str, src: &str, max_depth: usize) -> Result<File, Errors> {
    let filename: Arc<str> = Arc::from(filename);
    let positions = Positions::new(filename.clone(), src);
    let tokens = tokenize(src).map_err(|errors| positions.errors(errors))?;
    check_nesting(&tokens, max_depth, &positions)?;

    let end = src.len();
    let (file, errors) = file_parser(filename, positions.clone())
        .parse(
            tokens
                .as_slice()
                .map(Span::from(end..end), |(token, span)| (token, span)),
        )
        .into_output_errors();
    match file {
        Some(file) if errors.is_empty() => Ok(file),
        _ => Err(positions.errors(errors)),
    }
}

/// Parses a field path: labels joined by `.` or enclosed in `[...]`.
pub(crate) fn parse_path(text: &str) -> Result<Vec<Label>, Error> {
    let positions = Positions::new(Arc::from("path"), text);
    let invalid = |offset: usize| Error::parse(positions.at(offset), format!("invalid path {:?}", text));
    let tokens = tokenize(text)
        .map_err(|errors| invalid(errors.first().map_or(0, |e| e.span().start)))?;
    let end = text.len();
    let (labels, errors) = path_parser()
        .parse(
            tokens
                .as_slice()
                .map(Span::from(end..end), |(token, span)| (token, span)),
        )
        .into_output_errors();
    match labels {
        Some(labels) if errors.is_empty() => Ok(labels),
        _ => Err(invalid(errors.first().map_or(0, |e| e.span().start))),
    }
}

/// Maps byte offsets of one source text to line and column positions.
#[derive(Debug, Clone)]
struct Positions(Arc<LineIndex>);

#[derive(Debug)]
struct LineIndex {
    file: Arc<str>,
    src: String,
    starts: Vec<usize>,
}

impl Positions {
    fn new(file: Arc<str>, src: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self(Arc::new(LineIndex {
            file,
            src: src.to_string(),
            starts,
        }))
    }

    fn at(&self, offset: usize) -> Pos {
        let index = &self.0;
        let line = index
            .starts
            .partition_point(|&start| start <= offset)
            .max(1);
        let start = index.starts[line - 1];
        let end = offset.clamp(start, index.src.len().max(start));
        let column = index.src.get(start..end).map_or(0, |s| s.chars().count()) + 1;
        Pos::new(
            index.file.clone(),
            u32::try_from(line).unwrap_or(u32::MAX),
            u32::try_from(column).unwrap_or(u32::MAX),
        )
    }

    fn errors<T: fmt::Display>(&self, errors: Vec<Rich<'_, T, Span>>) -> Errors {
        let errors = errors
            .into_iter()
            .map(|err| Error::parse(self.at(err.span().start), err.to_string()))
            .collect();
        Errors::from_vec(errors).unwrap_or_else(|| Error::parse(self.at(0), "invalid syntax").into())
    }
}

/// Rejects inputs whose nesting would exceed `max_depth` once parsed.
/// Brackets, interpolations, short-form fields and chains of unary
/// operators each add a level.
fn check_nesting(tokens: &[Spanned<'_>], max_depth: usize, positions: &Positions) -> Result<(), Error> {
    let mut levels: Vec<usize> = vec![0];
    let mut unary = 0;
    for (i, (token, span)) in tokens.iter().enumerate() {
        match token {
            Token::BracketRoundOpen
            | Token::BracketCurlyOpen
            | Token::BracketSquareOpen
            | Token::InterpolationStart => levels.push(0),
            Token::BracketRoundClose
            | Token::BracketCurlyClose
            | Token::BracketSquareClose
            | Token::InterpolationEnd => {
                if levels.len() > 1 {
                    levels.pop();
                }
            }
            Token::Colon => {
                let opens = matches!(
                    tokens.get(i + 1),
                    Some((
                        Token::BracketRoundOpen | Token::BracketCurlyOpen | Token::BracketSquareOpen,
                        _
                    ))
                );
                if let (false, Some(colons)) = (opens, levels.last_mut()) {
                    *colons += 1;
                }
            }
            Token::Comma => {
                if let Some(colons) = levels.last_mut() {
                    *colons = 0;
                }
            }
            _ => {}
        }
        unary = if token.is_prefix() { unary + 1 } else { 0 };
        let depth = levels.len() + levels.iter().sum::<usize>() + unary;
        if depth > max_depth {
            return Err(Error::parse(
                positions.at(span.start),
                format!("nesting too deep (more than {} levels)", max_depth),
            ));
        }
    }
    Ok(())
}

/// Attaches the position of the first token matched by `parser`.
fn located<'src, I, O>(
    parser: impl Parser<'src, I, O, Extra<'src>> + Clone,
    positions: &Positions,
) -> impl Parser<'src, I, (O, Pos), Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    let positions = positions.clone();
    parser.map_with(move |out, e| (out, positions.at(e.span().start)))
}

fn identifier<'src, I>() -> impl Parser<'src, I, String, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    select! { Token::Identifier(name) => name.to_string() }
}

/// A string literal without interpolations.
fn plain_string<'src, I>() -> impl Parser<'src, I, String, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    select! { Token::Fragment(text) => text }
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::StringStart), just(Token::StringEnd))
        .map(|parts| parts.concat())
}

/// Parts of a string literal, interpolations parsed with `expr`.
fn text<'src, I, E>(expr: E) -> impl Parser<'src, I, Vec<InterpolationPart>, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
    E: Parser<'src, I, Arc<Expr>, Extra<'src>> + Clone,
{
    let fragment = select! { Token::Fragment(text) => InterpolationPart::Text(text) };
    let interpolation = expr
        .delimited_by(just(Token::InterpolationStart), just(Token::InterpolationEnd))
        .map(InterpolationPart::Expr);
    fragment
        .or(interpolation)
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::StringStart), just(Token::StringEnd))
}

fn plain_text(parts: &[InterpolationPart]) -> Option<String> {
    let mut out = String::new();
    for part in parts {
        match part {
            InterpolationPart::Text(text) => out.push_str(text),
            InterpolationPart::Expr(_) => return None,
        }
    }
    Some(out)
}

fn text_kind(parts: Vec<InterpolationPart>) -> ExprKind {
    match plain_text(&parts) {
        Some(text) => ExprKind::Literal(Atom::String(text)),
        None => ExprKind::Interpolation(parts),
    }
}

fn fold_unary(op: UnaryOp, operand: Arc<Expr>, pos: Pos) -> Arc<Expr> {
    if op == UnaryOp::Neg {
        match &operand.kind {
            ExprKind::Literal(Atom::Int(i)) => {
                if let Some(negated) = i.checked_neg() {
                    return Expr::new(ExprKind::Literal(Atom::Int(negated)), pos);
                }
            }
            ExprKind::Literal(Atom::Float(f)) => {
                return Expr::new(ExprKind::Literal(Atom::Float(-f)), pos);
            }
            _ => {}
        }
    }
    Expr::new(ExprKind::Unary(op, operand), pos)
}

fn binary(lhs: Arc<Expr>, (op, pos): (BinaryOp, Pos), rhs: Arc<Expr>) -> Arc<Expr> {
    Expr::new(ExprKind::Binary(op, lhs, rhs), pos)
}

#[derive(Debug, Clone)]
enum Postfix {
    Select(Label),
    Index(Arc<Expr>),
    Call(Vec<Arc<Expr>>),
}

fn expression<'src, I>(positions: &Positions) -> impl Parser<'src, I, Arc<Expr>, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    recursive(|expr| {
        let separator = just(Token::Comma).repeated().at_least(1);

        let literal = select! {
            Token::Int(value) => ExprKind::Literal(Atom::Int(value)),
            Token::Float(value) => ExprKind::Literal(Atom::Float(value)),
            Token::True => ExprKind::Literal(Atom::Bool(true)),
            Token::False => ExprKind::Literal(Atom::Bool(false)),
            Token::Null => ExprKind::Literal(Atom::Null),
            Token::Underscore => ExprKind::Top,
            Token::Bottom => ExprKind::Bottom,
            Token::Identifier(name) => ExprKind::Identifier(name.to_string()),
        };
        let string = text(expr.clone()).map(text_kind);
        let paren = expr
            .clone()
            .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose))
            .map(ExprKind::Paren);
        let structure = declaration(expr.clone(), positions)
            .separated_by(separator.clone())
            .allow_leading()
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::BracketCurlyOpen), just(Token::BracketCurlyClose))
            .map(ExprKind::Struct);
        let element = comprehension(expr.clone())
            .map(ListElem::Comprehension)
            .or(expr.clone().map(ListElem::Expr));
        let rest = just(Token::Ellipsis)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Comma).repeated());
        let list = element
            .separated_by(separator)
            .allow_leading()
            .allow_trailing()
            .collect::<Vec<_>>()
            .then(rest.or_not())
            .delimited_by(just(Token::BracketSquareOpen), just(Token::BracketSquareClose))
            .map(|(elems, rest)| ExprKind::List(ListLit { elems, rest }));
        let atom = located(choice((literal, string, paren, structure, list)), positions)
            .map(|(kind, pos)| Expr::new(kind, pos));

        let unary = located(
            select! {
                Token::Minus => UnaryOp::Neg,
                Token::Plus => UnaryOp::Plus,
                Token::Bang => UnaryOp::Not,
                Token::Asterisk => UnaryOp::Default,
                Token::Less => UnaryOp::Bound(BoundOp::Less),
                Token::LessOrEqual => UnaryOp::Bound(BoundOp::LessOrEqual),
                Token::Greater => UnaryOp::Bound(BoundOp::Greater),
                Token::GreaterOrEqual => UnaryOp::Bound(BoundOp::GreaterOrEqual),
                Token::NotEqual => UnaryOp::Bound(BoundOp::NotEqual),
                Token::Match => UnaryOp::Match,
                Token::NotMatch => UnaryOp::NotMatch,
            },
            positions,
        );

        let selector = select! { Token::Identifier(name) => Label::from_identifier(name) }.or(
            plain_string().map(Label::Regular),
        );
        let postfix_op = located(
            choice((
                just(Token::Dot).ignore_then(selector).map(Postfix::Select),
                expr.clone()
                    .delimited_by(just(Token::BracketSquareOpen), just(Token::BracketSquareClose))
                    .map(Postfix::Index),
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose))
                    .map(Postfix::Call),
            )),
            positions,
        );

        let binary_op = select! {
            Token::Pipe => BinaryOp::Disjunction,
            Token::Ampersand => BinaryOp::Unification,
            Token::Or => BinaryOp::Or,
            Token::And => BinaryOp::And,
            Token::Equal => BinaryOp::Equal,
            Token::NotEqual => BinaryOp::NotEqual,
            Token::Less => BinaryOp::Less,
            Token::LessOrEqual => BinaryOp::LessOrEqual,
            Token::Greater => BinaryOp::Greater,
            Token::GreaterOrEqual => BinaryOp::GreaterOrEqual,
            Token::Match => BinaryOp::Match,
            Token::NotMatch => BinaryOp::NotMatch,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Asterisk => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
        };
        let level = |precedence: u8| {
            located(
                binary_op
                    .clone()
                    .filter(move |op: &BinaryOp| op.precedence() == precedence),
                positions,
            )
        };

        atom.pratt((
            postfix(9, postfix_op, |base: Arc<Expr>, (op, pos): (Postfix, Pos), _| {
                let kind = match op {
                    Postfix::Select(label) => ExprKind::Selector(base, label),
                    Postfix::Index(index) => ExprKind::Index(base, index),
                    Postfix::Call(args) => ExprKind::Call(base, args),
                };
                Expr::new(kind, pos)
            }),
            prefix(8, unary, |(op, pos): (UnaryOp, Pos), operand: Arc<Expr>, _| {
                fold_unary(op, operand, pos)
            }),
            infix(left(7), level(7), |l, op, r, _| binary(l, op, r)),
            infix(left(6), level(6), |l, op, r, _| binary(l, op, r)),
            infix(left(5), level(5), |l, op, r, _| binary(l, op, r)),
            infix(left(4), level(4), |l, op, r, _| binary(l, op, r)),
            infix(left(3), level(3), |l, op, r, _| binary(l, op, r)),
            infix(left(2), level(2), |l, op, r, _| binary(l, op, r)),
            infix(left(1), level(1), |l, op, r, _| binary(l, op, r)),
        ))
    })
}

fn comprehension<'src, I, E>(expr: E) -> impl Parser<'src, I, Arc<Comprehension>, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
    E: Parser<'src, I, Arc<Expr>, Extra<'src>> + Clone,
{
    let for_clause = just(Token::For)
        .ignore_then(identifier())
        .then(just(Token::Comma).ignore_then(identifier()).or_not())
        .then_ignore(just(Token::In))
        .then(expr.clone())
        .map(|((first, second), source)| match second {
            Some(value) => Clause::For {
                key: Some(first),
                value,
                source,
            },
            None => Clause::For {
                key: None,
                value: first,
                source,
            },
        });
    let if_clause = just(Token::If).ignore_then(expr.clone()).map(Clause::If);
    let body = expr.try_map(|body: Arc<Expr>, span| {
        if matches!(body.kind, ExprKind::Struct(_)) {
            Ok(body)
        } else {
            Err(Rich::custom(span, "expected struct literal after comprehension clauses"))
        }
    });
    for_clause
        .or(if_clause)
        .repeated()
        .at_least(1)
        .collect::<Vec<_>>()
        .then(body)
        .map(|(clauses, body)| Arc::new(Comprehension { clauses, body }))
}

#[derive(Debug, Clone)]
enum FieldLabel {
    Static(Label),
    Dynamic(Arc<Expr>),
    Pattern(Arc<Expr>),
}

fn declaration<'src, I, E>(expr: E, positions: &Positions) -> impl Parser<'src, I, Decl, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
    E: Parser<'src, I, Arc<Expr>, Extra<'src>> + Clone + 'src,
{
    let constraint = choice((
        just(Token::Question).to(FieldConstraint::Optional),
        just(Token::Bang).to(FieldConstraint::Required),
    ))
    .or_not()
    .map(|constraint| constraint.unwrap_or(FieldConstraint::Regular));

    let field = recursive(|field| {
        // `a: b: c` is short for `a: {b: c}`.
        let value = located(field, positions)
            .map(|(decl, pos)| Expr::new(ExprKind::Struct(vec![decl]), pos))
            .or(expr.clone());
        let label = choice((
            select! { Token::Identifier(name) => FieldLabel::Static(Label::from_identifier(name)) },
            located(text(expr.clone()), positions).map(|(parts, pos)| match plain_text(&parts) {
                Some(text) => FieldLabel::Static(Label::Regular(text)),
                None => FieldLabel::Dynamic(Expr::new(ExprKind::Interpolation(parts), pos)),
            }),
            expr.clone()
                .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose))
                .map(FieldLabel::Dynamic),
            expr.clone()
                .delimited_by(just(Token::BracketSquareOpen), just(Token::BracketSquareClose))
                .map(FieldLabel::Pattern),
        ));
        label
            .then(constraint)
            .then_ignore(just(Token::Colon))
            .then(value)
            .try_map(|((label, constraint), value), span| match label {
                FieldLabel::Static(label) => Ok(Decl::Field {
                    label,
                    constraint,
                    value,
                }),
                FieldLabel::Dynamic(label) => Ok(Decl::DynamicField {
                    label,
                    constraint,
                    value,
                }),
                FieldLabel::Pattern(pattern) if constraint == FieldConstraint::Regular => {
                    Ok(Decl::Pattern { pattern, value })
                }
                FieldLabel::Pattern(_) => Err(Rich::custom(
                    span,
                    "pattern constraints cannot be optional or required",
                )),
            })
    });

    choice((
        just(Token::Let)
            .ignore_then(identifier())
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .map(|(name, value)| Decl::Let { name, value }),
        just(Token::Ellipsis)
            .ignore_then(expr.clone().or_not())
            .map(Decl::Ellipsis),
        comprehension(expr.clone()).map(Decl::Comprehension),
        field,
        expr.map(Decl::Embed),
    ))
}

fn file_parser<'src, I>(filename: Arc<str>, positions: Positions) -> impl Parser<'src, I, File, Extra<'src>>
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    let separator = just(Token::Comma).repeated().at_least(1);
    let header_end = separator.clone().ignored().or(end());

    let package = just(Token::Package)
        .ignore_then(identifier())
        .then_ignore(header_end.clone());
    let spec = located(identifier().or_not().then(plain_string()), &positions)
        .map(|((alias, path), pos)| ImportSpec { alias, path, pos });
    let imports = just(Token::Import)
        .ignore_then(choice((
            spec.clone()
                .separated_by(separator.clone())
                .allow_leading()
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::BracketRoundOpen), just(Token::BracketRoundClose)),
            spec.map(|spec| vec![spec]),
        )))
        .then_ignore(header_end);
    let decls = declaration(expression(&positions), &positions)
        .separated_by(separator)
        .allow_leading()
        .allow_trailing()
        .collect::<Vec<_>>();

    let file = just(Token::Comma)
        .repeated()
        .ignore_then(package.or_not())
        .then(imports.repeated().collect::<Vec<_>>())
        .then(decls);
    located(file, &positions)
        .then_ignore(end())
        .map(move |(((package, imports), decls), pos)| File {
            filename: filename.clone(),
            package,
            imports: imports.into_iter().flatten().collect(),
            body: Expr::new(ExprKind::Struct(decls), pos),
        })
}

fn path_parser<'src, I>() -> impl Parser<'src, I, Vec<Label>, Extra<'src>>
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    let index = select! { Token::Int(i) => i }.try_map(|i, span| {
        usize::try_from(i)
            .map(Label::Index)
            .map_err(|_| Rich::custom(span, format!("invalid index {}", i)))
    });
    let label = choice((
        select! { Token::Identifier(name) => Label::from_identifier(name) },
        plain_string().map(Label::Regular),
        index,
    ));
    let step = just(Token::Dot).ignore_then(label.clone()).or(label
        .clone()
        .delimited_by(just(Token::BracketSquareOpen), just(Token::BracketSquareClose)));
    label
        .then(step.repeated().collect::<Vec<_>>())
        .map(|(first, rest)| std::iter::once(first).chain(rest).collect())
        .or_not()
        .map(Option::unwrap_or_default)
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decls(src: &str) -> Vec<Decl> {
        let file = parse_file("test.cue", src).unwrap();
        match &file.body.kind {
            ExprKind::Struct(decls) => decls.clone(),
            _ => unreachable!(),
        }
    }

    /// The value of the single field `x` in `src`.
    fn value(src: &str) -> Arc<Expr> {
        let decls = decls(&format!("x: {}\n", src));
        match &decls[0] {
            Decl::Field { value, .. } => value.clone(),
            other => panic!("expected field, got {:?}", other),
        }
    }

    #[test]
    fn test_package_and_imports() {
        let file = parse_file(
            "test.cue",
            "package demo\n\nimport (\n\t\"strings\"\n\tlib \"example.com/m/lib\"\n)\n\na: 1\n",
        )
        .unwrap();
        assert_eq!(file.package.as_deref(), Some("demo"));
        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[1].alias.as_deref(), Some("lib"));
        assert_eq!(file.imports[1].path, "example.com/m/lib");
    }

    #[test]
    fn test_short_form_fields() {
        let decls = decls("a: b: c: 1\n");
        let Decl::Field { label, value, .. } = &decls[0] else {
            panic!("expected field");
        };
        assert_eq!(label, &Label::Regular("a".into()));
        assert!(matches!(&value.kind, ExprKind::Struct(inner) if inner.len() == 1));
    }

    #[test]
    fn test_optional_and_required_fields() {
        let decls = decls("a?: int\nb!: string\n");
        assert!(matches!(
            &decls[0],
            Decl::Field { constraint: FieldConstraint::Optional, .. }
        ));
        assert!(matches!(
            &decls[1],
            Decl::Field { constraint: FieldConstraint::Required, .. }
        ));
    }

    #[test]
    fn test_pattern_versus_list_embedding() {
        let decls = decls("[string]: int\n");
        assert!(matches!(&decls[0], Decl::Pattern { .. }));
        let decls = self::decls("[1, 2]\n");
        assert!(matches!(&decls[0], Decl::Embed(_)));
    }

    #[test]
    fn test_dynamic_field_labels() {
        let decls = decls("\"\\(a)-x\": 1\n(b): 2\n\"plain\": 3\n");
        assert!(matches!(
            &decls[0],
            Decl::DynamicField { label, .. } if matches!(label.kind, ExprKind::Interpolation(_))
        ));
        assert!(matches!(&decls[1], Decl::DynamicField { .. }));
        assert!(matches!(
            &decls[2],
            Decl::Field { label: Label::Regular(name), .. } if name == "plain"
        ));
    }

    #[test]
    fn test_disjunction_precedence() {
        let expr = value("*\"a\" | string & =~\"^b\"");
        let ExprKind::Binary(BinaryOp::Disjunction, lhs, rhs) = &expr.kind else {
            panic!("expected disjunction");
        };
        assert!(matches!(&lhs.kind, ExprKind::Unary(UnaryOp::Default, _)));
        assert!(matches!(&rhs.kind, ExprKind::Binary(BinaryOp::Unification, ..)));
    }

    #[test]
    fn test_arithmetic_precedence() {
        let expr = value("1 + 2 * 3 - 4");
        let ExprKind::Binary(BinaryOp::Sub, lhs, _) = &expr.kind else {
            panic!("expected subtraction");
        };
        let ExprKind::Binary(BinaryOp::Add, _, product) = &lhs.kind else {
            panic!("expected addition");
        };
        assert!(matches!(&product.kind, ExprKind::Binary(BinaryOp::Mul, ..)));
    }

    #[test]
    fn test_postfix_binds_tighter_than_unary() {
        let expr = value("-a.b[0]");
        let ExprKind::Unary(UnaryOp::Neg, operand) = &expr.kind else {
            panic!("expected negation");
        };
        assert!(matches!(&operand.kind, ExprKind::Index(..)));
    }

    #[test]
    fn test_comprehension_in_list() {
        let expr = value("[for k, v in xs if v > 1 { name: k }]");
        let ExprKind::List(list) = &expr.kind else {
            panic!("expected list");
        };
        let ListElem::Comprehension(comp) = &list.elems[0] else {
            panic!("expected comprehension");
        };
        assert_eq!(comp.clauses.len(), 2);
    }

    #[test]
    fn test_interpolation_expr() {
        let expr = value(r#""\(a.b)-x""#);
        assert!(matches!(&expr.kind, ExprKind::Interpolation(parts) if parts.len() == 2));
    }

    #[test]
    fn test_open_list() {
        let expr = value("[...string]");
        assert!(matches!(&expr.kind, ExprKind::List(ListLit { rest: Some(Some(_)), .. })));
        let expr = value("[1, 2, ...]");
        assert!(matches!(&expr.kind, ExprKind::List(ListLit { rest: Some(None), elems, .. }) if elems.len() == 2));
    }

    #[test]
    fn test_negative_literal_folding() {
        let expr = value(">=-1");
        let ExprKind::Unary(UnaryOp::Bound(BoundOp::GreaterOrEqual), operand) = &expr.kind else {
            panic!("expected bound");
        };
        assert!(matches!(operand.kind, ExprKind::Literal(Atom::Int(-1))));
        let expr = value("-9223372036854775808");
        assert!(matches!(expr.kind, ExprKind::Literal(Atom::Int(i)) if i == i64::MIN as i128));
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_file("bad.cue", "a: {\n  b: 1\n  c: \n").unwrap_err();
        let pos = &err.first().positions[0];
        assert_eq!(pos.file.as_ref(), "bad.cue");
        assert!(pos.line >= 3);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let src = format!("a: {}1{}\n", "(".repeat(1000), ")".repeat(1000));
        let err = parse_file("deep.cue", &src).unwrap_err();
        assert!(err.first().message.contains("nesting too deep"));

        let src = format!("a: {}1\n", "-".repeat(1000));
        assert!(parse_file("deep.cue", &src).is_err());

        let shallow = format!("a: {}1{}\n", "(".repeat(10), ")".repeat(10));
        assert!(parse_file("shallow.cue", &shallow).is_ok());
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("a.\"b/c\"[2]").unwrap(),
            vec![
                Label::Regular("a".into()),
                Label::Regular("b/c".into()),
                Label::Index(2)
            ]
        );
        assert!(parse_path("a[-1]").is_err());
    }
}
