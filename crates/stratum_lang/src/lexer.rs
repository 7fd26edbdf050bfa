//! Tokenizer with automatic comma insertion.
//!
//! String literals are flattened into `StringStart`, `Fragment` and
//! `StringEnd` tokens, with the tokens of every `\(...)` interpolation
//! inlined between `InterpolationStart` and `InterpolationEnd`.

use chumsky::prelude::*;
use std::fmt;

pub(crate) type Span = SimpleSpan;
pub(crate) type Spanned<'src> = (Token<'src>, Span);
pub(crate) type LexError<'src> = Rich<'src, char, Span>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'src> {
    BracketRoundOpen,
    BracketRoundClose,
    BracketCurlyOpen,
    BracketCurlyClose,
    BracketSquareOpen,
    BracketSquareClose,
    Colon,
    Comma,
    Dot,
    Ellipsis,
    Question,
    Bang,
    Assign,
    Pipe,
    Ampersand,
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
    Plus,
    Minus,
    Asterisk,
    Slash,
    Underscore,
    Bottom,
    Identifier(&'src str),
    Int(i128),
    Float(f64),
    StringStart,
    /// Literal text of a string, escapes resolved.
    Fragment(String),
    InterpolationStart,
    InterpolationEnd,
    StringEnd,
    True,
    False,
    Null,
    Package,
    Import,
    Let,
    For,
    In,
    If,
    /// Removed by [`insert_commas`].
    Newline,
}

impl<'src> Token<'src> {
    fn keyword_or_identifier(word: &'src str) -> Self {
        match word {
            "_" => Self::Underscore,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "package" => Self::Package,
            "import" => Self::Import,
            "let" => Self::Let,
            "for" => Self::For,
            "in" => Self::In,
            "if" => Self::If,
            _ => Self::Identifier(word),
        }
    }

    fn ends_statement(&self) -> bool {
        matches!(
            self,
            Self::Identifier(_)
                | Self::Int(_)
                | Self::Float(_)
                | Self::StringEnd
                | Self::True
                | Self::False
                | Self::Null
                | Self::Underscore
                | Self::Bottom
                | Self::Ellipsis
                | Self::BracketRoundClose
                | Self::BracketCurlyClose
                | Self::BracketSquareClose
        )
    }

    /// Operators that may start a unary expression.
    pub fn is_prefix(&self) -> bool {
        matches!(
            self,
            Self::Minus
                | Self::Plus
                | Self::Bang
                | Self::Asterisk
                | Self::Less
                | Self::LessOrEqual
                | Self::Greater
                | Self::GreaterOrEqual
                | Self::NotEqual
                | Self::Match
                | Self::NotMatch
        )
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BracketRoundOpen => "(",
            Self::BracketRoundClose => ")",
            Self::BracketCurlyOpen => "{",
            Self::BracketCurlyClose => "}",
            Self::BracketSquareOpen => "[",
            Self::BracketSquareClose => "]",
            Self::Colon => ":",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Ellipsis => "...",
            Self::Question => "?",
            Self::Bang => "!",
            Self::Assign => "=",
            Self::Pipe => "|",
            Self::Ampersand => "&",
            Self::Or => "||",
            Self::And => "&&",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Match => "=~",
            Self::NotMatch => "!~",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Asterisk => "*",
            Self::Slash => "/",
            Self::Underscore => "_",
            Self::Bottom => "_|_",
            Self::Identifier(name) => name,
            Self::Int(value) => return write!(f, "{}", value),
            Self::Float(value) => return write!(f, "{}", value),
            Self::StringStart | Self::StringEnd => "\"",
            Self::Fragment(text) => return write!(f, "{:?}", text),
            Self::InterpolationStart => "\\(",
            Self::InterpolationEnd => ")",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Package => "package",
            Self::Import => "import",
            Self::Let => "let",
            Self::For => "for",
            Self::In => "in",
            Self::If => "if",
            Self::Newline => "newline",
        };
        write!(f, "{}", text)
    }
}

/// Lexes `src` and replaces newlines with commas where a statement ends.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned<'_>>, Vec<LexError<'_>>> {
    let (tokens, errors) = lexer().parse(src).into_output_errors();
    match tokens {
        Some(tokens) if errors.is_empty() => Ok(insert_commas(tokens)),
        _ => Err(errors),
    }
}

/// A newline ends a statement when the token before it can end an
/// operand; every other newline is insignificant.
pub(crate) fn insert_commas(tokens: Vec<Spanned<'_>>) -> Vec<Spanned<'_>> {
    let mut out: Vec<Spanned> = Vec::with_capacity(tokens.len());
    for (token, span) in tokens {
        if token == Token::Newline {
            if out.last().is_some_and(|(last, _)| last.ends_statement()) {
                out.push((Token::Comma, span));
            }
            continue;
        }
        out.push((token, span));
    }
    out
}

enum Piece<'src> {
    Char(char, Span),
    Tokens(Vec<Spanned<'src>>),
}

enum Segment<'src> {
    Text { text: String, span: Span },
    Tokens(Vec<Spanned<'src>>),
}

pub(crate) fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<Spanned<'src>>, extra::Err<LexError<'src>>> {
    let comment = just("//")
        .then(any().and_is(just('\n').not()).repeated())
        .ignored();
    let blank = one_of(" \t\r").ignored().or(comment).repeated();

    let symbol = choice((
        choice((
            just("...").to(Token::Ellipsis),
            just("||").to(Token::Or),
            just("&&").to(Token::And),
            just("==").to(Token::Equal),
            just("!=").to(Token::NotEqual),
            just("<=").to(Token::LessOrEqual),
            just(">=").to(Token::GreaterOrEqual),
            just("=~").to(Token::Match),
            just("!~").to(Token::NotMatch),
        )),
        choice((
            just('{').to(Token::BracketCurlyOpen),
            just('}').to(Token::BracketCurlyClose),
            just('[').to(Token::BracketSquareOpen),
            just(']').to(Token::BracketSquareClose),
            just(':').to(Token::Colon),
            just(',').to(Token::Comma),
            just('.').to(Token::Dot),
            just('?').to(Token::Question),
            just('!').to(Token::Bang),
            just('=').to(Token::Assign),
        )),
        choice((
            just('|').to(Token::Pipe),
            just('&').to(Token::Ampersand),
            just('<').to(Token::Less),
            just('>').to(Token::Greater),
            just('+').to(Token::Plus),
            just('-').to(Token::Minus),
            just('*').to(Token::Asterisk),
            just('/').to(Token::Slash),
        )),
    ));

    let radix = |prefix: &'static str, radix: u32| {
        just('0')
            .then(one_of(prefix))
            .ignore_then(
                any()
                    .filter(move |c: &char| c.is_digit(radix) || *c == '_')
                    .repeated()
                    .at_least(1)
                    .to_slice(),
            )
            .try_map(move |digits: &str, span| {
                i128::from_str_radix(&digits.replace('_', ""), radix)
                    .map(Token::Int)
                    .map_err(|e| Rich::custom(span, format!("invalid number: {}", e)))
            })
    };
    let digits = any()
        .filter(char::is_ascii_digit)
        .then(
            any()
                .filter(|c: &char| c.is_ascii_digit() || *c == '_')
                .repeated(),
        );
    let decimal = digits
        .clone()
        .then(just('.').then(digits.clone()).or_not())
        .then(
            one_of("eE")
                .then(one_of("+-").or_not())
                .then(digits)
                .or_not(),
        )
        .to_slice()
        .try_map(|text: &str, span| {
            let clean = text.replace('_', "");
            if clean.contains(['.', 'e', 'E']) {
                match clean.parse::<f64>() {
                    Ok(value) if value.is_finite() => Ok(Token::Float(value)),
                    Ok(_) => Err(Rich::custom(span, "value out of range")),
                    Err(e) => Err(Rich::custom(span, format!("invalid number: {}", e))),
                }
            } else {
                clean
                    .parse::<i128>()
                    .map(Token::Int)
                    .map_err(|e| Rich::custom(span, format!("invalid number: {}", e)))
            }
        });
    let number = choice((radix("xX", 16), radix("oO", 8), radix("bB", 2), decimal));

    // `#` may only start a name, optionally after a single `_`.
    let word_char = any().filter(|c: &char| c.is_alphanumeric() || *c == '_' || *c == '$');
    let definition = just('_')
        .or_not()
        .then(just('#'))
        .then(word_char.clone().repeated().at_least(1))
        .to_slice();
    let plain = any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_' || *c == '$')
        .then(word_char.repeated())
        .to_slice();
    let word = choice((
        just("_|_").to(Token::Bottom),
        definition.or(plain).map(Token::keyword_or_identifier),
    ));

    let single = choice((just('\n').to(Token::Newline), word, number, symbol))
        .map_with(|token, e| vec![(token, e.span())]);
    let round_open = just('(').map_with(|_, e| (Token::BracketRoundOpen, e.span()));
    let round_close = just(')').map_with(|_, e| (Token::BracketRoundClose, e.span()));

    let escape = just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('t').to('\t'),
        just('r').to('\r'),
        just('0').to('\0'),
        one_of("\\\"'/"),
        just('u').ignore_then(text::digits(16).exactly(4).to_slice().try_map(
            |hex: &str, span| {
                u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| Rich::custom(span, "invalid unicode escape"))
            },
        )),
    )));

    let string = recursive(|string| {
        // Tokens of an interpolation, up to the `)` that balances its `\(`.
        let balanced = recursive(|balanced| {
            choice((
                string.clone(),
                round_open
                    .clone()
                    .then(
                        balanced
                            .padded_by(blank.clone())
                            .repeated()
                            .collect::<Vec<_>>(),
                    )
                    .then(round_close.clone())
                    .map(|((open, inner), close)| enclose(open, inner, close)),
                single.clone(),
            ))
        });
        let interpolation = just("\\(")
            .map_with(|_, e| (Token::InterpolationStart, e.span()))
            .then(
                balanced
                    .padded_by(blank.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(just(')').map_with(|_, e| (Token::InterpolationEnd, e.span())))
            .map(|((open, inner), close)| enclose(open, inner, close));

        let multiline = just("\"\"\"")
            .map_with(|_, e| e.span())
            .then_ignore(
                one_of(" \t\r")
                    .repeated()
                    .then(just('\n'))
                    .or_not()
                    .validate(|newline, e, emitter| {
                        if newline.is_none() {
                            emitter.emit(Rich::custom(
                                e.span(),
                                "expected newline after multiline quote \"\"\"",
                            ));
                        }
                    }),
            )
            .then(
                choice((
                    interpolation.clone().map(Piece::Tokens),
                    escape
                        .clone()
                        .or(none_of('\\').and_is(just("\"\"\"").not()))
                        .map_with(|c, e| Piece::Char(c, e.span())),
                ))
                .repeated()
                .collect::<Vec<_>>(),
            )
            .then(just("\"\"\"").map_with(|_, e| e.span()))
            .map(|((open, pieces), close)| string_tokens(open, pieces, close, true));

        let simple = just('"')
            .map_with(|_, e| e.span())
            .then(
                choice((
                    interpolation.map(Piece::Tokens),
                    escape
                        .clone()
                        .or(none_of("\"\\\n"))
                        .map_with(|c, e| Piece::Char(c, e.span())),
                ))
                .repeated()
                .collect::<Vec<_>>(),
            )
            .then(just('"').map_with(|_, e| e.span()))
            .map(|((open, pieces), close)| string_tokens(open, pieces, close, false));

        choice((multiline, simple))
    });

    blank
        .clone()
        .ignore_then(
            choice((
                string,
                round_open.map(|token| vec![token]),
                round_close.map(|token| vec![token]),
                single,
            ))
            .then_ignore(blank)
            .repeated()
            .collect::<Vec<_>>(),
        )
        .map(|groups| groups.into_iter().flatten().collect())
}

fn enclose<'src>(
    open: Spanned<'src>,
    inner: Vec<Vec<Spanned<'src>>>,
    close: Spanned<'src>,
) -> Vec<Spanned<'src>> {
    let mut tokens = vec![open];
    tokens.extend(inner.into_iter().flatten());
    tokens.push(close);
    tokens
}

fn string_tokens<'src>(
    open: Span,
    pieces: Vec<Piece<'src>>,
    close: Span,
    multiline: bool,
) -> Vec<Spanned<'src>> {
    let mut segments: Vec<Segment> = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Char(c, span) => {
                if let Some(Segment::Text { text, span: current }) = segments.last_mut() {
                    text.push(c);
                    *current = Span::from(current.start..span.end);
                    continue;
                }
                segments.push(Segment::Text {
                    text: c.to_string(),
                    span,
                });
            }
            Piece::Tokens(tokens) => segments.push(Segment::Tokens(tokens)),
        }
    }
    if multiline {
        strip_indentation(&mut segments);
    }

    let mut tokens = vec![(Token::StringStart, open)];
    for segment in segments {
        match segment {
            Segment::Text { text, span } if !text.is_empty() => {
                tokens.push((Token::Fragment(text), span))
            }
            Segment::Text { .. } => {}
            Segment::Tokens(inner) => tokens.extend(inner),
        }
    }
    tokens.push((Token::StringEnd, close));
    tokens
}

/// Removes the indentation of the closing `"""` line from every line.
fn strip_indentation(segments: &mut [Segment<'_>]) {
    let indent = match segments.last() {
        Some(Segment::Text { text, .. }) => match text.rfind('\n') {
            Some(i) if text[i + 1..].chars().all(|c| c == ' ' || c == '\t') => {
                text[i + 1..].to_string()
            }
            None if text.chars().all(|c| c == ' ' || c == '\t') => text.clone(),
            _ => String::new(),
        },
        _ => String::new(),
    };

    if let Some(Segment::Text { text, .. }) = segments.last_mut() {
        let keep = text.len() - indent.len();
        text.truncate(keep);
        if text.ends_with('\n') {
            text.pop();
        }
    }

    if indent.is_empty() {
        return;
    }
    let with_newline = format!("\n{}", indent);
    for (i, segment) in segments.iter_mut().enumerate() {
        if let Segment::Text { text, .. } = segment {
            let mut stripped = text.replace(&with_newline, "\n");
            if i == 0 {
                if let Some(rest) = stripped.strip_prefix(indent.as_str()) {
                    stripped = rest.to_string();
                }
            }
            *text = stripped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token<'_>> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    fn fragments(tokens: &[Token<'_>]) -> String {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Fragment(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_comma_insertion() {
        let tokens = lex("a: 1\nb: \"x\"\n");
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("a"),
                Token::Colon,
                Token::Int(1),
                Token::Comma,
                Token::Identifier("b"),
                Token::Colon,
                Token::StringStart,
                Token::Fragment("x".into()),
                Token::StringEnd,
                Token::Comma,
            ]
        );
    }

    #[test]
    fn test_no_comma_after_operator() {
        let tokens = lex("a: 1 |\n  2");
        assert!(!tokens.contains(&Token::Comma));
    }

    #[test]
    fn test_newlines_inside_parentheses() {
        let tokens = lex("import (\n\t\"strings\"\n)\n");
        assert_eq!(tokens[0], Token::Import);
        assert_eq!(tokens[1], Token::BracketRoundOpen);
        assert_eq!(tokens[5], Token::Comma);
        assert_eq!(tokens[6], Token::BracketRoundClose);
    }

    #[test]
    fn test_identifier_kinds() {
        let tokens = lex("#Def _hidden _#hd _ _|_ $x");
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("#Def"),
                Token::Identifier("_hidden"),
                Token::Identifier("_#hd"),
                Token::Underscore,
                Token::Bottom,
                Token::Identifier("$x"),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("1_000")[0], Token::Int(1000));
        assert_eq!(lex("0x1F")[0], Token::Int(31));
        assert_eq!(lex("0b101")[0], Token::Int(5));
        assert_eq!(lex("1.5")[0], Token::Float(1.5));
        assert_eq!(lex("2e3")[0], Token::Float(2000.0));
        assert_eq!(
            lex("18446744073709551615")[0],
            Token::Int(18446744073709551615)
        );
    }

    #[test]
    fn test_float_overflow_is_rejected() {
        let errors = tokenize("a: 1e999").unwrap_err();
        assert!(errors[0].to_string().contains("value out of range"));
    }

    #[test]
    fn test_interpolation_tokens() {
        let tokens = lex(r#""a-\(b)-c""#);
        assert_eq!(
            tokens,
            vec![
                Token::StringStart,
                Token::Fragment("a-".into()),
                Token::InterpolationStart,
                Token::Identifier("b"),
                Token::InterpolationEnd,
                Token::Fragment("-c".into()),
                Token::StringEnd,
            ]
        );
    }

    #[test]
    fn test_interpolation_balances_parentheses() {
        let tokens = lex(r#""\(f((x)))!""#);
        assert_eq!(tokens[2], Token::Identifier("f"));
        assert_eq!(tokens[7], Token::BracketRoundClose);
        assert_eq!(tokens[8], Token::InterpolationEnd);
        assert_eq!(tokens[9], Token::Fragment("!".into()));
    }

    #[test]
    fn test_escapes() {
        let tokens = lex(r#""a\tb\u00e9\"""#);
        assert_eq!(fragments(&tokens), "a\tb\u{e9}\"");
    }

    #[test]
    fn test_multiline_string() {
        let tokens = lex("x: \"\"\"\n    line one\n      line two\n    \"\"\"\n");
        assert_eq!(fragments(&tokens), "line one\n  line two");
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = lex("// comment\na: 1 // trailing\n");
        assert_eq!(tokens[0], Token::Identifier("a"));
        assert_eq!(tokens[3], Token::Comma);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("a: \"abc\n").is_err());
        assert!(tokenize("a: \"\\(b\"").is_err());
    }
}
