//! Builtin packages available to sources without a module import.

use crate::atom::Atom;

/// An evaluated builtin argument.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Atom(Atom),
    List(Vec<Atom>),
}

/// Result of a builtin call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BuiltinValue {
    Atom(Atom),
    List(Vec<Atom>),
}

const PACKAGES: &[&str] = &["strings"];

const FUNCTIONS: &[&str] = &[
    "strings.ToUpper",
    "strings.ToLower",
    "strings.TrimSpace",
    "strings.TrimPrefix",
    "strings.TrimSuffix",
    "strings.HasPrefix",
    "strings.HasSuffix",
    "strings.Contains",
    "strings.Index",
    "strings.LastIndex",
    "strings.Replace",
    "strings.Join",
    "strings.Split",
    "strings.SliceRunes",
    "strings.Repeat",
];

pub(crate) fn is_package(path: &str) -> bool {
    PACKAGES.contains(&path)
}

pub(crate) fn exists(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

fn text(args: &[Arg], i: usize) -> Result<&str, String> {
    match args.get(i) {
        Some(Arg::Atom(Atom::String(s))) => Ok(s),
        Some(Arg::Atom(other)) => Err(format!("cannot use {} as string in argument {}", other, i + 1)),
        Some(Arg::List(_)) => Err(format!("cannot use list as string in argument {}", i + 1)),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

fn int(args: &[Arg], i: usize) -> Result<i128, String> {
    match args.get(i) {
        Some(Arg::Atom(Atom::Int(n))) => Ok(*n),
        Some(Arg::Atom(other)) => Err(format!("cannot use {} as int in argument {}", other, i + 1)),
        Some(Arg::List(_)) => Err(format!("cannot use list as int in argument {}", i + 1)),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

fn strings(args: &[Arg], i: usize) -> Result<Vec<String>, String> {
    match args.get(i) {
        Some(Arg::List(items)) => items
            .iter()
            .map(|item| match item {
                Atom::String(s) => Ok(s.clone()),
                other => Err(format!("cannot use {} as string in list", other)),
            })
            .collect(),
        Some(Arg::Atom(other)) => Err(format!("cannot use {} as list in argument {}", other, i + 1)),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

fn arity(args: &[Arg], n: usize) -> Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!("expected {} arguments, got {}", n, args.len()))
    }
}

/// Byte offset of a match converted to a rune index, or -1.
fn rune_index(haystack: &str, offset: Option<usize>) -> i128 {
    match offset {
        Some(offset) => haystack[..offset].chars().count() as i128,
        None => -1,
    }
}

fn string(s: impl Into<String>) -> BuiltinValue {
    BuiltinValue::Atom(Atom::String(s.into()))
}

/// Calls the builtin `name` (qualified by package) with evaluated arguments.
pub(crate) fn call(name: &str, args: &[Arg]) -> Result<BuiltinValue, String> {
    match name {
        "strings.ToUpper" => {
            arity(args, 1)?;
            Ok(string(text(args, 0)?.to_uppercase()))
        }
        "strings.ToLower" => {
            arity(args, 1)?;
            Ok(string(text(args, 0)?.to_lowercase()))
        }
        "strings.TrimSpace" => {
            arity(args, 1)?;
            Ok(string(text(args, 0)?.trim()))
        }
        "strings.TrimPrefix" => {
            arity(args, 2)?;
            let s = text(args, 0)?;
            Ok(string(s.strip_prefix(text(args, 1)?).unwrap_or(s)))
        }
        "strings.TrimSuffix" => {
            arity(args, 2)?;
            let s = text(args, 0)?;
            Ok(string(s.strip_suffix(text(args, 1)?).unwrap_or(s)))
        }
        "strings.HasPrefix" => {
            arity(args, 2)?;
            Ok(BuiltinValue::Atom(Atom::Bool(
                text(args, 0)?.starts_with(text(args, 1)?),
            )))
        }
        "strings.HasSuffix" => {
            arity(args, 2)?;
            Ok(BuiltinValue::Atom(Atom::Bool(
                text(args, 0)?.ends_with(text(args, 1)?),
            )))
        }
        "strings.Contains" => {
            arity(args, 2)?;
            Ok(BuiltinValue::Atom(Atom::Bool(
                text(args, 0)?.contains(text(args, 1)?),
            )))
        }
        "strings.Index" => {
            arity(args, 2)?;
            let s = text(args, 0)?;
            Ok(BuiltinValue::Atom(Atom::Int(rune_index(
                s,
                s.find(text(args, 1)?),
            ))))
        }
        "strings.LastIndex" => {
            arity(args, 2)?;
            let s = text(args, 0)?;
            Ok(BuiltinValue::Atom(Atom::Int(rune_index(
                s,
                s.rfind(text(args, 1)?),
            ))))
        }
        "strings.Replace" => {
            arity(args, 4)?;
            let (s, old, new) = (text(args, 0)?, text(args, 1)?, text(args, 2)?);
            let n = int(args, 3)?;
            if n < 0 {
                Ok(string(s.replace(old, new)))
            } else {
                Ok(string(s.replacen(old, new, usize::try_from(n).unwrap_or(usize::MAX))))
            }
        }
        "strings.Join" => {
            arity(args, 2)?;
            Ok(string(strings(args, 0)?.join(text(args, 1)?)))
        }
        "strings.Split" => {
            arity(args, 2)?;
            let (s, sep) = (text(args, 0)?, text(args, 1)?);
            let parts: Vec<Atom> = if sep.is_empty() {
                s.chars().map(|c| Atom::String(c.to_string())).collect()
            } else {
                s.split(sep).map(|p| Atom::String(p.to_string())).collect()
            };
            Ok(BuiltinValue::List(parts))
        }
        "strings.SliceRunes" => {
            arity(args, 3)?;
            let s = text(args, 0)?;
            let (start, end) = (int(args, 1)?, int(args, 2)?);
            let count = s.chars().count() as i128;
            if start < 0 || end < start || end > count {
                return Err(format!("index out of range [{}:{}] with length {}", start, end, count));
            }
            Ok(string(
                s.chars()
                    .skip(start as usize)
                    .take((end - start) as usize)
                    .collect::<String>(),
            ))
        }
        "strings.Repeat" => {
            arity(args, 2)?;
            let n = int(args, 1)?;
            if n < 0 {
                return Err("negative repeat count".to_string());
            }
            let s = text(args, 0)?;
            match usize::try_from(n) {
                Ok(n) if s.len().saturating_mul(n) <= 1 << 24 => Ok(string(s.repeat(n))),
                _ => Err("repeat count out of range".to_string()),
            }
        }
        _ => Err(format!("unknown builtin {}", name)),
    }
}
