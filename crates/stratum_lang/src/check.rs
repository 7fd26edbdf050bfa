//! Static reference resolution over a package's files.

use crate::ast::{Comprehension, Clause, Decl, Expr, ExprKind, File, InterpolationPart, ListElem};
use crate::error::Error;
use crate::eval::is_predeclared;
use std::collections::HashSet;
use std::sync::Arc;

/// Reports identifiers that do not resolve to any enclosing declaration,
/// import or predeclared name.
pub(crate) fn check_references(files: &[Arc<File>]) -> Vec<Error> {
    let mut top = HashSet::new();
    for file in files {
        declared_names(&file.body, &mut top);
    }

    let mut errors = Vec::new();
    for file in files {
        let imports: HashSet<String> = file.imports.iter().map(|i| i.binding_name()).collect();
        let mut checker = Checker {
            scopes: vec![imports, top.clone()],
            errors: &mut errors,
        };
        if let ExprKind::Struct(decls) = &file.body.kind {
            checker.decls(decls);
        }
    }
    errors
}

fn declared_names(expr: &Expr, names: &mut HashSet<String>) {
    let ExprKind::Struct(decls) = &expr.kind else {
        return;
    };
    for decl in decls {
        match decl {
            Decl::Field { label, .. } => {
                if let Some(name) = label.identifier() {
                    names.insert(name.to_string());
                }
            }
            Decl::Let { name, .. } => {
                names.insert(name.clone());
            }
            Decl::Embed(inner) => declared_names(inner, names),
            _ => {}
        }
    }
}

struct Checker<'a> {
    scopes: Vec<HashSet<String>>,
    errors: &'a mut Vec<Error>,
}

impl Checker<'_> {
    fn lookup(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name)) || is_predeclared(name)
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                if !self.lookup(name) {
                    self.errors.push(
                        Error::build(format!("reference {:?} not found", name))
                            .at(expr.pos.clone()),
                    );
                }
            }
            ExprKind::Selector(base, _) => self.expr(base),
            ExprKind::Index(base, index) => {
                self.expr(base);
                self.expr(index);
            }
            ExprKind::Call(func, args) => {
                self.expr(func);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::Unary(_, operand) => self.expr(operand),
            ExprKind::Binary(_, lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Paren(inner) | ExprKind::Closed(inner) => self.expr(inner),
            ExprKind::Interpolation(parts) => {
                for part in parts {
                    if let InterpolationPart::Expr(inner) = part {
                        self.expr(inner);
                    }
                }
            }
            ExprKind::Struct(decls) => {
                let mut scope = HashSet::new();
                declared_names(expr, &mut scope);
                self.scopes.push(scope);
                self.decls(decls);
                self.scopes.pop();
            }
            ExprKind::List(list) => {
                for elem in &list.elems {
                    match elem {
                        ListElem::Expr(inner) => self.expr(inner),
                        ListElem::Comprehension(comprehension) => {
                            self.comprehension(comprehension)
                        }
                    }
                }
                if let Some(Some(rest)) = &list.rest {
                    self.expr(rest);
                }
            }
            ExprKind::Literal(_) | ExprKind::Top | ExprKind::Bottom | ExprKind::Scalar(_) => {}
        }
    }

    fn decls(&mut self, decls: &[Decl]) {
        for decl in decls {
            match decl {
                Decl::Field { value, .. } | Decl::Let { value, .. } => self.expr(value),
                Decl::Pattern {
                    pattern: label,
                    value,
                }
                | Decl::DynamicField { label, value, .. } => {
                    self.expr(label);
                    self.expr(value);
                }
                Decl::Ellipsis(Some(value)) | Decl::Embed(value) => self.expr(value),
                Decl::Ellipsis(None) => {}
                Decl::Comprehension(comprehension) => self.comprehension(comprehension),
            }
        }
    }

    fn comprehension(&mut self, comprehension: &Comprehension) {
        let mut pushed = 0;
        for clause in &comprehension.clauses {
            match clause {
                Clause::For { key, value, source } => {
                    self.expr(source);
                    let mut scope = HashSet::new();
                    scope.extend(key.iter().cloned());
                    scope.insert(value.clone());
                    self.scopes.push(scope);
                    pushed += 1;
                }
                Clause::If(condition) => self.expr(condition),
            }
        }
        self.expr(&comprehension.body);
        for _ in 0..pushed {
            self.scopes.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    fn check(src: &str) -> Vec<String> {
        let file = Arc::new(parse_file("test.cue", src).unwrap());
        check_references(&[file])
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_resolved_references() {
        assert!(check("a: 1\nb: a\nc: { d: b, e: d }\n").is_empty());
        assert!(check("#A: {x: string}\nv: #A & {x: \"y\"}\n").is_empty());
        assert!(check("xs: [1, 2]\nys: [for i, x in xs { x }]\n").is_empty());
        assert!(check("n: len(\"abc\")\ns: string\n").is_empty());
    }

    #[test]
    fn test_unresolved_reference() {
        assert_eq!(check("a: b\n"), vec!["reference \"b\" not found".to_string()]);
    }

    #[test]
    fn test_comprehension_bindings_are_scoped() {
        let errors = check("xs: [1]\nys: [for x in xs { x }]\nz: x\n");
        assert_eq!(errors, vec!["reference \"x\" not found".to_string()]);
    }

    #[test]
    fn test_imports_are_in_scope() {
        assert!(check("import \"strings\"\na: strings.ToUpper(\"x\")\n").is_empty());
    }
}
