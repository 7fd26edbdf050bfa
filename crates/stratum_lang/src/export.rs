//! JSON export, validation and reification of evaluated vertices.

use crate::ast::{
    BinaryOp, Decl, Expr, ExprKind, FieldConstraint, Label, ListElem, ListLit, UnaryOp,
};
use crate::atom::Kind;
use crate::error::{Error, Errors};
use crate::eval::{Graph, VertexId};
use serde_json::{Map, Value as Json};
use std::collections::HashSet;
use std::sync::Arc;

impl Graph {
    /// Vertex reached by following `labels` from `from`.
    pub(crate) fn descend(&self, from: VertexId, labels: &[Label]) -> Result<VertexId, Error> {
        let mut current = from;
        for (depth, label) in labels.iter().enumerate() {
            let target = self.effective(current);
            current = self.find_arc(target, label).ok_or_else(|| {
                let mut path = self.path(current);
                path.push(labels[depth].to_string());
                Error::incomplete(format!("cannot find field {}", label)).with_path(path)
            })?;
        }
        Ok(current)
    }

    /// Labels of the regular fields and elements to export, in order.
    pub(crate) fn exported_arcs(&self, v: VertexId) -> Vec<VertexId> {
        let vertex = &self.vertices[v];
        let mut arcs: Vec<VertexId> = vertex
            .arcs
            .iter()
            .copied()
            .filter(|&arc| {
                let a = &self.vertices[arc];
                a.label.is_regular() && !a.optional
            })
            .collect();
        if vertex.is_list() {
            arcs.sort_by_key(|&arc| match self.vertices[arc].label {
                Label::Index(i) => i,
                _ => usize::MAX,
            });
        }
        arcs
    }

    pub(crate) fn to_json(&self, v: VertexId) -> Result<Json, Errors> {
        let mut errors = Vec::new();
        let json = self.export(v, &mut errors);
        match Errors::from_vec(dedupe(errors)) {
            Some(errors) => Err(errors),
            None => Ok(json),
        }
    }

    fn export(&self, v: VertexId, errors: &mut Vec<Error>) -> Json {
        let id = self.effective(v);
        let vertex = &self.vertices[id];
        if let Some(err) = &vertex.error {
            errors.push(err.clone());
            return Json::Null;
        }
        if vertex.resolved.is_some() {
            errors.push(
                Error::incomplete(format!(
                    "incomplete value {} (unresolved disjunction)",
                    vertex.scalar.kind
                ))
                .with_path(self.path(v)),
            );
            return Json::Null;
        }
        if let Some(atom) = &vertex.scalar.atom {
            return match atom.to_json() {
                Some(json) => json,
                None => {
                    errors.push(
                        Error::conflict(format!("value out of range: {}", atom))
                            .with_path(self.path(v)),
                    );
                    Json::Null
                }
            };
        }
        if let Some(err) = &vertex.incomplete {
            errors.push(err.clone());
            return Json::Null;
        }
        if vertex.is_struct() {
            let mut map = Map::new();
            for &arc in &vertex.arcs {
                let a = &self.vertices[arc];
                let Label::Regular(name) = &a.label else {
                    continue;
                };
                if a.optional {
                    if a.required {
                        errors.push(
                            Error::incomplete("field is required but not present")
                                .with_path(self.path(arc)),
                        );
                    }
                    continue;
                }
                map.insert(name.clone(), self.export(arc, errors));
            }
            return Json::Object(map);
        }
        if vertex.is_list() {
            let items = self
                .exported_arcs(id)
                .into_iter()
                .map(|arc| self.export(arc, errors))
                .collect();
            return Json::Array(items);
        }
        errors.push(
            Error::incomplete(format!("incomplete value {}", vertex.scalar.describe()))
                .with_path(self.path(v)),
        );
        Json::Null
    }

    /// Errors in the subtree of `v`. With `concrete`, values that cannot be
    /// exported are reported as well.
    pub(crate) fn validate(&self, v: VertexId, concrete: bool) -> Vec<Error> {
        let mut errors = Vec::new();
        self.collect_errors(v, concrete, &mut errors);
        dedupe(errors)
    }

    fn collect_errors(&self, v: VertexId, concrete: bool, errors: &mut Vec<Error>) {
        let id = self.effective(v);
        let vertex = &self.vertices[id];
        if let Some(err) = &vertex.error {
            errors.push(err.clone());
            return;
        }
        if vertex.resolved.is_some() {
            if concrete {
                errors.push(
                    Error::incomplete(format!(
                        "incomplete value {} (unresolved disjunction)",
                        vertex.scalar.kind
                    ))
                    .with_path(self.path(v)),
                );
            }
            return;
        }
        if concrete && vertex.scalar.atom.is_none() {
            if let Some(err) = &vertex.incomplete {
                errors.push(err.clone());
                return;
            }
            if !vertex.is_struct() && !vertex.is_list() {
                errors.push(
                    Error::incomplete(format!("incomplete value {}", vertex.scalar.describe()))
                        .with_path(self.path(v)),
                );
                return;
            }
        }
        for &arc in &vertex.arcs {
            let a = &self.vertices[arc];
            if a.optional {
                if concrete && a.required && a.label.is_regular() {
                    errors.push(
                        Error::incomplete("field is required but not present")
                            .with_path(self.path(arc)),
                    );
                }
                continue;
            }
            if concrete && !a.label.is_regular() {
                continue;
            }
            self.collect_errors(arc, concrete, errors);
        }
    }

    /// Turns an evaluated vertex back into an expression that evaluates to
    /// the same value.
    pub(crate) fn reify(&self, v: VertexId) -> Arc<Expr> {
        let vertex = &self.vertices[v];
        if vertex.error.is_some() {
            return Expr::synthetic(ExprKind::Bottom);
        }
        if let Some(results) = &vertex.resolved {
            let any_default = results.iter().any(|(_, default)| *default);
            let mut disjuncts = results.iter().map(|&(id, default)| {
                let expr = self.reify(id);
                if default && any_default {
                    Expr::synthetic(ExprKind::Unary(UnaryOp::Default, expr))
                } else {
                    expr
                }
            });
            let first = disjuncts
                .next()
                .unwrap_or_else(|| Expr::synthetic(ExprKind::Bottom));
            return disjuncts.fold(first, |acc, next| {
                Expr::synthetic(ExprKind::Binary(BinaryOp::Disjunction, acc, next))
            });
        }
        if let Some(atom) = &vertex.scalar.atom {
            return Expr::synthetic(ExprKind::Literal(atom.clone()));
        }
        if vertex.is_struct() {
            let mut decls: Vec<Decl> = vertex
                .arcs
                .iter()
                .filter_map(|&arc| {
                    let a = &self.vertices[arc];
                    if matches!(a.label, Label::Let(_) | Label::Index(_)) {
                        return None;
                    }
                    let constraint = if a.required && a.optional {
                        FieldConstraint::Required
                    } else if a.optional {
                        FieldConstraint::Optional
                    } else {
                        FieldConstraint::Regular
                    };
                    Some(Decl::Field {
                        label: a.label.clone(),
                        constraint,
                        value: self.reify(arc),
                    })
                })
                .collect();
            let open = vertex.closes.iter().all(|group| group.is_open());
            if vertex.closes.is_empty() || open {
                if !vertex.closes.is_empty() {
                    decls.push(Decl::Ellipsis(None));
                }
                return Expr::synthetic(ExprKind::Struct(decls));
            }
            return Expr::synthetic(ExprKind::Closed(Expr::synthetic(ExprKind::Struct(decls))));
        }
        if vertex.is_list() {
            let elems = self
                .exported_arcs(v)
                .into_iter()
                .map(|arc| ListElem::Expr(self.reify(arc)))
                .collect();
            let rest = if vertex.lists.iter().all(|shape| shape.open) {
                Some(None)
            } else {
                None
            };
            return Expr::synthetic(ExprKind::List(ListLit { elems, rest }));
        }
        if vertex.scalar.kind == Kind::TOP && vertex.scalar.constraints.is_empty() {
            return Expr::synthetic(ExprKind::Top);
        }
        Expr::synthetic(ExprKind::Scalar(vertex.scalar.clone()))
    }
}

fn dedupe(errors: Vec<Error>) -> Vec<Error> {
    let mut seen = HashSet::new();
    errors
        .into_iter()
        .filter(|err| seen.insert(err.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let errors = vec![
            Error::conflict("a"),
            Error::conflict("b"),
            Error::conflict("a"),
        ];
        let messages: Vec<String> = dedupe(errors).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }
}
