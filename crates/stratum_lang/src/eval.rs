//! Conjunct-based evaluator.
//!
//! Every field is a vertex in an arena. A vertex collects the expressions
//! (conjuncts) that apply to it and evaluates them in three stages:
//! struct and list literals first, then references and computed values,
//! then pattern and list-rest constraints. Disjunctions are resolved during
//! finalization by evaluating one scratch vertex per combination of
//! disjuncts and keeping the ones that do not fail.

use crate::ast::{
    wrap_in_path, BinaryOp, Clause, Comprehension, Decl, Expr, ExprKind, FieldConstraint, File,
    InterpolationPart, Label, ListElem, ListLit, UnaryOp,
};
use crate::atom::{Atom, Kind};
use crate::builtins::{self, Arg, BuiltinValue};
use crate::context::Limits;
use crate::error::{Error, Pos};
use crate::scalar::{Constraint, Scalar};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) type VertexId = usize;
type EnvId = usize;
type CloseId = u32;

/// Position of a conjunct in the source, used to order fields. Each level
/// of nesting appends the index of the operand or declaration it came from.
type Order = Arc<[u32]>;

fn child_order(order: &Order, index: usize) -> Order {
    let mut child = Vec::with_capacity(order.len() + 1);
    child.extend_from_slice(order);
    child.push(u32::try_from(index).unwrap_or(u32::MAX));
    Arc::from(child)
}

fn root_order(index: usize) -> Order {
    Arc::from([u32::try_from(index).unwrap_or(u32::MAX)])
}

/// A value placed at a path on top of the program's files.
#[derive(Debug, Clone)]
pub(crate) struct Fill {
    pub path: Vec<Label>,
    pub expr: Arc<Expr>,
}

/// Everything needed to evaluate a value from scratch.
#[derive(Debug, Clone, Default)]
pub(crate) struct Program {
    pub files: Arc<Vec<Arc<File>>>,
    /// Files of every module-local package imported (transitively), by path.
    pub imports: Arc<BTreeMap<String, Vec<Arc<File>>>>,
    pub fills: Vec<Fill>,
}

impl Program {
    pub fn with_fill(&self, path: Vec<Label>, expr: Arc<Expr>) -> Program {
        let mut program = self.clone();
        program.fills.push(Fill { path, expr });
        program
    }
}

#[derive(Debug, Clone)]
struct Conjunct {
    expr: Arc<Expr>,
    env: EnvId,
    close: Option<CloseId>,
    embedded: bool,
    order: Order,
}

#[derive(Debug, Clone)]
enum Binding {
    Vertex(VertexId),
    Atom(Atom),
    Package(String),
    Import(String),
}

#[derive(Debug, Clone, Default)]
struct Env {
    vertex: Option<VertexId>,
    parent: Option<EnvId>,
    bindings: Vec<(String, Binding)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Unexpanded,
    Expanding,
    Expanded,
    Finalizing,
    Finalized,
}

/// Labels admitted by one closed struct.
#[derive(Debug, Clone)]
pub(crate) struct CloseGroup {
    id: CloseId,
    labels: HashSet<Label>,
    patterns: Vec<usize>,
    open: bool,
}

impl CloseGroup {
    pub(crate) fn is_open(&self) -> bool {
        self.open
    }
}

#[derive(Debug, Clone)]
struct PatternConstraint {
    pattern: Arc<Expr>,
    env: EnvId,
    value: Conjunct,
}

#[derive(Debug, Clone)]
pub(crate) struct ListShape {
    pub len: usize,
    pub open: bool,
    rest: Option<Conjunct>,
}

#[derive(Debug, Clone)]
struct PendingDisjunction {
    key: usize,
    disjuncts: Vec<(Arc<Expr>, bool)>,
}

impl PendingDisjunction {
    fn has_default(&self) -> bool {
        self.disjuncts.iter().any(|(_, default)| *default)
    }
}

#[derive(Debug, Clone)]
enum Deferred {
    Reference(Conjunct),
    Value(Conjunct),
    List(Conjunct),
    Comprehension {
        comprehension: Arc<Comprehension>,
        env: EnvId,
        close: Option<CloseId>,
        order: Order,
    },
    DynamicField {
        label: Arc<Expr>,
        constraint: FieldConstraint,
        value: Arc<Expr>,
        env: EnvId,
        close: Option<CloseId>,
        order: Order,
    },
}

#[derive(Debug, Clone)]
enum Resolved {
    Vertex { id: VertexId, definition: bool },
    Atom(Atom),
    Kind(Kind),
    Builtin(String),
    Package(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Vertex {
    pub label: Label,
    pub parent: Option<VertexId>,
    pub status: Status,
    pub arcs: Vec<VertexId>,
    /// No regular declaration has been seen for this field.
    pub optional: bool,
    pub required: bool,
    pub scalar: Scalar,
    pub error: Option<Error>,
    pub incomplete: Option<Error>,
    /// Surviving disjuncts with their default flag, when more than one.
    pub resolved: Option<Vec<(VertexId, bool)>>,
    pub closes: Vec<CloseGroup>,
    pub lists: Vec<ListShape>,
    pub positions: Vec<Pos>,
    /// Earliest declaration of this field among its parent's conjuncts.
    order: Option<Order>,
    conjuncts: Vec<Conjunct>,
    next_conjunct: usize,
    work: VecDeque<Conjunct>,
    deferred: VecDeque<Deferred>,
    patterns: Vec<PatternConstraint>,
    applied: HashSet<(usize, VertexId)>,
    rest_applied: HashSet<(usize, VertexId)>,
    disjunctions: Vec<PendingDisjunction>,
    choices: HashMap<usize, usize>,
    chosen: Vec<Conjunct>,
}

impl Vertex {
    fn new(label: Label, parent: Option<VertexId>) -> Self {
        Self {
            label,
            parent,
            status: Status::Unexpanded,
            arcs: Vec::new(),
            optional: true,
            required: false,
            scalar: Scalar::top(),
            error: None,
            incomplete: None,
            resolved: None,
            closes: Vec::new(),
            lists: Vec::new(),
            positions: Vec::new(),
            order: None,
            conjuncts: Vec::new(),
            next_conjunct: 0,
            work: VecDeque::new(),
            deferred: VecDeque::new(),
            patterns: Vec::new(),
            applied: HashSet::new(),
            rest_applied: HashSet::new(),
            disjunctions: Vec::new(),
            choices: HashMap::new(),
            chosen: Vec::new(),
        }
    }

    pub fn is_list(&self) -> bool {
        self.scalar.kind == Kind::LIST
    }

    pub fn is_struct(&self) -> bool {
        self.scalar.kind == Kind::STRUCT
    }
}

/// An evaluated program. Immutable once `evaluate` returns.
#[derive(Debug)]
pub(crate) struct Graph {
    pub vertices: Vec<Vertex>,
    envs: Vec<Env>,
    pub root: VertexId,
    pub program: Arc<Program>,
    pub limits: Limits,
    next_close: CloseId,
    import_roots: HashMap<String, VertexId>,
    depth: usize,
}

impl Graph {
    pub(crate) fn evaluate(program: Arc<Program>, limits: Limits) -> Graph {
        let mut graph = Graph {
            vertices: Vec::new(),
            envs: Vec::new(),
            root: 0,
            program: program.clone(),
            limits,
            next_close: 0,
            import_roots: HashMap::new(),
            depth: 0,
        };
        let root = graph.new_vertex(Label::Regular(String::new()), None);
        graph.root = root;
        graph.vertices[root].optional = false;

        for (i, file) in program.files.iter().enumerate() {
            let env = graph.file_env(file);
            graph.vertices[root].conjuncts.push(Conjunct {
                expr: file.body.clone(),
                env,
                close: None,
                embedded: false,
                order: root_order(i),
            });
        }
        for (i, fill) in program.fills.iter().enumerate() {
            let env = graph.new_env(Env::default());
            graph.vertices[root].conjuncts.push(Conjunct {
                expr: wrap_in_path(&fill.path, fill.expr.clone()),
                env,
                close: None,
                embedded: false,
                order: root_order(program.files.len() + i),
            });
        }

        graph.finalize(root);
        graph.sort_arcs();
        debug!(
            "Evaluated {} files and {} fills into {} vertices",
            program.files.len(),
            program.fills.len(),
            graph.vertices.len()
        );
        graph
    }

    fn new_vertex(&mut self, label: Label, parent: Option<VertexId>) -> VertexId {
        self.vertices.push(Vertex::new(label, parent));
        self.vertices.len() - 1
    }

    fn new_env(&mut self, env: Env) -> EnvId {
        self.envs.push(env);
        self.envs.len() - 1
    }

    fn fresh_close(&mut self) -> CloseId {
        self.next_close += 1;
        self.next_close
    }

    fn file_env(&mut self, file: &File) -> EnvId {
        let bindings = file
            .imports
            .iter()
            .map(|spec| {
                let binding = if builtins::is_package(&spec.path) {
                    Binding::Package(spec.path.clone())
                } else {
                    Binding::Import(spec.path.clone())
                };
                (spec.binding_name(), binding)
            })
            .collect();
        self.new_env(Env {
            vertex: None,
            parent: None,
            bindings,
        })
    }

    /// Field path of a vertex, outermost label first.
    pub(crate) fn path(&self, v: VertexId) -> Vec<String> {
        let mut labels = Vec::new();
        let mut current = v;
        while let Some(parent) = self.vertices[current].parent {
            labels.push(self.vertices[current].label.to_string());
            current = parent;
        }
        labels.reverse();
        labels
    }

    pub(crate) fn find_arc(&self, v: VertexId, label: &Label) -> Option<VertexId> {
        self.vertices[v]
            .arcs
            .iter()
            .copied()
            .find(|&arc| self.vertices[arc].label == *label)
    }

    fn find_arc_named(&self, v: VertexId, name: &str) -> Option<VertexId> {
        self.vertices[v]
            .arcs
            .iter()
            .copied()
            .find(|&arc| self.vertices[arc].label.identifier() == Some(name))
    }

    fn arc_or_insert(&mut self, v: VertexId, label: &Label, order: &Order) -> VertexId {
        if let Some(arc) = self.find_arc(v, label) {
            let earlier = self.vertices[arc]
                .order
                .as_ref()
                .map_or(true, |existing| order < existing);
            if earlier {
                self.vertices[arc].order = Some(order.clone());
            }
            return arc;
        }
        let arc = self.new_vertex(label.clone(), Some(v));
        self.vertices[arc].order = Some(order.clone());
        self.vertices[v].arcs.push(arc);
        arc
    }

    /// Puts every field after the ones declared before it, regardless of
    /// the order in which references were evaluated.
    fn sort_arcs(&mut self) {
        for v in 0..self.vertices.len() {
            if self.vertices[v].arcs.len() < 2 {
                continue;
            }
            let mut arcs = std::mem::take(&mut self.vertices[v].arcs);
            arcs.sort_by(|&a, &b| self.vertices[a].order.cmp(&self.vertices[b].order));
            self.vertices[v].arcs = arcs;
        }
    }

    /// Follows unique defaults of resolved disjunctions.
    pub(crate) fn effective(&self, v: VertexId) -> VertexId {
        let mut current = v;
        for _ in 0..self.limits.max_depth {
            let Some(results) = &self.vertices[current].resolved else {
                return current;
            };
            let mut defaults = results.iter().filter(|(_, default)| *default);
            match (defaults.next(), defaults.next()) {
                (Some((id, _)), None) => current = *id,
                _ => return current,
            }
        }
        current
    }

    fn is_ancestor(&self, candidate: VertexId, v: VertexId) -> bool {
        let mut current = self.vertices[v].parent;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.vertices[id].parent;
        }
        false
    }

    fn record(&mut self, v: VertexId, err: Error) {
        let err = if err.path.is_empty() {
            err.with_path(self.path(v))
        } else {
            err
        };
        trace!("Recording error at vertex {}: {}", v, err);
        let vertex = &mut self.vertices[v];
        if err.is_incomplete() {
            if vertex.incomplete.is_none() {
                vertex.incomplete = Some(err);
            }
        } else if vertex.error.is_none() {
            vertex.error = Some(err);
        }
    }

    fn note_position(&mut self, v: VertexId, pos: &Pos) {
        let positions = &mut self.vertices[v].positions;
        if !pos.is_synthetic() && positions.len() < 4 && !positions.contains(pos) {
            positions.push(pos.clone());
        }
    }

    fn close_group(&mut self, v: VertexId, id: CloseId) -> &mut CloseGroup {
        let closes = &mut self.vertices[v].closes;
        let index = match closes.iter().position(|g| g.id == id) {
            Some(index) => index,
            None => {
                closes.push(CloseGroup {
                    id,
                    labels: HashSet::new(),
                    patterns: Vec::new(),
                    open: false,
                });
                closes.len() - 1
            }
        };
        &mut closes[index]
    }

    fn add_conjunct(&mut self, v: VertexId, conjunct: Conjunct) {
        self.vertices[v].conjuncts.push(conjunct);
        match self.vertices[v].status {
            Status::Unexpanded | Status::Expanding => {}
            Status::Expanded | Status::Finalizing => {
                self.drain(v);
                self.apply_constraints(v);
            }
            Status::Finalized => {
                self.drain(v);
                self.apply_constraints(v);
                let mut i = 0;
                while i < self.vertices[v].arcs.len() {
                    let arc = self.vertices[v].arcs[i];
                    self.finalize(arc);
                    i += 1;
                }
            }
        }
    }

    fn expand(&mut self, v: VertexId) {
        if self.vertices[v].status != Status::Unexpanded {
            return;
        }
        if let Some(parent) = self.vertices[v].parent {
            self.expand(parent);
        }
        if self.vertices[v].status != Status::Unexpanded {
            return;
        }
        self.vertices[v].status = Status::Expanding;
        self.drain(v);
        self.apply_constraints(v);
        self.vertices[v].status = Status::Expanded;
    }

    fn drain(&mut self, v: VertexId) {
        loop {
            let next = self.vertices[v].next_conjunct;
            if next < self.vertices[v].conjuncts.len() {
                let conjunct = self.vertices[v].conjuncts[next].clone();
                self.vertices[v].next_conjunct += 1;
                self.process(v, conjunct);
                continue;
            }
            if let Some(conjunct) = self.vertices[v].work.pop_front() {
                self.process(v, conjunct);
                continue;
            }
            if let Some(deferred) = self.vertices[v].deferred.pop_front() {
                self.process_deferred(v, deferred);
                continue;
            }
            if !self.vertices[v].chosen.is_empty() {
                let chosen = std::mem::take(&mut self.vertices[v].chosen);
                self.vertices[v].work.extend(chosen);
                continue;
            }
            break;
        }
    }

    pub(crate) fn finalize(&mut self, v: VertexId) {
        if matches!(
            self.vertices[v].status,
            Status::Finalizing | Status::Finalized
        ) {
            return;
        }
        self.expand(v);
        if self.vertices[v].status != Status::Expanded {
            return;
        }
        self.vertices[v].status = Status::Finalizing;
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            self.record(
                v,
                Error::conflict("structural cycle (maximum evaluation depth exceeded)"),
            );
        } else {
            if !self.vertices[v].disjunctions.is_empty() {
                self.resolve_disjunctions(v);
            }
            if self.vertices[v].resolved.is_none() {
                self.check_closedness(v);
                let mut i = 0;
                while i < self.vertices[v].arcs.len() {
                    let arc = self.vertices[v].arcs[i];
                    self.finalize(arc);
                    i += 1;
                }
            }
        }
        self.depth -= 1;
        self.vertices[v].status = Status::Finalized;
    }

    fn process(&mut self, v: VertexId, c: Conjunct) {
        self.note_position(v, &c.expr.pos);
        let expr = c.expr.clone();
        match &expr.kind {
            ExprKind::Struct(decls) => self.process_struct(v, &c, decls),
            ExprKind::List(list) => {
                self.unify_scalar(v, Scalar::from_kind(Kind::LIST), &expr.pos);
                let has_comprehension = list
                    .elems
                    .iter()
                    .any(|e| matches!(e, ListElem::Comprehension(_)));
                if has_comprehension {
                    self.vertices[v].deferred.push_back(Deferred::List(c));
                } else {
                    self.emit_list(v, &c, list);
                }
            }
            ExprKind::Literal(atom) => {
                self.unify_scalar(v, Scalar::from_atom(atom.clone()), &expr.pos)
            }
            ExprKind::Scalar(scalar) => self.unify_scalar(v, scalar.clone(), &expr.pos),
            ExprKind::Top => {}
            ExprKind::Bottom => self.record(
                v,
                Error::conflict("explicit error (_|_ literal) in source").at(expr.pos.clone()),
            ),
            ExprKind::Paren(inner) | ExprKind::Unary(UnaryOp::Default, inner) => {
                self.vertices[v].work.push_back(Conjunct {
                    expr: inner.clone(),
                    ..c
                });
            }
            ExprKind::Closed(inner) => {
                let close = Some(self.fresh_close());
                self.vertices[v].work.push_back(Conjunct {
                    expr: inner.clone(),
                    close,
                    ..c
                });
            }
            ExprKind::Binary(BinaryOp::Unification, lhs, rhs) => {
                for (i, side) in [lhs, rhs].into_iter().enumerate() {
                    self.vertices[v].work.push_back(Conjunct {
                        expr: side.clone(),
                        order: child_order(&c.order, i),
                        ..c.clone()
                    });
                }
            }
            ExprKind::Binary(BinaryOp::Disjunction, ..) => self.process_disjunction(v, c),
            ExprKind::Identifier(_) | ExprKind::Selector(..) | ExprKind::Index(..) => {
                self.vertices[v].deferred.push_back(Deferred::Reference(c));
            }
            _ => self.vertices[v].deferred.push_back(Deferred::Value(c)),
        }
    }

    fn process_struct(&mut self, v: VertexId, c: &Conjunct, decls: &[Decl]) {
        let embeds_only = !decls.is_empty() && decls.iter().all(|d| matches!(d, Decl::Embed(_)));
        if !embeds_only {
            self.unify_scalar(v, Scalar::from_kind(Kind::STRUCT), &c.expr.pos);
        }
        let embeds_definition = decls
            .iter()
            .any(|d| matches!(d, Decl::Embed(e) if is_definition_reference(e)));
        let close = match c.close {
            Some(id) => Some(id),
            None if embeds_definition => Some(self.fresh_close()),
            None => None,
        };
        if let Some(id) = close {
            self.close_group(v, id);
        }
        let env = self.new_env(Env {
            vertex: Some(v),
            parent: Some(c.env),
            bindings: Vec::new(),
        });

        for (i, decl) in decls.iter().enumerate() {
            let order = child_order(&c.order, i);
            match decl {
                Decl::Field {
                    label,
                    constraint,
                    value,
                } => {
                    let field = Conjunct {
                        expr: value.clone(),
                        env,
                        close,
                        embedded: false,
                        order,
                    };
                    self.add_field(v, label, *constraint, field);
                }
                Decl::DynamicField {
                    label,
                    constraint,
                    value,
                } => self.vertices[v].deferred.push_back(Deferred::DynamicField {
                    label: label.clone(),
                    constraint: *constraint,
                    value: value.clone(),
                    env,
                    close,
                    order,
                }),
                Decl::Pattern { pattern, value } => {
                    let value = Conjunct {
                        expr: value.clone(),
                        env,
                        close,
                        embedded: false,
                        order,
                    };
                    self.add_pattern(v, pattern.clone(), env, value, close);
                }
                Decl::Ellipsis(value) => {
                    if let Some(id) = close {
                        self.close_group(v, id).open = true;
                    }
                    if let Some(value) = value {
                        let any = Expr::new(ExprKind::Top, value.pos.clone());
                        let value = Conjunct {
                            expr: value.clone(),
                            env,
                            close: None,
                            embedded: false,
                            order,
                        };
                        self.add_pattern(v, any, env, value, None);
                    }
                }
                Decl::Let { name, value } => {
                    let arc = self.arc_or_insert(v, &Label::Let(name.clone()), &order);
                    self.vertices[arc].optional = false;
                    self.add_conjunct(
                        arc,
                        Conjunct {
                            expr: value.clone(),
                            env,
                            close: None,
                            embedded: false,
                            order,
                        },
                    );
                }
                Decl::Embed(expr) => self.vertices[v].work.push_back(Conjunct {
                    expr: expr.clone(),
                    env,
                    close,
                    embedded: true,
                    order,
                }),
                Decl::Comprehension(comprehension) => {
                    self.vertices[v].deferred.push_back(Deferred::Comprehension {
                        comprehension: comprehension.clone(),
                        env,
                        close,
                        order,
                    })
                }
            }
        }
    }

    fn add_field(
        &mut self,
        v: VertexId,
        label: &Label,
        constraint: FieldConstraint,
        field: Conjunct,
    ) {
        let arc = self.arc_or_insert(v, label, &field.order);
        match constraint {
            FieldConstraint::Regular => self.vertices[arc].optional = false,
            FieldConstraint::Required => self.vertices[arc].required = true,
            FieldConstraint::Optional => {}
        }
        if let Some(id) = field.close {
            if label.is_regular() {
                self.close_group(v, id).labels.insert(label.clone());
            }
        }
        self.add_conjunct(arc, field);
    }

    fn add_pattern(
        &mut self,
        v: VertexId,
        pattern: Arc<Expr>,
        env: EnvId,
        value: Conjunct,
        close: Option<CloseId>,
    ) {
        let index = self.vertices[v].patterns.len();
        self.vertices[v].patterns.push(PatternConstraint {
            pattern,
            env,
            value,
        });
        if let Some(id) = close {
            self.close_group(v, id).patterns.push(index);
        }
    }

    fn emit_list(&mut self, v: VertexId, c: &Conjunct, list: &ListLit) {
        let mut index = 0;
        for elem in &list.elems {
            match elem {
                ListElem::Expr(expr) => {
                    self.add_element(
                        v,
                        index,
                        Conjunct {
                            expr: expr.clone(),
                            env: c.env,
                            close: c.close,
                            embedded: false,
                            order: child_order(&c.order, index),
                        },
                    );
                    index += 1;
                }
                ListElem::Comprehension(comprehension) => {
                    for env in self.comprehension_envs(v, &comprehension.clauses, c.env) {
                        self.add_element(
                            v,
                            index,
                            Conjunct {
                                expr: comprehension.body.clone(),
                                env,
                                close: c.close,
                                embedded: false,
                                order: child_order(&c.order, index),
                            },
                        );
                        index += 1;
                    }
                }
            }
        }
        let rest = match &list.rest {
            Some(rest) => Some(rest.as_ref().map(|expr| Conjunct {
                expr: expr.clone(),
                env: c.env,
                close: c.close,
                embedded: false,
                order: c.order.clone(),
            })),
            None => None,
        };
        self.vertices[v].lists.push(ListShape {
            len: index,
            open: rest.is_some(),
            rest: rest.flatten(),
        });
    }

    fn add_element(&mut self, v: VertexId, index: usize, conjunct: Conjunct) {
        let arc = self.arc_or_insert(v, &Label::Index(index), &conjunct.order);
        self.vertices[arc].optional = false;
        self.add_conjunct(arc, conjunct);
    }

    fn apply_constraints(&mut self, v: VertexId) {
        let pattern_count = self.vertices[v].patterns.len();
        if pattern_count > 0 {
            let arcs = self.vertices[v].arcs.clone();
            for p in 0..pattern_count {
                for &arc in &arcs {
                    if !self.vertices[v].applied.insert((p, arc)) {
                        continue;
                    }
                    let Label::Regular(name) = self.vertices[arc].label.clone() else {
                        continue;
                    };
                    if self.pattern_matches(v, p, &name) {
                        let value = self.vertices[v].patterns[p].value.clone();
                        self.add_conjunct(arc, value);
                    }
                }
            }
        }
        if !self.vertices[v].lists.is_empty() {
            self.apply_list_shapes(v);
        }
    }

    fn apply_list_shapes(&mut self, v: VertexId) {
        let elements: Vec<(usize, VertexId)> = self.vertices[v]
            .arcs
            .iter()
            .filter_map(|&arc| match self.vertices[arc].label {
                Label::Index(i) => Some((i, arc)),
                _ => None,
            })
            .collect();
        let len = elements.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
        let shapes = self.vertices[v].lists.clone();
        for (s, shape) in shapes.iter().enumerate() {
            if !shape.open && shape.len != len {
                let err = Error::conflict(format!(
                    "incompatible list lengths ({} and {})",
                    shape.len, len
                ));
                self.record(v, err);
                continue;
            }
            let Some(rest) = &shape.rest else { continue };
            for &(i, arc) in &elements {
                if i >= shape.len && self.vertices[v].rest_applied.insert((s, arc)) {
                    self.add_conjunct(arc, rest.clone());
                }
            }
        }
    }

    fn pattern_matches(&mut self, v: VertexId, pattern: usize, name: &str) -> bool {
        let (expr, env) = {
            let p = &self.vertices[v].patterns[pattern];
            (p.pattern.clone(), p.env)
        };
        self.label_matches(&expr, env, name)
    }

    fn label_matches(&mut self, expr: &Expr, env: EnvId, name: &str) -> bool {
        match &expr.kind {
            ExprKind::Top => true,
            ExprKind::Paren(inner) | ExprKind::Unary(UnaryOp::Default, inner) => {
                self.label_matches(inner, env, name)
            }
            ExprKind::Binary(BinaryOp::Disjunction, lhs, rhs) => {
                self.label_matches(lhs, env, name) || self.label_matches(rhs, env, name)
            }
            ExprKind::Binary(BinaryOp::Unification, lhs, rhs) => {
                self.label_matches(lhs, env, name) && self.label_matches(rhs, env, name)
            }
            _ => match self.constraint_of(expr, env) {
                Ok(scalar) => scalar
                    .unify(&Scalar::from_atom(Atom::String(name.to_string())))
                    .is_ok(),
                Err(_) => false,
            },
        }
    }

    /// Evaluates an expression that denotes a scalar constraint.
    fn constraint_of(&mut self, expr: &Expr, env: EnvId) -> Result<Scalar, Error> {
        match &expr.kind {
            ExprKind::Top => Ok(Scalar::top()),
            ExprKind::Literal(atom) => Ok(Scalar::from_atom(atom.clone())),
            ExprKind::Scalar(scalar) => Ok(scalar.clone()),
            ExprKind::Paren(inner) => self.constraint_of(inner, env),
            ExprKind::Unary(UnaryOp::Bound(op), operand) => {
                let atom = self.eval_atom(operand, env)?;
                Ok(Scalar::from_constraint(Constraint::Bound(*op, atom)))
            }
            ExprKind::Unary(op @ (UnaryOp::Match | UnaryOp::NotMatch), operand) => {
                let atom = self.eval_atom(operand, env)?;
                let pattern = atom.as_str().ok_or_else(|| {
                    Error::conflict(format!("cannot use {} as regular expression", atom))
                })?;
                Constraint::regex(pattern, *op == UnaryOp::NotMatch)
                    .map(Scalar::from_constraint)
                    .map_err(Error::conflict)
            }
            ExprKind::Binary(BinaryOp::Unification, lhs, rhs) => {
                let lhs = self.constraint_of(lhs, env)?;
                let rhs = self.constraint_of(rhs, env)?;
                lhs.unify(&rhs).map_err(Error::conflict)
            }
            _ if expr.is_reference() => match self.resolve(expr, env)? {
                Resolved::Kind(kind) => Ok(Scalar::from_kind(kind)),
                Resolved::Atom(atom) => Ok(Scalar::from_atom(atom)),
                Resolved::Vertex { id, .. } => {
                    self.finalize(id);
                    let target = self.effective(id);
                    Ok(self.vertices[target].scalar.clone())
                }
                Resolved::Builtin(name) | Resolved::Package(name) => {
                    Err(Error::conflict(format!("cannot use {} as value", name)))
                }
            },
            _ => Ok(Scalar::from_atom(self.eval_atom(expr, env)?)),
        }
    }

    fn unify_scalar(&mut self, v: VertexId, scalar: Scalar, pos: &Pos) {
        match self.vertices[v].scalar.unify(&scalar) {
            Ok(unified) => self.vertices[v].scalar = unified,
            Err(message) => {
                let mut err = Error::conflict(message).at(pos.clone());
                for p in self.vertices[v].positions.iter().take(2) {
                    err = err.at(p.clone());
                }
                self.record(v, err);
            }
        }
    }

    fn process_disjunction(&mut self, v: VertexId, c: Conjunct) {
        let mut disjuncts = Vec::new();
        flatten_disjunction(&c.expr, false, &mut disjuncts);
        if disjuncts.len() == 1 {
            let (expr, _) = disjuncts.remove(0);
            self.vertices[v].work.push_back(Conjunct { expr, ..c });
            return;
        }
        let key = Arc::as_ptr(&c.expr) as usize;
        if let Some(&choice) = self.vertices[v].choices.get(&key) {
            if let Some((expr, _)) = disjuncts.get(choice) {
                self.vertices[v].chosen.push(Conjunct {
                    expr: expr.clone(),
                    ..c
                });
            }
            return;
        }
        if !self.vertices[v].disjunctions.iter().any(|d| d.key == key) {
            trace!("Deferring disjunction of {} values", disjuncts.len());
            self.vertices[v]
                .disjunctions
                .push(PendingDisjunction { key, disjuncts });
        }
    }

    fn resolve_disjunctions(&mut self, v: VertexId) {
        let pending = std::mem::take(&mut self.vertices[v].disjunctions);
        let total = pending
            .iter()
            .fold(1usize, |acc, d| acc.saturating_mul(d.disjuncts.len()));
        if total > self.limits.max_disjunction_combinations {
            let err = Error::conflict(format!(
                "too many disjunction combinations ({})",
                total
            ));
            self.record(v, err);
            return;
        }

        let mut results: Vec<(VertexId, bool)> = Vec::new();
        let mut failures: Vec<Error> = Vec::new();
        for n in 0..total {
            let mut remaining = n;
            let mut choices = self.vertices[v].choices.clone();
            let mut default = true;
            for d in &pending {
                let i = remaining % d.disjuncts.len();
                remaining /= d.disjuncts.len();
                choices.insert(d.key, i);
                if d.has_default() && !d.disjuncts[i].1 {
                    default = false;
                }
            }

            let scratch = self.scratch(v, choices);
            self.finalize(scratch);
            if let Some(err) = self.first_error(scratch) {
                failures.push(err);
                continue;
            }
            let mut duplicate = false;
            for result in results.iter_mut() {
                if self.vertex_equal(result.0, scratch) {
                    result.1 |= default;
                    duplicate = true;
                    break;
                }
            }
            if !duplicate {
                results.push((scratch, default));
            }
        }

        match results.len() {
            0 => {
                let err = empty_disjunction(failures);
                self.record(v, err);
            }
            1 => self.adopt(v, results[0].0),
            _ => {
                let kind = results
                    .iter()
                    .fold(Kind::BOTTOM, |acc, (id, _)| acc | self.vertices[*id].scalar.kind);
                self.vertices[v].scalar = Scalar::from_kind(kind);
                self.vertices[v].resolved = Some(results);
            }
        }
    }

    fn scratch(&mut self, v: VertexId, choices: HashMap<usize, usize>) -> VertexId {
        let (label, parent) = (self.vertices[v].label.clone(), self.vertices[v].parent);
        let scratch = self.new_vertex(label, parent);
        let conjuncts = self.vertices[v].conjuncts.clone();
        let (optional, required) = (self.vertices[v].optional, self.vertices[v].required);
        let vertex = &mut self.vertices[scratch];
        vertex.conjuncts = conjuncts;
        vertex.optional = optional;
        vertex.required = required;
        vertex.choices = choices;
        scratch
    }

    fn adopt(&mut self, v: VertexId, source: VertexId) {
        let source = self.vertices[source].clone();
        let target = &mut self.vertices[v];
        target.arcs = source.arcs;
        target.scalar = source.scalar;
        target.closes = source.closes;
        target.lists = source.lists;
        target.error = source.error;
        target.incomplete = source.incomplete;
        target.resolved = source.resolved;
    }

    fn first_error(&self, v: VertexId) -> Option<Error> {
        let mut stack = vec![v];
        while let Some(id) = stack.pop() {
            let vertex = &self.vertices[id];
            if let Some(err) = &vertex.error {
                return Some(err.clone());
            }
            stack.extend(vertex.arcs.iter().rev());
        }
        None
    }

    fn vertex_equal(&self, a: VertexId, b: VertexId) -> bool {
        let (a, b) = (self.effective(a), self.effective(b));
        if a == b {
            return true;
        }
        let (va, vb) = (&self.vertices[a], &self.vertices[b]);
        if va.scalar != vb.scalar
            || va.optional != vb.optional
            || va.arcs.len() != vb.arcs.len()
            || va.resolved.is_some() != vb.resolved.is_some()
        {
            return false;
        }
        if let (Some(ra), Some(rb)) = (&va.resolved, &vb.resolved) {
            return ra.len() == rb.len()
                && ra
                    .iter()
                    .zip(rb)
                    .all(|(x, y)| x.1 == y.1 && self.vertex_equal(x.0, y.0));
        }
        va.arcs.iter().all(|&x| {
            match self.find_arc(b, &self.vertices[x].label) {
                Some(y) => self.vertex_equal(x, y),
                None => false,
            }
        })
    }

    fn check_closedness(&mut self, v: VertexId) {
        if self.vertices[v].closes.is_empty() {
            return;
        }
        let groups = self.vertices[v].closes.clone();
        let arcs = self.vertices[v].arcs.clone();
        for arc in arcs {
            let label = self.vertices[arc].label.clone();
            let Label::Regular(name) = &label else {
                continue;
            };
            for group in &groups {
                if group.open || group.labels.contains(&label) {
                    continue;
                }
                let matched = group
                    .patterns
                    .iter()
                    .any(|&p| self.pattern_matches(v, p, name));
                if matched {
                    continue;
                }
                let mut err = Error::conflict("field not allowed");
                for pos in self.vertices[arc].positions.clone() {
                    err = err.at(pos);
                }
                for pos in self.vertices[v].positions.iter().take(2).cloned().collect::<Vec<_>>() {
                    err = err.at(pos);
                }
                self.record(arc, err);
                break;
            }
        }
    }

    fn process_deferred(&mut self, v: VertexId, deferred: Deferred) {
        match deferred {
            Deferred::Reference(c) => self.process_reference(v, c),
            Deferred::Value(c) => self.process_value(v, c),
            Deferred::List(c) => {
                let expr = c.expr.clone();
                if let ExprKind::List(list) = &expr.kind {
                    self.emit_list(v, &c, list);
                }
            }
            Deferred::Comprehension {
                comprehension,
                env,
                close,
                order,
            } => {
                let envs = self.comprehension_envs(v, &comprehension.clauses, env);
                for (i, env) in envs.into_iter().enumerate() {
                    self.vertices[v].work.push_back(Conjunct {
                        expr: comprehension.body.clone(),
                        env,
                        close,
                        embedded: true,
                        order: child_order(&order, i),
                    });
                }
            }
            Deferred::DynamicField {
                label,
                constraint,
                value,
                env,
                close,
                order,
            } => {
                let name = match self.eval_atom(&label, env) {
                    Ok(Atom::String(name)) => name,
                    Ok(other) => {
                        let err = Error::conflict(format!(
                            "invalid field label {}: must be a string",
                            other
                        ));
                        self.record(v, err.at(label.pos.clone()));
                        return;
                    }
                    Err(err) => {
                        self.record(v, err.wrap("invalid field label").at(label.pos.clone()));
                        return;
                    }
                };
                let field = Conjunct {
                    expr: value,
                    env,
                    close,
                    embedded: false,
                    order,
                };
                self.add_field(v, &Label::Regular(name), constraint, field);
            }
        }
    }

    fn process_reference(&mut self, v: VertexId, c: Conjunct) {
        let pos = c.expr.pos.clone();
        match self.resolve(&c.expr, c.env) {
            Ok(Resolved::Vertex { id, definition }) => self.add_vertex(v, id, definition, &c),
            Ok(Resolved::Atom(atom)) => self.unify_scalar(v, Scalar::from_atom(atom), &pos),
            Ok(Resolved::Kind(kind)) => self.unify_scalar(v, Scalar::from_kind(kind), &pos),
            Ok(Resolved::Builtin(name)) | Ok(Resolved::Package(name)) => {
                self.record(v, Error::conflict(format!("cannot use {} as value", name)).at(pos))
            }
            Err(err) => self.record(v, err.at(pos)),
        }
    }

    /// Unifies `v` with the conjuncts of `target`, re-evaluated at `v`.
    fn add_vertex(&mut self, v: VertexId, target: VertexId, definition: bool, c: &Conjunct) {
        if target == v {
            return;
        }
        if self.is_ancestor(target, v) {
            self.record(
                v,
                Error::conflict("structural cycle").at(c.expr.pos.clone()),
            );
            return;
        }
        if let Some(parent) = self.vertices[target].parent {
            self.expand(parent);
        }
        let close = if !definition {
            c.close
        } else if c.embedded {
            Some(c.close.unwrap_or_else(|| self.fresh_close()))
        } else {
            Some(self.fresh_close())
        };
        let conjuncts = self.vertices[target].conjuncts.clone();
        for (i, conjunct) in conjuncts.into_iter().enumerate() {
            let close = if definition {
                close
            } else {
                conjunct.close.or(close)
            };
            self.vertices[v].work.push_back(Conjunct {
                expr: conjunct.expr,
                env: conjunct.env,
                close,
                embedded: c.embedded || conjunct.embedded,
                order: child_order(&c.order, i),
            });
        }
    }

    fn process_value(&mut self, v: VertexId, c: Conjunct) {
        let expr = c.expr.clone();
        let pos = expr.pos.clone();
        match &expr.kind {
            ExprKind::Call(func, args) => {
                if let Ok(Resolved::Builtin(name)) = self.resolve(func, c.env) {
                    if name == "close" {
                        match args.as_slice() {
                            [arg] => {
                                let close = Some(self.fresh_close());
                                self.vertices[v].work.push_back(Conjunct {
                                    expr: arg.clone(),
                                    close,
                                    ..c
                                });
                            }
                            _ => self.record(
                                v,
                                Error::conflict("close takes exactly one argument").at(pos),
                            ),
                        }
                        return;
                    }
                }
                match self.call(func, args, c.env) {
                    Ok(BuiltinValue::Atom(atom)) => {
                        self.unify_scalar(v, Scalar::from_atom(atom), &pos)
                    }
                    Ok(BuiltinValue::List(items)) => {
                        let elems = items
                            .into_iter()
                            .map(|atom| {
                                ListElem::Expr(Expr::new(ExprKind::Literal(atom), pos.clone()))
                            })
                            .collect();
                        let list = Expr::new(ExprKind::List(ListLit { elems, rest: None }), pos);
                        self.vertices[v]
                            .work
                            .push_back(Conjunct { expr: list, ..c });
                    }
                    Err(err) => self.record(v, err.at(pos)),
                }
            }
            ExprKind::Unary(UnaryOp::Bound(_) | UnaryOp::Match | UnaryOp::NotMatch, _) => {
                match self.constraint_of(&expr, c.env) {
                    Ok(scalar) => self.unify_scalar(v, scalar, &pos),
                    Err(err) => self.record(v, err.at(pos)),
                }
            }
            _ => match self.eval_atom(&expr, c.env) {
                Ok(atom) => self.unify_scalar(v, Scalar::from_atom(atom), &pos),
                Err(err) => self.record(v, err.at(pos)),
            },
        }
    }

    /// Environments in which a comprehension body is emitted, in order.
    fn comprehension_envs(&mut self, v: VertexId, clauses: &[Clause], env: EnvId) -> Vec<EnvId> {
        let mut envs = vec![env];
        for clause in clauses {
            let mut next = Vec::new();
            for env in envs {
                match clause {
                    Clause::If(condition) => match self.eval_atom(condition, env) {
                        Ok(Atom::Bool(true)) => next.push(env),
                        Ok(Atom::Bool(false)) => {}
                        Ok(other) => self.record(
                            v,
                            Error::conflict(format!(
                                "cannot use {} as type bool in if clause",
                                other
                            ))
                            .at(condition.pos.clone()),
                        ),
                        Err(err) => self.record(v, err.at(condition.pos.clone())),
                    },
                    Clause::For { key, value, source } => {
                        let items = match self.iteration_items(v, source, env) {
                            Ok(items) => items,
                            Err(err) => {
                                self.record(v, err.at(source.pos.clone()));
                                continue;
                            }
                        };
                        for (key_atom, arc) in items {
                            let mut bindings = Vec::new();
                            if let Some(key) = key {
                                bindings.push((key.clone(), Binding::Atom(key_atom)));
                            }
                            bindings.push((value.clone(), Binding::Vertex(arc)));
                            next.push(self.new_env(Env {
                                vertex: None,
                                parent: Some(env),
                                bindings,
                            }));
                        }
                    }
                }
            }
            envs = next;
        }
        envs
    }

    fn iteration_items(
        &mut self,
        v: VertexId,
        source: &Arc<Expr>,
        env: EnvId,
    ) -> Result<Vec<(Atom, VertexId)>, Error> {
        let id = if source.is_reference() {
            match self.resolve(source, env)? {
                Resolved::Vertex { id, .. } => id,
                _ => return Err(Error::conflict("cannot range over non-composite value")),
            }
        } else {
            let anonymous = self.new_vertex(Label::Hidden("_for".to_string()), Some(v));
            self.vertices[anonymous].conjuncts.push(Conjunct {
                expr: source.clone(),
                env,
                close: None,
                embedded: false,
                order: root_order(0),
            });
            anonymous
        };
        self.finalize(id);
        let source = self.effective(id);
        let vertex = &self.vertices[source];
        if let Some(err) = &vertex.error {
            return Err(err.clone());
        }
        if !vertex.scalar.kind.intersects(Kind::STRUCT | Kind::LIST) {
            return Err(Error::conflict(format!(
                "cannot range over {}",
                vertex.scalar.describe()
            )));
        }
        let mut items: Vec<(Atom, VertexId)> = vertex
            .arcs
            .iter()
            .filter_map(|&arc| {
                let a = &self.vertices[arc];
                match &a.label {
                    Label::Regular(name) if !a.optional => Some((Atom::String(name.clone()), arc)),
                    Label::Index(i) => Some((Atom::Int(*i as i128), arc)),
                    _ => None,
                }
            })
            .collect();
        if vertex.is_list() {
            items.sort_by_key(|(atom, _)| match atom {
                Atom::Int(i) => *i,
                _ => 0,
            });
        } else {
            items.sort_by(|(_, a), (_, b)| self.vertices[*a].order.cmp(&self.vertices[*b].order));
        }
        Ok(items)
    }

    fn resolve(&mut self, expr: &Expr, env: EnvId) -> Result<Resolved, Error> {
        match &expr.kind {
            ExprKind::Identifier(name) => self.resolve_identifier(name, env),
            ExprKind::Paren(inner) => self.resolve(inner, env),
            ExprKind::Selector(base, label) => match self.resolve(base, env)? {
                Resolved::Vertex { id, definition } => {
                    let arc = self.lookup_arc(id, label)?;
                    Ok(Resolved::Vertex {
                        id: arc,
                        definition: definition || label.is_definition(),
                    })
                }
                Resolved::Package(package) => {
                    let name = format!("{}.{}", package, label);
                    if builtins::exists(&name) {
                        Ok(Resolved::Builtin(name))
                    } else {
                        Err(Error::build(format!("undefined builtin {}", name)))
                    }
                }
                _ => Err(Error::conflict(format!(
                    "cannot select field {} from non-struct value",
                    label
                ))),
            },
            ExprKind::Index(base, index) => {
                let Resolved::Vertex { id, definition } = self.resolve(base, env)? else {
                    return Err(Error::conflict("cannot index non-composite value"));
                };
                let label = match self.eval_atom(index, env)? {
                    Atom::Int(i) if i >= 0 => match usize::try_from(i) {
                        Ok(i) => Label::Index(i),
                        Err(_) => return Err(Error::conflict(format!("index {} out of range", i))),
                    },
                    Atom::String(s) => Label::Regular(s),
                    other => return Err(Error::conflict(format!("invalid index {}", other))),
                };
                let arc = self.lookup_arc(id, &label)?;
                Ok(Resolved::Vertex {
                    id: arc,
                    definition,
                })
            }
            _ => Err(Error::conflict("expression is not a reference")),
        }
    }

    fn resolve_identifier(&mut self, name: &str, env: EnvId) -> Result<Resolved, Error> {
        let mut current = Some(env);
        while let Some(id) = current {
            let binding = self.envs[id]
                .bindings
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, b)| b.clone());
            if let Some(binding) = binding {
                return match binding {
                    Binding::Vertex(vertex) => Ok(Resolved::Vertex {
                        id: vertex,
                        definition: false,
                    }),
                    Binding::Atom(atom) => Ok(Resolved::Atom(atom)),
                    Binding::Package(package) => Ok(Resolved::Package(package)),
                    Binding::Import(path) => Ok(Resolved::Vertex {
                        id: self.import_root(&path)?,
                        definition: false,
                    }),
                };
            }
            if let Some(scope) = self.envs[id].vertex {
                if let Some(arc) = self.find_arc_named(scope, name) {
                    return Ok(Resolved::Vertex {
                        id: arc,
                        definition: Label::from_identifier(name).is_definition(),
                    });
                }
            }
            current = self.envs[id].parent;
        }
        predeclared(name).ok_or_else(|| Error::build(format!("reference {:?} not found", name)))
    }

    fn lookup_arc(&mut self, id: VertexId, label: &Label) -> Result<VertexId, Error> {
        self.expand(id);
        if !self.vertices[id].disjunctions.is_empty()
            && self.vertices[id].status == Status::Expanded
        {
            self.finalize(id);
        }
        let target = self.effective(id);
        self.find_arc(target, label)
            .ok_or_else(|| Error::incomplete(format!("undefined field: {}", label)))
    }

    fn import_root(&mut self, path: &str) -> Result<VertexId, Error> {
        if let Some(&root) = self.import_roots.get(path) {
            return Ok(root);
        }
        let program = self.program.clone();
        let files = program
            .imports
            .get(path)
            .ok_or_else(|| Error::build(format!("import {:?} not found", path)))?;
        let root = self.new_vertex(Label::Regular(String::new()), None);
        self.vertices[root].optional = false;
        self.import_roots.insert(path.to_string(), root);
        for (i, file) in files.iter().enumerate() {
            let env = self.file_env(file);
            self.vertices[root].conjuncts.push(Conjunct {
                expr: file.body.clone(),
                env,
                close: None,
                embedded: false,
                order: root_order(i),
            });
        }
        debug!("Evaluating imported package {}", path);
        Ok(root)
    }

    fn vertex_atom(&mut self, id: VertexId) -> Result<Atom, Error> {
        self.finalize(id);
        let target = self.effective(id);
        let vertex = &self.vertices[target];
        if let Some(err) = &vertex.error {
            return Err(err.clone());
        }
        if let Some(atom) = &vertex.scalar.atom {
            return Ok(atom.clone());
        }
        if let Some(err) = &vertex.incomplete {
            return Err(err.clone());
        }
        if vertex.resolved.is_some() {
            return Err(Error::incomplete("unresolved disjunction"));
        }
        Err(Error::incomplete(format!(
            "non-concrete value {}",
            vertex.scalar.describe()
        )))
    }

    fn eval_atom(&mut self, expr: &Expr, env: EnvId) -> Result<Atom, Error> {
        match &expr.kind {
            ExprKind::Literal(atom) => Ok(atom.clone()),
            ExprKind::Scalar(scalar) => scalar.atom.clone().ok_or_else(|| {
                Error::incomplete(format!("non-concrete value {}", scalar.describe()))
            }),
            ExprKind::Paren(inner)
            | ExprKind::Closed(inner)
            | ExprKind::Unary(UnaryOp::Default, inner) => self.eval_atom(inner, env),
            ExprKind::Interpolation(parts) => self.interpolate(parts, env),
            ExprKind::Top => Err(Error::incomplete("non-concrete value _")),
            ExprKind::Bottom => Err(Error::conflict("explicit error (_|_ literal) in source")),
            ExprKind::Identifier(_) | ExprKind::Selector(..) | ExprKind::Index(..) => {
                match self.resolve(expr, env)? {
                    Resolved::Vertex { id, .. } => self.vertex_atom(id),
                    Resolved::Atom(atom) => Ok(atom),
                    Resolved::Kind(kind) => {
                        Err(Error::incomplete(format!("non-concrete value {}", kind)))
                    }
                    Resolved::Builtin(name) | Resolved::Package(name) => {
                        Err(Error::conflict(format!("cannot use {} as value", name)))
                    }
                }
            }
            ExprKind::Unary(op, operand) => self.eval_unary(*op, operand, env),
            ExprKind::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, env),
            ExprKind::Call(func, args) => match self.call(func, args, env)? {
                BuiltinValue::Atom(atom) => Ok(atom),
                BuiltinValue::List(_) => Err(Error::conflict("cannot use list as scalar value")),
            },
            ExprKind::Struct(_) => Err(Error::conflict("cannot use struct as scalar value")),
            ExprKind::List(_) => Err(Error::conflict("cannot use list as scalar value")),
        }
    }

    fn interpolate(&mut self, parts: &[InterpolationPart], env: EnvId) -> Result<Atom, Error> {
        let mut out = String::new();
        for part in parts {
            match part {
                InterpolationPart::Text(text) => out.push_str(text),
                InterpolationPart::Expr(expr) => {
                    let atom = self.eval_atom(expr, env).map_err(|mut err| {
                        if err.is_incomplete() {
                            err.path.clear();
                        }
                        err.wrap("invalid interpolation")
                    })?;
                    match atom.interpolated() {
                        Some(text) => out.push_str(&text),
                        None => {
                            return Err(Error::conflict(
                                "invalid interpolation: cannot interpolate null",
                            ))
                        }
                    }
                }
            }
        }
        Ok(Atom::String(out))
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, env: EnvId) -> Result<Atom, Error> {
        match op {
            UnaryOp::Default => self.eval_atom(operand, env),
            UnaryOp::Neg => match self.eval_atom(operand, env)? {
                Atom::Int(i) => i
                    .checked_neg()
                    .map(Atom::Int)
                    .ok_or_else(|| Error::conflict("integer overflow")),
                Atom::Float(f) => Atom::checked_float(-f),
                other => Err(Error::conflict(format!(
                    "invalid operand {} for unary '-'",
                    other
                ))),
            },
            UnaryOp::Plus => match self.eval_atom(operand, env)? {
                atom @ (Atom::Int(_) | Atom::Float(_)) => Ok(atom),
                other => Err(Error::conflict(format!(
                    "invalid operand {} for unary '+'",
                    other
                ))),
            },
            UnaryOp::Not => match self.eval_atom(operand, env)? {
                Atom::Bool(b) => Ok(Atom::Bool(!b)),
                other => Err(Error::conflict(format!(
                    "invalid operand {} for unary '!'",
                    other
                ))),
            },
            UnaryOp::Bound(_) | UnaryOp::Match | UnaryOp::NotMatch => {
                Err(Error::incomplete("non-concrete value (bound constraint)"))
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Arc<Expr>,
        rhs: &Arc<Expr>,
        env: EnvId,
    ) -> Result<Atom, Error> {
        match op {
            BinaryOp::Disjunction => {
                let mut disjuncts = Vec::new();
                flatten_disjunction(lhs, false, &mut disjuncts);
                flatten_disjunction(rhs, false, &mut disjuncts);
                let defaults: Vec<Arc<Expr>> = disjuncts
                    .iter()
                    .filter(|(_, default)| *default)
                    .map(|(expr, _)| expr.clone())
                    .collect();
                if defaults.len() == 1 {
                    return self.eval_atom(&defaults[0], env);
                }
                let mut value: Option<Atom> = None;
                for (expr, _) in &disjuncts {
                    let atom = self.eval_atom(expr, env)?;
                    match &value {
                        Some(existing) if *existing != atom => {
                            return Err(Error::incomplete("unresolved disjunction"))
                        }
                        _ => value = Some(atom),
                    }
                }
                value.ok_or_else(|| Error::incomplete("unresolved disjunction"))
            }
            BinaryOp::Unification => {
                let lhs = self.constraint_of(lhs, env)?;
                let rhs = self.constraint_of(rhs, env)?;
                let unified = lhs.unify(&rhs).map_err(Error::conflict)?;
                unified.atom.clone().ok_or_else(|| {
                    Error::incomplete(format!("non-concrete value {}", unified.describe()))
                })
            }
            BinaryOp::And | BinaryOp::Or => {
                let left = self.eval_bool(lhs, env)?;
                if (op == BinaryOp::And && !left) || (op == BinaryOp::Or && left) {
                    return Ok(Atom::Bool(left));
                }
                Ok(Atom::Bool(self.eval_bool(rhs, env)?))
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                let equal = if matches!(rhs.kind, ExprKind::Bottom) {
                    !self.exists(lhs, env)
                } else if matches!(lhs.kind, ExprKind::Bottom) {
                    !self.exists(rhs, env)
                } else if matches!(rhs.kind, ExprKind::Literal(Atom::Null)) {
                    self.is_null(lhs, env)?
                } else if matches!(lhs.kind, ExprKind::Literal(Atom::Null)) {
                    self.is_null(rhs, env)?
                } else {
                    let a = self.eval_atom(lhs, env)?;
                    let b = self.eval_atom(rhs, env)?;
                    a.equals(&b)
                };
                Ok(Atom::Bool(equal == (op == BinaryOp::Equal)))
            }
            BinaryOp::Less
            | BinaryOp::LessOrEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterOrEqual => {
                let a = self.eval_atom(lhs, env)?;
                let b = self.eval_atom(rhs, env)?;
                let ordering = a.compare(&b).ok_or_else(|| {
                    Error::conflict(format!(
                        "invalid operands {} and {} to '{}'",
                        a,
                        b,
                        operator_symbol(op)
                    ))
                })?;
                Ok(Atom::Bool(match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessOrEqual => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinaryOp::Match | BinaryOp::NotMatch => {
                let a = self.eval_atom(lhs, env)?;
                let b = self.eval_atom(rhs, env)?;
                let (Some(text), Some(pattern)) = (a.as_str(), b.as_str()) else {
                    return Err(Error::conflict(format!(
                        "invalid operands {} and {} to '{}'",
                        a,
                        b,
                        operator_symbol(op)
                    )));
                };
                let constraint =
                    Constraint::regex(pattern, op == BinaryOp::NotMatch).map_err(Error::conflict)?;
                Ok(Atom::Bool(constraint.check(&Atom::String(text.to_string()))))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let a = self.eval_atom(lhs, env)?;
                let b = self.eval_atom(rhs, env)?;
                arithmetic(op, a, b)
            }
        }
    }

    fn eval_bool(&mut self, expr: &Expr, env: EnvId) -> Result<bool, Error> {
        match self.eval_atom(expr, env)? {
            Atom::Bool(b) => Ok(b),
            other => Err(Error::conflict(format!("cannot use {} as type bool", other))),
        }
    }

    /// Whether `expr` denotes a value that is present and not an error.
    fn exists(&mut self, expr: &Expr, env: EnvId) -> bool {
        if expr.is_reference() {
            return match self.resolve(expr, env) {
                Ok(Resolved::Vertex { id, .. }) => {
                    self.finalize(id);
                    let target = self.effective(id);
                    self.vertices[target].error.is_none() && !self.vertices[id].optional
                }
                Ok(_) => true,
                Err(_) => false,
            };
        }
        self.eval_atom(expr, env).is_ok()
    }

    fn is_null(&mut self, expr: &Expr, env: EnvId) -> Result<bool, Error> {
        if expr.is_reference() {
            if let Resolved::Vertex { id, .. } = self.resolve(expr, env)? {
                self.finalize(id);
                let target = self.effective(id);
                let kind = self.vertices[target].scalar.kind;
                if !kind.intersects(Kind::NULL) {
                    return Ok(false);
                }
            }
        }
        Ok(self.eval_atom(expr, env)? == Atom::Null)
    }

    fn call(&mut self, func: &Expr, args: &[Arc<Expr>], env: EnvId) -> Result<BuiltinValue, Error> {
        let name = match self.resolve(func, env)? {
            Resolved::Builtin(name) => name,
            _ => return Err(Error::conflict("cannot call non-function")),
        };
        if name == "len" {
            let [arg] = args else {
                return Err(Error::conflict("len takes exactly one argument"));
            };
            return self.length_of(arg, env).map(|n| BuiltinValue::Atom(Atom::Int(n)));
        }
        if name == "close" {
            return Err(Error::conflict("cannot use close as scalar value"));
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_arg(arg, env)?);
        }
        builtins::call(&name, &values)
            .map_err(|message| Error::conflict(format!("error in call to {}: {}", name, message)))
    }

    fn eval_arg(&mut self, expr: &Expr, env: EnvId) -> Result<Arg, Error> {
        if let ExprKind::List(list) = &expr.kind {
            let mut items = Vec::new();
            for elem in &list.elems {
                match elem {
                    ListElem::Expr(e) => items.push(self.eval_atom(e, env)?),
                    ListElem::Comprehension(_) => {
                        return Err(Error::conflict("comprehensions are not supported here"))
                    }
                }
            }
            return Ok(Arg::List(items));
        }
        if expr.is_reference() {
            if let Resolved::Vertex { id, .. } = self.resolve(expr, env)? {
                self.finalize(id);
                let target = self.effective(id);
                if self.vertices[target].is_list() {
                    let mut elements: Vec<(usize, VertexId)> = self.vertices[target]
                        .arcs
                        .iter()
                        .filter_map(|&arc| match self.vertices[arc].label {
                            Label::Index(i) => Some((i, arc)),
                            _ => None,
                        })
                        .collect();
                    elements.sort_by_key(|(i, _)| *i);
                    let mut items = Vec::with_capacity(elements.len());
                    for (_, arc) in elements {
                        items.push(self.vertex_atom(arc)?);
                    }
                    return Ok(Arg::List(items));
                }
            }
        }
        Ok(Arg::Atom(self.eval_atom(expr, env)?))
    }

    fn length_of(&mut self, expr: &Expr, env: EnvId) -> Result<i128, Error> {
        if let ExprKind::List(list) = &expr.kind {
            if list
                .elems
                .iter()
                .all(|e| matches!(e, ListElem::Expr(_)))
            {
                return Ok(list.elems.len() as i128);
            }
        }
        if expr.is_reference() {
            if let Resolved::Vertex { id, .. } = self.resolve(expr, env)? {
                self.finalize(id);
                let target = self.effective(id);
                let vertex = &self.vertices[target];
                if vertex.is_struct() || vertex.is_list() {
                    let count = vertex
                        .arcs
                        .iter()
                        .filter(|&&arc| {
                            let a = &self.vertices[arc];
                            a.label.is_regular() && !a.optional
                        })
                        .count();
                    return Ok(count as i128);
                }
            }
        }
        match self.eval_atom(expr, env)? {
            Atom::String(s) => Ok(s.len() as i128),
            other => Err(Error::conflict(format!("invalid argument {} to len", other))),
        }
    }
}

fn predeclared(name: &str) -> Option<Resolved> {
    if let Some(kind) = Kind::from_name(name) {
        return Some(Resolved::Kind(kind));
    }
    match name {
        "len" | "close" => Some(Resolved::Builtin(name.to_string())),
        _ => None,
    }
}

pub(crate) fn is_predeclared(name: &str) -> bool {
    predeclared(name).is_some()
}

fn is_definition_reference(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Identifier(name) => Label::from_identifier(name).is_definition(),
        ExprKind::Selector(_, label) => label.is_definition(),
        ExprKind::Paren(inner) => is_definition_reference(inner),
        ExprKind::Binary(BinaryOp::Unification, lhs, rhs) => {
            is_definition_reference(lhs) || is_definition_reference(rhs)
        }
        _ => false,
    }
}

fn flatten_disjunction(expr: &Arc<Expr>, default: bool, out: &mut Vec<(Arc<Expr>, bool)>) {
    match &expr.kind {
        ExprKind::Binary(BinaryOp::Disjunction, lhs, rhs) => {
            flatten_disjunction(lhs, default, out);
            flatten_disjunction(rhs, default, out);
        }
        ExprKind::Paren(inner)
            if matches!(inner.kind, ExprKind::Binary(BinaryOp::Disjunction, ..)) =>
        {
            flatten_disjunction(inner, default, out)
        }
        ExprKind::Unary(UnaryOp::Default, inner) => out.push((inner.clone(), true)),
        _ => out.push((expr.clone(), default)),
    }
}

fn empty_disjunction(mut failures: Vec<Error>) -> Error {
    if failures.len() == 1 {
        return failures.remove(0);
    }
    let messages: Vec<String> = failures.iter().map(|e| e.message.clone()).collect();
    let mut err = Error::conflict(format!(
        "{} errors in empty disjunction: ({})",
        failures.len(),
        messages.join(" | ")
    ));
    for pos in failures.iter().flat_map(|e| e.positions.iter()).take(3) {
        err = err.at(pos.clone());
    }
    err
}

fn operator_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Disjunction => "|",
        BinaryOp::Unification => "&",
        BinaryOp::Or => "||",
        BinaryOp::And => "&&",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::LessOrEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterOrEqual => ">=",
        BinaryOp::Match => "=~",
        BinaryOp::NotMatch => "!~",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
    }
}

/// Upper bound for strings built by repetition.
const MAX_STRING_LEN: usize = 1 << 24;

fn arithmetic(op: BinaryOp, a: Atom, b: Atom) -> Result<Atom, Error> {
    let invalid = |a: &Atom, b: &Atom| {
        Error::conflict(format!(
            "invalid operands {} and {} to '{}'",
            a,
            b,
            operator_symbol(op)
        ))
    };
    match (&a, &b) {
        (Atom::String(x), Atom::String(y)) if op == BinaryOp::Add => {
            return Ok(Atom::String(format!("{}{}", x, y)))
        }
        (Atom::String(s), Atom::Int(n)) | (Atom::Int(n), Atom::String(s))
            if op == BinaryOp::Mul && *n >= 0 =>
        {
            return usize::try_from(*n)
                .ok()
                .filter(|n| s.len().checked_mul(*n).is_some_and(|len| len <= MAX_STRING_LEN))
                .map(|n| Atom::String(s.repeat(n)))
                .ok_or_else(|| Error::conflict("value out of range"));
        }
        (Atom::Int(x), Atom::Int(y)) if op != BinaryOp::Div => {
            let result = match op {
                BinaryOp::Add => x.checked_add(*y),
                BinaryOp::Sub => x.checked_sub(*y),
                _ => x.checked_mul(*y),
            };
            return result
                .map(Atom::Int)
                .ok_or_else(|| Error::conflict("integer overflow"));
        }
        _ => {}
    }
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Err(invalid(&a, &b));
    };
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        _ => {
            if y == 0.0 {
                return Err(Error::conflict("division by zero"));
            }
            x / y
        }
    };
    Atom::checked_float(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            arithmetic(BinaryOp::Add, Atom::Int(1), Atom::Int(2)).unwrap(),
            Atom::Int(3)
        );
        assert_eq!(
            arithmetic(BinaryOp::Div, Atom::Int(3), Atom::Int(2)).unwrap(),
            Atom::Float(1.5)
        );
        assert_eq!(
            arithmetic(BinaryOp::Add, Atom::String("a".into()), Atom::String("b".into())).unwrap(),
            Atom::String("ab".into())
        );
        assert!(arithmetic(BinaryOp::Div, Atom::Int(1), Atom::Int(0)).is_err());
        assert!(arithmetic(BinaryOp::Sub, Atom::String("a".into()), Atom::Int(1)).is_err());
    }

    #[test]
    fn test_empty_disjunction_keeps_single_failure() {
        let err = empty_disjunction(vec![Error::conflict("conflicting values 1 and 2")]);
        assert_eq!(err.message, "conflicting values 1 and 2");
        let err = empty_disjunction(vec![Error::conflict("a"), Error::conflict("b")]);
        assert_eq!(err.message, "2 errors in empty disjunction: (a | b)");
    }

    #[test]
    fn test_predeclared_names() {
        assert!(is_predeclared("string"));
        assert!(is_predeclared("len"));
        assert!(!is_predeclared("foo"));
    }
}
