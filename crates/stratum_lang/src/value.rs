//! Evaluated values.

use crate::ast::{json_to_expr, Label};
use crate::atom::Kind;
use crate::error::{Error, Errors, LangResult};
use crate::eval::{Graph, Program, VertexId};
use crate::path::Path;
use serde::ser::{Error as _, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Options for [`Value::validate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Also report values that are not concrete enough to export.
    pub concrete: bool,
}

impl ValidateOptions {
    pub fn concrete() -> Self {
        Self { concrete: true }
    }
}

/// An immutable, evaluated value. Cloning is cheap; the evaluation graph is
/// shared.
#[derive(Clone)]
pub struct Value {
    graph: Arc<Graph>,
    vertex: VertexId,
    path: Path,
}

impl Value {
    pub(crate) fn from_graph(graph: Graph) -> Self {
        let root = graph.root;
        Self {
            graph: Arc::new(graph),
            vertex: root,
            path: Path::root(),
        }
    }

    /// Path of this value relative to the root it was looked up from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn target(&self) -> VertexId {
        self.graph.effective(self.vertex)
    }

    /// Kinds this value may still take; empty for errors.
    pub fn kind(&self) -> Kind {
        let vertex = &self.graph.vertices[self.target()];
        if vertex.error.is_some() {
            Kind::BOTTOM
        } else {
            vertex.scalar.kind
        }
    }

    /// True for atoms, structs and lists.
    pub fn is_concrete(&self) -> bool {
        let vertex = &self.graph.vertices[self.target()];
        vertex.error.is_none()
            && (vertex.scalar.atom.is_some() || vertex.is_struct() || vertex.is_list())
    }

    /// First error in this value, if any.
    pub fn err(&self) -> Option<Error> {
        self.graph.validate(self.vertex, false).into_iter().next()
    }

    pub fn validate(&self, options: ValidateOptions) -> LangResult<()> {
        match Errors::from_vec(self.graph.validate(self.vertex, options.concrete)) {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }

    /// Value at `path` below this one.
    pub fn lookup_path(&self, path: &Path) -> Result<Value, Error> {
        let vertex = self.graph.descend(self.vertex, path.labels())?;
        Ok(Self {
            graph: self.graph.clone(),
            vertex,
            path: self.path.join(path),
        })
    }

    /// Shorthand for looking up a single regular field.
    pub fn lookup(&self, field: &str) -> Result<Value, Error> {
        self.lookup_path(&Path::from_labels(vec![Label::Regular(field.to_string())]))
    }

    /// Regular, non-optional fields in declaration order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        let target = self.target();
        if !self.graph.vertices[target].is_struct() {
            return Vec::new();
        }
        self.graph
            .exported_arcs(target)
            .into_iter()
            .filter_map(|arc| {
                let label = self.graph.vertices[arc].label.clone();
                let Label::Regular(name) = &label else {
                    return None;
                };
                Some((
                    name.clone(),
                    Self {
                        graph: self.graph.clone(),
                        vertex: arc,
                        path: self.path.join(&Path::from_labels(vec![label.clone()])),
                    },
                ))
            })
            .collect()
    }

    /// Number of fields or elements of a struct or list.
    pub fn len(&self) -> Option<usize> {
        let target = self.target();
        let vertex = &self.graph.vertices[target];
        if vertex.is_struct() || vertex.is_list() {
            Some(self.graph.exported_arcs(target).len())
        } else {
            None
        }
    }

    /// Unifies a JSON document into this value at `path` and returns the
    /// re-evaluated result. The receiver is left unchanged.
    pub fn fill_path(&self, path: &Path, value: &serde_json::Value) -> LangResult<Value> {
        let full = self.path.join(path);
        if let Some(index) = full.labels().iter().find(|l| matches!(l, Label::Index(_))) {
            return Err(Error::build(format!(
                "cannot fill path {:?}: list index {} cannot be filled",
                full.to_string(),
                index
            ))
            .into());
        }

        debug!("Filling value at path {}", full);
        let program = self
            .graph
            .program
            .with_fill(full.labels().to_vec(), json_to_expr(value));
        let graph = Graph::evaluate(Arc::new(program), self.graph.limits);

        let mut errors = graph.validate(graph.root, false);
        if !errors.is_empty() {
            let prefix = full.selectors();
            errors.sort_by_key(|err| !err.is_under(&prefix));
            return Err(Errors::from_vec(errors)
                .unwrap_or_else(|| Errors::from(Error::conflict("fill failed"))));
        }

        let root = Value::from_graph(graph);
        root.lookup_path(&self.path).map_err(Errors::from)
    }

    /// Unification of two values. Errors are reported by [`Value::validate`]
    /// on the result.
    pub fn unify(&self, other: &Value) -> Value {
        let program = if self.path.is_root() && other.path.is_root() {
            let mine = &self.graph.program;
            let theirs = &other.graph.program;
            let mut files = mine.files.as_ref().clone();
            files.extend(theirs.files.iter().cloned());
            let mut imports: BTreeMap<_, _> = mine.imports.as_ref().clone();
            imports.extend(theirs.imports.iter().map(|(k, v)| (k.clone(), v.clone())));
            let mut fills = mine.fills.clone();
            fills.extend(theirs.fills.iter().cloned());
            Program {
                files: Arc::new(files),
                imports: Arc::new(imports),
                fills,
            }
        } else {
            self.graph.program.with_fill(
                self.path.labels().to_vec(),
                other.graph.reify(other.vertex),
            )
        };
        let graph = Graph::evaluate(Arc::new(program), self.graph.limits);
        let root = Value::from_graph(graph);
        match root.graph.descend(root.vertex, self.path.labels()) {
            Ok(vertex) => Value {
                vertex,
                path: self.path.clone(),
                ..root
            },
            Err(_) => root,
        }
    }

    /// Concrete JSON form of this value.
    pub fn to_json(&self) -> LangResult<serde_json::Value> {
        self.graph.to_json(self.vertex)
    }

    /// Compact JSON encoding of this value.
    pub fn marshal_json(&self) -> LangResult<String> {
        let json = self.to_json()?;
        serde_json::to_string(&json)
            .map_err(|e| Error::conflict(format!("unable to encode JSON: {}", e)).into())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_json() {
            Ok(json) => json.serialize(serializer),
            Err(errors) => Err(S::Error::custom(errors)),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Ok(json) => write!(f, "Value({}: {})", self.path, json),
            Err(_) => write!(
                f,
                "Value({}: {})",
                self.path,
                self.graph.vertices[self.target()].scalar.describe()
            ),
        }
    }
}
