//! Entry points for compiling source text and loaded instances.

use crate::ast::{json_to_expr, File};
use crate::check::check_references;
use crate::error::{Errors, LangResult};
use crate::eval::{Graph, Program};
use crate::load::Instance;
use crate::parser::parse_source;
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

/// Evaluation limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum nesting of reference evaluation before reporting a cycle,
    /// and of syntax before reporting a parse error.
    pub max_depth: usize,
    /// Maximum number of disjunct combinations tried per field.
    pub max_disjunction_combinations: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_disjunction_combinations: 256,
        }
    }
}

/// Options for [`Context::compile_str`].
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Name used for positions in diagnostics.
    pub filename: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: "-".to_string(),
        }
    }
}

impl CompileOptions {
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }
}

/// Compilation context. Contexts hold no evaluation state and may be shared
/// freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    limits: Limits,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Compiles a single source text into a value.
    pub fn compile_str(&self, src: &str, options: &CompileOptions) -> LangResult<Value> {
        debug!("Compiling source {}", options.filename);
        let file = Arc::new(parse_source(&options.filename, src, self.limits.max_depth)?);
        let files = vec![file];
        if let Some(errors) = Errors::from_vec(check_references(&files)) {
            return Err(errors);
        }
        Ok(self.evaluate(Program {
            files: Arc::new(files),
            ..Program::default()
        }))
    }

    /// Builds a loaded instance, including the packages it imports.
    pub fn build_instance(&self, instance: &Instance) -> LangResult<Value> {
        if let Some(errors) = &instance.err {
            return Err(errors.clone());
        }
        debug!(
            "Building instance {} ({} files, {} imports)",
            instance.display_path,
            instance.files.len(),
            instance.imports.len()
        );

        let mut errors = check_references(&instance.files);
        for files in instance.imports.values() {
            errors.extend(check_references(files));
        }
        if let Some(errors) = Errors::from_vec(errors) {
            return Err(errors);
        }

        let files: Vec<Arc<File>> = instance.files.clone();
        Ok(self.evaluate(Program {
            files: Arc::new(files),
            imports: Arc::new(instance.imports.clone()),
            fills: Vec::new(),
        }))
    }

    /// Converts a JSON document into a value.
    pub fn compile_json(&self, json: &serde_json::Value) -> Value {
        let file = File {
            filename: Arc::from("json"),
            package: None,
            imports: Vec::new(),
            body: json_to_expr(json),
        };
        self.evaluate(Program {
            files: Arc::new(vec![Arc::new(file)]),
            ..Program::default()
        })
    }

    fn evaluate(&self, program: Program) -> Value {
        Value::from_graph(Graph::evaluate(Arc::new(program), self.limits))
    }
}
