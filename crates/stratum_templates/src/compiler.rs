//! Serialized package builds on top of the language engine.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use stratum_lang::load::{self, Config};
use stratum_lang::{CompileOptions, Context, ValidateOptions, Value};
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};

/// Guards every package load and build in the process, whichever
/// [`Compiler`] performs it.
static BUILD_LOCK: Mutex<()> = Mutex::new(());

/// A built package value together with its canonical import path.
#[derive(Debug, Clone)]
pub struct CompiledValue {
    pub value: Value,
    /// Empty when the package does not live inside a module.
    pub import_path: String,
}

/// Builds packages from disk and compiles inline sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    ctx: Context,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// Loads, builds and validates exactly one package instance selected by
    /// `args`, relative to `dir`.
    pub fn build_all(&self, dir: impl AsRef<Path>, args: &[String]) -> TemplateResult<CompiledValue> {
        let _guard = BUILD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = dir.as_ref();
        debug!("Building package (dir: {:?}, args: {:?})", dir, args);

        let mut loaded = load::instances(args, &Config::new(dir));
        if loaded.len() != 1 {
            return Err(TemplateError::UnexpectedInstanceCount(loaded.len()));
        }
        let instance = loaded.remove(0);
        if let Some(source) = instance.err.clone() {
            return Err(TemplateError::Load {
                dir: dir.to_path_buf(),
                args: args.to_vec(),
                source,
            });
        }

        let value = self
            .ctx
            .build_instance(&instance)
            .map_err(|source| TemplateError::Build {
                dir: dir.to_path_buf(),
                args: args.to_vec(),
                source,
            })?;
        value
            .validate(ValidateOptions::default())
            .map_err(TemplateError::Validation)?;

        Ok(CompiledValue {
            value,
            import_path: instance.import_path,
        })
    }

    /// Compiles source text held in memory. Not serialized with disk builds.
    pub fn compile_string(&self, src: &str, options: &CompileOptions) -> TemplateResult<Value> {
        self.ctx
            .compile_str(src, options)
            .map_err(TemplateError::Compile)
    }

    /// JSON encoding of a value; fails if any exported part is not concrete.
    pub fn marshal_value_json(&self, value: &Value) -> TemplateResult<Vec<u8>> {
        value
            .marshal_json()
            .map(String::into_bytes)
            .map_err(TemplateError::Marshal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_string() {
        let compiler = Compiler::new();
        let value = compiler
            .compile_string("a: \"x\"\n", &CompileOptions::default())
            .unwrap();
        assert_eq!(compiler.marshal_value_json(&value).unwrap(), br#"{"a":"x"}"#);
    }

    #[test]
    fn test_compile_string_error() {
        let err = Compiler::new()
            .compile_string("a: b\n", &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Compile(_)));
    }

    #[test]
    fn test_marshal_non_concrete_value() {
        let compiler = Compiler::new();
        let value = compiler
            .compile_string("a: string\n", &CompileOptions::default())
            .unwrap();
        assert!(matches!(
            compiler.marshal_value_json(&value),
            Err(TemplateError::Marshal(_))
        ));
    }

    #[test]
    fn test_multiple_selectors_are_rejected() {
        let args = vec!["./a".to_string(), "./b".to_string()];
        let err = Compiler::new().build_all("", &args).unwrap_err();
        assert!(matches!(err, TemplateError::UnexpectedInstanceCount(2)));
    }
}
