//! Overlay generator: narrows a compiled template with defaults and a
//! resource, then renders the `template` subtree.

use std::path::{Path as FsPath, PathBuf};

use serde::ser::{Error as _, Serialize, Serializer};
use stratum_lang::{Path, Value};
use tracing::debug;

use crate::compiler::Compiler;
use crate::error::{TemplateError, TemplateResult};

/// Subtree rendered by [`Generator::render_json`].
pub const TEMPLATE_KEY: &str = "template";
/// Subtree filled by [`Generator::with_defaults`].
pub const DEFAULTS_KEY: &str = "defaults";
/// Subtree filled by [`Generator::with_resource`].
pub const RESOURCE_KEY: &str = "resource";

/// Objects that encode themselves as JSON without implementing
/// [`Serialize`], such as values handed over from other libraries behind a
/// trait object.
pub trait ToJson: Send + Sync {
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl Serialize for dyn ToJson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

/// A template package and, once compiled, its current value.
///
/// Overlays never modify the receiver: each returns a new generator holding
/// the narrowed value, so one compiled template can serve many renders.
#[derive(Debug, Clone)]
pub struct Generator {
    dir: PathBuf,
    args: Vec<String>,
    compiler: Compiler,
    value: Option<Value>,
    import_path: String,
}

impl Generator {
    /// Creates a generator for the package selected by `args` in `dir`.
    /// No arguments selects the package in `dir` itself.
    pub fn new(dir: impl Into<PathBuf>, args: &[&str]) -> Self {
        let args = if args.is_empty() {
            vec![".".to_string()]
        } else {
            args.iter().map(|a| a.to_string()).collect()
        };
        Self {
            dir: dir.into(),
            args,
            compiler: Compiler::new(),
            value: None,
            import_path: String::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Builds the package from disk. Each call reloads the sources.
    pub fn compile_and_validate(&mut self) -> TemplateResult<()> {
        let compiled = self.compiler.build_all(&self.dir, &self.args)?;
        self.value = Some(compiled.value);
        self.import_path = compiled.import_path;
        Ok(())
    }

    pub fn dir(&self) -> &FsPath {
        &self.dir
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Import path of the compiled package, empty outside a module.
    pub fn import_path(&self) -> &str {
        &self.import_path
    }

    pub fn is_compiled(&self) -> bool {
        self.value.is_some()
    }

    /// Unifies `obj` into the package's `defaults`.
    pub fn with_defaults<T: Serialize + ?Sized>(&self, obj: &T) -> TemplateResult<Generator> {
        self.fork(DEFAULTS_KEY, obj)
    }

    /// Unifies `obj` into the package's `resource`.
    pub fn with_resource<T: Serialize + ?Sized>(&self, obj: &T) -> TemplateResult<Generator> {
        self.fork(RESOURCE_KEY, obj)
    }

    fn fork<T: Serialize + ?Sized>(&self, sub_path: &str, obj: &T) -> TemplateResult<Generator> {
        let value = self.compiled()?;
        let path = parse_path(sub_path)?;
        let json = serde_json::to_value(obj).map_err(TemplateError::Encode)?;

        debug!("Filling {} of template in {:?}", sub_path, self.dir);
        let filled = value
            .fill_path(&path, &json)
            .map_err(|source| TemplateError::OverlayConflict {
                path: sub_path.to_string(),
                source,
            })?;

        Ok(Generator {
            dir: self.dir.clone(),
            args: self.args.clone(),
            compiler: self.compiler,
            value: Some(filled),
            import_path: self.import_path.clone(),
        })
    }

    /// JSON encoding of the `template` subtree.
    pub fn render_json(&self) -> TemplateResult<Vec<u8>> {
        let value = self.compiled()?;
        let path = parse_path(TEMPLATE_KEY)?;
        let template = value
            .lookup_path(&path)
            .map_err(|source| TemplateError::RenderLookup {
                path: TEMPLATE_KEY.to_string(),
                source,
            })?;
        template
            .marshal_json()
            .map(String::into_bytes)
            .map_err(TemplateError::RenderMarshal)
    }

    fn compiled(&self) -> TemplateResult<&Value> {
        self.value
            .as_ref()
            .ok_or_else(|| TemplateError::NotCompiled(self.dir.clone()))
    }
}

fn parse_path(path: &str) -> TemplateResult<Path> {
    Path::parse(path).map_err(|source| TemplateError::InvalidPath {
        path: path.to_string(),
        source,
    })
}
