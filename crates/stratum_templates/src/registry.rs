//! Name-to-template index built from a directory tree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{TemplateError, TemplateResult};
use crate::generator::Generator;
use crate::loader::{PackageLoader, ScanMode};

/// Registry settings, typically read from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryOptions {
    pub base_directory: PathBuf,
    #[serde(default)]
    pub scan_mode: ScanMode,
}

impl RegistryOptions {
    pub fn from_file(path: &Path) -> TemplateResult<Self> {
        debug!("Loading registry options from {:?}", path);
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Compiled templates keyed by name.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    base_directory: PathBuf,
    scan_mode: ScanMode,
    templates: HashMap<String, Generator>,
}

impl TemplateRegistry {
    pub fn new(base_directory: impl Into<PathBuf>) -> Self {
        Self {
            base_directory: base_directory.into(),
            scan_mode: ScanMode::default(),
            templates: HashMap::new(),
        }
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }

    pub fn from_options(options: RegistryOptions) -> Self {
        Self::new(options.base_directory).with_scan_mode(options.scan_mode)
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    /// Discovers and compiles every package below the base directory,
    /// replacing the current contents. The first failure aborts the load.
    pub fn load(&mut self) -> TemplateResult<()> {
        let sources = PackageLoader::new(&self.base_directory)
            .with_scan_mode(self.scan_mode)
            .discover()?;

        let mut templates = HashMap::new();
        for source in sources {
            let selector = source.selector();
            let mut generator = Generator::new(&source.dir, &[selector.as_str()]);
            generator
                .compile_and_validate()
                .map_err(|e| TemplateError::TemplateLoad {
                    dir: source.dir.clone(),
                    source: Box::new(e),
                })?;

            let name = match self.scan_mode {
                ScanMode::Shallow => source.leaf_key(),
                ScanMode::Deep if generator.import_path().is_empty() => source.fallback_key(),
                ScanMode::Deep => generator.import_path().to_string(),
            };
            info!("Loaded template: {} ({:?})", name, source.dir);
            templates.insert(name, generator);
        }

        if templates.is_empty() {
            return Err(TemplateError::NoTemplatesFound(self.base_directory.clone()));
        }
        self.templates = templates;
        Ok(())
    }

    pub fn have_existing_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> TemplateResult<Generator> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))
    }

    pub fn with_resource<T: Serialize + ?Sized>(
        &self,
        name: &str,
        obj: &T,
    ) -> TemplateResult<Generator> {
        self.get(name)?.with_resource(obj)
    }

    pub fn with_defaults<T: Serialize + ?Sized>(
        &self,
        name: &str,
        obj: &T,
    ) -> TemplateResult<Generator> {
        self.get(name)?.with_defaults(obj)
    }

    /// Narrows the stored template with `obj` as its defaults.
    pub fn apply_defaults<T: Serialize + ?Sized>(&mut self, name: &str, obj: &T) -> TemplateResult<()> {
        let generator = self.with_defaults(name, obj)?;
        self.templates.insert(name.to_string(), generator);
        Ok(())
    }

    /// Names of all loaded templates, in no particular order.
    pub fn existing_templates(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
