//! Package loading: selectors, module roots and import paths.

use crate::ast::{Decl, ExprKind, File, Label};
use crate::atom::Atom;
use crate::builtins;
use crate::error::{Error, Errors};
use crate::parser::parse_file;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Directory holding module metadata.
pub const MODULE_DIR: &str = "cue.mod";
const MODULE_FILE: &str = "module.cue";
const SOURCE_EXTENSION: &str = "cue";

/// Loader configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Directory selectors are resolved against. Empty means the current
    /// working directory.
    pub dir: PathBuf,
}

impl Config {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// A loaded package, ready to be built.
#[derive(Debug, Clone)]
pub struct Instance {
    /// The selector as given.
    pub display_path: String,
    pub dir: PathBuf,
    pub package: String,
    /// Canonical import path, empty outside of a module.
    pub import_path: String,
    pub module: Option<String>,
    pub files: Vec<Arc<File>>,
    /// Files of every module-local package imported, transitively, keyed by
    /// import path as written.
    pub imports: BTreeMap<String, Vec<Arc<File>>>,
    pub err: Option<Errors>,
}

impl Instance {
    fn failed(display_path: &str, dir: PathBuf, err: Error) -> Self {
        Self {
            display_path: display_path.to_string(),
            dir,
            package: String::new(),
            import_path: String::new(),
            module: None,
            files: Vec::new(),
            imports: BTreeMap::new(),
            err: Some(err.into()),
        }
    }
}

/// A module root and its declared path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub root: PathBuf,
    pub path: String,
}

/// Loads one instance per selector. An empty list loads `.`.
///
/// Selectors are directories relative to `config.dir` (`.`, `./sub`) or
/// import paths within the enclosing module, optionally qualified with a
/// package name (`./sub:pkg`). Failures are reported on the instance.
pub fn instances(args: &[String], config: &Config) -> Vec<Instance> {
    if args.is_empty() {
        return vec![load_instance(".", config)];
    }
    args.iter().map(|arg| load_instance(arg, config)).collect()
}

fn load_instance(arg: &str, config: &Config) -> Instance {
    debug!("Loading instance {:?} (dir: {:?})", arg, config.dir);
    let (selector, qualifier) = split_qualifier(arg);

    let dir = if is_import_path(selector) {
        let base = absolute(&config.dir);
        let module = base.as_deref().and_then(find_module);
        match module.and_then(|m| module_dir(&m, selector)) {
            Some(dir) => dir,
            None => {
                let err = Error::load(format!("cannot find package {:?}", selector));
                return Instance::failed(arg, PathBuf::from(selector), err);
            }
        }
    } else {
        config.dir.join(selector)
    };

    if !dir.is_dir() {
        let err = Error::load(format!("cannot find package {:?}", selector));
        return Instance::failed(arg, dir, err);
    }

    let mut instance = match load_package(&dir, qualifier, selector) {
        Ok((package, files)) => Instance {
            display_path: arg.to_string(),
            dir: dir.clone(),
            package,
            import_path: String::new(),
            module: None,
            files,
            imports: BTreeMap::new(),
            err: None,
        },
        Err(errors) => {
            let mut instance = Instance::failed(arg, dir.clone(), Error::load(""));
            instance.err = Some(errors);
            return instance;
        }
    };

    let module = absolute(&dir).and_then(|abs| find_module(&abs).map(|m| (m, abs)));
    if let Some((module, abs)) = &module {
        instance.import_path = import_path_for(module, abs, &instance.package);
        instance.module = Some(module.path.clone());
    }

    let mut errors = Vec::new();
    let mut imports = BTreeMap::new();
    let module = module.map(|(m, _)| m);
    resolve_imports(&instance.files, module.as_ref(), &mut imports, &mut errors);
    instance.imports = imports;
    instance.err = Errors::from_vec(errors);
    trace!(
        "Loaded package {} from {:?} with {} files",
        instance.package,
        instance.dir,
        instance.files.len()
    );
    instance
}

fn split_qualifier(arg: &str) -> (&str, Option<&str>) {
    match arg.rsplit_once(':') {
        Some((selector, qualifier)) if !qualifier.contains('/') => {
            let selector = if selector.is_empty() { "." } else { selector };
            (selector, Some(qualifier))
        }
        _ => (arg, None),
    }
}

/// Import paths start with a domain-like first element.
fn is_import_path(selector: &str) -> bool {
    if selector.starts_with('.') || selector.starts_with('/') {
        return false;
    }
    selector
        .split('/')
        .next()
        .is_some_and(|first| first.contains('.'))
}

fn absolute(dir: &Path) -> Option<PathBuf> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    fs::canonicalize(dir).ok()
}

/// Finds the innermost module enclosing `dir`.
pub fn find_module(dir: &Path) -> Option<Module> {
    dir.ancestors().find_map(|candidate| {
        let file = candidate.join(MODULE_DIR).join(MODULE_FILE);
        let src = fs::read_to_string(&file).ok()?;
        let path = module_path(&file, &src)?;
        Some(Module {
            root: candidate.to_path_buf(),
            path,
        })
    })
}

fn module_path(file: &Path, src: &str) -> Option<String> {
    let parsed = parse_file(&file.to_string_lossy(), src).ok()?;
    let ExprKind::Struct(decls) = &parsed.body.kind else {
        return None;
    };
    decls.iter().find_map(|decl| match decl {
        Decl::Field { label, value, .. } if *label == Label::Regular("module".to_string()) => {
            match &value.kind {
                ExprKind::Literal(Atom::String(path)) => Some(path.clone()),
                _ => None,
            }
        }
        _ => None,
    })
}

fn module_dir(module: &Module, import_path: &str) -> Option<PathBuf> {
    if import_path == module.path {
        return Some(module.root.clone());
    }
    let rest = import_path.strip_prefix(&module.path)?.strip_prefix('/')?;
    Some(module.root.join(rest))
}

/// Canonical import path of the package in `dir`.
pub fn import_path_for(module: &Module, dir: &Path, package: &str) -> String {
    let rel = dir.strip_prefix(&module.root).unwrap_or(dir);
    let mut path = module.path.clone();
    for component in rel.components() {
        path.push('/');
        path.push_str(&component.as_os_str().to_string_lossy());
    }
    let leaf = path.rsplit('/').next().unwrap_or_default();
    if package != "_" && package != leaf {
        path.push(':');
        path.push_str(package);
    }
    path
}

/// Source files directly inside `dir`, sorted by name.
pub fn source_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == SOURCE_EXTENSION))
        .collect()
}

/// Package names declared by the files in `dir`.
pub fn package_names(dir: &Path) -> Result<BTreeSet<String>, Errors> {
    let mut names = BTreeSet::new();
    for file in parse_dir(dir)? {
        names.insert(file.package_name().to_string());
    }
    Ok(names)
}

fn parse_dir(dir: &Path) -> Result<Vec<Arc<File>>, Errors> {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    for path in source_files(dir) {
        let src = match fs::read_to_string(&path) {
            Ok(src) => src,
            Err(e) => {
                errors.push(Error::load(format!("unable to read {}: {}", path.display(), e)));
                continue;
            }
        };
        match parse_file(&path.to_string_lossy(), &src) {
            Ok(file) => files.push(Arc::new(file)),
            Err(parse_errors) => errors.extend(parse_errors),
        }
    }
    match Errors::from_vec(errors) {
        Some(errors) => Err(errors),
        None => Ok(files),
    }
}

fn load_package(
    dir: &Path,
    qualifier: Option<&str>,
    display: &str,
) -> Result<(String, Vec<Arc<File>>), Errors> {
    let files = parse_dir(dir)?;
    if files.is_empty() {
        return Err(Error::load(format!("no CUE files in {}", display)).into());
    }

    let names: BTreeSet<&str> = files.iter().map(|f| f.package_name()).collect();
    let package = match qualifier {
        Some(q) if names.contains(q) => q.to_string(),
        Some(q) => {
            return Err(Error::load(format!("no files for package {:?} in {}", q, display)).into())
        }
        None => {
            let named: Vec<&str> = names.iter().copied().filter(|n| *n != "_").collect();
            match named.as_slice() {
                [] => "_".to_string(),
                [one] => one.to_string(),
                [first, second, ..] => {
                    return Err(Error::load(format!(
                        "found packages {:?} and {:?} in {}",
                        first, second, display
                    ))
                    .into())
                }
            }
        }
    };

    let files = files
        .into_iter()
        .filter(|f| f.package_name() == package)
        .collect();
    Ok((package, files))
}

fn resolve_imports(
    files: &[Arc<File>],
    module: Option<&Module>,
    imports: &mut BTreeMap<String, Vec<Arc<File>>>,
    errors: &mut Vec<Error>,
) {
    for file in files {
        for spec in &file.imports {
            if builtins::is_package(&spec.path) || imports.contains_key(&spec.path) {
                continue;
            }
            let (path, qualifier) = split_qualifier(&spec.path);
            let Some(dir) = module.and_then(|m| module_dir(m, path)) else {
                errors.push(
                    Error::build(format!("cannot find package {:?}", spec.path))
                        .at(spec.pos.clone()),
                );
                continue;
            };
            let package = qualifier
                .map(str::to_string)
                .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string());
            match load_package(&dir, Some(&package), &spec.path) {
                Ok((_, loaded)) => {
                    debug!("Resolved import {} to {:?}", spec.path, dir);
                    imports.insert(spec.path.clone(), loaded.clone());
                    resolve_imports(&loaded, module, imports, errors);
                }
                Err(load_errors) => errors.extend(load_errors),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_qualifier() {
        assert_eq!(split_qualifier("./a:b"), ("./a", Some("b")));
        assert_eq!(split_qualifier(":b"), (".", Some("b")));
        assert_eq!(split_qualifier("./a"), ("./a", None));
        assert_eq!(
            split_qualifier("example.com/x/y:z"),
            ("example.com/x/y", Some("z"))
        );
    }

    #[test]
    fn test_is_import_path() {
        assert!(is_import_path("example.com/mod/pkg"));
        assert!(!is_import_path("./pkg"));
        assert!(!is_import_path("pkg"));
        assert!(!is_import_path("."));
    }

    #[test]
    fn test_import_path_for() {
        let module = Module {
            root: PathBuf::from("/m"),
            path: "example.com/m".to_string(),
        };
        assert_eq!(
            import_path_for(&module, Path::new("/m/basic"), "basic"),
            "example.com/m/basic"
        );
        assert_eq!(
            import_path_for(&module, Path::new("/m/nested/2"), "nested2"),
            "example.com/m/nested/2:nested2"
        );
        assert_eq!(import_path_for(&module, Path::new("/m"), "m"), "example.com/m");
    }
}
