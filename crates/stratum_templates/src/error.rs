//! Error types for templates.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while compiling, discovering or rendering templates.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unexpected: {0} instances loaded, expected exactly one")]
    UnexpectedInstanceCount(usize),

    #[error("failed to load instances (dir: {dir:?}, args: [{}]): {source}", .args.join(" "))]
    Load {
        dir: PathBuf,
        args: Vec<String>,
        source: stratum_lang::Errors,
    },

    #[error("failed to build instances (dir: {dir:?}, args: [{}]): {source}", .args.join(" "))]
    Build {
        dir: PathBuf,
        args: Vec<String>,
        source: stratum_lang::Errors,
    },

    #[error("validation failure: {0}")]
    Validation(#[source] stratum_lang::Errors),

    #[error("unable to compile source: {0}")]
    Compile(#[source] stratum_lang::Errors),

    #[error("unable to marshal value: {0}")]
    Marshal(#[source] stratum_lang::Errors),

    #[error("unable to list avaliable config templates in {dir:?}: {source}")]
    UnableToList {
        dir: PathBuf,
        source: walkdir::Error,
    },

    #[error("unable to load config template from {dir:?}: {source}")]
    TemplateLoad {
        dir: PathBuf,
        source: Box<TemplateError>,
    },

    #[error("no config templates found in {0:?}")]
    NoTemplatesFound(PathBuf),

    #[error("unknown template {0:?}")]
    UnknownTemplate(String),

    #[error("invalid path {path:?}: {source}")]
    InvalidPath {
        path: String,
        source: stratum_lang::Error,
    },

    #[error("unable to encode overlay value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unable to fill path {path:?}: {source}")]
    OverlayConflict {
        path: String,
        source: stratum_lang::Errors,
    },

    #[error("template in {0:?} has not been compiled")]
    NotCompiled(PathBuf),

    #[error("unable to lookup path {path:?}: {source}")]
    RenderLookup {
        path: String,
        source: stratum_lang::Error,
    },

    #[error("unable to render JSON: {0}")]
    RenderMarshal(#[source] stratum_lang::Errors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TemplateError {
    /// Diagnostics reported by the language engine, if the error carries any.
    pub fn diagnostics(&self) -> Option<&stratum_lang::Errors> {
        match self {
            TemplateError::Load { source, .. }
            | TemplateError::Build { source, .. }
            | TemplateError::OverlayConflict { source, .. }
            | TemplateError::Validation(source)
            | TemplateError::Compile(source)
            | TemplateError::Marshal(source)
            | TemplateError::RenderMarshal(source) => Some(source),
            TemplateError::TemplateLoad { source, .. } => source.diagnostics(),
            _ => None,
        }
    }
}
