//! CLI command definitions.
//!
//! Each subcommand maps to one operation on template packages.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use stratum_templates::{RegistryOptions, ScanMode, TemplateRegistry};
use tracing::debug;

pub mod export;
pub mod list;
pub mod render;
pub mod vet;

/// Stratum - layered configuration templates
#[derive(Parser)]
#[command(name = "stratum")]
#[command(version, about = "Stratum - layered configuration templates")]
#[command(long_about = r#"
Stratum renders configuration from template packages. A package constrains
`defaults` and `resource` with a schema and derives `template` from them;
rendering narrows the package with both and prints `template` as JSON.

COMMANDS:
  list    → List templates found below a directory
  render  → Render a template with defaults and a resource
  export  → Build one package and print it as JSON
  vet     → Check a JSON or YAML document against a schema

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments
  3 - Validation failure
  4 - Template error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available templates
    List(list::ListArgs),

    /// Render a template as JSON
    Render(render::RenderArgs),

    /// Build a package and print its value as JSON
    Export(export::ExportArgs),

    /// Validate a document against a schema
    Vet(vet::VetArgs),
}

/// Options shared by commands that discover templates.
#[derive(Args, Debug, Clone)]
pub struct DiscoveryArgs {
    /// Templates directory
    #[arg(long, env = "STRATUM_TEMPLATES_DIR")]
    pub templates_dir: Option<PathBuf>,

    /// Look for packages in every directory and key them by import path
    #[arg(long)]
    pub deep: bool,

    /// Registry options file (YAML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DiscoveryArgs {
    /// Registry options from the config file, overridden by flags.
    pub fn options(&self) -> Result<RegistryOptions> {
        let mut options = match &self.config {
            Some(path) => RegistryOptions::from_file(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?,
            None => RegistryOptions {
                base_directory: PathBuf::from("templates"),
                scan_mode: ScanMode::Shallow,
            },
        };
        if let Some(dir) = &self.templates_dir {
            options.base_directory = dir.clone();
        }
        if self.deep {
            options.scan_mode = ScanMode::Deep;
        }
        Ok(options)
    }

    /// Loads every template the options describe.
    pub fn load_registry(&self) -> Result<TemplateRegistry> {
        let options = self.options()?;
        debug!("Registry options: {:?}", options);
        let mut registry = TemplateRegistry::from_options(options);
        registry.load().context("Failed to load templates")?;
        Ok(registry)
    }
}

/// A document that did not match its schema.
#[derive(Debug, thiserror::Error)]
#[error("validation failure: {0}")]
pub struct VetFailure(pub String);

/// Reads a YAML or JSON document.
pub fn read_document(path: &Path) -> Result<serde_json::Value> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

/// Writes rendered output to a file, or stdout when no path is given.
pub fn write_output(data: &[u8], output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, data).with_context(|| format!("Failed to write {:?}", path))?;
        }
        None => println!("{}", String::from_utf8_lossy(data)),
    }
    Ok(())
}

/// Re-indents compact JSON.
pub fn pretty(data: &[u8]) -> Result<Vec<u8>> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    Ok(serde_json::to_vec_pretty(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_yaml_and_json_documents() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("r.yaml");
        fs::write(&yaml, "metadata:\n  name: foo1\n").unwrap();
        let json = dir.path().join("r.json");
        fs::write(&json, r#"{"metadata": {"name": "foo1"}}"#).unwrap();

        assert_eq!(read_document(&yaml).unwrap(), read_document(&json).unwrap());
    }

    #[test]
    fn test_discovery_flags_override_config() {
        let dir = tempdir().unwrap();
        let config = dir.path().join("stratum.yaml");
        fs::write(&config, "base_directory: from-config\nscan_mode: shallow\n").unwrap();

        let args = DiscoveryArgs {
            templates_dir: Some(PathBuf::from("from-flag")),
            deep: true,
            config: Some(config),
        };
        let options = args.options().unwrap();
        assert_eq!(options.base_directory, PathBuf::from("from-flag"));
        assert_eq!(options.scan_mode, ScanMode::Deep);
    }

    #[test]
    fn test_pretty_keeps_field_order() {
        let data = pretty(br#"{"b":1,"a":2}"#).unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "{\n  \"b\": 1,\n  \"a\": 2\n}");
    }
}
