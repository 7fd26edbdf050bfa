//! Vet command - Check a document against a schema.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use stratum_templates::SchemaMatcher;

use super::{read_document, VetFailure};

#[derive(Args)]
pub struct VetArgs {
    /// Document to check (YAML or JSON)
    file: PathBuf,

    /// Schema source, or a path inside the package given with --package
    #[arg(long)]
    schema: String,

    /// Read the schema source from a file instead
    #[arg(long, conflicts_with = "package")]
    schema_file: bool,

    /// Import path of the package holding the schema
    #[arg(long)]
    package: Option<String>,

    /// Directory the import path is resolved from
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

pub fn execute(args: VetArgs) -> Result<()> {
    let document = read_document(&args.file)?;

    let schema = if args.schema_file {
        fs::read_to_string(&args.schema)
            .with_context(|| format!("Failed to read schema file {:?}", args.schema))?
    } else {
        args.schema.clone()
    };

    let mut matcher = SchemaMatcher::new(schema).with_work_dir(&args.work_dir);
    if let Some(package) = &args.package {
        matcher = matcher.with_import_path(package);
    }

    let outcome = matcher
        .matches(&serde_json::to_string(&document)?)
        .context("Failed to check document")?;
    if !outcome.matched {
        let reason = outcome.reason.unwrap_or_default();
        return Err(VetFailure(format!("{:?}: {}", args.file, reason)).into());
    }

    info!("{:?} matches the schema", args.file);
    Ok(())
}
