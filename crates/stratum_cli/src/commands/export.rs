//! Export command - Build one package and print its value.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use stratum_templates::Compiler;

use super::{pretty, write_output};

#[derive(Args)]
pub struct ExportArgs {
    /// Directory the package selector is resolved against
    dir: PathBuf,

    /// Package selector (`.`, `./sub`, `.:pkg` or an import path)
    #[arg(short, long, default_value = ".")]
    package: String,

    /// Indent the output
    #[arg(long)]
    pretty: bool,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn execute(args: ExportArgs) -> Result<()> {
    let compiler = Compiler::new();
    let compiled = compiler
        .build_all(&args.dir, &[args.package.clone()])
        .with_context(|| format!("Failed to build package {} in {:?}", args.package, args.dir))?;
    if !compiled.import_path.is_empty() {
        debug!("Exporting {}", compiled.import_path);
    }

    let mut data = compiler
        .marshal_value_json(&compiled.value)
        .context("Failed to export package")?;
    if args.pretty {
        data = pretty(&data)?;
    }
    write_output(&data, args.output.as_deref())
}
