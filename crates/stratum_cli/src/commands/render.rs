//! Render command - Narrow a template with defaults and a resource.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{pretty, read_document, write_output, DiscoveryArgs};

#[derive(Args)]
pub struct RenderArgs {
    /// Template name as shown by `stratum list`
    name: String,

    /// Defaults overlay (YAML or JSON)
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Resource overlay (YAML or JSON)
    #[arg(long)]
    resource: Option<PathBuf>,

    /// Indent the output
    #[arg(long)]
    pretty: bool,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    discovery: DiscoveryArgs,
}

pub fn execute(args: RenderArgs) -> Result<()> {
    let mut registry = args.discovery.load_registry()?;

    if let Some(path) = &args.defaults {
        let defaults = read_document(path)?;
        registry
            .apply_defaults(&args.name, &defaults)
            .with_context(|| format!("Failed to apply defaults from {:?}", path))?;
    }

    let generator = match &args.resource {
        Some(path) => {
            let resource = read_document(path)?;
            registry
                .with_resource(&args.name, &resource)
                .with_context(|| format!("Failed to apply resource from {:?}", path))?
        }
        None => registry.get(&args.name)?,
    };

    let mut data = generator
        .render_json()
        .with_context(|| format!("Failed to render template {}", args.name))?;
    if args.pretty {
        data = pretty(&data)?;
    }

    info!("Rendered template {}", args.name);
    write_output(&data, args.output.as_deref())
}
