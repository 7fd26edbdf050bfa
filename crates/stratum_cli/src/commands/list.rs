//! List command - Show templates found below a directory.

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::DiscoveryArgs;

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    discovery: DiscoveryArgs,
}

pub fn execute(args: ListArgs) -> Result<()> {
    let registry = args.discovery.load_registry()?;

    let mut names = registry.existing_templates();
    names.sort();
    info!(
        "Found {} template(s) in {:?}",
        names.len(),
        registry.base_directory()
    );

    for name in names {
        println!("{}", name);
    }
    Ok(())
}
