//! Stratum CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 4: Template error

use std::process::ExitCode;

use clap::Parser;
use stratum_templates::TemplateError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const TEMPLATE_ERROR: u8 = 4;
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "stratum=debug,warn"
    } else if cli.quiet {
        "error"
    } else {
        "stratum=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Ignore a subscriber that is already installed.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let result = match cli.command {
        Commands::List(args) => commands::list::execute(args),
        Commands::Render(args) => commands::render::execute(args),
        Commands::Export(args) => commands::export::execute(args),
        Commands::Vet(args) => commands::vet::execute(args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<commands::VetFailure>().is_some() {
        return ExitCodes::VALIDATION_FAILURE;
    }
    if let Some(err) = e.downcast_ref::<TemplateError>() {
        return match err {
            TemplateError::Validation(_) | TemplateError::OverlayConflict { .. } => {
                ExitCodes::VALIDATION_FAILURE
            }
            TemplateError::UnknownTemplate(_) | TemplateError::InvalidPath { .. } => {
                ExitCodes::INVALID_ARGS
            }
            TemplateError::Io(_) => ExitCodes::GENERAL_ERROR,
            _ => ExitCodes::TEMPLATE_ERROR,
        };
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("argument") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_categorize_template_errors() {
        let unknown = anyhow::Error::new(TemplateError::UnknownTemplate("x".into()));
        assert_eq!(categorize_error(&unknown), ExitCodes::INVALID_ARGS);

        let empty = anyhow::Error::new(TemplateError::NoTemplatesFound(PathBuf::from("t")));
        assert_eq!(categorize_error(&empty), ExitCodes::TEMPLATE_ERROR);

        let wrapped = anyhow::Error::new(TemplateError::NotCompiled(PathBuf::from("t")))
            .context("Failed to render");
        assert_eq!(categorize_error(&wrapped), ExitCodes::TEMPLATE_ERROR);
    }

    #[test]
    fn test_categorize_vet_failure() {
        let err = anyhow::Error::new(commands::VetFailure("bad".into()));
        assert_eq!(categorize_error(&err), ExitCodes::VALIDATION_FAILURE);
    }

    #[test]
    fn test_categorize_other_errors() {
        let err = anyhow::anyhow!("file not found");
        assert_eq!(categorize_error(&err), ExitCodes::INVALID_ARGS);
        let err = anyhow::anyhow!("boom");
        assert_eq!(categorize_error(&err), ExitCodes::GENERAL_ERROR);
    }
}
