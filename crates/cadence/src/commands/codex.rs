//! Codex command - register and list payloads.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use super::{Context, fmt_time};

/// Arguments for the codex command.
#[derive(Args, Debug)]
pub struct CodexArgs {
    #[command(subcommand)]
    pub command: Option<CodexCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CodexCommand {
    /// Register a payload under a unique name
    Add {
        /// Codex name
        name: String,

        /// Script file holding the payload
        #[arg(long)]
        file: PathBuf,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// List registered codices (default)
    List,
}

/// Run the codex command.
pub async fn run(args: CodexArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.open_manager()?;

    match args.command.unwrap_or(CodexCommand::List) {
        CodexCommand::Add {
            name,
            file,
            description,
        } => {
            let payload = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let codex = manager.register_codex(&name, &payload, description.as_deref())?;
            if ctx.json_output {
                ctx.print_json(&codex)?;
            } else {
                println!("Registered codex {} ({})", codex.name, codex.id);
                if ctx.verbose {
                    println!("  checksum: {}", codex.checksum);
                }
            }
        }
        CodexCommand::List => {
            let codices = manager.list_codices()?;
            if ctx.json_output {
                ctx.print_json(&codices)?;
            } else if codices.is_empty() {
                println!("No codices registered");
            } else {
                println!("{:<24} {:<38} {:<20} DESCRIPTION", "NAME", "ID", "CREATED");
                for codex in codices {
                    println!(
                        "{:<24} {:<38} {:<20} {}",
                        codex.name,
                        codex.id,
                        fmt_time(Some(codex.created_at)),
                        codex.description.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}
