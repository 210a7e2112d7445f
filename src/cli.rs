//! Command-line interface.

use crate::frontend;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stepc_core::integration::NoIntegrations;

/// Compile a restricted ECMAScript function into an Amazon States Language
/// state machine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Action to perform on the source file
    #[command(subcommand)]
    command: Commands,
    /// Path of the source file containing the state machine function
    source: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the root function and emit the ASL JSON document
    Compile {
        /// Write the document to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Emit compact JSON instead of pretty-printed
        #[arg(long, default_value = "false")]
        compact: bool,
        /// Execution role identifier, passed through to integrations
        #[arg(short, long, default_value = "")]
        role: String,
    },
    /// Parse the source and print the function AST
    Parse,
}

impl Cli {
    pub fn run(&self) -> anyhow::Result<()> {
        let source = std::fs::read_to_string(&self.source)
            .with_context(|| format!("cannot read {}", self.source.display()))?;
        match &self.command {
            Commands::Parse => {
                let mut interner = boa_interner::Interner::default();
                let script = frontend::parse_source(&source, &mut interner)?;
                println!("{script:#?}");
            }
            Commands::Compile { out, compact, role } => {
                let machine = frontend::compile_source(&source, &NoIntegrations, role)?;
                let json = if *compact {
                    serde_json::to_string(&machine)?
                } else {
                    serde_json::to_string_pretty(&machine)?
                };
                match out {
                    Some(path) => std::fs::write(path, json + "\n")
                        .with_context(|| format!("cannot write {}", path.display()))?,
                    None => println!("{json}"),
                }
            }
        }
        Ok(())
    }
}
