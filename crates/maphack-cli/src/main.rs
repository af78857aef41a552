//! Offline companion tool: signature scans against dumped images, offset
//! cache inspection and the return-address obfuscation calculator.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maphack")]
#[command(about = "maphack offline tooling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every built-in signature against a dumped executable image.
    Scan {
        /// Path to the on-disk image (PE).
        image: PathBuf,
        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Inspect an offset cache file.
    Cache {
        /// Path to the cache file.
        file: PathBuf,
        /// Emit the entries as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Obfuscate a return address the way the host's integrity check does.
    Obfuscate {
        /// Absolute return address (hex).
        retaddr: String,
        /// Image base the address belongs to (hex).
        base: String,
        /// Per-site constant (hex).
        constant: String,
    },
    /// Recover the image-relative offset behind an obfuscated value.
    Deobfuscate {
        /// Obfuscated value (hex).
        value: String,
        /// Per-site constant (hex).
        constant: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("maphack=info".parse()?)
                .add_directive("maphack_core=info".parse()?),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Scan { image, json } => commands::scan::run(&image, json),
        Command::Cache { file, json } => commands::cache::run(&file, json),
        Command::Obfuscate {
            retaddr,
            base,
            constant,
        } => commands::obfuscate::run_obfuscate(&retaddr, &base, &constant),
        Command::Deobfuscate { value, constant } => {
            commands::obfuscate::run_deobfuscate(&value, &constant)
        }
    }
}
