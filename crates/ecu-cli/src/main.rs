//! ecutool - offline ROM tooling for ECU flashing
//!
//! Validates and fixes ROM checksums, computes the CRCs bootloaders check,
//! previews the sectors an incremental flash would program and decodes
//! telemetry captures.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ecu_codec::RaxBlockId;
use ecu_proto::ToolConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::{parse_usize, SchemeArgs};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "ecutool")]
#[command(author, version, about = "ECU ROM and telemetry tooling")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "ECUTOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate ROM checksums, or fix them with --fix
    Checksum {
        /// ROM image
        rom: PathBuf,

        #[command(flatten)]
        scheme: SchemeArgs,

        /// Recompute and store the checksums
        #[arg(long)]
        fix: bool,

        /// Write the fixed image here instead of in place
        #[arg(long, requires = "fix")]
        out_file: Option<PathBuf>,
    },

    /// CRC-32 and NCS CRC-16 of a file
    Crc {
        file: PathBuf,
    },

    /// Sectors that differ between two images
    Diff {
        /// Image currently on the ECU
        original: PathBuf,

        /// Image to be flashed
        modified: PathBuf,

        /// Sector size (defaults to the configured ROM layout)
        #[arg(long, value_parser = parse_usize)]
        sector_size: Option<usize>,
    },

    /// Decode a RAX telemetry block
    Decode {
        /// Block tag (A-H or RAX_A-RAX_H)
        block: RaxBlockId,

        /// Block bytes as hex
        data: String,
    },

    /// List synthetic RAX PIDs
    Pids {
        /// Only this block
        #[arg(long)]
        block: Option<RaxBlockId>,
    },

    /// Encode or decode K-line frames
    Frame {
        #[command(subcommand)]
        action: FrameAction,
    },
}

#[derive(Subcommand)]
enum FrameAction {
    /// Split a message into frames
    Encode {
        /// Message bytes as hex
        message: String,
    },
    /// Parse a captured byte stream
    Decode {
        /// Stream bytes as hex
        bytes: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);
    if let Err(e) = run(&cli, &ctx) {
        ctx.error(&format!("Error: {e:#}"));
        std::process::exit(1);
    }
}

fn run(cli: &Cli, ctx: &OutputContext) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ToolConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => ToolConfig::default(),
    };

    match &cli.command {
        Commands::Checksum {
            rom,
            scheme,
            fix,
            out_file,
        } => {
            let scheme = scheme.resolve(&config)?;
            commands::checksum(rom, &scheme, *fix, out_file.as_deref(), ctx)?;
        }

        Commands::Crc { file } => {
            commands::crc(file, ctx)?;
        }

        Commands::Diff {
            original,
            modified,
            sector_size,
        } => {
            let layout = config.protocol_config();
            let sector_size = sector_size.unwrap_or(layout.sector_size);
            commands::diff(original, modified, sector_size, layout.rom_start, ctx)?;
        }

        Commands::Decode { block, data } => {
            let data = commands::parse_hex(data)?;
            commands::decode(*block, &data, ctx)?;
        }

        Commands::Pids { block } => {
            commands::pids(*block, ctx)?;
        }

        Commands::Frame { action } => match action {
            FrameAction::Encode { message } => {
                commands::frame_encode(&commands::parse_hex(message)?, ctx)?;
            }
            FrameAction::Decode { bytes } => {
                commands::frame_decode(&commands::parse_hex(bytes)?, ctx)?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_checksum_flags() {
        let cli = Cli::try_parse_from([
            "ecutool",
            "checksum",
            "rom.bin",
            "--scheme",
            "fixup",
            "--offset",
            "0x0BFFF0",
            "--fix",
        ])
        .unwrap();
        let Commands::Checksum { scheme, fix, .. } = cli.command else {
            panic!("expected checksum");
        };
        assert!(fix);
        assert_eq!(scheme.offset, Some(0x0B_FFF0));
    }

    #[test]
    fn test_out_file_requires_fix() {
        assert!(
            Cli::try_parse_from(["ecutool", "checksum", "rom.bin", "--out-file", "x.bin"])
                .is_err()
        );
    }

    #[test]
    fn test_parse_block_tag() {
        let cli = Cli::try_parse_from(["ecutool", "decode", "RAX_C", "00112233"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Decode {
                block: RaxBlockId::C,
                ..
            }
        ));
    }
}
