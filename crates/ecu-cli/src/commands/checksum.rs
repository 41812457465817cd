//! Checksum command - validate or fix ROM checksums

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use ecu_codec::checksum::{fixup, table, Alt2Layout};
use ecu_codec::{ChecksumReport, ChecksumScheme};
use ecu_proto::ToolConfig;

use super::{parse_u32, parse_usize, read_image};
use crate::output::{ChecksumRow, OutputContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchemeKind {
    Fixup,
    Table,
    NissanStdAlt,
    NissanAlt2,
}

/// Checksum scheme given on the command line
#[derive(Debug, Default, Args)]
pub struct SchemeArgs {
    /// Checksum scheme (overrides [protocol.checksum] in the config file)
    #[arg(long, value_enum)]
    pub scheme: Option<SchemeKind>,

    /// Fixup word or checksum table offset
    #[arg(long, value_parser = parse_usize)]
    pub offset: Option<usize>,

    /// Number of checksum table records
    #[arg(long, value_parser = parse_usize)]
    pub entries: Option<usize>,

    /// Target value the checksum must produce
    #[arg(long, value_parser = parse_u32)]
    pub target: Option<u32>,

    /// First byte of the summed region
    #[arg(long, value_parser = parse_usize)]
    pub start: Option<usize>,

    /// End of the summed region (exclusive)
    #[arg(long, value_parser = parse_usize)]
    pub end: Option<usize>,

    /// Location of the stored sum
    #[arg(long, value_parser = parse_usize)]
    pub sum_location: Option<usize>,

    /// Location of the stored XOR
    #[arg(long, value_parser = parse_usize)]
    pub xor_location: Option<usize>,

    /// Calibration/code boundary (nissan-alt2)
    #[arg(long, value_parser = parse_usize)]
    pub split: Option<usize>,
}

fn required(value: Option<usize>, flag: &str, scheme: &str) -> Result<usize> {
    value.with_context(|| format!("--{flag} is required for the {scheme} scheme"))
}

impl SchemeArgs {
    /// Scheme from the flags, falling back to the configured one
    pub fn resolve(&self, config: &ToolConfig) -> Result<ChecksumScheme> {
        let scheme = match self.scheme {
            Some(SchemeKind::Fixup) => ChecksumScheme::Fixup {
                offset: required(self.offset, "offset", "fixup")?,
                target: self.target.unwrap_or(fixup::DEFAULT_TARGET),
            },
            Some(SchemeKind::Table) => ChecksumScheme::Table {
                offset: required(self.offset, "offset", "table")?,
                entries: required(self.entries, "entries", "table")?,
                target: self.target.unwrap_or(table::DEFAULT_TARGET),
            },
            Some(SchemeKind::NissanStdAlt) => ChecksumScheme::NissanStdAlt {
                start: required(self.start, "start", "nissan-std-alt")?,
                end: required(self.end, "end", "nissan-std-alt")?,
                sum_location: required(self.sum_location, "sum-location", "nissan-std-alt")?,
                xor_location: required(self.xor_location, "xor-location", "nissan-std-alt")?,
            },
            Some(SchemeKind::NissanAlt2) => ChecksumScheme::NissanAlt2(Alt2Layout {
                start: required(self.start, "start", "nissan-alt2")?,
                end: required(self.end, "end", "nissan-alt2")?,
                sum_location: required(self.sum_location, "sum-location", "nissan-alt2")?,
                xor_location: required(self.xor_location, "xor-location", "nissan-alt2")?,
                split: required(self.split, "split", "nissan-alt2")?,
            }),
            None => match config.protocol_config().checksum {
                Some(scheme) => scheme,
                None => bail!("No checksum scheme: pass --scheme or set [protocol.checksum]"),
            },
        };
        Ok(scheme)
    }
}

fn report_row(scheme: &ChecksumScheme, report: &ChecksumReport) -> ChecksumRow {
    let status = if report.is_valid() {
        "valid".to_string()
    } else if report.total == 0 {
        "no active checksums".to_string()
    } else {
        format!("{} mismatched", report.total - report.matched)
    };
    ChecksumRow {
        scheme: scheme.name().to_string(),
        matched: report.matched,
        total: report.total,
        status,
    }
}

/// Validate the checksums of `rom_path`; with `fix`, rewrite them
pub fn checksum(
    rom_path: &Path,
    scheme: &ChecksumScheme,
    fix: bool,
    output_file: Option<&Path>,
    ctx: &OutputContext,
) -> Result<()> {
    let mut rom = read_image(rom_path, ctx)?;
    let report = scheme
        .validate(&rom)
        .with_context(|| format!("{} checksum does not fit this image", scheme.name()))?;
    ctx.print(&[report_row(scheme, &report)]);

    // Only a table can end up with nothing to check
    if report.total == 0 {
        bail!("{} has no active entries to check or fix", scheme.name());
    }
    if report.is_valid() {
        if fix {
            ctx.info("Checksums already valid, nothing to fix");
        }
        return Ok(());
    }
    if !fix {
        bail!(
            "{} checksum mismatch: {} of {} valid",
            scheme.name(),
            report.matched,
            report.total
        );
    }

    scheme
        .update(&mut rom)
        .with_context(|| format!("Failed to update {} checksum", scheme.name()))?;
    let fixed = scheme.validate(&rom)?;
    if !fixed.is_valid() {
        bail!("{} checksum could not be fixed", scheme.name());
    }

    let target = output_file.unwrap_or(rom_path);
    std::fs::write(target, &rom).with_context(|| format!("Failed to write {}", target.display()))?;
    tracing::info!(scheme = scheme.name(), path = %target.display(), "Checksums updated");
    ctx.success(&format!("Checksums updated, written to {}", target.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use pretty_assertions::assert_eq;

    fn quiet() -> OutputContext {
        OutputContext::new(OutputFormat::Json, true, true)
    }

    fn fixup_scheme() -> ChecksumScheme {
        ChecksumScheme::Fixup {
            offset: 0x3F0,
            target: fixup::DEFAULT_TARGET,
        }
    }

    #[test]
    fn test_resolve_from_flags() {
        let args = SchemeArgs {
            scheme: Some(SchemeKind::Table),
            offset: Some(0x100),
            entries: Some(4),
            ..SchemeArgs::default()
        };
        assert_eq!(
            args.resolve(&ToolConfig::default()).unwrap(),
            ChecksumScheme::Table {
                offset: 0x100,
                entries: 4,
                target: table::DEFAULT_TARGET,
            }
        );

        let missing = SchemeArgs {
            scheme: Some(SchemeKind::Fixup),
            ..SchemeArgs::default()
        };
        let err = missing.resolve(&ToolConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--offset"));
    }

    #[test]
    fn test_resolve_from_config() {
        let config =
            ToolConfig::from_toml_str("[protocol.checksum]\ntype = \"fixup\"\noffset = 0x3F0\n")
                .unwrap();
        assert_eq!(
            SchemeArgs::default().resolve(&config).unwrap(),
            fixup_scheme()
        );
        assert!(SchemeArgs::default()
            .resolve(&ToolConfig::default())
            .is_err());
    }

    #[test]
    fn test_validate_then_fix() {
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("rom.bin");
        let fixed_path = dir.path().join("fixed.bin");
        std::fs::write(&rom_path, vec![0x11u8; 0x400]).unwrap();
        let scheme = fixup_scheme();

        let err = checksum(&rom_path, &scheme, false, None, &quiet()).unwrap_err();
        assert!(err.to_string().contains("mismatch"));

        checksum(&rom_path, &scheme, true, Some(&fixed_path), &quiet()).unwrap();
        let fixed = std::fs::read(&fixed_path).unwrap();
        assert!(scheme.validate(&fixed).unwrap().is_valid());
        // Source image untouched when an output path is given
        assert_eq!(std::fs::read(&rom_path).unwrap(), vec![0x11u8; 0x400]);

        checksum(&fixed_path, &scheme, false, None, &quiet()).unwrap();
    }

    #[test]
    fn test_resolve_nissan_alt2_needs_split() {
        let mut args = SchemeArgs {
            scheme: Some(SchemeKind::NissanAlt2),
            start: Some(0),
            end: Some(0x400),
            sum_location: Some(0x20),
            xor_location: Some(0x24),
            ..SchemeArgs::default()
        };
        let err = args.resolve(&ToolConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--split"));

        args.split = Some(0x200);
        assert_eq!(
            args.resolve(&ToolConfig::default()).unwrap(),
            ChecksumScheme::NissanAlt2(Alt2Layout {
                start: 0,
                end: 0x400,
                sum_location: 0x20,
                xor_location: 0x24,
                split: 0x200,
            })
        );
    }

    #[test]
    fn test_disabled_table_reports_no_active_entries() {
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("rom.bin");
        let scheme = ChecksumScheme::Table {
            offset: 0x300,
            entries: 2,
            target: table::DEFAULT_TARGET,
        };
        let mut rom = vec![0x5Au8; 0x400];
        let disabled = table::TableEntry::disabled(table::DEFAULT_TARGET).to_bytes();
        for record in rom[0x300..0x300 + 2 * table::ENTRY_SIZE].chunks_mut(table::ENTRY_SIZE) {
            record.copy_from_slice(&disabled);
        }
        std::fs::write(&rom_path, &rom).unwrap();

        let err = checksum(&rom_path, &scheme, true, None, &quiet()).unwrap_err();
        assert!(err.to_string().contains("no active entries"), "{err}");
        assert_eq!(std::fs::read(&rom_path).unwrap(), rom);
    }

    #[test]
    fn test_scheme_outside_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rom_path = dir.path().join("small.bin");
        std::fs::write(&rom_path, vec![0u8; 0x100]).unwrap();

        let err = checksum(&rom_path, &fixup_scheme(), true, None, &quiet()).unwrap_err();
        assert!(err.to_string().contains("does not fit"));
    }
}
