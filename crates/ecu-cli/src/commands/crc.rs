//! CRC command - image CRCs as the bootloaders compute them

use std::path::Path;

use anyhow::Result;
use ecu_codec::checksum::crc::{crc16_ncs, crc32};

use super::read_image;
use crate::output::OutputContext;

pub fn crc(path: &Path, ctx: &OutputContext) -> Result<()> {
    let data = read_image(path, ctx)?;
    ctx.print_kv(&[
        ("File", path.display().to_string()),
        ("Size", data.len().to_string()),
        ("CRC-32", format!("0x{:08X}", crc32(&data))),
        ("CRC-16 NCS", format!("0x{:04X}", crc16_ncs(&data))),
    ]);
    Ok(())
}
