//! Decode command - RAX telemetry block from a hex dump

use anyhow::{Context, Result};
use ecu_codec::{decode_block, RaxBlockId};

use crate::output::{OutputContext, ParameterRow};

pub fn decode_rows(block: RaxBlockId, data: &[u8]) -> Result<Vec<ParameterRow>> {
    let params = decode_block(data, block).with_context(|| format!("Failed to decode {block}"))?;
    Ok(params
        .into_iter()
        .map(|p| ParameterRow {
            pid: p.pid,
            name: p.name.to_string(),
            raw: p.raw,
            value: p.value.to_string(),
            unit: p.unit.to_string(),
        })
        .collect())
}

pub fn decode(block: RaxBlockId, data: &[u8], ctx: &OutputContext) -> Result<()> {
    let def = block.definition();
    if data.len() > def.size {
        ctx.warn(&format!(
            "{} is {} bytes, ignoring {} trailing bytes",
            block,
            def.size,
            data.len() - def.size
        ));
    }
    ctx.print(&decode_rows(block, data)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_block_a() {
        // rpm 384 (11 bits), knock 3, timing 35, load 64
        let rows = decode_rows(RaxBlockId::A, &[0x30, 0x01, 0xA3, 0x40]).unwrap();
        let values: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.name.as_str(), r.value.as_str()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("rpm", "3000"),
                ("knock_sum", "3"),
                ("timing_advance", "15"),
                ("load", "100"),
            ]
        );
        assert_eq!(rows[0].pid, 10_000);
    }

    #[test]
    fn test_short_block_is_an_error() {
        let err = decode_rows(RaxBlockId::A, &[0x30]).unwrap_err();
        assert!(err.to_string().contains("RAX_A"));
    }
}
