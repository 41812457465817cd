//! Pids command - synthetic RAX PIDs

use anyhow::Result;
use ecu_codec::telemetry::all_pids;
use ecu_codec::RaxBlockId;

use crate::output::{OutputContext, PidRow};

pub fn pid_rows(block: Option<RaxBlockId>) -> Vec<PidRow> {
    all_pids()
        .filter(|(_, id, _)| block.map_or(true, |b| b == *id))
        .map(|(pid, id, param)| PidRow {
            pid,
            block: id.to_string(),
            name: param.name.to_string(),
            bits: format!("{}:{}", param.bit_offset, param.bit_length),
            unit: param.unit.to_string(),
        })
        .collect()
}

pub fn pids(block: Option<RaxBlockId>, ctx: &OutputContext) -> Result<()> {
    ctx.print(&pid_rows(block));
    Ok(())
}
