//! RAX telemetry decoding
//!
//! A RAX block is a fixed-layout packet of bit-packed parameters read from ECU
//! RAM in one request. Each parameter converts its raw integer to a physical
//! value through a [`Transform`], which is plain data so the whole registry
//! can be listed and serialized.
//!
//! Parameters are also exposed as synthetic PIDs so they can be requested
//! alongside standard OBD-II PIDs:
//!
//! ```text
//! pid = PID_BASE + block_index * PID_STRIDE + param_index
//! ```

mod rax;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bits::extract_bits;
use crate::error::{CodecError, CodecResult};

/// First synthetic PID
pub const PID_BASE: u32 = 10_000;

/// PID distance between consecutive blocks
pub const PID_STRIDE: u32 = 100;

/// Raw integer to physical value conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// `raw * scale + offset`
    Affine { scale: f64, offset: f64 },
    /// `table[raw]`; tables cover every raw value of their field
    Lookup(&'static [f64]),
}

impl Transform {
    pub fn apply(&self, raw: u32) -> f64 {
        match self {
            Transform::Affine { scale, offset } => f64::from(raw) * scale + offset,
            Transform::Lookup(table) => table.get(raw as usize).copied().unwrap_or(f64::NAN),
        }
    }
}

/// Block type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RaxBlockId {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl RaxBlockId {
    pub const ALL: [RaxBlockId; 8] = [
        RaxBlockId::A,
        RaxBlockId::B,
        RaxBlockId::C,
        RaxBlockId::D,
        RaxBlockId::E,
        RaxBlockId::F,
        RaxBlockId::G,
        RaxBlockId::H,
    ];

    /// Position in the registry, also the block index of synthetic PIDs
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn tag(self) -> char {
        (b'A' + self as u8) as char
    }

    pub fn definition(self) -> &'static RaxBlockDef {
        &rax::BLOCKS[self.index()]
    }
}

impl fmt::Display for RaxBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RAX_{}", self.tag())
    }
}

impl FromStr for RaxBlockId {
    type Err = CodecError;

    /// Accepts `"C"`, `"c"` or `"RAX_C"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.strip_prefix("RAX_").unwrap_or(s);
        let mut chars = tag.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => {
                let c = c.to_ascii_uppercase();
                Self::ALL
                    .into_iter()
                    .find(|id| id.tag() == c)
                    .ok_or_else(|| CodecError::UnknownBlock(s.to_string()))
            }
            _ => Err(CodecError::UnknownBlock(s.to_string())),
        }
    }
}

/// One parameter inside a block
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RaxParameterDef {
    pub name: &'static str,
    pub bit_offset: usize,
    pub bit_length: usize,
    pub unit: &'static str,
    pub transform: Transform,
}

/// Static description of a block
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RaxBlockDef {
    pub id: RaxBlockId,
    /// Wire-level identifier (RAM address of the block)
    pub request_id: u32,
    /// Block length in bytes
    pub size: usize,
    pub parameters: &'static [RaxParameterDef],
}

impl RaxBlockDef {
    pub fn parameter(&self, index: usize) -> CodecResult<&'static RaxParameterDef> {
        self.parameters
            .get(index)
            .ok_or(CodecError::ParameterOutOfRange {
                block: self.id.tag(),
                index,
                count: self.parameters.len(),
            })
    }
}

/// A converted parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedParameter {
    pub block: RaxBlockId,
    pub name: &'static str,
    pub unit: &'static str,
    pub pid: u32,
    pub raw: u32,
    pub value: f64,
}

/// All block definitions, in block-index order
pub fn blocks() -> &'static [RaxBlockDef] {
    &rax::BLOCKS
}

/// Look up a block by its wire-level request identifier
pub fn block_for_request_id(request_id: u32) -> Option<&'static RaxBlockDef> {
    rax::BLOCKS.iter().find(|def| def.request_id == request_id)
}

fn check_block_len(def: &RaxBlockDef, buf: &[u8]) -> CodecResult<()> {
    if buf.len() < def.size {
        return Err(CodecError::SizeMismatch {
            expected: def.size,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn decode_one(def: &RaxBlockDef, index: usize, buf: &[u8]) -> CodecResult<DecodedParameter> {
    let param = def.parameter(index)?;
    let raw = extract_bits(buf, param.bit_offset, param.bit_length)?;
    Ok(DecodedParameter {
        block: def.id,
        name: param.name,
        unit: param.unit,
        pid: PID_BASE + def.id.index() as u32 * PID_STRIDE + index as u32,
        raw,
        value: param.transform.apply(raw),
    })
}

/// Decode every parameter of block `id` from `buf`
pub fn decode_block(buf: &[u8], id: RaxBlockId) -> CodecResult<Vec<DecodedParameter>> {
    let def = id.definition();
    check_block_len(def, buf)?;
    (0..def.parameters.len())
        .map(|index| decode_one(def, index, buf))
        .collect()
}

/// Decode a single parameter of block `id`
pub fn decode_parameter(buf: &[u8], id: RaxBlockId, index: usize) -> CodecResult<DecodedParameter> {
    let def = id.definition();
    check_block_len(def, buf)?;
    decode_one(def, index, buf)
}

/// Decode a block identified by its request identifier.
///
/// Unknown identifiers return `Ok(None)`; a known block with a short buffer is
/// still an error.
pub fn decode_by_request_id(
    buf: &[u8],
    request_id: u32,
) -> CodecResult<Option<Vec<DecodedParameter>>> {
    match block_for_request_id(request_id) {
        Some(def) => decode_block(buf, def.id).map(Some),
        None => Ok(None),
    }
}

/// Synthetic PID of parameter `param_index` in `block`
pub fn synthetic_pid(block: RaxBlockId, param_index: usize) -> CodecResult<u32> {
    block.definition().parameter(param_index)?;
    Ok(PID_BASE + block.index() as u32 * PID_STRIDE + param_index as u32)
}

/// Split a synthetic PID back into block and parameter index
pub fn resolve_pid(pid: u32) -> CodecResult<(RaxBlockId, usize)> {
    let relative = pid.checked_sub(PID_BASE).ok_or(CodecError::InvalidPid(pid))?;
    let block = RaxBlockId::from_index((relative / PID_STRIDE) as usize)
        .ok_or(CodecError::InvalidPid(pid))?;
    let index = (relative % PID_STRIDE) as usize;
    block.definition().parameter(index)?;
    Ok((block, index))
}

pub fn is_synthetic_pid(pid: u32) -> bool {
    resolve_pid(pid).is_ok()
}

/// Every synthetic PID with its block and parameter, in PID order
pub fn all_pids() -> impl Iterator<Item = (u32, RaxBlockId, &'static RaxParameterDef)> {
    rax::BLOCKS.iter().flat_map(|def| {
        def.parameters.iter().enumerate().map(move |(index, param)| {
            (
                PID_BASE + def.id.index() as u32 * PID_STRIDE + index as u32,
                def.id,
                param,
            )
        })
    })
}
