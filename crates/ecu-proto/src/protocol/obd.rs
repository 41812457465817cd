//! OBD-II (SAE J1979) mode 01 polling
//!
//! No security handshake and no ROM access: the protocol only discovers
//! supported PIDs and decodes live values.

use serde::Serialize;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};
use crate::live::PidDescriptor;

/// Mode 01: show current data
pub const MODE_CURRENT_DATA: u8 = 0x01;

/// Negative response marker shared with UDS
const NEGATIVE_RESPONSE: u8 = 0x7F;

/// PIDs whose answer is a bitmap of the next 32 PIDs
const BITMAP_PIDS: [u8; 3] = [0x00, 0x20, 0x40];

/// Conversion from response bytes `A, B, ...` to a physical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdFormula {
    /// `A * 100 / 255`
    Percent,
    /// `A - 40`
    Temperature,
    /// `(A - 128) * 100 / 128`
    FuelTrim,
    /// `3 * A`
    FuelPressure,
    /// `A`
    Byte,
    /// `(256A + B) / 4`
    Rpm,
    /// `A / 2 - 64`
    TimingAdvance,
    /// `(256A + B) / 100`
    AirFlow,
    /// `(256A + B) / 1000`
    Voltage,
    /// `256A + B`
    Word,
}

impl ObdFormula {
    fn bytes_needed(self) -> usize {
        match self {
            ObdFormula::Rpm | ObdFormula::AirFlow | ObdFormula::Voltage | ObdFormula::Word => 2,
            _ => 1,
        }
    }

    pub fn decode(self, data: &[u8]) -> ProtocolResult<f64> {
        let needed = self.bytes_needed();
        if data.len() < needed {
            return Err(ProtocolError::ShortResponse {
                step: "OBD value",
                expected: needed,
                actual: data.len(),
            });
        }
        let a = f64::from(data[0]);
        let word = || f64::from(u16::from_be_bytes([data[0], data[1]]));
        Ok(match self {
            ObdFormula::Percent => a * 100.0 / 255.0,
            ObdFormula::Temperature => a - 40.0,
            ObdFormula::FuelTrim => (a - 128.0) * 100.0 / 128.0,
            ObdFormula::FuelPressure => a * 3.0,
            ObdFormula::Byte => a,
            ObdFormula::Rpm => word() / 4.0,
            ObdFormula::TimingAdvance => a / 2.0 - 64.0,
            ObdFormula::AirFlow => word() / 100.0,
            ObdFormula::Voltage => word() / 1000.0,
            ObdFormula::Word => word(),
        })
    }
}

/// Name, unit and formula of a mode 01 PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObdPidInfo {
    pub name: &'static str,
    pub unit: &'static str,
    pub formula: ObdFormula,
}

const fn info(name: &'static str, unit: &'static str, formula: ObdFormula) -> ObdPidInfo {
    ObdPidInfo {
        name,
        unit,
        formula,
    }
}

/// Look up a PID; PIDs without a known formula report their first byte
pub fn describe(pid: u8) -> ObdPidInfo {
    match pid {
        0x04 => info("engine_load", "%", ObdFormula::Percent),
        0x05 => info("coolant_temp", "°C", ObdFormula::Temperature),
        0x06 => info("short_term_fuel_trim_bank1", "%", ObdFormula::FuelTrim),
        0x07 => info("long_term_fuel_trim_bank1", "%", ObdFormula::FuelTrim),
        0x08 => info("short_term_fuel_trim_bank2", "%", ObdFormula::FuelTrim),
        0x09 => info("long_term_fuel_trim_bank2", "%", ObdFormula::FuelTrim),
        0x0A => info("fuel_pressure", "kPa", ObdFormula::FuelPressure),
        0x0B => info("intake_manifold_pressure", "kPa", ObdFormula::Byte),
        0x0C => info("engine_rpm", "rpm", ObdFormula::Rpm),
        0x0D => info("vehicle_speed", "km/h", ObdFormula::Byte),
        0x0E => info("timing_advance", "°", ObdFormula::TimingAdvance),
        0x0F => info("intake_air_temp", "°C", ObdFormula::Temperature),
        0x10 => info("maf_rate", "g/s", ObdFormula::AirFlow),
        0x11 => info("throttle_position", "%", ObdFormula::Percent),
        0x1F => info("run_time", "s", ObdFormula::Word),
        0x2F => info("fuel_level", "%", ObdFormula::Percent),
        0x33 => info("barometric_pressure", "kPa", ObdFormula::Byte),
        0x42 => info("control_module_voltage", "V", ObdFormula::Voltage),
        0x46 => info("ambient_air_temp", "°C", ObdFormula::Temperature),
        0x5C => info("oil_temp", "°C", ObdFormula::Temperature),
        _ => info("unknown", "", ObdFormula::Byte),
    }
}

/// PIDs marked supported in the 4-byte bitmap answering PID `base`.
///
/// Bit 0 (MSB of the first byte) stands for `base + 1`. The second value is
/// true when the next bitmap PID is itself supported.
pub fn parse_supported_bitmap(base: u8, bitmap: &[u8]) -> ProtocolResult<(Vec<u8>, bool)> {
    let bitmap: [u8; 4] = bitmap
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(ProtocolError::ShortResponse {
            step: "supported PIDs",
            expected: 4,
            actual: bitmap.len(),
        })?;
    let bits = u32::from_be_bytes(bitmap);
    let supported: Vec<u8> = (0..32u8)
        .filter(|i| bits & (0x8000_0000 >> i) != 0)
        .map(|i| base.wrapping_add(i + 1))
        .collect();
    Ok((supported, bits & 1 != 0))
}

/// True for PIDs that only carry a support bitmap
pub fn is_bitmap_pid(pid: u8) -> bool {
    pid % 0x20 == 0
}

/// Walk the support bitmaps, asking `fetch` for each one
pub(crate) async fn walk_supported<F, Fut>(mut fetch: F) -> ProtocolResult<Vec<u8>>
where
    F: FnMut(u8) -> Fut,
    Fut: std::future::Future<Output = ProtocolResult<Vec<u8>>>,
{
    let mut pids = Vec::new();
    for base in BITMAP_PIDS {
        let bitmap = fetch(base).await?;
        let (supported, more) = parse_supported_bitmap(base, &bitmap)?;
        pids.extend(supported.into_iter().filter(|pid| !is_bitmap_pid(*pid)));
        if !more {
            break;
        }
    }
    Ok(pids)
}

/// Send a mode 01 request and return the data bytes after the PID echo
pub(crate) async fn request_pid(conn: &dyn Connection, pid: u8) -> ProtocolResult<Vec<u8>> {
    let response = conn.send_frame(&[MODE_CURRENT_DATA, pid]).await?;
    let positive = MODE_CURRENT_DATA + 0x40;
    match response.as_slice() {
        [first, echo, data @ ..] if *first == positive && *echo == pid => Ok(data.to_vec()),
        [first, _, code, ..] if *first == NEGATIVE_RESPONSE => Err(ProtocolError::Rejected {
            command: MODE_CURRENT_DATA,
            code: *code,
        }),
        [first, ..] => Err(ProtocolError::UnexpectedByte {
            step: "OBD mode 01",
            expected: positive,
            actual: *first,
        }),
        [] => Err(ProtocolError::ShortResponse {
            step: "OBD mode 01",
            expected: 2,
            actual: 0,
        }),
    }
}

/// Plain OBD-II ECU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObdProtocol;

impl ObdProtocol {
    pub fn name(&self) -> &'static str {
        "obd2"
    }

    /// Ask for PIDs 01-20 and look for the positive answer prefix
    pub async fn can_handle(&self, conn: &dyn Connection) -> bool {
        match conn.send_frame(&[MODE_CURRENT_DATA, 0x00]).await {
            Ok(response) => response.starts_with(&[MODE_CURRENT_DATA + 0x40, 0x00]),
            Err(e) => {
                debug!(error = %e, "OBD-II probe failed");
                false
            }
        }
    }

    pub async fn get_supported_pids(
        &self,
        conn: &dyn Connection,
    ) -> ProtocolResult<Vec<PidDescriptor>> {
        let pids = walk_supported(|base| request_pid(conn, base)).await?;
        Ok(pids.into_iter().map(PidDescriptor::obd).collect())
    }

    pub fn resolve_pid(&self, pid: u32) -> ProtocolResult<PidDescriptor> {
        u8::try_from(pid)
            .ok()
            .filter(|pid| !is_bitmap_pid(*pid))
            .map(PidDescriptor::obd)
            .ok_or_else(|| ProtocolError::InvalidArgument(format!("0x{pid:X} is not an OBD-II PID")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockConnection;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0x0C, &[0x1A, 0xF8], 1726.0)]
    #[case(0x05, &[0x7B], 83.0)]
    #[case(0x06, &[0x80], 0.0)]
    #[case(0x0E, &[0x94], 10.0)]
    #[case(0x10, &[0x01, 0x2C], 3.0)]
    #[case(0x42, &[0x36, 0xB0], 14.0)]
    #[case(0x0D, &[0x64], 100.0)]
    fn test_formulas(#[case] pid: u8, #[case] data: &[u8], #[case] expected: f64) {
        let value = describe(pid).formula.decode(data).unwrap();
        assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
    }

    #[test]
    fn test_two_byte_formula_rejects_short_data() {
        assert_eq!(
            ObdFormula::Rpm.decode(&[0x10]),
            Err(ProtocolError::ShortResponse {
                step: "OBD value",
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_bitmap_parsing() {
        // 0x0C, 0x0D and the next-bitmap bit
        let (pids, more) = parse_supported_bitmap(0x00, &[0x00, 0x18, 0x00, 0x01]).unwrap();
        assert_eq!(pids, vec![0x0C, 0x0D, 0x20]);
        assert!(more);

        let (pids, more) = parse_supported_bitmap(0x20, &[0x80, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(pids, vec![0x21]);
        assert!(!more);
    }

    #[tokio::test]
    async fn test_probe_and_discovery() {
        let conn = MockConnection::with_responses(vec![
            (vec![0x01, 0x00], vec![0x41, 0x00, 0x08, 0x18, 0x00, 0x01]),
            (vec![0x01, 0x20], vec![0x41, 0x20, 0x00, 0x02, 0x00, 0x00]),
        ]);
        let obd = ObdProtocol;
        assert!(obd.can_handle(&conn).await);

        let pids: Vec<u32> = obd
            .get_supported_pids(&conn)
            .await
            .unwrap()
            .iter()
            .map(|d| d.pid)
            .collect();
        assert_eq!(pids, vec![0x05, 0x0C, 0x0D, 0x2F]);
        assert_eq!(conn.count_requests(&[0x01, 0x40]), 0);
    }

    #[tokio::test]
    async fn test_probe_rejects_other_ecus() {
        let conn = MockConnection::with_responses(vec![(vec![0x01], vec![0x7F, 0x01, 0x11])]);
        assert!(!ObdProtocol.can_handle(&conn).await);
        assert_eq!(
            request_pid(&conn, 0x0C).await,
            Err(ProtocolError::Rejected {
                command: 0x01,
                code: 0x11
            })
        );
    }

    #[test]
    fn test_resolve_rejects_bitmap_and_wide_pids() {
        assert!(ObdProtocol.resolve_pid(0x0C).is_ok());
        assert!(ObdProtocol.resolve_pid(0x20).is_err());
        assert!(ObdProtocol.resolve_pid(10_000).is_err());
    }
}
