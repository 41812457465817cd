//! RAX block registry
//!
//! Request identifiers are the RAM addresses the vendor UDS variant reads the
//! block from. Layouts use big-endian bit numbering (see [`crate::bits`]).

use super::{RaxBlockDef, RaxBlockId, RaxParameterDef, Transform};

const GEAR: &[f64] = &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, -1.0];
const SWITCH: &[f64] = &[0.0, 1.0];

const fn param(
    name: &'static str,
    bit_offset: usize,
    bit_length: usize,
    unit: &'static str,
    transform: Transform,
) -> RaxParameterDef {
    RaxParameterDef {
        name,
        bit_offset,
        bit_length,
        unit,
        transform,
    }
}

const fn affine(scale: f64, offset: f64) -> Transform {
    Transform::Affine { scale, offset }
}

const RAW: Transform = affine(1.0, 0.0);
const TEMP: Transform = affine(1.0, -40.0);
const PERCENT_8: Transform = affine(100.0 / 255.0, 0.0);
const PERCENT_7: Transform = affine(100.0 / 127.0, 0.0);

pub(super) static BLOCKS: [RaxBlockDef; 8] = [
    RaxBlockDef {
        id: RaxBlockId::A,
        request_id: 0x2380_51A8,
        size: 4,
        parameters: &[
            param("rpm", 0, 11, "rpm", affine(7.8125, 0.0)),
            param("knock_sum", 11, 6, "count", RAW),
            param("timing_advance", 17, 7, "deg", affine(1.0, -20.0)),
            param("load", 24, 8, "%", affine(1.5625, 0.0)),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::B,
        request_id: 0x2380_51AC,
        size: 4,
        parameters: &[
            param("wideband_afr", 0, 9, "afr", affine(0.031_25, 8.0)),
            param("o2_sensor", 9, 8, "V", affine(0.019_531_25, 0.0)),
            param("fuel_trim_long", 17, 8, "%", affine(0.195_312_5, -25.0)),
            param("fuel_trim_short", 25, 7, "%", affine(0.390_625, -25.0)),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::C,
        request_id: 0x2380_51B0,
        size: 4,
        parameters: &[
            param("intake_air_temp", 0, 8, "°C", TEMP),
            param("coolant_temp", 8, 8, "°C", TEMP),
            param("barometric_pressure", 16, 8, "kPa", affine(0.5, 0.0)),
            param("battery_voltage", 24, 8, "V", affine(0.0733, 0.0)),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::D,
        request_id: 0x2380_51B4,
        size: 4,
        parameters: &[
            param("manifold_pressure", 0, 10, "kPa", affine(0.25, 0.0)),
            param("wastegate_duty", 10, 8, "%", affine(0.5, 0.0)),
            param("throttle_position", 18, 7, "%", PERCENT_7),
            param("accelerator_position", 25, 7, "%", PERCENT_7),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::E,
        request_id: 0x2380_51B8,
        size: 5,
        parameters: &[
            param("vehicle_speed", 0, 8, "km/h", RAW),
            param("gear", 8, 3, "gear", Transform::Lookup(GEAR)),
            param("injector_pulse_width", 11, 11, "ms", affine(0.016, 0.0)),
            param("injector_duty", 22, 10, "%", affine(0.1, 0.0)),
            param("idle_switch", 32, 1, "", Transform::Lookup(SWITCH)),
            param("ac_switch", 33, 1, "", Transform::Lookup(SWITCH)),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::F,
        request_id: 0x2380_51C0,
        size: 5,
        parameters: &[
            param("maf_airflow", 0, 12, "g/s", affine(0.05, 0.0)),
            param("fuel_rail_pressure", 12, 10, "kPa", affine(0.5, 0.0)),
            param("oil_temp", 22, 8, "°C", TEMP),
            param("mivec_intake", 30, 8, "deg", affine(0.5, -20.0)),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::G,
        request_id: 0x2380_51C8,
        size: 4,
        parameters: &[
            param("knock_retard", 0, 8, "deg", affine(0.351_563, 0.0)),
            param("knock_count", 8, 8, "count", RAW),
            param("octane_number", 16, 8, "%", PERCENT_8),
            param("check_engine", 24, 1, "", Transform::Lookup(SWITCH)),
            param("fan_stage", 25, 2, "", RAW),
        ],
    },
    RaxBlockDef {
        id: RaxBlockId::H,
        request_id: 0x2380_51CC,
        size: 4,
        parameters: &[
            param("calculated_load", 0, 8, "%", affine(0.625, 0.0)),
            param("target_idle_rpm", 8, 8, "rpm", affine(7.8125, 0.0)),
            param("isc_steps", 16, 8, "steps", RAW),
            param("fuel_level", 24, 8, "%", PERCENT_8),
        ],
    },
];
