//! VIF / secondary-VIF lookup tables (spec.md §4.2, §6).
//!
//! Each table is a flat array of entries keyed by an 8-bit pattern in
//! which the low `wildcard_bits` bits are "don't care". Resolution
//! widens the wildcard from 0 up to `max_shift` bits, masking the VIF's
//! low bits to zero at each step and looking for an entry whose pattern
//! (after the same masking) equals the masked VIF — the first widening
//! that matches wins (spec.md §4.2 algorithm, restated per the Redesign
//! Flags in spec.md §9 as fixed-length-prefix arrays rather than a
//! text-keyed wildcard dictionary).

use crate::error::{Unimplemented, UnknownVif};

/// Selects which byte-decoder applies to a data record's value bytes
/// (spec.md §9: "model as a tagged variant ... consumed by one
/// switch").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Decoder {
    UintLe(usize),
    Bcd(usize),
    NegBcd(usize),
    Ascii(usize),
    Raw(usize),
    TypeF,
    TypeG,
    /// DIF selected a reserved data field this crate does not decode
    /// (FLOAT32, INT48, INT64, special-functions nibble) (spec.md §7.5).
    Unimplemented(Unimplemented),
    /// No value bytes at all (DIF low nibble `0000`/`1000`).
    None,
}

/// How an entry's unit varies with the VIF's wildcard selector bits.
enum UnitSpec {
    Fixed(&'static str),
    BySelector(&'static [&'static str]),
}

/// How an entry's scaling varies with the VIF's wildcard selector bits.
enum ScalingSpec {
    Fixed(f64),
    /// `10^((vif & mask) as i32 + bias)`
    Exp { mask: u8, bias: i32 },
}

/// A decoder chosen as a function of the wildcard selector bits, used
/// only by the `Time_point` entry (date vs datetime).
enum DecoderSpec {
    Fixed(Decoder),
    TimePoint,
}

struct VifEntry {
    /// Pattern with the low `wildcard_bits` bits cleared; MSB (the
    /// extension bit) is assumed already masked off by the caller.
    pattern: u8,
    wildcard_bits: u8,
    descr: &'static str,
    scaling: ScalingSpec,
    unit: UnitSpec,
    /// `None` means this entry never overrides the DIF-selected decoder;
    /// `Some` means it always does (used only by `Time_point`).
    decoder: Option<DecoderSpec>,
}

const TIME_UNITS: &[&str] = &["s", "min", "hr", "days"];

/// Resolved content of one VIF (or VIFE) table lookup (spec.md §4.2).
pub struct Resolved {
    pub descr: &'static str,
    pub scaling: f64,
    pub unit: &'static str,
    pub decoder_override: Option<Decoder>,
}

fn resolve(table: &[VifEntry], vif: u8, max_shift: u8) -> Result<Resolved, UnknownVif> {
    let key = vif & 0x7F;
    for shift in 0..=max_shift {
        let mask = !((1u8 << shift).wrapping_sub(1));
        let masked = key & mask;
        if let Some(entry) = table
            .iter()
            .find(|e| e.wildcard_bits == shift && e.pattern == masked)
        {
            let scaling = match entry.scaling {
                ScalingSpec::Fixed(v) => v,
                ScalingSpec::Exp { mask, bias } => 10f64.powi((vif & mask) as i32 + bias),
            };
            let unit = match entry.unit {
                UnitSpec::Fixed(u) => u,
                UnitSpec::BySelector(table) => {
                    let sel_mask = (1u8 << shift) - 1;
                    table[(vif & sel_mask) as usize]
                }
            };
            let decoder_override = match entry.decoder {
                None => None,
                Some(DecoderSpec::Fixed(d)) => Some(d),
                Some(DecoderSpec::TimePoint) => {
                    if vif & 0x01 == 0 {
                        Some(Decoder::TypeG)
                    } else {
                        Some(Decoder::TypeF)
                    }
                }
            };
            return Ok(Resolved {
                descr: entry.descr,
                scaling,
                unit,
                decoder_override,
            });
        }
    }
    Err(UnknownVif(vif))
}

/// Resolve `vif` (MSB already stripped by the caller is not required;
/// this function strips it) against the primary VIF table (spec.md §6,
/// `max_shift = 3`).
pub fn resolve_primary(vif: u8) -> Result<Resolved, UnknownVif> {
    resolve(PRIMARY, vif, 3)
}

/// Resolve `vif` against the secondary/extended VIF table (spec.md §6,
/// `max_shift = 4`).
pub fn resolve_secondary(vif: u8) -> Result<Resolved, UnknownVif> {
    resolve(SECONDARY, vif, 4)
}

macro_rules! entry {
    ($pattern:expr, $wbits:expr, $descr:expr, $scaling:expr, $unit:expr) => {
        VifEntry {
            pattern: $pattern,
            wildcard_bits: $wbits,
            descr: $descr,
            scaling: $scaling,
            unit: $unit,
            decoder: None,
        }
    };
}

/// Primary VIF table (spec.md §6). Entries follow the wildcard widths
/// used by `examples/original_source/pymbus/MbusTcpMaster.py`'s
/// `vif_field` dict; descriptions are normalized (no trailing periods —
/// a Python print-statement artifact, not part of the wire format).
static PRIMARY: &[VifEntry] = &[
    // 00000nnn: Energy, 10^(n-3) Wh
    entry!(0b0000_0000, 3, "Energy", ScalingSpec::Exp { mask: 0x07, bias: -3 }, UnitSpec::Fixed("Wh")),
    // 00001nnn: Energy, 10^n J
    entry!(0b0000_1000, 3, "Energy", ScalingSpec::Exp { mask: 0x07, bias: 0 }, UnitSpec::Fixed("J")),
    // 00010nnn: Volume, 10^(n-6) m3
    entry!(0b0001_0000, 3, "Volume", ScalingSpec::Exp { mask: 0x07, bias: -6 }, UnitSpec::Fixed("m3")),
    // 00011nnn: Mass, 10^(n-3) kg
    entry!(0b0001_1000, 3, "Mass", ScalingSpec::Exp { mask: 0x07, bias: -3 }, UnitSpec::Fixed("kg")),
    // 001000nn: On_time, unit selected by n
    entry!(0b0010_0000, 2, "On_time", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    // 001001nn: Operating_time
    entry!(0b0010_0100, 2, "Operating_time", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    // 00101nnn: Power, 10^(n-3) W
    entry!(0b0010_1000, 3, "Power", ScalingSpec::Exp { mask: 0x07, bias: -3 }, UnitSpec::Fixed("W")),
    // 00110nnn: Power, 10^n J/h
    entry!(0b0011_0000, 3, "Power", ScalingSpec::Exp { mask: 0x07, bias: 0 }, UnitSpec::Fixed("J/h")),
    // 00111nnn: Volume_flow, 10^(n-6) m3/h
    entry!(0b0011_1000, 3, "Volume_flow", ScalingSpec::Exp { mask: 0x07, bias: -6 }, UnitSpec::Fixed("m3/h")),
    // 01000nnn: Volume_flow, 10^(n-7) m3/min
    entry!(0b0100_0000, 3, "Volume_flow", ScalingSpec::Exp { mask: 0x07, bias: -7 }, UnitSpec::Fixed("m3/min")),
    // 01001nnn: Volume_flow, 10^(n-9) m3/s
    entry!(0b0100_1000, 3, "Volume_flow", ScalingSpec::Exp { mask: 0x07, bias: -9 }, UnitSpec::Fixed("m3/s")),
    // 01010nnn: Mass_flow, 10^(n-3) kg/h
    entry!(0b0101_0000, 3, "Mass_flow", ScalingSpec::Exp { mask: 0x07, bias: -3 }, UnitSpec::Fixed("kg/h")),
    // 010110nn: Flow_temperature, 10^(n-3) C
    entry!(0b0101_1000, 2, "Flow_temperature", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("C")),
    // 010111nn: Return_temperature
    entry!(0b0101_1100, 2, "Return_temperature", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("C")),
    // 011000nn: Temperature_diff
    entry!(0b0110_0000, 2, "Temperature_diff", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("C")),
    // 011001nn: External_temperature
    entry!(0b0110_0100, 2, "External_temperature", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("C")),
    // 011010nn: Pressure
    entry!(0b0110_1000, 2, "Pressure", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("bar")),
    // 0110110n: Time_point, unit/decoder by bit0 (date vs datetime)
    VifEntry {
        pattern: 0b0110_1100,
        wildcard_bits: 1,
        descr: "Time_point",
        scaling: ScalingSpec::Fixed(1.0),
        unit: UnitSpec::BySelector(&["date", "datetime"]),
        decoder: Some(DecoderSpec::TimePoint),
    },
    entry!(0b0110_1110, 0, "Units_for_HCA", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_1111, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    // 011100nn: Averaging_duration
    entry!(0b0111_0000, 2, "Averaging_duration", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    // 011101nn: Actuality_duration
    entry!(0b0111_0100, 2, "Actuality_duration", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    entry!(0b0111_1000, 0, "Fabrication_no", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0111_1001, 0, "Enhanced", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0111_1010, 0, "Bus_address", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
];

/// Secondary/extended VIF table (spec.md §6). Covers the full set
/// reconstructed from `vif_field_secondary` in
/// `examples/original_source/pymbus/MbusTcpMaster.py` (spec.md §6 calls
/// its own listing an excerpt).
static SECONDARY: &[VifEntry] = &[
    entry!(0b0000_0000, 2, "Credit in local currency", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("Eur")),
    entry!(0b0000_0100, 2, "Debit in local currency", ScalingSpec::Exp { mask: 0x03, bias: -3 }, UnitSpec::Fixed("Eur")),
    entry!(0b0000_1000, 0, "Transmission count", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("#")),
    entry!(0b0000_1001, 0, "Medium", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0000_1010, 0, "Manufacturer", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0000_1011, 0, "Parameter set identification", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0000_1100, 0, "Model version", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0000_1101, 0, "Hardware version", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0000_1110, 0, "Firmware version", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0000_1111, 0, "Software version", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0000, 0, "Customer location", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0001, 0, "Customer", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0010, 0, "Access code user", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0011, 0, "Access code operator", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0100, 0, "Access code system operator", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0101, 0, "Access code developer", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0110, 0, "Password", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_0111, 0, "Error flags", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("binary")),
    entry!(0b0001_1000, 0, "Error mask", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("binary")),
    entry!(0b0001_1001, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_1010, 0, "Digital output", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("binary")),
    entry!(0b0001_1011, 0, "Digital input", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("binary")),
    entry!(0b0001_1100, 0, "Baudrate", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("Baud")),
    entry!(0b0001_1101, 0, "Response delay time", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("bittimes")),
    entry!(0b0001_1110, 0, "Retry", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0001_1111, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_0000, 0, "First storage #", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_0001, 0, "Last storage #", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_0010, 0, "Size of storage block", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_0011, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_0100, 2, "Storage interval", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    entry!(0b0010_1000, 0, "Storage interval months", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("months")),
    entry!(0b0010_1001, 0, "Storage interval years", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("years")),
    entry!(0b0010_1010, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_1011, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0010_1100, 2, "Duration since last readout", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    entry!(0b0011_0000, 0, "Startdate of tariff", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("datetime")),
    entry!(0b0011_0000, 2, "Duration of tariff", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    entry!(0b0011_0100, 2, "Tariff period", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(TIME_UNITS)),
    entry!(0b0011_1000, 0, "Tariff period months", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("months")),
    entry!(0b0011_1001, 0, "Tariff period years", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("years")),
    entry!(0b0011_1010, 0, "No dimension", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0011_1011, 0, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0011_1100, 2, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    // 0100nnnn: electrical voltage, 10^(n-9) V
    entry!(0b0100_0000, 4, "Voltage", ScalingSpec::Exp { mask: 0x0F, bias: -9 }, UnitSpec::Fixed("V")),
    // 0101nnnn: electrical current, 10^(n-12) A
    entry!(0b0101_0000, 4, "Current", ScalingSpec::Exp { mask: 0x0F, bias: -12 }, UnitSpec::Fixed("A")),
    entry!(0b0110_0000, 0, "Reset counter", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0001, 0, "Cumulation counter", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0010, 0, "Control signal", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0011, 0, "Day of week", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0100, 0, "Week number", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0101, 0, "Timepoint of daychange", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0110, 0, "State of parameter activation", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_0111, 0, "Special supplier info", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
    entry!(0b0110_1000, 2, "Duration since last cumulation", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(&["hr", "days", "months", "years"])),
    entry!(0b0110_1100, 2, "Operating time battery", ScalingSpec::Fixed(1.0), UnitSpec::BySelector(&["hr", "days", "months", "years"])),
    entry!(0b0111_0000, 0, "Datetime battery change", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("datetime")),
    entry!(0b0111_0000, 1, "Reserved", ScalingSpec::Fixed(1.0), UnitSpec::Fixed("")),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_pattern() {
        let r = resolve_primary(0x07).unwrap();
        assert_eq!(r.descr, "Energy");
        assert_eq!(r.unit, "Wh");
        assert!((r.scaling - 1e4).abs() < 1e-9);
    }

    #[test]
    fn on_time_unit_selector() {
        let r = resolve_primary(0b0010_0001).unwrap(); // On_time, selector=1 -> minutes
        assert_eq!(r.descr, "On_time");
        assert_eq!(r.unit, "min");
    }

    #[test]
    fn time_point_selects_decoder_by_bit0() {
        let date = resolve_primary(0x6C).unwrap();
        assert_eq!(date.unit, "date");
        assert!(matches!(date.decoder_override, Some(Decoder::TypeG)));

        let datetime = resolve_primary(0x6D).unwrap();
        assert_eq!(datetime.unit, "datetime");
        assert!(matches!(datetime.decoder_override, Some(Decoder::TypeF)));
    }

    #[test]
    fn lookup_prefers_narrowest_wildcard() {
        // 0x6E (Units_for_HCA, wildcard_bits=0) must not fall through to
        // a wider, also-matching pattern.
        let r = resolve_primary(0x6E).unwrap();
        assert_eq!(r.descr, "Units_for_HCA");
    }

    #[test]
    fn unknown_vif_after_exhausting_shifts() {
        // 0x7B has no entry in either table region it could fall into.
        assert!(resolve_primary(0x7B).is_err());
    }

    #[test]
    fn secondary_voltage_and_current() {
        let v = resolve_secondary(0x49).unwrap(); // 0100_1001 -> n=9
        assert_eq!(v.unit, "V");
        assert!((v.scaling - 1e0).abs() < 1e-9);

        let a = resolve_secondary(0x5C).unwrap(); // 0101_1100 -> n=12
        assert_eq!(a.unit, "A");
        assert!((a.scaling - 1e0).abs() < 1e-9);
    }
}
