//! VIF/VIFE parsing and the VDS record loop (spec.md §4.4, §4.5).

use crate::codec::{decode_ascii, decode_bcd, decode_type_f, decode_type_g, decode_uint};
use crate::dif::{parse_dif, DifState};
use crate::error::{DecodeError, MasterError, ProtocolError, Unimplemented};
use crate::vif::{resolve_primary, resolve_secondary, Decoder};

/// Idle filler byte observed between data records on the wire but not
/// part of the DIF/VIF grammar (spec.md §4.5, §9). Skipped silently.
const FILLER_BYTE: u8 = 0x2F;

const VIF_MANUFACTURER_SPECIFIC: [u8; 2] = [0x7E, 0xFE];
const VIF_MANUFACTURER_EXTENDED: [u8; 2] = [0x7F, 0xFF];
const VIF_ASCII: [u8; 2] = [0x7C, 0xFC];
const VIF_SECONDARY_INDIRECTION: [u8; 2] = [0xFD, 0xFB];

/// A decoded value: numeric measurements carry an `f64`, text fields
/// (ASCII, date/time strings) carry a `String` (spec.md §3 "numeric-or-
/// string value").
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Numeric(f64),
    Text(String),
}

/// One decoded measurement (spec.md §3 "DataRecord").
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataRecord {
    pub description: String,
    pub value: Value,
    pub unit: String,

    // Extensive-mode-only fields (spec.md §3); populated only when
    // `RequestOptions::extensive_mode` is set, `None` otherwise.
    pub function: Option<crate::dif::Function>,
    pub storage_nr: Option<u64>,
    pub tariff: Option<u64>,
    pub orig_value: Option<Value>,
    pub scaling: Option<f64>,
    pub start_offset: Option<usize>,
    pub raw: Option<Vec<u8>>,
    pub decoder: Option<DecoderName>,
}

/// Stable name for the resolved decoder, exposed only in extensive mode
/// (spec.md §3 "resolved decoder identity").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecoderName {
    UintLe,
    Bcd,
    NegBcd,
    Ascii,
    Raw,
    TypeF,
    TypeG,
    Unimplemented,
    None,
}

impl From<Decoder> for DecoderName {
    fn from(d: Decoder) -> Self {
        match d {
            Decoder::UintLe(_) => DecoderName::UintLe,
            Decoder::Bcd(_) => DecoderName::Bcd,
            Decoder::NegBcd(_) => DecoderName::NegBcd,
            Decoder::Ascii(_) => DecoderName::Ascii,
            Decoder::Raw(_) => DecoderName::Raw,
            Decoder::TypeF => DecoderName::TypeF,
            Decoder::TypeG => DecoderName::TypeG,
            Decoder::Unimplemented(_) => DecoderName::Unimplemented,
            Decoder::None => DecoderName::None,
        }
    }
}

/// VIF/VIFE resolution result handed back to the record loop: the
/// description, cumulative scaling, unit and resolved length/decoder
/// (spec.md §3 "VIF state").
struct VifResult {
    descr: String,
    scaling: f64,
    unit: String,
    /// Overrides the DIF-selected length/decoder when `Some` (ASCII/LVAR
    /// and secondary-indirection paths resolve their own length).
    length: Option<usize>,
    decoder: Decoder,
}

/// Parse VIF + zero-or-more VIFEs starting at `data[offset]` (spec.md
/// §4.4). `dif` supplies the DIF-selected default length/decoder, which
/// VIF/VIFE resolution may override.
fn parse_vif(data: &[u8], offset: usize, dif: &DifState) -> Result<(VifResult, usize), MasterError> {
    if offset >= data.len() {
        return Err(DecodeError::TooShort {
            need: offset + 1,
            got: data.len(),
        }
        .into());
    }
    let vif = data[offset];
    let mut cursor = offset + 1;

    if VIF_MANUFACTURER_SPECIFIC.contains(&vif) {
        return Err(Unimplemented::ManufacturerSpecificVif(vif).into());
    }
    if VIF_MANUFACTURER_EXTENDED.contains(&vif) {
        return Err(Unimplemented::ManufacturerExtendedVif(vif).into());
    }

    if VIF_ASCII.contains(&vif) {
        if dif.length.is_some() {
            return Err(ProtocolError::AsciiWithoutLvar.into());
        }
        if cursor >= data.len() {
            return Err(DecodeError::TooShort {
                need: cursor + 1,
                got: data.len(),
            }
            .into());
        }
        let lvar = data[cursor];
        cursor += 1;
        let (length, decoder) = match lvar {
            0x00..=0xBF => (lvar as usize, Decoder::Ascii(lvar as usize)),
            0xC0..=0xCF => ((lvar - 0xC0) as usize, Decoder::Bcd((lvar - 0xC0) as usize)),
            0xD0..=0xDF => ((lvar - 0xD0) as usize, Decoder::NegBcd((lvar - 0xD0) as usize)),
            0xE0..=0xEF => ((lvar - 0xE0) as usize, Decoder::UintLe((lvar - 0xE0) as usize)),
            other => return Err(ProtocolError::UnsupportedLvar(other).into()),
        };
        return Ok((
            VifResult {
                descr: String::new(),
                scaling: 1.0,
                unit: String::new(),
                length: Some(length),
                decoder,
            },
            cursor,
        ));
    }

    if VIF_SECONDARY_INDIRECTION.contains(&vif) {
        if cursor >= data.len() {
            return Err(DecodeError::TooShort {
                need: cursor + 1,
                got: data.len(),
            }
            .into());
        }
        let real_vif = data[cursor];
        cursor += 1;
        let resolved = resolve_secondary(real_vif)?;
        let decoder = resolved.decoder_override.unwrap_or(dif.decoder);
        return Ok((
            VifResult {
                descr: resolved.descr.to_string(),
                scaling: resolved.scaling,
                unit: resolved.unit.to_string(),
                length: None,
                decoder,
            },
            cursor,
        ));
    }

    // Regular path: primary table, then chained VIFE bytes against the
    // secondary table (spec.md §4.4).
    let resolved = resolve_primary(vif)?;
    let mut descr = resolved.descr.to_string();
    let mut scaling = resolved.scaling;
    let mut unit = resolved.unit.to_string();
    let mut decoder = resolved.decoder_override.unwrap_or(dif.decoder);

    let mut extension = vif & 0x80 != 0;
    while extension {
        if cursor >= data.len() {
            return Err(DecodeError::TooShort {
                need: cursor + 1,
                got: data.len(),
            }
            .into());
        }
        let vife = data[cursor];
        cursor += 1;

        let vife_resolved = resolve_secondary(vife)?;
        if !vife_resolved.descr.is_empty() {
            descr.push_str(", ");
            descr.push_str(vife_resolved.descr);
        }
        scaling *= vife_resolved.scaling;
        if !vife_resolved.unit.is_empty() {
            unit = vife_resolved.unit.to_string();
        }
        if let Some(d) = vife_resolved.decoder_override {
            decoder = d;
        }

        extension = vife & 0x80 != 0;
    }

    Ok((
        VifResult {
            descr,
            scaling,
            unit,
            length: None,
            decoder,
        },
        cursor,
    ))
}

fn apply_decoder(decoder: Decoder, bytes: &[u8]) -> Result<Value, MasterError> {
    match decoder {
        Decoder::UintLe(n) => Ok(Value::Numeric(decode_uint(bytes, n)? as f64)),
        Decoder::Bcd(n) => {
            let _ = n;
            Ok(Value::Text(decode_bcd(bytes)))
        }
        Decoder::NegBcd(n) => {
            let _ = n;
            Ok(Value::Text(format!("-{}", decode_bcd(bytes))))
        }
        Decoder::Ascii(n) => {
            let _ = n;
            Ok(Value::Text(decode_ascii(bytes)?))
        }
        Decoder::Raw(n) => {
            let _ = n;
            Ok(Value::Numeric(decode_uint(bytes, bytes.len())? as f64))
        }
        Decoder::TypeF => {
            if bytes.len() < 4 {
                return Err(DecodeError::TooShort { need: 4, got: bytes.len() }.into());
            }
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[..4]);
            Ok(Value::Text(decode_type_f(&buf)))
        }
        Decoder::TypeG => {
            if bytes.len() < 2 {
                return Err(DecodeError::TooShort { need: 2, got: bytes.len() }.into());
            }
            let mut buf = [0u8; 2];
            buf.copy_from_slice(&bytes[..2]);
            Ok(Value::Text(decode_type_g(&buf)))
        }
        Decoder::Unimplemented(e) => Err(e.into()),
        Decoder::None => Ok(Value::Numeric(0.0)),
    }
}

/// Options controlling record decoding (spec.md §6 per-call options).
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub extensive_mode: bool,
    pub scale_results: bool,
}

/// Decode the VDS record loop starting at payload offset 12 (spec.md
/// §4.5). `payload` is the *entire* VDS payload, including the 12-byte
/// FDH; the loop starts at offset 12 and runs to the end.
pub fn parse_records(payload: &[u8], options: DecodeOptions) -> Result<Vec<DataRecord>, MasterError> {
    let mut records = Vec::new();
    let mut index = 12usize;

    while index < payload.len() {
        if payload[index] == FILLER_BYTE {
            index += 1;
            continue;
        }

        let dr_start = index;
        let dif = parse_dif(&payload[index..])?;
        index += dif.bytes_consumed;

        let (vif, next_index) = parse_vif(payload, index, &dif)?;
        index = next_index;

        let length = vif.length.or(dif.length).ok_or_else(|| {
            // Only reachable if a LVAR DIF's VIF failed to resolve a
            // length, which parse_vif always does when it accepts the
            // ASCII/secondary-indirection paths; defensive only.
            MasterError::Decode(DecodeError::TooShort { need: 1, got: 0 })
        })?;

        if index + length > payload.len() {
            return Err(DecodeError::TooShort {
                need: index + length,
                got: payload.len(),
            }
            .into());
        }
        let value_bytes = &payload[index..index + length];
        let orig_value = apply_decoder(vif.decoder, value_bytes)?;
        index += length;

        let scaled_value = match &orig_value {
            Value::Numeric(n) => Value::Numeric(n * vif.scaling),
            Value::Text(s) => Value::Text(s.clone()),
        };

        let description = format!("{}_{} {}:{}", dif.function, vif.descr, dif.storage_nr, dif.tariff);

        let value = if options.scale_results {
            scaled_value
        } else {
            orig_value.clone()
        };

        let record = if options.extensive_mode {
            DataRecord {
                description,
                value,
                unit: vif.unit,
                function: Some(dif.function),
                storage_nr: Some(dif.storage_nr),
                tariff: Some(dif.tariff),
                orig_value: Some(orig_value),
                scaling: Some(vif.scaling),
                start_offset: Some(dr_start),
                raw: Some(payload[dr_start..index].to_vec()),
                decoder: Some(vif.decoder.into()),
            }
        } else {
            DataRecord {
                description,
                value,
                unit: vif.unit,
                function: None,
                storage_nr: None,
                tariff: None,
                orig_value: None,
                scaling: None,
                start_offset: None,
                raw: None,
                decoder: None,
            }
        };
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fdh_stub() -> [u8; 12] {
        [0u8; 12]
    }

    #[test]
    fn single_energy_record() {
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x04, 0x07, 0x10, 0x27, 0x00, 0x00]);

        let records = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: true,
                scale_results: true,
            },
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.description, "Act_Energy 0:0");
        assert_eq!(r.unit, "Wh");
        assert_eq!(r.orig_value, Some(Value::Numeric(10000.0)));
        assert_eq!(r.value, Value::Numeric(1e8));
    }

    #[test]
    fn unscaled_when_disabled() {
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x04, 0x07, 0x10, 0x27, 0x00, 0x00]);
        let records = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: false,
            },
        )
        .unwrap();
        assert_eq!(records[0].value, Value::Numeric(10000.0));
    }

    #[test]
    fn date_record_via_time_point_override() {
        // DIF 0x02 (INT16), VIF 0x6C (Time_point, date). Bytes chosen so
        // the Type-G bit formula yields day=30, month=1, year=2007 (see
        // DESIGN.md for why these differ from spec.md's literal "DE 11"
        // worked example, which is internally inconsistent with its own
        // bit formula).
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x02, 0x6C, 0xFE, 0x01]);
        let records = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: true,
            },
        )
        .unwrap();
        assert_eq!(records[0].value, Value::Text("2007-01-30".to_string()));
    }

    #[test]
    fn reserved_data_field_errors_instead_of_fabricating_zero() {
        // DIF 0x05 (FLOAT32, reserved/unimplemented), VIF 0x07 (Energy).
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x05, 0x07, 0x00, 0x00, 0x00, 0x00]);
        let err = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: true,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Unimplemented(crate::error::Unimplemented::Float32)
        ));
    }

    #[test]
    fn filler_byte_skipped_between_records() {
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x04, 0x07, 0x10, 0x27, 0x00, 0x00]);
        payload.push(0x2F);
        payload.extend_from_slice(&[0x01, 0x7A, 0x05]);
        let records = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: true,
            },
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].description, "Act_Bus_address 0:0");
    }

    #[test]
    fn ascii_without_lvar_is_protocol_error() {
        let mut payload = fdh_stub().to_vec();
        // DIF 0x01 (fixed length 1, not LVAR), VIF 0x7C (ASCII).
        payload.extend_from_slice(&[0x01, 0x7C, 0x02, b'h', b'i']);
        let err = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: true,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Protocol(ProtocolError::AsciiWithoutLvar)
        ));
    }

    #[test]
    fn ascii_lvar_record() {
        let mut payload = fdh_stub().to_vec();
        // DIF 0x0D (LVAR), VIF 0x7C (ASCII), LVAR length 5, "hello".
        payload.extend_from_slice(&[0x0D, 0x7C, 0x05]);
        payload.extend_from_slice(b"hello");
        let records = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: true,
            },
        )
        .unwrap();
        assert_eq!(records[0].value, Value::Text("hello".to_string()));
    }

    #[test]
    fn cursor_traverses_exactly_the_payload() {
        let mut payload = fdh_stub().to_vec();
        payload.extend_from_slice(&[0x04, 0x07, 0x10, 0x27, 0x00, 0x00]);
        payload.extend_from_slice(&[0x01, 0x7A, 0x05]);
        let records = parse_records(
            &payload,
            DecodeOptions {
                extensive_mode: false,
                scale_results: true,
            },
        )
        .unwrap();
        assert_eq!(records.len(), 2);
    }
}
