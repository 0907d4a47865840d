use mbus_tcp_master::*;

fn fdh_stub() -> [u8; 12] {
    [
        0x78, 0x56, 0x34, 0x12, 0x65, 0x32, 0x01, 0x07, 0x55, 0x00, 0x00, 0x00,
    ]
}

#[test]
fn req_ud2_matches_scenario() {
    assert_eq!(frame::build_req_ud2(0x01), [0x10, 0x5B, 0x01, 0x5C, 0x16]);
}

#[test]
fn short_frame_fails_checksum() {
    let buf = [0x68, 0x03, 0x03, 0x68, 0x08, 0x01, 0x72, 0x00, 0x16];
    assert!(frame::parse_long(&buf).is_err());
}

#[test]
fn minimal_fdh_decodes() {
    let fdh = fdh::decode_fdh(&fdh_stub()).unwrap();
    assert_eq!(fdh.identification, "12345678");
    assert_eq!(fdh.manufacturer, "LSE");
    assert_eq!(fdh.medium, Medium::Water);
    assert_eq!(fdh.status, Status::NoError);
}

#[test]
fn full_envelope_round_trip_to_energy_record() {
    let mut payload = fdh_stub().to_vec();
    payload.extend_from_slice(&[0x04, 0x07, 0x10, 0x27, 0x00, 0x00]);

    let wire = frame::build_long(0x08, 0x01, 0x72, &payload);
    let envelope = match frame::parse_response(&wire).unwrap() {
        frame::Response::Long(e) => e,
        frame::Response::Ack => panic!("expected a long frame"),
    };
    assert_eq!(envelope.address, 0x01);

    let fdh = fdh::decode_fdh(&envelope.payload).unwrap();
    assert_eq!(fdh.manufacturer, "LSE");

    let records = record::parse_records(
        &envelope.payload,
        record::DecodeOptions {
            extensive_mode: false,
            scale_results: true,
        },
    )
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].description, "Act_Energy 0:0");
    assert_eq!(records[0].unit, "Wh");
    assert_eq!(records[0].value, Value::Numeric(1e8));
}

#[test]
fn date_record_decodes_through_the_full_stack() {
    let mut payload = fdh_stub().to_vec();
    payload.extend_from_slice(&[0x02, 0x6C, 0xFE, 0x01]);

    let records = record::parse_records(
        &payload,
        record::DecodeOptions {
            extensive_mode: false,
            scale_results: true,
        },
    )
    .unwrap();
    assert_eq!(records[0].value, Value::Text("2007-01-30".to_string()));
}

#[test]
fn extended_storage_and_tariff_scenario() {
    // DIF 0xC4 (INT32, extension, storage bit0=1), DIFE1 0x9A, DIFE2
    // 0x02 (see src/dif.rs's dife_chain_builds_storage_and_tariff for
    // the bit-level derivation), VIF 0x07 (Energy, 10^4 Wh).
    let mut payload = fdh_stub().to_vec();
    payload.extend_from_slice(&[0xC4, 0x9A, 0x02, 0x07, 0x64, 0x00, 0x00, 0x00]);

    let records = record::parse_records(
        &payload,
        record::DecodeOptions {
            extensive_mode: true,
            scale_results: true,
        },
    )
    .unwrap();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    let expected_storage = 1u64 | (0x0Au64 << 1) | (0x02u64 << 5);
    assert_eq!(r.storage_nr, Some(expected_storage));
    assert_eq!(r.tariff, Some(0b01));
    assert_eq!(r.orig_value, Some(Value::Numeric(100.0)));
}
