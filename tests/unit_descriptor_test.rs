use peridot::codec::{ids, CodecRegistry, DescriptorReader, Value};
use peridot::errors::PeridotError;
use peridot::protocol::{Cardinality, PacketWriter};
use uuid::Uuid;

fn base_scalar(w: &mut PacketWriter, id: Uuid) {
    w.write_u8(0x02);
    w.write_uuid(&id);
}

#[test]
fn well_known_scalar_short_circuits_registry() {
    let registry = CodecRegistry::with_scalars();
    let reader = DescriptorReader::new(&registry);
    // An already-registered root never touches the blob.
    let codec = reader.build(ids::INT64, &[]).unwrap();
    assert_eq!(codec.kind(), "int64");
}

#[test]
fn derived_scalar_shares_its_base_codec() {
    let registry = CodecRegistry::with_scalars();
    let derived_id = Uuid::from_u128(0xD001);

    let mut w = PacketWriter::new();
    base_scalar(&mut w, ids::STR);
    w.write_u8(0x03); // scalar derived from position 0
    w.write_uuid(&derived_id);
    w.write_u16(0);

    let reader = DescriptorReader::new(&registry);
    let codec = reader.build(derived_id, &w.into_bytes()).unwrap();
    assert_eq!(codec.kind(), "str");
    // The derived id is now registered and resolvable on its own.
    assert!(registry.contains(&derived_id));
}

#[test]
fn tuple_descriptor_builds_positional_tree() {
    let registry = CodecRegistry::with_scalars();
    let tuple_id = Uuid::from_u128(0xD002);

    let mut w = PacketWriter::new();
    base_scalar(&mut w, ids::INT64);
    base_scalar(&mut w, ids::STR);
    w.write_u8(0x04);
    w.write_uuid(&tuple_id);
    w.write_u16(2);
    w.write_u16(0);
    w.write_u16(1);

    let reader = DescriptorReader::new(&registry);
    let codec = reader.build(tuple_id, &w.into_bytes()).unwrap();

    let mut body = PacketWriter::new();
    body.write_i32(2);
    body.write_i32(0);
    body.write_i32(8);
    body.write_i64(5);
    body.write_i32(0);
    body.write_i32(2);
    body.write_raw(b"ok");
    assert_eq!(
        codec.decode(&body.into_bytes()).unwrap(),
        Value::Tuple(vec![Value::Int64(5), Value::Str("ok".to_string())])
    );
}

#[test]
fn object_shape_preserves_field_names_and_order() {
    let registry = CodecRegistry::with_scalars();
    let shape_id = Uuid::from_u128(0xD003);

    let mut w = PacketWriter::new();
    base_scalar(&mut w, ids::INT64);
    base_scalar(&mut w, ids::STR);
    w.write_u8(0x01);
    w.write_uuid(&shape_id);
    w.write_u16(2);
    for (name, pos) in [("year", 0u16), ("title", 1u16)] {
        w.write_u32(0);
        w.write_u8(Cardinality::One as u8);
        w.write_string(name);
        w.write_u16(pos);
    }

    let reader = DescriptorReader::new(&registry);
    let codec = reader.build(shape_id, &w.into_bytes()).unwrap();

    let mut body = PacketWriter::new();
    body.write_i32(2);
    body.write_i32(0);
    body.write_i32(8);
    body.write_i64(1979);
    body.write_i32(0);
    body.write_i32(5);
    body.write_raw(b"Alien");
    let decoded = codec.decode(&body.into_bytes()).unwrap();
    let fields = decoded.fields().unwrap();
    assert_eq!(fields[0], ("year", Some(&Value::Int64(1979))));
    assert_eq!(fields[1], ("title", Some(&Value::Str("Alien".to_string()))));
}

#[test]
fn enum_descriptor_builds_member_list() {
    let registry = CodecRegistry::with_scalars();
    let enum_id = Uuid::from_u128(0xD004);

    let mut w = PacketWriter::new();
    w.write_u8(0x07);
    w.write_uuid(&enum_id);
    w.write_u16(2);
    w.write_string("Waiting");
    w.write_string("Done");

    let reader = DescriptorReader::new(&registry);
    let codec = reader.build(enum_id, &w.into_bytes()).unwrap();
    assert!(codec.decode(b"Done").is_ok());
    assert!(codec.decode(b"Missing").is_err());
}

#[test]
fn annotation_nodes_are_skipped_but_occupy_positions() {
    let registry = CodecRegistry::with_scalars();
    let array_id = Uuid::from_u128(0xD005);

    let mut w = PacketWriter::new();
    // Position 0: a type-name annotation.
    w.write_u8(0xF0);
    w.write_uuid(&Uuid::from_u128(0xD006));
    w.write_string("std::int64");
    // Position 1: the element scalar.
    base_scalar(&mut w, ids::INT64);
    // Position 2: array referencing position 1.
    w.write_u8(0x06);
    w.write_uuid(&array_id);
    w.write_u16(1);
    w.write_u16(1);
    w.write_i32(-1);

    let reader = DescriptorReader::new(&registry);
    let codec = reader.build(array_id, &w.into_bytes()).unwrap();
    assert_eq!(codec.kind(), "array");
}

#[test]
fn forward_reference_is_malformed() {
    let registry = CodecRegistry::with_scalars();
    let set_id = Uuid::from_u128(0xD007);

    let mut w = PacketWriter::new();
    w.write_u8(0x00); // set referencing a node that does not exist yet
    w.write_uuid(&set_id);
    w.write_u16(5);

    let reader = DescriptorReader::new(&registry);
    let err = reader.build(set_id, &w.into_bytes()).unwrap_err();
    assert!(matches!(err, PeridotError::MalformedDescriptor(_)));
}

#[test]
fn unknown_base_scalar_is_malformed() {
    let registry = CodecRegistry::with_scalars();
    let bogus = Uuid::from_u128(0xD008);

    let mut w = PacketWriter::new();
    base_scalar(&mut w, bogus);

    let reader = DescriptorReader::new(&registry);
    let err = reader.build(bogus, &w.into_bytes()).unwrap_err();
    assert!(matches!(err, PeridotError::MalformedDescriptor(_)));
}

#[test]
fn missing_root_is_malformed() {
    let registry = CodecRegistry::with_scalars();
    let mut w = PacketWriter::new();
    base_scalar(&mut w, ids::INT64);

    let reader = DescriptorReader::new(&registry);
    let err = reader
        .build(Uuid::from_u128(0xD009), &w.into_bytes())
        .unwrap_err();
    assert!(matches!(err, PeridotError::MalformedDescriptor(_)));
}

#[test]
fn equal_ids_reuse_the_first_codec() {
    let registry = CodecRegistry::with_scalars();
    let before = registry.len();
    let reader = DescriptorReader::new(&registry);

    let tuple_id = Uuid::from_u128(0xD00A);
    let mut w = PacketWriter::new();
    base_scalar(&mut w, ids::INT64);
    w.write_u8(0x04);
    w.write_uuid(&tuple_id);
    w.write_u16(1);
    w.write_u16(0);
    let blob = w.into_bytes();

    reader.build(tuple_id, &blob).unwrap();
    let after_first = registry.len();
    reader.build(tuple_id, &blob).unwrap();
    assert_eq!(registry.len(), after_first);
    assert_eq!(after_first, before + 1);
}
