use std::sync::Arc;

use peridot::codec::composite::{
    ArrayCodec, EnumCodec, NamedTupleCodec, ObjectCodec, RangeCodec, SetCodec, SparseObjectCodec,
    TupleCodec,
};
use peridot::codec::{ids, registry, Codec, NamedTupleShape, ObjectShape, ShapeElement, Value};
use peridot::errors::PeridotError;
use peridot::model::EnumValue;
use peridot::protocol::{Cardinality, PacketWriter};

fn int64() -> Arc<dyn Codec> {
    registry::global().get(&ids::INT64).unwrap()
}

fn str_codec() -> Arc<dyn Codec> {
    registry::global().get(&ids::STR).unwrap()
}

fn encode(codec: &dyn Codec, value: &Value) -> bytes::Bytes {
    let mut w = PacketWriter::new();
    codec.encode(&mut w, value).unwrap();
    w.into_bytes()
}

#[test]
fn tuple_round_trip_with_null_element() {
    let codec = TupleCodec {
        elements: vec![int64(), str_codec()],
    };
    let value = Value::Tuple(vec![Value::Int64(42), Value::Nothing]);
    let encoded = encode(&codec, &value);
    assert_eq!(codec.decode(&encoded).unwrap(), value);
}

#[test]
fn tuple_rejects_wire_count_mismatch() {
    let codec = TupleCodec {
        elements: vec![int64()],
    };
    let mut w = PacketWriter::new();
    w.write_i32(2);
    let err = codec.decode(&w.into_bytes()).unwrap_err();
    assert!(matches!(err, PeridotError::DecodeError(_)));
}

#[test]
fn named_tuple_preserves_declared_names_and_order() {
    let codec = NamedTupleCodec {
        shape: Arc::new(NamedTupleShape {
            names: vec!["one".to_string(), "two".to_string()],
        }),
        elements: vec![int64(), int64()],
    };
    let mut w = PacketWriter::new();
    w.write_i32(2);
    for v in [1i64, 2] {
        w.write_i32(0);
        w.write_i32(8);
        w.write_i64(v);
    }
    let decoded = codec.decode(&w.into_bytes()).unwrap();
    let fields = decoded.fields().unwrap();
    assert_eq!(fields[0].0, "one");
    assert_eq!(fields[1].0, "two");
    assert_eq!(fields[0].1, Some(&Value::Int64(1)));
    assert_eq!(fields[1].1, Some(&Value::Int64(2)));
}

#[test]
fn object_distinguishes_null_from_absent() {
    let codec = ObjectCodec {
        shape: Arc::new(ObjectShape {
            elements: vec![
                ShapeElement {
                    name: "id".to_string(),
                    cardinality: Cardinality::One,
                    implicit: true,
                    is_link: false,
                    is_link_property: false,
                },
                ShapeElement {
                    name: "nickname".to_string(),
                    cardinality: Cardinality::AtMostOne,
                    implicit: false,
                    is_link: false,
                    is_link_property: false,
                },
            ],
        }),
        elements: vec![int64(), str_codec()],
    };
    let mut w = PacketWriter::new();
    w.write_i32(2);
    w.write_i32(0);
    w.write_i32(8);
    w.write_i64(7);
    w.write_i32(0);
    w.write_i32(-1); // null nickname
    let decoded = codec.decode(&w.into_bytes()).unwrap();
    match decoded {
        Value::Object { shape, fields } => {
            assert_eq!(shape.elements[1].name, "nickname");
            assert_eq!(fields[0], Some(Value::Int64(7)));
            assert_eq!(fields[1], None);
        }
        other => panic!("expected object, got {other:?}"),
    }
}

#[test]
fn array_round_trip() {
    let codec = ArrayCodec { element: int64() };
    let value = Value::Array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
    let encoded = encode(&codec, &value);
    assert_eq!(codec.decode(&encoded).unwrap(), value);
}

#[test]
fn empty_array_uses_zero_dimension_envelope() {
    let codec = ArrayCodec { element: int64() };
    let encoded = encode(&codec, &Value::Array(vec![]));
    assert_eq!(encoded.len(), 12); // ndims + flags + reserved, no dims
    assert_eq!(codec.decode(&encoded).unwrap(), Value::Array(vec![]));
}

#[test]
fn set_round_trip_preserves_order() {
    let codec = SetCodec { element: int64() };
    let value = Value::Set(vec![Value::Int64(1), Value::Int64(2)]);
    let encoded = encode(&codec, &value);
    assert_eq!(codec.decode(&encoded).unwrap(), value);
}

#[test]
fn range_round_trip() {
    let codec = RangeCodec { element: int64() };
    let value = Value::Range(peridot::codec::Range {
        lower: Some(Box::new(Value::Int64(1))),
        upper: Some(Box::new(Value::Int64(10))),
        inc_lower: true,
        inc_upper: false,
        empty: false,
    });
    let encoded = encode(&codec, &value);
    assert_eq!(codec.decode(&encoded).unwrap(), value);

    let empty = Value::Range(peridot::codec::Range::empty());
    let encoded = encode(&codec, &empty);
    assert_eq!(encoded.len(), 1);
    assert_eq!(codec.decode(&encoded).unwrap(), empty);
}

#[test]
fn enum_validates_membership_both_ways() {
    let codec = EnumCodec {
        members: vec!["Red".to_string(), "Green".to_string()],
    };
    let encoded = encode(&codec, &Value::Enum(EnumValue::new("Red")));
    assert_eq!(
        codec.decode(&encoded).unwrap(),
        Value::Enum(EnumValue::new("Red"))
    );
    assert!(codec.decode(b"Blue").is_err());

    let mut w = PacketWriter::new();
    let err = codec
        .encode(&mut w, &Value::Enum(EnumValue::new("Blue")))
        .unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn sparse_object_round_trip_with_absent_fields() {
    let codec = SparseObjectCodec {
        names: vec!["module".to_string(), "aliases".to_string()],
        elements: vec![str_codec(), str_codec()],
    };
    let mut sparse = peridot::codec::SparseObject::new();
    sparse.set("module", Value::Str("default".to_string()));
    let value = Value::SparseObject(sparse);
    let encoded = encode(&codec, &value);
    assert_eq!(codec.decode(&encoded).unwrap(), value);
}

#[test]
fn sparse_object_rejects_unknown_fields() {
    let codec = SparseObjectCodec {
        names: vec!["module".to_string()],
        elements: vec![str_codec()],
    };
    let mut sparse = peridot::codec::SparseObject::new();
    sparse.set("nonsense", Value::Str("x".to_string()));
    let mut w = PacketWriter::new();
    let err = codec
        .encode(&mut w, &Value::SparseObject(sparse))
        .unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}
