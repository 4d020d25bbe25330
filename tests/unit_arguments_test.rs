use std::sync::Arc;

use peridot::codec::composite::ObjectCodec;
use peridot::codec::{arguments, ids, registry, Arguments, Codec, ObjectShape, ShapeElement, Value};
use peridot::errors::PeridotError;
use peridot::protocol::Cardinality;

fn arg_shape(specs: &[(&str, Cardinality, uuid::Uuid)]) -> Arc<dyn Codec> {
    let shape = ObjectShape {
        elements: specs
            .iter()
            .map(|(name, cardinality, _)| ShapeElement {
                name: name.to_string(),
                cardinality: *cardinality,
                implicit: false,
                is_link: false,
                is_link_property: false,
            })
            .collect(),
    };
    let elements = specs
        .iter()
        .map(|(_, _, id)| registry::global().get(id).unwrap())
        .collect();
    Arc::new(ObjectCodec {
        shape: Arc::new(shape),
        elements,
    })
}

fn shape_id() -> uuid::Uuid {
    uuid::Uuid::from_u128(0xE001)
}

#[test]
fn empty_input_encodes_zero_count() {
    let codec = registry::global().get(&ids::EMPTY_TUPLE).unwrap();
    let encoded = arguments::encode(&codec, &ids::EMPTY_TUPLE, &Arguments::None).unwrap();
    assert_eq!(&encoded[..], &0i32.to_be_bytes());
}

#[test]
fn empty_input_rejects_stray_arguments() {
    let codec = registry::global().get(&ids::EMPTY_TUPLE).unwrap();
    let args = Arguments::positional([1i64]);
    let err = arguments::encode(&codec, &ids::EMPTY_TUPLE, &args).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn positional_arguments_encode_in_order() {
    let codec = arg_shape(&[
        ("0", Cardinality::One, ids::INT64),
        ("1", Cardinality::One, ids::STR),
    ]);
    let args = Arguments::from((7i64, "x"));
    let encoded = arguments::encode(&codec, &shape_id(), &args).unwrap();

    // count, then (reserved, length, body) per element.
    assert_eq!(&encoded[0..4], &2i32.to_be_bytes());
    assert_eq!(&encoded[8..12], &8i32.to_be_bytes());
    assert_eq!(&encoded[12..20], &7i64.to_be_bytes());
    assert_eq!(&encoded[24..28], &1i32.to_be_bytes());
    assert_eq!(&encoded[28..29], b"x");
}

#[test]
fn positional_count_mismatch_is_rejected() {
    let codec = arg_shape(&[("0", Cardinality::One, ids::INT64)]);
    let args = Arguments::from((7i64, 8i64));
    let err = arguments::encode(&codec, &shape_id(), &args).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn named_arguments_match_by_name_not_position() {
    let codec = arg_shape(&[
        ("first", Cardinality::One, ids::INT64),
        ("second", Cardinality::One, ids::INT64),
    ]);
    let args = Arguments::named([
        ("second", Value::Int64(2)),
        ("first", Value::Int64(1)),
    ]);
    let encoded = arguments::encode(&codec, &shape_id(), &args).unwrap();
    // "first" lands in slot 0 despite being supplied last.
    assert_eq!(&encoded[12..20], &1i64.to_be_bytes());
}

#[test]
fn unknown_named_argument_is_rejected() {
    let codec = arg_shape(&[("first", Cardinality::One, ids::INT64)]);
    let args = Arguments::named([("twist", Value::Int64(1))]);
    let err = arguments::encode(&codec, &shape_id(), &args).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn missing_required_argument_is_rejected() {
    let codec = arg_shape(&[
        ("first", Cardinality::One, ids::INT64),
        ("second", Cardinality::One, ids::INT64),
    ]);
    let args = Arguments::named([("first", Value::Int64(1))]);
    let err = arguments::encode(&codec, &shape_id(), &args).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn optional_argument_may_be_absent_or_null() {
    let codec = arg_shape(&[("maybe", Cardinality::AtMostOne, ids::INT64)]);

    let encoded =
        arguments::encode(&codec, &shape_id(), &Arguments::named::<_, &str>([])).unwrap();
    assert_eq!(&encoded[8..12], &(-1i32).to_be_bytes());

    let args = Arguments::named([("maybe", Value::Nothing)]);
    let encoded = arguments::encode(&codec, &shape_id(), &args).unwrap();
    assert_eq!(&encoded[8..12], &(-1i32).to_be_bytes());
}

#[test]
fn required_argument_rejects_null() {
    let codec = arg_shape(&[("must", Cardinality::One, ids::INT64)]);
    let args = Arguments::named([("must", Value::Nothing)]);
    let err = arguments::encode(&codec, &shape_id(), &args).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn named_shape_refuses_positional_supply() {
    let codec = arg_shape(&[("name", Cardinality::One, ids::STR)]);
    let args = Arguments::positional(["x"]);
    let err = arguments::encode(&codec, &shape_id(), &args).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}

#[test]
fn scalar_input_codec_is_not_an_argument_shape() {
    let codec = registry::global().get(&ids::INT64).unwrap();
    let err = arguments::encode(&codec, &shape_id(), &Arguments::None).unwrap_err();
    assert!(matches!(err, PeridotError::ArgumentMismatch(_)));
}
