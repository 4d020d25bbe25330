// src/codec/scalar.rs

//! Codecs for the pre-registered scalar types.
//!
//! Decoding checks the exact envelope length of fixed-size scalars; a wrong
//! length means the stream is desynchronized and must fail loudly.
//! Encoding accepts lossless widenings (int16 → int64) and rejects
//! narrowing; the `str` codec additionally coerces enum values to their
//! member name, which is the only enum coercion the driver performs.

use bytes::Bytes;

use super::value::Value;
use super::Codec;
use crate::errors::{PeridotError, Result};
use crate::model::{
    BigInt, ConfigMemory, DateDuration, Datetime, Decimal, Duration, Json, LocalDate,
    LocalDatetime, LocalTime, RelativeDuration,
};
use crate::protocol::{PacketReader, PacketWriter};

fn mismatch(codec: &'static str, value: &Value) -> PeridotError {
    PeridotError::ArgumentMismatch(format!(
        "cannot encode a {} value with the {codec} codec",
        value.kind_name()
    ))
}

fn check_len(codec: &'static str, buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() != expected {
        return Err(PeridotError::DecodeError(format!(
            "{codec} element must be {expected} bytes, got {}",
            buf.len()
        )));
    }
    Ok(())
}

/// Stands in where no data can legitimately appear: the output of a
/// statement executed with output format `None`, or an all-null input.
#[derive(Debug)]
pub struct NothingCodec;

impl Codec for NothingCodec {
    fn decode(&self, _buf: &[u8]) -> Result<Value> {
        Err(PeridotError::DecodeError(
            "no data was expected for this statement".to_string(),
        ))
    }

    fn encode(&self, _w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Nothing => Ok(()),
            other => Err(mismatch("nothing", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "nothing"
    }
}

#[derive(Debug)]
pub struct BoolCodec;

impl Codec for BoolCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("bool", buf, 1)?;
        match buf[0] {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(PeridotError::DecodeError(format!(
                "invalid bool byte 0x{other:02x}"
            ))),
        }
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Bool(v) => {
                w.write_bool(*v);
                Ok(())
            }
            other => Err(mismatch("bool", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "bool"
    }
}

#[derive(Debug)]
pub struct Int16Codec;

impl Codec for Int16Codec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("int16", buf, 2)?;
        Ok(Value::Int16(i16::from_be_bytes(buf.try_into().unwrap())))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Int16(v) => {
                w.write_i16(*v);
                Ok(())
            }
            other => Err(mismatch("int16", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "int16"
    }
}

#[derive(Debug)]
pub struct Int32Codec;

impl Codec for Int32Codec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("int32", buf, 4)?;
        Ok(Value::Int32(i32::from_be_bytes(buf.try_into().unwrap())))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Int16(v) => w.write_i32(*v as i32),
            Value::Int32(v) => w.write_i32(*v),
            other => return Err(mismatch("int32", other)),
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "int32"
    }
}

#[derive(Debug)]
pub struct Int64Codec;

impl Codec for Int64Codec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("int64", buf, 8)?;
        Ok(Value::Int64(i64::from_be_bytes(buf.try_into().unwrap())))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Int16(v) => w.write_i64(*v as i64),
            Value::Int32(v) => w.write_i64(*v as i64),
            Value::Int64(v) => w.write_i64(*v),
            other => return Err(mismatch("int64", other)),
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "int64"
    }
}

#[derive(Debug)]
pub struct Float32Codec;

impl Codec for Float32Codec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("float32", buf, 4)?;
        Ok(Value::Float32(f32::from_be_bytes(buf.try_into().unwrap())))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Float32(v) => {
                w.write_f32(*v);
                Ok(())
            }
            other => Err(mismatch("float32", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "float32"
    }
}

#[derive(Debug)]
pub struct Float64Codec;

impl Codec for Float64Codec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("float64", buf, 8)?;
        Ok(Value::Float64(f64::from_be_bytes(buf.try_into().unwrap())))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Float32(v) => w.write_f64(*v as f64),
            Value::Float64(v) => w.write_f64(*v),
            other => return Err(mismatch("float64", other)),
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "float64"
    }
}

#[derive(Debug)]
pub struct StrCodec;

impl Codec for StrCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        Ok(Value::Str(std::str::from_utf8(buf)?.to_string()))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Str(v) => w.write_raw(v.as_bytes()),
            // The one sanctioned coercion: an enum member name as text.
            Value::Enum(v) => w.write_raw(v.name().as_bytes()),
            other => return Err(mismatch("str", other)),
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "str"
    }
}

#[derive(Debug)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        Ok(Value::Bytes(Bytes::copy_from_slice(buf)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Bytes(v) => {
                w.write_raw(v);
                Ok(())
            }
            other => Err(mismatch("bytes", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "bytes"
    }
}

#[derive(Debug)]
pub struct UuidCodec;

impl Codec for UuidCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("uuid", buf, 16)?;
        let bytes: [u8; 16] = buf.try_into().unwrap();
        Ok(Value::Uuid(uuid::Uuid::from_bytes(bytes)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Uuid(v) => {
                w.write_uuid(v);
                Ok(())
            }
            other => Err(mismatch("uuid", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "uuid"
    }
}

/// JSON travels as a one-byte format version followed by UTF-8 text.
#[derive(Debug)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let mut r = PacketReader::new(buf);
        let version = r.read_u8()?;
        if version != Json::FORMAT_VERSION {
            return Err(PeridotError::DecodeError(format!(
                "unsupported json format version {version}"
            )));
        }
        let text = std::str::from_utf8(r.read_remaining())?.to_string();
        Ok(Value::Json(Json::new_unchecked(text)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Json(v) => {
                w.write_u8(Json::FORMAT_VERSION);
                w.write_raw(v.as_bytes());
                Ok(())
            }
            other => Err(mismatch("json", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "json"
    }
}

#[derive(Debug)]
pub struct DatetimeCodec;

impl Codec for DatetimeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("datetime", buf, 8)?;
        let micros = i64::from_be_bytes(buf.try_into().unwrap());
        Ok(Value::Datetime(Datetime::from_micros(micros)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Datetime(v) => {
                w.write_i64(v.micros());
                Ok(())
            }
            other => Err(mismatch("datetime", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "datetime"
    }
}

#[derive(Debug)]
pub struct LocalDatetimeCodec;

impl Codec for LocalDatetimeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("local_datetime", buf, 8)?;
        let micros = i64::from_be_bytes(buf.try_into().unwrap());
        Ok(Value::LocalDatetime(LocalDatetime::from_micros(micros)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::LocalDatetime(v) => {
                w.write_i64(v.micros());
                Ok(())
            }
            other => Err(mismatch("local_datetime", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "local_datetime"
    }
}

#[derive(Debug)]
pub struct LocalDateCodec;

impl Codec for LocalDateCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("local_date", buf, 4)?;
        let days = i32::from_be_bytes(buf.try_into().unwrap());
        Ok(Value::LocalDate(LocalDate::from_days(days)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::LocalDate(v) => {
                w.write_i32(v.days());
                Ok(())
            }
            other => Err(mismatch("local_date", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "local_date"
    }
}

#[derive(Debug)]
pub struct LocalTimeCodec;

impl Codec for LocalTimeCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("local_time", buf, 8)?;
        let micros = i64::from_be_bytes(buf.try_into().unwrap());
        if !(0..86_400 * 1_000_000).contains(&micros) {
            return Err(PeridotError::DecodeError(format!(
                "local_time {micros}us is outside a day"
            )));
        }
        Ok(Value::LocalTime(LocalTime::from_micros(micros)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::LocalTime(v) => {
                w.write_i64(v.micros());
                Ok(())
            }
            other => Err(mismatch("local_time", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "local_time"
    }
}

/// Exact duration: microseconds plus days/months fields that must be zero.
#[derive(Debug)]
pub struct DurationCodec;

impl Codec for DurationCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("duration", buf, 16)?;
        let mut r = PacketReader::new(buf);
        let micros = r.read_i64()?;
        let days = r.read_i32()?;
        let months = r.read_i32()?;
        if days != 0 || months != 0 {
            return Err(PeridotError::DecodeError(
                "duration with non-zero days or months".to_string(),
            ));
        }
        Ok(Value::Duration(Duration::from_micros(micros)))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Duration(v) => {
                w.write_i64(v.micros());
                w.write_i32(0);
                w.write_i32(0);
                Ok(())
            }
            other => Err(mismatch("duration", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "duration"
    }
}

#[derive(Debug)]
pub struct RelativeDurationCodec;

impl Codec for RelativeDurationCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("relative_duration", buf, 16)?;
        let mut r = PacketReader::new(buf);
        Ok(Value::RelativeDuration(RelativeDuration {
            micros: r.read_i64()?,
            days: r.read_i32()?,
            months: r.read_i32()?,
        }))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::RelativeDuration(v) => {
                w.write_i64(v.micros);
                w.write_i32(v.days);
                w.write_i32(v.months);
                Ok(())
            }
            other => Err(mismatch("relative_duration", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "relative_duration"
    }
}

#[derive(Debug)]
pub struct DateDurationCodec;

impl Codec for DateDurationCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("date_duration", buf, 16)?;
        let mut r = PacketReader::new(buf);
        let micros = r.read_i64()?;
        if micros != 0 {
            return Err(PeridotError::DecodeError(
                "date_duration with non-zero microseconds".to_string(),
            ));
        }
        Ok(Value::DateDuration(DateDuration {
            days: r.read_i32()?,
            months: r.read_i32()?,
        }))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::DateDuration(v) => {
                w.write_i64(0);
                w.write_i32(v.days);
                w.write_i32(v.months);
                Ok(())
            }
            other => Err(mismatch("date_duration", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "date_duration"
    }
}

/// Base-10000 digit groups: ndigits, weight, sign, dscale, then digits.
fn decode_numeric(codec: &'static str, buf: &[u8]) -> Result<(bool, i16, u16, Vec<u16>)> {
    let mut r = PacketReader::new(buf);
    let ndigits = r.read_u16()? as usize;
    let weight = r.read_i16()?;
    let sign = r.read_u16()?;
    let dscale = r.read_u16()?;
    let negative = match sign {
        0x0000 => false,
        0x4000 => true,
        other => {
            return Err(PeridotError::DecodeError(format!(
                "invalid {codec} sign 0x{other:04x}"
            )));
        }
    };
    let mut digits = Vec::with_capacity(ndigits);
    for _ in 0..ndigits {
        let digit = r.read_u16()?;
        if digit > 9999 {
            return Err(PeridotError::DecodeError(format!(
                "{codec} digit group {digit} out of range"
            )));
        }
        digits.push(digit);
    }
    r.expect_end(codec)?;
    Ok((negative, weight, dscale, digits))
}

fn encode_numeric(w: &mut PacketWriter, negative: bool, weight: i16, dscale: u16, digits: &[u16]) {
    w.write_u16(digits.len() as u16);
    w.write_i16(weight);
    w.write_u16(if negative { 0x4000 } else { 0x0000 });
    w.write_u16(dscale);
    for digit in digits {
        w.write_u16(*digit);
    }
}

#[derive(Debug)]
pub struct BigIntCodec;

impl Codec for BigIntCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let (negative, weight, dscale, digits) = decode_numeric("bigint", buf)?;
        if dscale != 0 {
            return Err(PeridotError::DecodeError(
                "bigint with non-zero decimal scale".to_string(),
            ));
        }
        Ok(Value::BigInt(BigInt {
            negative,
            weight,
            digits,
        }))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::BigInt(v) => {
                encode_numeric(w, v.negative, v.weight, 0, &v.digits);
                Ok(())
            }
            other => Err(mismatch("bigint", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "bigint"
    }
}

#[derive(Debug)]
pub struct DecimalCodec;

impl Codec for DecimalCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        let (negative, weight, dscale, digits) = decode_numeric("decimal", buf)?;
        Ok(Value::Decimal(Decimal {
            negative,
            weight,
            decimal_digits: dscale,
            digits,
        }))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::Decimal(v) => {
                encode_numeric(w, v.negative, v.weight, v.decimal_digits, &v.digits);
                Ok(())
            }
            other => Err(mismatch("decimal", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "decimal"
    }
}

#[derive(Debug)]
pub struct ConfigMemoryCodec;

impl Codec for ConfigMemoryCodec {
    fn decode(&self, buf: &[u8]) -> Result<Value> {
        check_len("config_memory", buf, 8)?;
        Ok(Value::ConfigMemory(ConfigMemory(i64::from_be_bytes(
            buf.try_into().unwrap(),
        ))))
    }

    fn encode(&self, w: &mut PacketWriter, value: &Value) -> Result<()> {
        match value {
            Value::ConfigMemory(v) => {
                w.write_i64(v.bytes());
                Ok(())
            }
            other => Err(mismatch("config_memory", other)),
        }
    }

    fn kind(&self) -> &'static str {
        "config_memory"
    }
}
