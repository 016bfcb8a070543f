use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{SqlError, SqlResult};

/// Closed set of primitive column kinds. Nullability belongs to the column
/// declaration, never to the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Char(u32),
    Text(Option<u32>),
    Boolean,
    Date,
    Time,
    DateTime,
    Uuid,
    Binary,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::Float
                | ColumnType::Double
                | ColumnType::Decimal { .. }
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::BigInt)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Char(_) | ColumnType::Text(_))
    }

    /// Unbounded variable text, the type of most string function results.
    pub fn text() -> Self {
        ColumnType::Text(None)
    }

    /// Coerce a raw driver value into the canonical value for this tag.
    ///
    /// `Null` passes through untouched; callers decide what an absent value
    /// means. Anything that does not parse for the tag is a coercion error
    /// naming `column`.
    pub fn coerce(&self, column: &str, raw: &Value) -> SqlResult<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let fail = || SqlError::coercion(column, *self, raw.to_string());

        match self {
            ColumnType::Int => {
                let n = coerce_integer(raw).ok_or_else(fail)?;
                if i32::try_from(n).is_err() {
                    return Err(fail());
                }
                Ok(Value::Integer(n))
            }
            ColumnType::BigInt => coerce_integer(raw).map(Value::Integer).ok_or_else(fail),
            ColumnType::Float | ColumnType::Double => {
                coerce_real(raw).map(Value::Real).ok_or_else(fail)
            }
            ColumnType::Decimal { .. } => coerce_decimal(raw).map(Value::Decimal).ok_or_else(fail),
            ColumnType::Char(_) | ColumnType::Text(_) => match raw {
                Value::Text(s) => Ok(Value::Text(s.clone())),
                Value::Blob(b) => String::from_utf8(b.clone()).map(Value::Text).map_err(|_| fail()),
                other => Ok(Value::Text(other.to_string())),
            },
            ColumnType::Boolean => match raw {
                Value::Boolean(b) => Ok(Value::Boolean(*b)),
                Value::Integer(0) => Ok(Value::Boolean(false)),
                Value::Integer(1) => Ok(Value::Boolean(true)),
                Value::Text(s) if s == "0" => Ok(Value::Boolean(false)),
                Value::Text(s) if s == "1" => Ok(Value::Boolean(true)),
                _ => Err(fail()),
            },
            ColumnType::Date => match raw {
                Value::Date(d) => Ok(Value::Date(*d)),
                Value::DateTime(dt) => Ok(Value::Date(dt.date())),
                Value::Text(s) => parse_date(s).map(Value::Date).ok_or_else(fail),
                _ => Err(fail()),
            },
            ColumnType::Time => match raw {
                Value::Time(t) => Ok(Value::Time(*t)),
                Value::DateTime(dt) => Ok(Value::Time(dt.time())),
                Value::Text(s) => parse_time(s).map(Value::Time).ok_or_else(fail),
                _ => Err(fail()),
            },
            ColumnType::DateTime => match raw {
                Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
                Value::Date(d) => Ok(Value::DateTime(d.and_time(NaiveTime::MIN))),
                Value::Text(s) => parse_datetime(s).map(Value::DateTime).ok_or_else(fail),
                _ => Err(fail()),
            },
            ColumnType::Uuid => match raw {
                Value::Uuid(u) => Ok(Value::Uuid(*u)),
                Value::Text(s) => Uuid::parse_str(s.trim()).map(Value::Uuid).map_err(|_| fail()),
                Value::Blob(b) => Uuid::from_slice(b).map(Value::Uuid).map_err(|_| fail()),
                _ => Err(fail()),
            },
            ColumnType::Binary => match raw {
                Value::Blob(b) => Ok(Value::Blob(b.clone())),
                Value::Text(s) => {
                    let digits = s
                        .strip_prefix("0x")
                        .or_else(|| s.strip_prefix("\\x"))
                        .unwrap_or(s);
                    hex::decode(digits).map(Value::Blob).map_err(|_| fail())
                }
                _ => Err(fail()),
            },
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::BigInt => write!(f, "bigint"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({}, {})", precision, scale),
            ColumnType::Char(len) => write!(f, "char({})", len),
            ColumnType::Text(Some(len)) => write!(f, "text({})", len),
            ColumnType::Text(None) => write!(f, "text"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Time => write!(f, "time"),
            ColumnType::DateTime => write!(f, "datetime"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::Binary => write!(f, "binary"),
        }
    }
}

// Bounds of the reals that convert to i64 without saturating.
const I64_MIN_F64: f64 = -9_223_372_036_854_775_808.0;
const I64_MAX_F64: f64 = 9_223_372_036_854_775_808.0;

fn coerce_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Integer(i) => Some(*i),
        Value::Boolean(b) => Some(i64::from(*b)),
        Value::Real(r) if r.fract() == 0.0 && (I64_MIN_F64..I64_MAX_F64).contains(r) => Some(*r as i64),
        Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
        Value::Text(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_real(raw: &Value) -> Option<f64> {
    let real = match raw {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(r) => Some(*r),
        Value::Decimal(d) => d.to_f64(),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    // "NaN" and "inf" parse, but they are not numbers a column can hold.
    real.filter(|r| r.is_finite())
}

fn coerce_decimal(raw: &Value) -> Option<Decimal> {
    match raw {
        Value::Integer(i) => Some(Decimal::from(*i)),
        Value::Real(r) => Decimal::from_f64(*r),
        Value::Decimal(d) => Some(*d),
        Value::Text(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Core value type carried by literals, raw driver rows and reconstructed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.3f")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
            Value::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl Value {
    /// The natural column tag of a literal. `Null` reports nullable text.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::text(),
            Value::Integer(_) => ColumnType::BigInt,
            Value::Real(_) => ColumnType::Double,
            Value::Decimal(d) => ColumnType::Decimal {
                precision: 38,
                scale: d.scale().min(38) as u8,
            },
            Value::Text(_) => ColumnType::text(),
            Value::Blob(_) => ColumnType::Binary,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Date(_) => ColumnType::Date,
            Value::Time(_) => ColumnType::Time,
            Value::DateTime(_) => ColumnType::DateTime,
            Value::Uuid(_) => ColumnType::Uuid,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// JSON form used by record export.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Integer(i) => Json::from(*i),
            Value::Real(r) => Json::from(*r),
            Value::Boolean(b) => Json::from(*b),
            Value::Text(s) => Json::from(s.as_str()),
            other => Json::from(other.to_string()),
        }
    }
}

/// Hashable identity of a value. Equal numbers compare equal regardless of
/// sign of zero or decimal scale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Null,
    Integer(i64),
    Real(u64),
    Decimal(Decimal),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
}

impl From<&Value> for ValueKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ValueKey::Null,
            Value::Integer(i) => ValueKey::Integer(*i),
            Value::Real(r) if *r == 0.0 => ValueKey::Real(0.0f64.to_bits()),
            Value::Real(r) if r.is_nan() => ValueKey::Real(f64::NAN.to_bits()),
            Value::Real(r) => ValueKey::Real(r.to_bits()),
            Value::Decimal(d) => ValueKey::Decimal(d.normalize()),
            Value::Text(s) => ValueKey::Text(s.clone()),
            Value::Blob(b) => ValueKey::Blob(b.clone()),
            Value::Boolean(b) => ValueKey::Boolean(*b),
            Value::Date(d) => ValueKey::Date(*d),
            Value::Time(t) => ValueKey::Time(*t),
            Value::DateTime(dt) => ValueKey::DateTime(*dt),
            Value::Uuid(u) => ValueKey::Uuid(*u),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boolean_coercion() {
        for raw in [Value::Text("1".into()), Value::Integer(1), Value::Boolean(true)] {
            assert_eq!(ColumnType::Boolean.coerce("flag", &raw).unwrap(), Value::Boolean(true));
        }
        for raw in [Value::Text("0".into()), Value::Integer(0), Value::Boolean(false)] {
            assert_eq!(ColumnType::Boolean.coerce("flag", &raw).unwrap(), Value::Boolean(false));
        }
        assert!(ColumnType::Boolean.coerce("flag", &Value::Text("yes".into())).is_err());
        assert!(ColumnType::Boolean.coerce("flag", &Value::Integer(2)).is_err());
    }

    #[test]
    fn test_numeric_parse_failure_names_tag() {
        let err = ColumnType::Int.coerce("age", &Value::Text("abc".into())).unwrap_err();
        match err {
            SqlError::Coercion { column, expected, value } => {
                assert_eq!(column, "age");
                assert_eq!(expected, ColumnType::Int);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_int_range_is_enforced() {
        let big = Value::Integer(i64::from(i32::MAX) + 1);
        assert!(ColumnType::Int.coerce("n", &big).is_err());
        assert_eq!(ColumnType::BigInt.coerce("n", &big).unwrap(), big);
    }

    #[test]
    fn test_temporal_and_identifier_coercion() {
        let date = ColumnType::Date.coerce("d", &Value::Text("2024-02-29".into())).unwrap();
        assert_eq!(date, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));

        let dt = ColumnType::DateTime
            .coerce("d", &Value::Text("2024-02-29 13:45:00.250".into()))
            .unwrap();
        assert_eq!(dt.to_string(), "2024-02-29 13:45:00.250");

        let t = ColumnType::Time.coerce("t", &Value::Text("08:30:00".into())).unwrap();
        assert_eq!(t, Value::Time(NaiveTime::from_hms_opt(8, 30, 0).unwrap()));

        let id = Uuid::new_v4();
        assert_eq!(
            ColumnType::Uuid.coerce("id", &Value::Text(id.to_string())).unwrap(),
            Value::Uuid(id)
        );
        assert_eq!(
            ColumnType::Uuid.coerce("id", &Value::Blob(id.as_bytes().to_vec())).unwrap(),
            Value::Uuid(id)
        );

        let blob = ColumnType::Binary.coerce("b", &Value::Text("0xdeadbeef".into())).unwrap();
        assert_eq!(blob, Value::Blob(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_decimal_coercion() {
        let ty = ColumnType::Decimal { precision: 10, scale: 2 };
        assert_eq!(
            ty.coerce("price", &Value::Text("12.50".into())).unwrap(),
            Value::Decimal(Decimal::from_str("12.50").unwrap())
        );
        assert!(ty.coerce("price", &Value::Text("twelve".into())).is_err());
    }

    fn assert_coercion_error(ty: ColumnType, raw: Value, raw_text: &str) {
        match ty.coerce("field", &raw) {
            Err(SqlError::Coercion { column, expected, value }) => {
                assert_eq!(column, "field");
                assert_eq!(expected, ty);
                assert_eq!(value, raw_text);
            }
            other => panic!("{ty} accepted {raw:?}: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_text_is_rejected() {
        let decimal = ColumnType::Decimal { precision: 10, scale: 2 };
        for ty in [ColumnType::Int, ColumnType::BigInt, ColumnType::Double, decimal] {
            assert_coercion_error(ty, Value::Text("12abc".into()), "12abc");
        }
        for word in ["NaN", "inf", "infinity", "-Infinity"] {
            assert_coercion_error(ColumnType::Double, Value::Text(word.into()), word);
            assert_coercion_error(ColumnType::Float, Value::Text(word.into()), word);
        }
        assert_coercion_error(ColumnType::Double, Value::Real(f64::NAN), "NaN");
        assert_coercion_error(ColumnType::Float, Value::Real(f64::INFINITY), "inf");
    }

    #[test]
    fn test_out_of_range_real_is_rejected() {
        assert_coercion_error(ColumnType::BigInt, Value::Real(1e20), "100000000000000000000");
        assert_coercion_error(ColumnType::BigInt, Value::Real(-1e20), "-100000000000000000000");
        assert_coercion_error(ColumnType::BigInt, Value::Real(9_223_372_036_854_775_808.0), "9223372036854775808");
        assert_eq!(
            ColumnType::BigInt.coerce("n", &Value::Real(-9_223_372_036_854_775_808.0)).unwrap(),
            Value::Integer(i64::MIN)
        );
        assert_eq!(ColumnType::BigInt.coerce("n", &Value::Real(42.0)).unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_identifier_and_binary_failures() {
        assert_coercion_error(ColumnType::Uuid, Value::Text("not-a-uuid".into()), "not-a-uuid");
        assert_coercion_error(ColumnType::Uuid, Value::Blob(vec![1, 2, 3]), "0x010203");
        assert_coercion_error(ColumnType::Binary, Value::Text("0xabc".into()), "0xabc");
        assert_coercion_error(ColumnType::Binary, Value::Text("zz".into()), "zz");
    }

    #[test]
    fn test_value_key_normalizes_numbers() {
        assert_eq!(ValueKey::from(&Value::Real(-0.0)), ValueKey::from(&Value::Real(0.0)));
        assert_eq!(
            ValueKey::from(&Value::Decimal(Decimal::from_str("1.0").unwrap())),
            ValueKey::from(&Value::Decimal(Decimal::from_str("1.00").unwrap()))
        );
        assert_ne!(ValueKey::from(&Value::Integer(1)), ValueKey::from(&Value::Boolean(true)));
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(ColumnType::Uuid.coerce("x", &Value::Null).unwrap(), Value::Null);
    }

    proptest! {
        #[test]
        fn prop_integer_text_coerces_back(n in any::<i64>()) {
            let coerced = ColumnType::BigInt.coerce("n", &Value::Text(n.to_string())).unwrap();
            prop_assert_eq!(coerced, Value::Integer(n));
        }

        #[test]
        fn prop_non_numeric_text_never_coerces(s in "[a-zA-Z]{1,12}") {
            prop_assert!(ColumnType::Double.coerce("x", &Value::Text(s)).is_err());
        }
    }
}
