// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Values produced by expressions

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::model::{AnswerValue, Quantity};

/// A single item of an expression result
///
/// All expression results are collections; a `Vec<FhirPathValue>` is the collection
/// and this enum is one of its elements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FhirPathValue {
    /// Boolean value
    Boolean(bool),
    /// Integer value (64-bit signed)
    Integer(i64),
    /// Decimal value with arbitrary precision
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    Decimal(Decimal),
    /// String value
    String(String),
    /// Date value (full precision)
    Date(NaiveDate),
    /// DateTime value with timezone
    DateTime(DateTime<FixedOffset>),
    /// Time value
    Time(NaiveTime),
    /// Quantity value
    Quantity(Quantity),
    /// FHIR complex value or resource kept as JSON
    Resource(Value),
}

impl FhirPathValue {
    /// FHIRPath type name
    pub fn type_name(&self) -> &'static str {
        match self {
            FhirPathValue::Boolean(_) => "Boolean",
            FhirPathValue::Integer(_) => "Integer",
            FhirPathValue::Decimal(_) => "Decimal",
            FhirPathValue::String(_) => "String",
            FhirPathValue::Date(_) => "Date",
            FhirPathValue::DateTime(_) => "DateTime",
            FhirPathValue::Time(_) => "Time",
            FhirPathValue::Quantity(_) => "Quantity",
            FhirPathValue::Resource(_) => "Resource",
        }
    }

    /// Convert a JSON value into a collection, flattening arrays
    pub fn from_json(value: &Value) -> Vec<FhirPathValue> {
        Self::from_json_typed(value, None)
    }

    /// Convert a JSON value whose FHIR type is known from a choice suffix (`valueDate` -> `Date`)
    pub fn from_json_typed(value: &Value, type_hint: Option<&str>) -> Vec<FhirPathValue> {
        match value {
            Value::Null => Vec::new(),
            Value::Array(values) => values
                .iter()
                .flat_map(|v| Self::from_json_typed(v, type_hint))
                .collect(),
            Value::Bool(b) => vec![FhirPathValue::Boolean(*b)],
            Value::Number(n) => {
                let as_decimal = || {
                    Decimal::from_str(&n.to_string())
                        .ok()
                        .or_else(|| n.as_f64().and_then(Decimal::from_f64))
                };
                match (n.as_i64(), type_hint) {
                    (Some(i), hint) if hint != Some("Decimal") => vec![FhirPathValue::Integer(i)],
                    _ => as_decimal().map(FhirPathValue::Decimal).into_iter().collect(),
                }
            }
            Value::String(s) => vec![Self::parse_primitive_string(s, type_hint)],
            Value::Object(_) => match type_hint {
                Some("Quantity") => serde_json::from_value::<Quantity>(value.clone())
                    .map(FhirPathValue::Quantity)
                    .unwrap_or_else(|_| FhirPathValue::Resource(value.clone()))
                    .into_vec(),
                _ => vec![FhirPathValue::Resource(value.clone())],
            },
        }
    }

    fn parse_primitive_string(s: &str, type_hint: Option<&str>) -> FhirPathValue {
        let parsed = match type_hint {
            Some("Date") => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(FhirPathValue::Date),
            Some("DateTime") => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(FhirPathValue::DateTime)
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .map(FhirPathValue::Date)
                }),
            Some("Time") => NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .ok()
                .map(FhirPathValue::Time),
            Some("Decimal") => Decimal::from_str(s).ok().map(FhirPathValue::Decimal),
            _ => None,
        };
        parsed.unwrap_or_else(|| FhirPathValue::String(s.to_string()))
    }

    fn into_vec(self) -> Vec<FhirPathValue> {
        vec![self]
    }

    /// Convert an answer value
    pub fn from_answer(value: &AnswerValue) -> FhirPathValue {
        match value {
            AnswerValue::Boolean(b) => FhirPathValue::Boolean(*b),
            AnswerValue::Decimal(d) => FhirPathValue::Decimal(*d),
            AnswerValue::Integer(i) => FhirPathValue::Integer(*i),
            AnswerValue::Date(s) => Self::parse_primitive_string(s, Some("Date")),
            AnswerValue::DateTime(s) => Self::parse_primitive_string(s, Some("DateTime")),
            AnswerValue::Time(s) => Self::parse_primitive_string(s, Some("Time")),
            AnswerValue::String(s) | AnswerValue::Uri(s) => FhirPathValue::String(s.clone()),
            AnswerValue::Quantity(q) => FhirPathValue::Quantity(q.clone()),
            AnswerValue::Coding(c) => {
                FhirPathValue::Resource(serde_json::to_value(c).unwrap_or(Value::Null))
            }
            AnswerValue::Reference(r) => {
                FhirPathValue::Resource(serde_json::to_value(r).unwrap_or(Value::Null))
            }
            AnswerValue::Attachment(a) => FhirPathValue::Resource(a.clone()),
        }
    }

    /// JSON form of the value
    pub fn to_json(&self) -> Value {
        match self {
            FhirPathValue::Boolean(b) => Value::Bool(*b),
            FhirPathValue::Integer(i) => Value::from(*i),
            FhirPathValue::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FhirPathValue::String(s) => Value::String(s.clone()),
            FhirPathValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FhirPathValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FhirPathValue::Time(t) => Value::String(t.format("%H:%M:%S").to_string()),
            FhirPathValue::Quantity(q) => serde_json::to_value(q).unwrap_or(Value::Null),
            FhirPathValue::Resource(v) => v.clone(),
        }
    }

    /// Numeric value as a decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FhirPathValue::Integer(i) => Some(Decimal::from(*i)),
            FhirPathValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FhirPathValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FhirPathValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FhirPathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FhirPathValue::Boolean(b) => write!(f, "{b}"),
            FhirPathValue::Integer(i) => write!(f, "{i}"),
            FhirPathValue::Decimal(d) => write!(f, "{}", d.normalize()),
            FhirPathValue::String(s) => write!(f, "{s}"),
            FhirPathValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FhirPathValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            FhirPathValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            FhirPathValue::Quantity(q) => match (&q.value, &q.unit) {
                (Some(v), Some(u)) => write!(f, "{} '{u}'", v.normalize()),
                (Some(v), None) => write!(f, "{}", v.normalize()),
                _ => Ok(()),
            },
            FhirPathValue::Resource(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_integer_and_decimal_apart() {
        assert_eq!(
            FhirPathValue::from_json(&json!(70)),
            vec![FhirPathValue::Integer(70)]
        );
        assert_eq!(
            FhirPathValue::from_json(&json!(1.75)),
            vec![FhirPathValue::Decimal(Decimal::from_str("1.75").unwrap())]
        );
        assert_eq!(
            FhirPathValue::from_json_typed(&json!(2), Some("Decimal")),
            vec![FhirPathValue::Decimal(Decimal::from(2))]
        );
    }

    #[test]
    fn typed_strings_parse_temporal_values() {
        let values = FhirPathValue::from_json_typed(&json!("2024-02-29"), Some("Date"));
        assert!(matches!(values[0], FhirPathValue::Date(_)));
        let partial = FhirPathValue::from_json_typed(&json!("2024-02"), Some("Date"));
        assert_eq!(partial, vec![FhirPathValue::String("2024-02".into())]);
    }

    #[test]
    fn arrays_flatten_and_null_is_empty() {
        assert_eq!(FhirPathValue::from_json(&json!([1, [2], null])).len(), 2);
        assert!(FhirPathValue::from_json(&Value::Null).is_empty());
    }
}
