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

//! Answer values as a tagged sum type
//!
//! FHIR encodes `value[x]` as one of several mutually exclusive keys
//! (`valueCoding`, `valueString`, ...). [`AnswerValue`] is an externally tagged enum
//! whose tag is exactly that key, so at most one variant can ever be populated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::response::QuestionnaireResponseItem;

/// A reference to a code defined by a terminology system
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    /// Identity of the terminology system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Version of the system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Symbol in syntax defined by the system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Representation defined by the system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Whether this coding was chosen directly by the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_selected: Option<bool>,
}

impl Coding {
    /// Create a coding from a system and code
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    /// Attach a display text
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// FHIR value equality for codings: codes must match, systems must match when both are present
    pub fn matches(&self, other: &Coding) -> bool {
        if self.code != other.code {
            return false;
        }
        match (&self.system, &other.system) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// A measured amount
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    /// Numerical value
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Decimal>,
    /// `<`, `<=`, `>=` or `>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparator: Option<String>,
    /// Unit representation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// System that defines the coded unit form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Coded form of the unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// A reference from one resource to another
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Literal reference, relative, internal or absolute URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Text alternative for the resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// The `value[x]` of an answer, answer option or initial value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnswerValue {
    /// `valueBoolean`
    #[serde(rename = "valueBoolean")]
    Boolean(bool),
    /// `valueDecimal`
    #[serde(rename = "valueDecimal", with = "rust_decimal::serde::float")]
    Decimal(Decimal),
    /// `valueInteger`
    #[serde(rename = "valueInteger")]
    Integer(i64),
    /// `valueDate`, kept as the FHIR string so partial dates survive
    #[serde(rename = "valueDate")]
    Date(String),
    /// `valueDateTime`
    #[serde(rename = "valueDateTime")]
    DateTime(String),
    /// `valueTime`
    #[serde(rename = "valueTime")]
    Time(String),
    /// `valueString`
    #[serde(rename = "valueString")]
    String(String),
    /// `valueUri`
    #[serde(rename = "valueUri")]
    Uri(String),
    /// `valueCoding`
    #[serde(rename = "valueCoding")]
    Coding(Coding),
    /// `valueQuantity`
    #[serde(rename = "valueQuantity")]
    Quantity(Quantity),
    /// `valueReference`
    #[serde(rename = "valueReference")]
    Reference(Reference),
    /// `valueAttachment`
    #[serde(rename = "valueAttachment")]
    Attachment(Value),
}

impl AnswerValue {
    /// FHIR type suffix of the variant (`Coding`, `String`, ...)
    pub fn type_name(&self) -> &'static str {
        match self {
            AnswerValue::Boolean(_) => "Boolean",
            AnswerValue::Decimal(_) => "Decimal",
            AnswerValue::Integer(_) => "Integer",
            AnswerValue::Date(_) => "Date",
            AnswerValue::DateTime(_) => "DateTime",
            AnswerValue::Time(_) => "Time",
            AnswerValue::String(_) => "String",
            AnswerValue::Uri(_) => "Uri",
            AnswerValue::Coding(_) => "Coding",
            AnswerValue::Quantity(_) => "Quantity",
            AnswerValue::Reference(_) => "Reference",
            AnswerValue::Attachment(_) => "Attachment",
        }
    }

    /// Decode a `value[x]`/`answer[x]` style key and its JSON value
    ///
    /// `prefix` is the element name preceding the type suffix, e.g. `answer` for
    /// `enableWhen.answerCoding`.
    pub fn from_prefixed(prefix: &str, key: &str, value: &Value) -> Option<Self> {
        let suffix = key.strip_prefix(prefix)?;
        let mut tagged = serde_json::Map::new();
        tagged.insert(format!("value{suffix}"), value.clone());
        serde_json::from_value(Value::Object(tagged)).ok()
    }

    /// String form used when matching raw widget input against options
    pub fn as_match_string(&self) -> Option<String> {
        match self {
            AnswerValue::Coding(coding) => coding.code.clone(),
            AnswerValue::String(s) | AnswerValue::Uri(s) => Some(s.clone()),
            AnswerValue::Integer(i) => Some(i.to_string()),
            AnswerValue::Decimal(d) => Some(d.normalize().to_string()),
            AnswerValue::Date(s) | AnswerValue::DateTime(s) | AnswerValue::Time(s) => {
                Some(s.clone())
            }
            AnswerValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Coding(coding) => write!(
                f,
                "{}",
                coding
                    .display
                    .as_deref()
                    .or(coding.code.as_deref())
                    .unwrap_or_default()
            ),
            AnswerValue::Quantity(q) => match (&q.value, &q.unit) {
                (Some(v), Some(u)) => write!(f, "{v} {u}"),
                (Some(v), None) => write!(f, "{v}"),
                _ => Ok(()),
            },
            AnswerValue::Reference(r) => {
                write!(f, "{}", r.display.as_deref().or(r.reference.as_deref()).unwrap_or_default())
            }
            AnswerValue::Attachment(a) => write!(f, "{a}"),
            other => write!(f, "{}", other.as_match_string().unwrap_or_default()),
        }
    }
}

/// One answer of a `QuestionnaireResponse.item`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// The answer value
    #[serde(flatten)]
    pub value: AnswerValue,
    /// Child items nested under this answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireResponseItem>>,
}

impl Answer {
    /// Wrap a value with no nested items
    pub fn new(value: AnswerValue) -> Self {
        Self { value, item: None }
    }

    /// `valueString` answer
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(AnswerValue::String(value.into()))
    }

    /// `valueInteger` answer
    pub fn integer(value: i64) -> Self {
        Self::new(AnswerValue::Integer(value))
    }

    /// `valueDecimal` answer
    pub fn decimal(value: Decimal) -> Self {
        Self::new(AnswerValue::Decimal(value))
    }

    /// `valueBoolean` answer
    pub fn boolean(value: bool) -> Self {
        Self::new(AnswerValue::Boolean(value))
    }

    /// `valueCoding` answer
    pub fn coding(value: Coding) -> Self {
        Self::new(AnswerValue::Coding(value))
    }

    /// True for a `valueString` holding the empty string
    pub fn is_blank_string(&self) -> bool {
        matches!(&self.value, AnswerValue::String(s) if s.is_empty())
    }
}

impl From<AnswerValue> for Answer {
    fn from(value: AnswerValue) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn answer_uses_fhir_value_keys() {
        let answer = Answer::coding(Coding::new("http://loinc.org", "LA33-6").with_display("Yes"));
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(
            json,
            json!({"valueCoding": {"system": "http://loinc.org", "code": "LA33-6", "display": "Yes"}})
        );

        let parsed: Answer = serde_json::from_value(json!({"valueDecimal": 1.75})).unwrap();
        assert_eq!(parsed.value, AnswerValue::Decimal(Decimal::from_str("1.75").unwrap()));
    }

    #[test]
    fn answer_keeps_nested_items() {
        let parsed: Answer = serde_json::from_value(json!({
            "valueBoolean": true,
            "item": [{"linkId": "child", "answer": [{"valueString": "x"}]}]
        }))
        .unwrap();
        assert_eq!(parsed.value, AnswerValue::Boolean(true));
        assert_eq!(parsed.item.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn prefixed_enable_when_answers_decode() {
        let value = AnswerValue::from_prefixed("answer", "answerInteger", &json!(3));
        assert_eq!(value, Some(AnswerValue::Integer(3)));
        assert!(AnswerValue::from_prefixed("answer", "answerNonsense", &json!(3)).is_none());
    }

    #[test]
    fn coding_match_ignores_missing_system() {
        let a = Coding::new("http://snomed.info/sct", "123");
        let b = Coding {
            code: Some("123".into()),
            ..Default::default()
        };
        assert!(a.matches(&b));
        assert!(!a.matches(&Coding::new("http://loinc.org", "123")));
    }
}
