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

//! FHIR extensions and the SDC extension vocabulary understood by the engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::answer::Coding;

/// Canonical URLs of the extensions the engine interprets
pub mod extension_urls {
    /// SDC calculated expression
    pub const CALCULATED_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-calculatedExpression";
    /// SDC enable-when expression
    pub const ENABLE_WHEN_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-enableWhenExpression";
    /// SDC answer expression
    pub const ANSWER_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-answerExpression";
    /// SDC launch context
    pub const LAUNCH_CONTEXT: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-launchContext";
    /// Human-readable format hint for free-text entry
    pub const ENTRY_FORMAT: &str = "http://hl7.org/fhir/StructureDefinition/entryFormat";
    /// Named expression variable
    pub const VARIABLE: &str = "http://hl7.org/fhir/StructureDefinition/variable";
    /// Item is never shown
    pub const HIDDEN: &str = "http://hl7.org/fhir/StructureDefinition/questionnaire-hidden";
    /// Preferred widget
    pub const ITEM_CONTROL: &str = "http://hl7.org/fhir/StructureDefinition/questionnaire-itemControl";
    /// Horizontal or vertical choice layout
    pub const CHOICE_ORIENTATION: &str =
        "http://hl7.org/fhir/StructureDefinition/questionnaire-choiceOrientation";
    /// Input regex constraint
    pub const REGEX: &str = "http://hl7.org/fhir/StructureDefinition/regex";
}

/// Expression language identifiers
pub const FHIRPATH_LANGUAGE: &str = "text/fhirpath";
/// x-fhir-query language identifier
pub const X_FHIR_QUERY_LANGUAGE: &str = "application/x-fhir-query";

/// An `Expression` datatype value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirExpression {
    /// Short name assigned to the expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expression language media type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Expression text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Natural language description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FhirExpression {
    /// Build a FHIRPath expression
    pub fn fhirpath(expression: impl Into<String>) -> Self {
        Self {
            language: Some(FHIRPATH_LANGUAGE.to_string()),
            expression: Some(expression.into()),
            ..Default::default()
        }
    }

    /// Attach a variable name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// True if the language is FHIRPath (a missing language defaults to FHIRPath)
    pub fn is_fhirpath(&self) -> bool {
        self.language.as_deref().is_none_or(|l| l == FHIRPATH_LANGUAGE)
    }

    /// True if the language is x-fhir-query
    pub fn is_x_fhir_query(&self) -> bool {
        self.language.as_deref() == Some(X_FHIR_QUERY_LANGUAGE)
    }
}

/// A FHIR extension with its `value[x]` kept as raw JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    /// Identifies the meaning of the extension
    pub url: String,
    /// Nested extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,
    /// The `value[x]` member and anything else present
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Extension {
    /// Create an extension with a single `value[x]`
    pub fn with_value(url: impl Into<String>, key: &str, value: Value) -> Self {
        let mut rest = Map::new();
        rest.insert(key.to_string(), value);
        Self {
            url: url.into(),
            extension: None,
            rest,
        }
    }

    /// `valueBoolean`
    pub fn value_boolean(&self) -> Option<bool> {
        self.rest.get("valueBoolean").and_then(Value::as_bool)
    }

    /// `valueCode`
    pub fn value_code(&self) -> Option<&str> {
        self.rest.get("valueCode").and_then(Value::as_str)
    }

    /// `valueString`
    pub fn value_string(&self) -> Option<&str> {
        self.rest.get("valueString").and_then(Value::as_str)
    }

    /// `valueId`
    pub fn value_id(&self) -> Option<&str> {
        self.rest.get("valueId").and_then(Value::as_str)
    }

    /// `valueCoding`
    pub fn value_coding(&self) -> Option<Coding> {
        self.rest
            .get("valueCoding")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Codes of a `valueCodeableConcept`
    pub fn value_codeable_concept_codes(&self) -> Vec<&str> {
        self.rest
            .get("valueCodeableConcept")
            .and_then(|cc| cc.get("coding"))
            .and_then(Value::as_array)
            .map(|codings| {
                codings
                    .iter()
                    .filter_map(|c| c.get("code").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `valueExpression`, `None` if absent or not an Expression
    pub fn value_expression(&self) -> Option<FhirExpression> {
        self.rest
            .get("valueExpression")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// First nested extension with the given url
    pub fn sub_extension(&self, url: &str) -> Option<&Extension> {
        self.extension.as_ref()?.iter().find(|e| e.url == url)
    }
}

/// Find all extensions with the given url in an optional extension list
pub fn find_extensions<'a>(
    extensions: &'a Option<Vec<Extension>>,
    url: &'a str,
) -> impl Iterator<Item = &'a Extension> + 'a {
    extensions.iter().flatten().filter(move |e| e.url == url)
}
