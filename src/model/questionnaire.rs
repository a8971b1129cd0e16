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

//! Questionnaire definition tree

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::answer::AnswerValue;
use super::extension::{Extension, extension_urls, find_extensions};

/// Item type codes (R4 plus the R5 additions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    /// Grouping of other items
    #[serde(rename = "group")]
    Group,
    /// Text for display only
    #[serde(rename = "display")]
    Display,
    /// R5 generic question
    #[serde(rename = "question")]
    Question,
    /// Yes/no answer
    #[serde(rename = "boolean")]
    Boolean,
    /// Real number
    #[serde(rename = "decimal")]
    Decimal,
    /// Integer
    #[serde(rename = "integer")]
    Integer,
    /// Date
    #[serde(rename = "date")]
    Date,
    /// Date and time
    #[serde(rename = "dateTime")]
    DateTime,
    /// Time of day
    #[serde(rename = "time")]
    Time,
    /// Short free text
    #[serde(rename = "string")]
    String,
    /// Long free text
    #[serde(rename = "text")]
    Text,
    /// URL
    #[serde(rename = "url")]
    Url,
    /// Coded choice from a fixed list
    #[serde(rename = "choice")]
    Choice,
    /// Coded choice allowing free text
    #[serde(rename = "open-choice")]
    OpenChoice,
    /// R5 coding
    #[serde(rename = "coding")]
    Coding,
    /// Attachment
    #[serde(rename = "attachment")]
    Attachment,
    /// Reference
    #[serde(rename = "reference")]
    Reference,
    /// Quantity
    #[serde(rename = "quantity")]
    Quantity,
}

impl ItemType {
    /// True for items that never carry answers themselves
    pub fn is_structural(self) -> bool {
        matches!(self, ItemType::Group | ItemType::Display)
    }
}

/// How multiple enable-when conditions combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnableBehavior {
    /// Every condition must hold
    All,
    /// At least one condition must hold
    #[default]
    Any,
}

/// Raw `enableWhen` element
///
/// The operator and `answer[x]` are kept untyped here; the model builder validates
/// them so that one malformed condition only disables rules on its own item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableWhen {
    /// linkId of the question that determines enablement
    pub question: String,
    /// Comparison operator code
    pub operator: String,
    /// `answer[x]` member
    #[serde(flatten)]
    pub answer: Map<String, Value>,
}

impl EnableWhen {
    /// Decode the `answer[x]` member into a typed value
    pub fn expected_answer(&self) -> Option<AnswerValue> {
        self.answer
            .iter()
            .find(|(key, _)| key.starts_with("answer"))
            .and_then(|(key, value)| AnswerValue::from_prefixed("answer", key, value))
    }
}

/// A permitted answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    /// The option value
    #[serde(flatten)]
    pub value: AnswerValue,
    /// Whether the option is selected by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_selected: Option<bool>,
}

impl From<AnswerValue> for AnswerOption {
    fn from(value: AnswerValue) -> Self {
        Self {
            value,
            initial_selected: None,
        }
    }
}

/// One node of the questionnaire definition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireItem {
    /// Unique id for the item within the questionnaire
    pub link_id: String,
    /// Item type
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Primary text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// ElementDefinition this item maps to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    /// Whether the item must be answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Whether the item may repeat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeats: Option<bool>,
    /// Whether the answer can be edited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    /// Maximum length of string answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Conditions controlling display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_when: Option<Vec<EnableWhen>>,
    /// `all | any`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_behavior: Option<EnableBehavior>,
    /// ValueSet of permitted answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_value_set: Option<String>,
    /// Permitted answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_option: Option<Vec<AnswerOption>>,
    /// Extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,
    /// Nested items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireItem>>,
    /// Elements the engine does not interpret
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl QuestionnaireItem {
    /// Create a bare item
    pub fn new(link_id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            link_id: link_id.into(),
            item_type,
            text: None,
            definition: None,
            required: None,
            repeats: None,
            read_only: None,
            max_length: None,
            enable_when: None,
            enable_behavior: None,
            answer_value_set: None,
            answer_option: None,
            extension: None,
            item: None,
            other: Map::new(),
        }
    }

    /// Child items, empty if none
    pub fn children(&self) -> &[QuestionnaireItem] {
        self.item.as_deref().unwrap_or_default()
    }

    /// True if the item may appear more than once in a response
    pub fn is_repeating(&self) -> bool {
        self.repeats.unwrap_or(false)
    }

    /// True for a group whose instances repeat
    pub fn is_repeat_group(&self) -> bool {
        self.item_type == ItemType::Group && self.is_repeating()
    }

    /// Extensions with the given url
    pub fn extensions<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Extension> + 'a {
        find_extensions(&self.extension, url)
    }

    /// Definition-level `questionnaire-hidden` flag
    pub fn is_hidden_by_definition(&self) -> bool {
        self.extensions(extension_urls::HIDDEN)
            .any(|e| e.value_boolean() == Some(true))
    }

    /// True if the item-control extension carries `code`
    pub fn has_item_control(&self, code: &str) -> bool {
        self.extensions(extension_urls::ITEM_CONTROL)
            .any(|e| e.value_codeable_concept_codes().contains(&code))
    }

    /// True if `link_id` is this item or one of its descendants
    pub fn contains_link_id(&self, link_id: &str) -> bool {
        self.link_id == link_id || self.children().iter().any(|c| c.contains_link_id(link_id))
    }

    /// Depth-first walk over this item and all descendants
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a QuestionnaireItem)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

fn default_questionnaire_type() -> String {
    "Questionnaire".to_string()
}

/// A structured set of questions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    /// Always `Questionnaire`
    #[serde(default = "default_questionnaire_type")]
    pub resource_type: String,
    /// Logical id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Canonical identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Business version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human friendly name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `draft | active | retired | unknown`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Contained resources, usually ValueSets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contained: Option<Vec<Value>>,
    /// Extensions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Extension>>,
    /// Top-level items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireItem>>,
    /// Elements the engine does not interpret
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Default for Questionnaire {
    fn default() -> Self {
        Self {
            resource_type: default_questionnaire_type(),
            id: None,
            url: None,
            version: None,
            title: None,
            status: Some("active".to_string()),
            contained: None,
            extension: None,
            item: None,
            other: Map::new(),
        }
    }
}

impl Questionnaire {
    /// Top-level items, empty if none
    pub fn items(&self) -> &[QuestionnaireItem] {
        self.item.as_deref().unwrap_or_default()
    }

    /// Depth-first walk over every item
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a QuestionnaireItem)) {
        for item in self.items() {
            item.walk(visit);
        }
    }

    /// Find an item anywhere in the tree
    pub fn find_item(&self, link_id: &str) -> Option<&QuestionnaireItem> {
        fn find<'a>(
            items: &'a [QuestionnaireItem],
            link_id: &str,
        ) -> Option<&'a QuestionnaireItem> {
            items.iter().find_map(|item| {
                if item.link_id == link_id {
                    Some(item)
                } else {
                    find(item.children(), link_id)
                }
            })
        }
        find(self.items(), link_id)
    }

    /// Canonical reference for `QuestionnaireResponse.questionnaire`
    pub fn canonical(&self) -> Option<String> {
        match (&self.url, &self.version) {
            (Some(url), Some(version)) => Some(format!("{url}|{version}")),
            (Some(url), None) => Some(url.clone()),
            _ => self.id.as_ref().map(|id| format!("Questionnaire/{id}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_item_tree_and_preserves_unknown_fields() {
        let questionnaire: Questionnaire = serde_json::from_value(json!({
            "resourceType": "Questionnaire",
            "url": "http://example.org/q",
            "item": [{
                "linkId": "g",
                "type": "group",
                "prefix": "1.",
                "item": [{"linkId": "q1", "type": "open-choice", "repeats": true}]
            }]
        }))
        .unwrap();

        let group = &questionnaire.items()[0];
        assert_eq!(group.other.get("prefix"), Some(&json!("1.")));
        let child = questionnaire.find_item("q1").unwrap();
        assert_eq!(child.item_type, ItemType::OpenChoice);
        assert!(child.is_repeating());
        assert!(!child.is_repeat_group());
        assert!(group.contains_link_id("q1"));
        assert_eq!(questionnaire.canonical().as_deref(), Some("http://example.org/q"));
    }

    #[test]
    fn enable_when_expected_answer() {
        let enable_when: EnableWhen = serde_json::from_value(json!({
            "question": "q1",
            "operator": "=",
            "answerCoding": {"system": "s", "code": "y"}
        }))
        .unwrap();
        assert!(matches!(enable_when.expected_answer(), Some(AnswerValue::Coding(_))));
    }
}
