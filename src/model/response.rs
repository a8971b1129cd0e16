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

//! QuestionnaireResponse tree

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::answer::Answer;
use super::questionnaire::{Questionnaire, QuestionnaireItem};

/// One node of the response tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponseItem {
    /// Pointer to the specific item from the Questionnaire
    pub link_id: String,
    /// ElementDefinition this item maps to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    /// Name for group or question text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// The response(s) to the question
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Vec<Answer>>,
    /// Nested items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireResponseItem>>,
}

impl QuestionnaireResponseItem {
    /// Create an item with no answers
    pub fn new(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            definition: None,
            text: None,
            answer: None,
            item: None,
        }
    }

    /// Create an empty response item mirroring a definition item
    pub fn from_definition(item: &QuestionnaireItem) -> Self {
        Self {
            link_id: item.link_id.clone(),
            definition: item.definition.clone(),
            text: item.text.clone(),
            answer: None,
            item: None,
        }
    }

    /// Replace the answers
    pub fn with_answers(mut self, answers: Vec<Answer>) -> Self {
        self.answer = Some(answers);
        self
    }

    /// Replace the child items
    pub fn with_items(mut self, items: Vec<QuestionnaireResponseItem>) -> Self {
        self.item = Some(items);
        self
    }

    /// Answers, empty if none
    pub fn answers(&self) -> &[Answer] {
        self.answer.as_deref().unwrap_or_default()
    }

    /// Child items, empty if none
    pub fn children(&self) -> &[QuestionnaireResponseItem] {
        self.item.as_deref().unwrap_or_default()
    }

    /// True if the item carries at least one answer or child item
    pub fn has_content(&self) -> bool {
        !self.answers().is_empty() || !self.children().is_empty()
    }

    /// Depth-first walk over this item, its children and items nested under answers
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a QuestionnaireResponseItem)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
        for answer in self.answers() {
            for nested in answer.item.iter().flatten() {
                nested.walk(visit);
            }
        }
    }
}

fn default_response_type() -> String {
    "QuestionnaireResponse".to_string()
}

fn default_status() -> String {
    "in-progress".to_string()
}

/// A completed or in-progress set of answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    /// Always `QuestionnaireResponse`
    #[serde(default = "default_response_type")]
    pub resource_type: String,
    /// Logical id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Canonical of the questionnaire being answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,
    /// `in-progress | completed | amended | entered-in-error | stopped`
    #[serde(default = "default_status")]
    pub status: String,
    /// Top-level items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<QuestionnaireResponseItem>>,
    /// Elements the engine does not interpret (subject, authored, ...)
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Default for QuestionnaireResponse {
    fn default() -> Self {
        Self {
            resource_type: default_response_type(),
            id: None,
            questionnaire: None,
            status: default_status(),
            item: None,
            other: Map::new(),
        }
    }
}

impl QuestionnaireResponse {
    /// Empty in-progress response for a questionnaire
    pub fn for_questionnaire(questionnaire: &Questionnaire) -> Self {
        Self {
            questionnaire: questionnaire.canonical(),
            ..Default::default()
        }
    }

    /// Top-level items, empty if none
    pub fn items(&self) -> &[QuestionnaireResponseItem] {
        self.item.as_deref().unwrap_or_default()
    }

    /// Depth-first walk over every item
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a QuestionnaireResponseItem)) {
        for item in self.items() {
            item.walk(visit);
        }
    }

    /// Answers of every item with `link_id`, concatenated in document order
    ///
    /// Repeat groups produce several items sharing one linkId; their answers are merged.
    pub fn answers_for(&self, link_id: &str) -> Vec<Answer> {
        let mut answers = Vec::new();
        self.walk(&mut |item| {
            if item.link_id == link_id {
                answers.extend(item.answers().iter().cloned());
            }
        });
        answers
    }

    /// First item with `link_id` anywhere in the tree
    pub fn find_item(&self, link_id: &str) -> Option<&QuestionnaireResponseItem> {
        let mut found = None;
        self.walk(&mut |item| {
            if found.is_none() && item.link_id == link_id {
                found = Some(item);
            }
        });
        found
    }

    /// JSON form used as the expression evaluation input
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Anything that owns an ordered list of response items: the response itself or a group item
pub trait ItemContainer {
    /// The child item list
    fn items_mut(&mut self) -> &mut Option<Vec<QuestionnaireResponseItem>>;
}

impl ItemContainer for QuestionnaireResponse {
    fn items_mut(&mut self) -> &mut Option<Vec<QuestionnaireResponseItem>> {
        &mut self.item
    }
}

impl ItemContainer for QuestionnaireResponseItem {
    fn items_mut(&mut self) -> &mut Option<Vec<QuestionnaireResponseItem>> {
        &mut self.item
    }
}
