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

//! Questionnaire model builder
//!
//! Walks a questionnaire definition once and flattens every declarative rule into
//! linkId-keyed tables. Malformed rules are recorded as diagnostics and skipped; the
//! affected item then behaves as always enabled and not calculated.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::enable_when::EnableWhenOperator;
use super::tabs::{Tabs, extract_tabs};
use crate::error::QuestionnaireError;
use crate::fhirpath::{FhirPathContext, FhirPathValue};
use crate::model::{
    Answer, AnswerValue, EnableBehavior, Extension, FhirExpression, ItemType, Questionnaire,
    QuestionnaireItem, extension_urls,
};

/// Key under which questionnaire-level variables are stored
pub const QUESTIONNAIRE_LEVEL: &str = "QuestionnaireLevel";

/// One `enableWhen` condition, validated
#[derive(Debug, Clone, PartialEq)]
pub struct EnableWhenCondition {
    /// linkId of the trigger question
    pub question: String,
    /// Comparison operator
    pub operator: EnableWhenOperator,
    /// Expected answer
    pub answer: AnswerValue,
}

/// A condition together with the latest answers of its trigger question
#[derive(Debug, Clone, PartialEq)]
pub struct EnableWhenLink {
    /// The condition
    pub condition: EnableWhenCondition,
    /// Current answers of `condition.question`
    pub answers: Vec<Answer>,
}

/// Condition-list enable-when state of one item
#[derive(Debug, Clone, PartialEq)]
pub struct EnableWhenItem {
    /// Conditions in declaration order
    pub links: Vec<EnableWhenLink>,
    /// How conditions combine
    pub behavior: EnableBehavior,
    /// Whether the item is currently enabled
    pub is_enabled: bool,
}

/// Expression-style enable-when of one item
#[derive(Debug, Clone, PartialEq)]
pub struct EnableWhenExpression {
    /// FHIRPath predicate
    pub expression: String,
    /// Last evaluated result, `None` before the first evaluation
    pub is_enabled: Option<bool>,
}

/// Calculated expression of one item
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatedExpression {
    /// FHIRPath formula
    pub expression: String,
    /// Last evaluated value
    pub value: Option<FhirPathValue>,
}

impl CalculatedExpression {
    /// Unevaluated expression
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            value: None,
        }
    }
}

/// Answer expression of one item
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerExpression {
    /// FHIRPath producing the answer options
    pub expression: String,
}

/// An `x-fhir-query` variable, resolved outside the engine
#[derive(Debug, Clone, PartialEq)]
pub struct XFhirQueryVariable {
    /// Variable declaration
    pub value_expression: FhirExpression,
    /// Query result once fetched
    pub result: Option<Value>,
}

/// Variable tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    /// FHIRPath variables keyed by owning linkId (or [`QUESTIONNAIRE_LEVEL`])
    pub fhir_path_variables: IndexMap<String, Vec<FhirExpression>>,
    /// x-fhir-query variables keyed by variable name
    pub x_fhir_query_variables: IndexMap<String, XFhirQueryVariable>,
}

impl Variables {
    /// True when no variables are declared
    pub fn is_empty(&self) -> bool {
        self.fhir_path_variables.is_empty() && self.x_fhir_query_variables.is_empty()
    }
}

/// `sdc-questionnaire-launchContext` declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchContext {
    /// Variable name (`patient`, `user`, `encounter`, ...)
    pub name: String,
    /// Allowed resource types
    pub types: Vec<String>,
    /// Optional description
    pub description: Option<String>,
}

/// Flattened rule tables extracted from a questionnaire
#[derive(Debug, Clone, Default)]
pub struct QuestionnaireModel {
    /// Type of every item
    pub item_types: IndexMap<String, ItemType>,
    /// Tab structure
    pub tabs: Tabs,
    /// Declared variables
    pub variables: Variables,
    /// Launch contexts keyed by name
    pub launch_contexts: IndexMap<String, LaunchContext>,
    /// Condition-list enable-when items keyed by dependent linkId
    pub enable_when_items: IndexMap<String, EnableWhenItem>,
    /// Reverse index: trigger linkId to dependent linkIds
    pub enable_when_linked_questions: IndexMap<String, Vec<String>>,
    /// Expression-style enable-when keyed by linkId
    pub enable_when_expressions: IndexMap<String, EnableWhenExpression>,
    /// Calculated expressions keyed by linkId
    pub calculated_expressions: IndexMap<String, CalculatedExpression>,
    /// Answer expressions keyed by linkId
    pub answer_expressions: IndexMap<String, AnswerExpression>,
    /// `answerValueSet` of each item keyed by linkId
    pub value_set_urls: IndexMap<String, String>,
    /// Contained ValueSet resources keyed by local reference (`#id`)
    pub contained_value_sets: IndexMap<String, Value>,
    /// Initial FHIRPath context seeded from additional variables
    pub initial_context: FhirPathContext,
    /// Rules skipped while building
    pub diagnostics: Vec<QuestionnaireError>,
}

impl QuestionnaireModel {
    /// Build the rule tables for `questionnaire`
    ///
    /// `additional_variables` are bound into the initial FHIRPath context by name,
    /// typically launch context resources such as `patient`.
    pub fn build(
        questionnaire: &Questionnaire,
        additional_variables: &IndexMap<String, Value>,
    ) -> Self {
        let mut model = QuestionnaireModel {
            tabs: extract_tabs(questionnaire),
            ..Default::default()
        };

        model.read_questionnaire_extensions(questionnaire);
        questionnaire.walk(&mut |item| model.read_item(item));
        model.check_triggers();

        for contained in questionnaire.contained.iter().flatten() {
            let is_value_set =
                contained.get("resourceType").and_then(Value::as_str) == Some("ValueSet");
            if let (true, Some(id)) = (is_value_set, contained.get("id").and_then(Value::as_str)) {
                model.contained_value_sets.insert(format!("#{id}"), contained.clone());
            }
        }

        for (name, value) in additional_variables {
            model
                .initial_context
                .insert(name.clone(), FhirPathValue::from_json(value));
        }

        for diagnostic in &model.diagnostics {
            log::warn!("skipped questionnaire rule: {diagnostic}");
        }
        log::debug!(
            "built questionnaire model: {} items, {} enable-when items, {} enable-when expressions, {} calculated expressions",
            model.item_types.len(),
            model.enable_when_items.len(),
            model.enable_when_expressions.len(),
            model.calculated_expressions.len()
        );
        model
    }

    fn read_questionnaire_extensions(&mut self, questionnaire: &Questionnaire) {
        for extension in questionnaire.extension.iter().flatten() {
            match extension.url.as_str() {
                extension_urls::VARIABLE => self.read_variable(QUESTIONNAIRE_LEVEL, extension),
                extension_urls::LAUNCH_CONTEXT => match parse_launch_context(extension) {
                    Some(context) => {
                        self.launch_contexts.insert(context.name.clone(), context);
                    }
                    None => self.diagnostics.push(QuestionnaireError::rule_definition(
                        QUESTIONNAIRE_LEVEL,
                        "launchContext without a name",
                    )),
                },
                _ => {}
            }
        }
    }

    fn read_item(&mut self, item: &QuestionnaireItem) {
        let link_id = item.link_id.as_str();
        self.item_types.insert(link_id.to_string(), item.item_type);

        for extension in item.extensions(extension_urls::VARIABLE) {
            self.read_variable(link_id, extension);
        }

        if let Some(url) = &item.answer_value_set {
            self.value_set_urls.insert(link_id.to_string(), url.clone());
        }

        if let Some(expression) =
            self.fhirpath_extension(item, extension_urls::CALCULATED_EXPRESSION)
        {
            self.calculated_expressions
                .insert(link_id.to_string(), CalculatedExpression::new(expression));
        }

        if let Some(expression) = self.fhirpath_extension(item, extension_urls::ANSWER_EXPRESSION) {
            self.answer_expressions
                .insert(link_id.to_string(), AnswerExpression { expression });
        }

        let enable_when_expression =
            self.fhirpath_extension(item, extension_urls::ENABLE_WHEN_EXPRESSION);
        let conditions = item.enable_when.as_deref().unwrap_or_default();
        match (enable_when_expression, conditions.is_empty()) {
            (Some(expression), has_no_conditions) => {
                if !has_no_conditions {
                    self.diagnostics.push(QuestionnaireError::rule_definition(
                        link_id,
                        "both enableWhen and enableWhenExpression are present, using the expression",
                    ));
                }
                self.enable_when_expressions.insert(
                    link_id.to_string(),
                    EnableWhenExpression {
                        expression,
                        is_enabled: None,
                    },
                );
            }
            (None, false) => self.read_enable_when(item),
            (None, true) => {}
        }
    }

    fn read_enable_when(&mut self, item: &QuestionnaireItem) {
        let mut links = Vec::new();
        for enable_when in item.enable_when.iter().flatten() {
            let operator = match EnableWhenOperator::from_str(&enable_when.operator) {
                Ok(operator) => operator,
                Err(message) => {
                    self.diagnostics
                        .push(QuestionnaireError::rule_definition(&item.link_id, message));
                    return;
                }
            };
            let Some(answer) = enable_when.expected_answer() else {
                self.diagnostics.push(QuestionnaireError::rule_definition(
                    &item.link_id,
                    format!("enableWhen on '{}' has no valid answer[x]", enable_when.question),
                ));
                return;
            };
            if operator == EnableWhenOperator::Exists
                && !matches!(answer, AnswerValue::Boolean(_))
            {
                self.diagnostics.push(QuestionnaireError::rule_definition(
                    &item.link_id,
                    "'exists' requires answerBoolean",
                ));
                return;
            }
            links.push(EnableWhenLink {
                condition: EnableWhenCondition {
                    question: enable_when.question.clone(),
                    operator,
                    answer,
                },
                answers: Vec::new(),
            });
        }

        for link in &links {
            let dependents = self
                .enable_when_linked_questions
                .entry(link.condition.question.clone())
                .or_default();
            if !dependents.contains(&item.link_id) {
                dependents.push(item.link_id.clone());
            }
        }

        let mut enable_when_item = EnableWhenItem {
            links,
            behavior: item.enable_behavior.unwrap_or_default(),
            is_enabled: false,
        };
        enable_when_item.is_enabled = super::enable_when::is_satisfied(&enable_when_item);
        self.enable_when_items
            .insert(item.link_id.clone(), enable_when_item);
    }

    /// Drop condition-list rules whose trigger question does not exist
    fn check_triggers(&mut self) {
        let mut broken = Vec::new();
        for (link_id, item) in &self.enable_when_items {
            if let Some(link) = item
                .links
                .iter()
                .find(|link| !self.item_types.contains_key(&link.condition.question))
            {
                broken.push((link_id.clone(), link.condition.question.clone()));
            }
        }

        for (link_id, question) in broken {
            self.diagnostics.push(QuestionnaireError::rule_definition(
                &link_id,
                format!("enableWhen refers to unknown question '{question}'"),
            ));
            self.enable_when_items.shift_remove(&link_id);
            for dependents in self.enable_when_linked_questions.values_mut() {
                dependents.retain(|dependent| dependent != &link_id);
            }
        }
        self.enable_when_linked_questions
            .retain(|_, dependents| !dependents.is_empty());
    }

    fn read_variable(&mut self, owner: &str, extension: &Extension) {
        let Some(expression) = extension.value_expression() else {
            self.diagnostics.push(QuestionnaireError::rule_definition(
                owner,
                "variable extension without valueExpression",
            ));
            return;
        };
        let (Some(name), Some(_)) = (&expression.name, &expression.expression) else {
            self.diagnostics.push(QuestionnaireError::rule_definition(
                owner,
                "variable must have a name and an expression",
            ));
            return;
        };

        if expression.is_x_fhir_query() {
            self.variables.x_fhir_query_variables.insert(
                name.clone(),
                XFhirQueryVariable {
                    value_expression: expression,
                    result: None,
                },
            );
        } else if expression.is_fhirpath() {
            self.variables
                .fhir_path_variables
                .entry(owner.to_string())
                .or_default()
                .push(expression);
        } else {
            self.diagnostics.push(QuestionnaireError::rule_definition(
                owner,
                format!(
                    "unsupported variable language '{}'",
                    expression.language.as_deref().unwrap_or_default()
                ),
            ));
        }
    }

    /// FHIRPath text of the first extension with `url`, recording malformed ones
    fn fhirpath_extension(&mut self, item: &QuestionnaireItem, url: &str) -> Option<String> {
        let extension = item.extensions(url).next()?;
        match extension.value_expression() {
            Some(expression) if expression.is_fhirpath() && expression.expression.is_some() => {
                expression.expression
            }
            _ => {
                self.diagnostics.push(QuestionnaireError::rule_definition(
                    &item.link_id,
                    format!("{url} must carry a text/fhirpath valueExpression"),
                ));
                None
            }
        }
    }

    /// True when `link_id` triggers at least one condition-list rule
    pub fn is_trigger(&self, link_id: &str) -> bool {
        self.enable_when_linked_questions.contains_key(link_id)
    }
}

fn parse_launch_context(extension: &Extension) -> Option<LaunchContext> {
    let name_extension = extension.sub_extension("name")?;
    let name = name_extension
        .value_coding()
        .and_then(|coding| coding.code)
        .or_else(|| name_extension.value_id().map(str::to_string))?;
    let types = extension
        .extension
        .iter()
        .flatten()
        .filter(|e| e.url == "type")
        .filter_map(|e| e.value_code().map(str::to_string))
        .collect();
    let description = extension
        .sub_extension("description")
        .and_then(|e| e.value_string())
        .map(str::to_string);
    Some(LaunchContext {
        name,
        types,
        description,
    })
}
