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

//! Expression recalculation
//!
//! One pass per response mutation: variables are refreshed first so that the
//! shared context reflects the new answers, then every calculated expression and
//! enable-when expression is evaluated against it. Values are only replaced when
//! they actually change, which makes a repeated pass over an unchanged response a
//! no-op. Expressions reading other expressions' results see the previous pass;
//! longer chains settle over subsequent mutations.

use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use super::merge::{ItemChange, merge_item};
use super::model::{CalculatedExpression, EnableWhenExpression, QUESTIONNAIRE_LEVEL, Variables};
use crate::error::QuestionnaireError;
use crate::fhirpath::{ExpressionEvaluator, FhirPathContext, FhirPathValue};
use crate::model::{
    Answer, AnswerValue, Coding, ItemType, Quantity, Questionnaire, QuestionnaireResponse,
    QuestionnaireResponseItem, Reference,
};

/// Context key bound to the response being evaluated
pub const RESOURCE_VARIABLE: &str = "resource";

/// Inputs of a recalculation pass
#[derive(Debug, Clone, Copy)]
pub struct RecalculationInput<'a> {
    /// Response after the mutation
    pub response: &'a QuestionnaireResponse,
    /// Current enable-when expressions
    pub enable_when_expressions: &'a IndexMap<String, EnableWhenExpression>,
    /// Current calculated expressions
    pub calculated_expressions: &'a IndexMap<String, CalculatedExpression>,
    /// Declared variables
    pub variables: &'a Variables,
    /// Context from the previous pass
    pub context: &'a FhirPathContext,
}

/// Result of a recalculation pass
#[derive(Debug, Clone, PartialEq)]
pub struct RecalculationOutcome {
    /// True if any calculated value or enable-when result changed
    pub is_updated: bool,
    /// Enable-when expressions with refreshed results
    pub enable_when_expressions: IndexMap<String, EnableWhenExpression>,
    /// Calculated expressions with refreshed values
    pub calculated_expressions: IndexMap<String, CalculatedExpression>,
    /// Context with refreshed variables
    pub context: FhirPathContext,
}

/// Re-evaluate variables, calculated expressions and enable-when expressions
pub fn evaluate_updated_expressions(
    evaluator: &dyn ExpressionEvaluator,
    input: RecalculationInput<'_>,
) -> RecalculationOutcome {
    let response_json = input.response.to_json();
    let mut context = input.context.clone();
    refresh_variables(evaluator, &response_json, input.response, input.variables, &mut context);

    let mut enable_when_expressions = input.enable_when_expressions.clone();
    let enable_when_changed = evaluate_enable_when_expressions(
        evaluator,
        &response_json,
        &context,
        &mut enable_when_expressions,
    );

    let mut calculated_expressions = input.calculated_expressions.clone();
    let calculated_changed = evaluate_calculated_expressions(
        evaluator,
        &response_json,
        &context,
        &mut calculated_expressions,
    );

    log::debug!(
        "recalculated: {enable_when_changed} enable-when and {calculated_changed} calculated expressions changed"
    );

    RecalculationOutcome {
        is_updated: enable_when_changed + calculated_changed > 0,
        enable_when_expressions,
        calculated_expressions,
        context,
    }
}

/// Evaluate calculated expressions against a freshly populated response
///
/// Returns the evaluated expressions and the refreshed context.
pub fn evaluate_initial_calculated_expressions(
    evaluator: &dyn ExpressionEvaluator,
    response: &QuestionnaireResponse,
    calculated_expressions: &IndexMap<String, CalculatedExpression>,
    variables: &Variables,
    context: &FhirPathContext,
) -> (IndexMap<String, CalculatedExpression>, FhirPathContext) {
    let response_json = response.to_json();
    let mut context = context.clone();
    refresh_variables(evaluator, &response_json, response, variables, &mut context);

    let mut calculated = calculated_expressions.clone();
    evaluate_calculated_expressions(evaluator, &response_json, &context, &mut calculated);
    (calculated, context)
}

/// Evaluate enable-when expressions against a freshly populated response
///
/// `context` must already hold the variables of `response`, as returned by
/// [`evaluate_initial_calculated_expressions`].
pub fn evaluate_initial_enable_when_expressions(
    evaluator: &dyn ExpressionEvaluator,
    response: &QuestionnaireResponse,
    enable_when_expressions: &IndexMap<String, EnableWhenExpression>,
    context: &FhirPathContext,
) -> IndexMap<String, EnableWhenExpression> {
    let mut context = context.clone();
    let response_json = response.to_json();
    context.insert(
        RESOURCE_VARIABLE.to_string(),
        vec![FhirPathValue::Resource(response_json.clone())],
    );
    let mut expressions = enable_when_expressions.clone();
    evaluate_enable_when_expressions(evaluator, &response_json, &context, &mut expressions);
    expressions
}

/// Bind `%resource` and re-evaluate every FHIRPath variable in declaration order
///
/// Item-level variables take their owning response item as input. A failing
/// variable keeps its previous binding.
fn refresh_variables(
    evaluator: &dyn ExpressionEvaluator,
    response_json: &Value,
    response: &QuestionnaireResponse,
    variables: &Variables,
    context: &mut FhirPathContext,
) {
    context.insert(
        RESOURCE_VARIABLE.to_string(),
        vec![FhirPathValue::Resource(response_json.clone())],
    );

    for (owner, expressions) in &variables.fhir_path_variables {
        let item_json = (owner != QUESTIONNAIRE_LEVEL)
            .then(|| response.find_item(owner))
            .flatten()
            .and_then(|item| serde_json::to_value(item).ok());
        let input = item_json.as_ref().unwrap_or(response_json);

        for variable in expressions {
            let (Some(name), Some(expression)) = (&variable.name, &variable.expression) else {
                continue;
            };
            match evaluator.evaluate(expression, input, context) {
                Ok(value) => {
                    context.insert(name.clone(), value);
                }
                Err(error) => log::warn!(
                    "variable %{name} on '{owner}': {}",
                    QuestionnaireError::expression(expression, error)
                ),
            }
        }
    }
}

fn evaluate_enable_when_expressions(
    evaluator: &dyn ExpressionEvaluator,
    response_json: &Value,
    context: &FhirPathContext,
    expressions: &mut IndexMap<String, EnableWhenExpression>,
) -> usize {
    let mut changed = 0;
    for (link_id, entry) in expressions.iter_mut() {
        match evaluator.evaluate(&entry.expression, response_json, context) {
            Ok(result) => {
                let is_enabled = matches!(result.first(), Some(FhirPathValue::Boolean(true)));
                if entry.is_enabled != Some(is_enabled) {
                    log::trace!("enable-when expression of '{link_id}' now {is_enabled}");
                    entry.is_enabled = Some(is_enabled);
                    changed += 1;
                }
            }
            Err(error) => log::warn!(
                "enable-when expression of '{link_id}': {}",
                QuestionnaireError::expression(&entry.expression, error)
            ),
        }
    }
    changed
}

fn evaluate_calculated_expressions(
    evaluator: &dyn ExpressionEvaluator,
    response_json: &Value,
    context: &FhirPathContext,
    expressions: &mut IndexMap<String, CalculatedExpression>,
) -> usize {
    let mut changed = 0;
    for (link_id, entry) in expressions.iter_mut() {
        match evaluator.evaluate(&entry.expression, response_json, context) {
            Ok(result) => {
                let value = result.into_iter().next();
                if entry.value != value {
                    log::trace!("calculated expression of '{link_id}' now {value:?}");
                    entry.value = value;
                    changed += 1;
                }
            }
            Err(error) => log::warn!(
                "calculated expression of '{link_id}': {}",
                QuestionnaireError::expression(&entry.expression, error)
            ),
        }
    }
    changed
}

/// Write calculated values into the answers of their items
///
/// Items whose answers already hold the value are left alone. A calculated
/// expression without a value clears its item. Returns the linkIds that changed.
pub fn apply_calculated_values(
    questionnaire: &Questionnaire,
    response: &mut QuestionnaireResponse,
    calculated_expressions: &IndexMap<String, CalculatedExpression>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (link_id, calculated) in calculated_expressions {
        let Some(definition) = questionnaire.find_item(link_id) else {
            continue;
        };
        if definition.item_type.is_structural() {
            continue;
        }

        let answers: Vec<Answer> = calculated
            .value
            .as_ref()
            .and_then(|value| answer_from_value(value, definition.item_type))
            .into_iter()
            .collect();

        let current = response.find_item(link_id);
        if current.map(|item| item.answers()).unwrap_or_default() == answers.as_slice() {
            continue;
        }

        let mut item = current
            .cloned()
            .unwrap_or_else(|| QuestionnaireResponseItem::from_definition(definition));
        item.answer = (!answers.is_empty()).then_some(answers);

        if merge_item(&ItemChange::Item(item), questionnaire, response) {
            changed.push(link_id.clone());
        }
    }
    changed
}

/// Convert an expression result into an answer fitting `item_type`
pub fn answer_from_value(value: &FhirPathValue, item_type: ItemType) -> Option<Answer> {
    use FhirPathValue as V;

    let answer = match (item_type, value) {
        (ItemType::Decimal, value) => AnswerValue::Decimal(value.as_decimal()?),
        (ItemType::Integer, V::Integer(i)) => AnswerValue::Integer(*i),
        (ItemType::Integer, V::Decimal(d)) => AnswerValue::Integer(d.trunc().to_i64()?),
        (ItemType::Boolean, V::Boolean(b)) => AnswerValue::Boolean(*b),
        (ItemType::Date, V::DateTime(dt)) => {
            AnswerValue::Date(dt.date_naive().format("%Y-%m-%d").to_string())
        }
        (ItemType::Date, V::Date(_) | V::String(_)) => AnswerValue::Date(value.to_string()),
        (ItemType::DateTime, V::DateTime(_) | V::Date(_) | V::String(_)) => {
            AnswerValue::DateTime(value.to_string())
        }
        (ItemType::Time, V::Time(_) | V::String(_)) => AnswerValue::Time(value.to_string()),
        (ItemType::String | ItemType::Text, V::Resource(_)) => return None,
        (ItemType::String | ItemType::Text, value) => AnswerValue::String(value.to_string()),
        (ItemType::Url, V::String(s)) => AnswerValue::Uri(s.clone()),
        (ItemType::Choice | ItemType::OpenChoice | ItemType::Coding, V::Resource(json)) => {
            AnswerValue::Coding(serde_json::from_value::<Coding>(json.clone()).ok()?)
        }
        (ItemType::OpenChoice, V::String(s)) => AnswerValue::String(s.clone()),
        (ItemType::Choice | ItemType::Coding, V::String(s)) => AnswerValue::Coding(Coding {
            code: Some(s.clone()),
            ..Default::default()
        }),
        (ItemType::Quantity, V::Quantity(q)) => AnswerValue::Quantity(q.clone()),
        (ItemType::Quantity, V::Integer(_) | V::Decimal(_)) => AnswerValue::Quantity(Quantity {
            value: value.as_decimal(),
            ..Default::default()
        }),
        (ItemType::Reference, V::Resource(json)) => {
            AnswerValue::Reference(serde_json::from_value::<Reference>(json.clone()).ok()?)
        }
        (ItemType::Attachment, V::Resource(json)) => AnswerValue::Attachment(json.clone()),
        (ItemType::Question, value) => untyped_answer(value)?,
        _ => return None,
    };
    Some(Answer::new(answer))
}

/// Answer for items whose type does not constrain the value
fn untyped_answer(value: &FhirPathValue) -> Option<AnswerValue> {
    use FhirPathValue as V;
    Some(match value {
        V::Boolean(b) => AnswerValue::Boolean(*b),
        V::Integer(i) => AnswerValue::Integer(*i),
        V::Decimal(d) => AnswerValue::Decimal(*d),
        V::String(s) => AnswerValue::String(s.clone()),
        V::Date(_) => AnswerValue::Date(value.to_string()),
        V::DateTime(_) => AnswerValue::DateTime(value.to_string()),
        V::Time(_) => AnswerValue::Time(value.to_string()),
        V::Quantity(q) => AnswerValue::Quantity(q.clone()),
        V::Resource(json) => AnswerValue::Coding(serde_json::from_value(json.clone()).ok()?),
    })
}
