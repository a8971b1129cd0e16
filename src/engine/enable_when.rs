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

//! Enable-when evaluation and item visibility

use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::model::{EnableWhenCondition, EnableWhenExpression, EnableWhenItem};
use crate::model::{
    Answer, AnswerValue, EnableBehavior, Questionnaire, QuestionnaireItem, QuestionnaireResponse,
};

/// `enableWhen.operator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnableWhenOperator {
    /// `exists`
    Exists,
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `<`
    LessThan,
    /// `>=`
    GreaterOrEqual,
    /// `<=`
    LessOrEqual,
}

impl FromStr for EnableWhenOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exists" => Ok(Self::Exists),
            "=" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            ">" => Ok(Self::GreaterThan),
            "<" => Ok(Self::LessThan),
            ">=" => Ok(Self::GreaterOrEqual),
            "<=" => Ok(Self::LessOrEqual),
            other => Err(format!("unknown enableWhen operator '{other}'")),
        }
    }
}

impl fmt::Display for EnableWhenOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Exists => "exists",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
        };
        f.write_str(code)
    }
}

fn numeric(value: &AnswerValue) -> Option<Decimal> {
    match value {
        AnswerValue::Integer(i) => Some(Decimal::from(*i)),
        AnswerValue::Decimal(d) => Some(*d),
        _ => None,
    }
}

/// FHIR value equality between an answer and an expected value
pub fn answer_equals(actual: &AnswerValue, expected: &AnswerValue) -> bool {
    match (actual, expected) {
        (AnswerValue::Coding(a), AnswerValue::Coding(b)) => a.matches(b),
        (AnswerValue::Quantity(a), AnswerValue::Quantity(b)) => {
            a.value == b.value
                && a.code.as_ref().or(a.unit.as_ref()) == b.code.as_ref().or(b.unit.as_ref())
        }
        (AnswerValue::Reference(a), AnswerValue::Reference(b)) => a.reference == b.reference,
        _ => match (numeric(actual), numeric(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => actual == expected,
        },
    }
}

/// Ordering between an answer and an expected value, `None` if not comparable
///
/// Dates, date-times and times compare on their ISO text, which orders correctly
/// for values of the same precision.
pub fn answer_ordering(actual: &AnswerValue, expected: &AnswerValue) -> Option<Ordering> {
    use AnswerValue as V;
    match (actual, expected) {
        (V::String(a), V::String(b))
        | (V::Date(a), V::Date(b))
        | (V::DateTime(a), V::DateTime(b))
        | (V::Time(a), V::Time(b)) => Some(a.cmp(b)),
        (V::DateTime(a), V::Date(b)) => a.get(..b.len()).map(|prefix| prefix.cmp(b.as_str())),
        (V::Date(a), V::DateTime(b)) => b.get(..a.len()).map(|prefix| a.as_str().cmp(prefix)),
        (V::Quantity(a), V::Quantity(b)) if a.code == b.code && a.unit == b.unit => {
            a.value.partial_cmp(&b.value)
        }
        _ => numeric(actual)?.partial_cmp(&numeric(expected)?),
    }
}

/// Evaluate one condition against the current answers of its trigger question
///
/// With no answers only `exists = false` holds.
pub fn evaluate_condition(condition: &EnableWhenCondition, answers: &[Answer]) -> bool {
    if condition.operator == EnableWhenOperator::Exists {
        let expected = matches!(condition.answer, AnswerValue::Boolean(true));
        return answers.is_empty() != expected;
    }
    if answers.is_empty() {
        return false;
    }

    let expected = &condition.answer;
    match condition.operator {
        EnableWhenOperator::Equal => answers.iter().any(|a| answer_equals(&a.value, expected)),
        EnableWhenOperator::NotEqual => !answers.iter().any(|a| answer_equals(&a.value, expected)),
        operator => answers.iter().any(|a| {
            answer_ordering(&a.value, expected).is_some_and(|ordering| match operator {
                EnableWhenOperator::GreaterThan => ordering == Ordering::Greater,
                EnableWhenOperator::LessThan => ordering == Ordering::Less,
                EnableWhenOperator::GreaterOrEqual => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }),
    }
}

/// Combine the conditions of an item with its `enableBehavior`
pub fn is_satisfied(item: &EnableWhenItem) -> bool {
    let mut results = item
        .links
        .iter()
        .map(|link| evaluate_condition(&link.condition, &link.answers));
    match item.behavior {
        EnableBehavior::All => results.all(|r| r),
        EnableBehavior::Any => results.any(|r| r),
    }
}

/// Record new answers for `link_id` and recompute every dependent item
///
/// Returns the linkIds whose enabled state flipped. A linkId that triggers no
/// rule costs one map lookup.
pub fn update_enable_when_item(
    items: &mut IndexMap<String, EnableWhenItem>,
    linked_questions: &IndexMap<String, Vec<String>>,
    link_id: &str,
    answers: &[Answer],
) -> Vec<String> {
    let Some(dependents) = linked_questions.get(link_id) else {
        return Vec::new();
    };

    let mut toggled = Vec::new();
    for dependent in dependents {
        let Some(item) = items.get_mut(dependent) else {
            continue;
        };
        for link in item
            .links
            .iter_mut()
            .filter(|link| link.condition.question == link_id)
        {
            link.answers = answers.to_vec();
        }
        let enabled = is_satisfied(item);
        if enabled != item.is_enabled {
            log::trace!("'{dependent}' enabled: {enabled} (trigger '{link_id}')");
            item.is_enabled = enabled;
            toggled.push(dependent.clone());
        }
    }
    toggled
}

/// Load every trigger's answers from `response` and recompute all items
pub fn initialise_enable_when_items(
    items: &mut IndexMap<String, EnableWhenItem>,
    response: &QuestionnaireResponse,
) {
    for item in items.values_mut() {
        for link in &mut item.links {
            link.answers = response.answers_for(&link.condition.question);
        }
        item.is_enabled = is_satisfied(item);
    }
}

/// Enable-when state consulted when deciding visibility
#[derive(Debug, Clone, Copy)]
pub struct EnableWhenState<'a> {
    /// Condition-list items
    pub items: &'a IndexMap<String, EnableWhenItem>,
    /// Expression-style items
    pub expressions: &'a IndexMap<String, EnableWhenExpression>,
    /// Global activation switch
    pub is_activated: bool,
}

impl EnableWhenState<'_> {
    /// True if enable-when rules currently disable `link_id`
    pub fn is_disabled(&self, link_id: &str) -> bool {
        if !self.is_activated {
            return false;
        }
        if let Some(item) = self.items.get(link_id) {
            return !item.is_enabled;
        }
        self.expressions
            .get(link_id)
            .is_some_and(|expression| expression.is_enabled == Some(false))
    }

    /// Hidden by definition or disabled by an enable-when rule
    pub fn is_hidden(&self, item: &QuestionnaireItem) -> bool {
        item.is_hidden_by_definition() || self.is_disabled(&item.link_id)
    }

    /// Visibility of every item; descendants of hidden groups are hidden too
    pub fn visibility(&self, questionnaire: &Questionnaire) -> IndexMap<String, bool> {
        fn visit(
            state: &EnableWhenState<'_>,
            items: &[QuestionnaireItem],
            parent_hidden: bool,
            out: &mut IndexMap<String, bool>,
        ) {
            for item in items {
                let hidden = parent_hidden || state.is_hidden(item);
                out.insert(item.link_id.clone(), !hidden);
                visit(state, item.children(), hidden, out);
            }
        }

        let mut out = IndexMap::new();
        visit(self, questionnaire.items(), false, &mut out);
        out
    }
}
