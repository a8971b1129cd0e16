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

//! Answer lookup and choice widget helpers

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::model::{
    Answer, AnswerOption, AnswerValue, Coding, ItemType, QuestionnaireItem,
    QuestionnaireResponseItem, extension_urls,
};

/// Option lists up to this size render as radio buttons by default
const RADIO_OPTION_LIMIT: usize = 5;

/// Find the answer option whose code, string or integer form equals `raw`
///
/// Options are searched in declaration order and the first match wins.
pub fn find_in_answer_options(options: &[AnswerOption], raw: &str) -> Option<Answer> {
    options
        .iter()
        .find(|option| match &option.value {
            AnswerValue::Coding(coding) => coding.code.as_deref() == Some(raw),
            AnswerValue::String(s) => s == raw,
            AnswerValue::Integer(i) => i.to_string() == raw,
            _ => false,
        })
        .map(|option| Answer::new(option.value.clone()))
}

/// Find the value-set coding whose code equals `raw`
pub fn find_in_answer_value_set_codings(codings: &[Coding], raw: &str) -> Option<Answer> {
    codings
        .iter()
        .find(|coding| coding.code.as_deref() == Some(raw))
        .cloned()
        .map(Answer::coding)
}

/// Build an answer for `item` from text input
///
/// Choice items resolve `raw` against their options and then `codings`; open-choice
/// items fall back to a free-text answer. Returns `None` when `raw` does not fit the
/// item type.
pub fn answer_from_input(
    item: &QuestionnaireItem,
    raw: &str,
    codings: &[Coding],
) -> Option<Answer> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let options = item.answer_option.as_deref().unwrap_or_default();
    let value = match item.item_type {
        ItemType::Boolean => AnswerValue::Boolean(raw.parse().ok()?),
        ItemType::Integer => AnswerValue::Integer(raw.parse().ok()?),
        ItemType::Decimal => AnswerValue::Decimal(Decimal::from_str(raw).ok()?),
        ItemType::Date => AnswerValue::Date(raw.to_string()),
        ItemType::DateTime => AnswerValue::DateTime(raw.to_string()),
        ItemType::Time => AnswerValue::Time(raw.to_string()),
        ItemType::String | ItemType::Text | ItemType::Question => {
            AnswerValue::String(raw.to_string())
        }
        ItemType::Url => AnswerValue::Uri(raw.to_string()),
        ItemType::Choice | ItemType::Coding => {
            return find_in_answer_options(options, raw)
                .or_else(|| find_in_answer_value_set_codings(codings, raw));
        }
        ItemType::OpenChoice => {
            return find_in_answer_options(options, raw)
                .or_else(|| find_in_answer_value_set_codings(codings, raw))
                .or_else(|| Some(Answer::string(raw)));
        }
        _ => return None,
    };
    Some(Answer::new(value))
}

/// Toggle `changed_value` in the answers of a checkbox item
///
/// Multi-select toggles membership of the matching option. Single-select switches
/// between that option alone and no answer. Returns `None` when `changed_value`
/// matches no option; the change must then be ignored.
pub fn update_checkbox_answers(
    changed_value: &str,
    item: &QuestionnaireResponseItem,
    options: &[AnswerOption],
    is_multi_select: bool,
) -> Option<QuestionnaireResponseItem> {
    let new_answer = find_in_answer_options(options, changed_value)?;
    let answers = item.answers();

    let updated = if is_multi_select {
        let mut updated: Vec<Answer> = answers
            .iter()
            .filter(|answer| **answer != new_answer)
            .cloned()
            .collect();
        if updated.len() == answers.len() {
            updated.push(new_answer);
        }
        updated
    } else if answers.contains(&new_answer) {
        Vec::new()
    } else {
        vec![new_answer]
    };

    Some(QuestionnaireResponseItem {
        answer: Some(updated),
        ..item.clone()
    })
}

/// First answer of a choice item as the string a widget selects by
pub fn get_choice_value(item: &QuestionnaireResponseItem) -> Option<String> {
    let answer = item.answers().first()?;
    match &answer.value {
        AnswerValue::Coding(coding) => Some(coding.code.clone().unwrap_or_default()),
        AnswerValue::String(s) => Some(s.clone()),
        AnswerValue::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Wrap value-set codings as answer options
pub fn map_codings_to_options(codings: &[Coding]) -> Vec<AnswerOption> {
    codings
        .iter()
        .cloned()
        .map(|coding| AnswerOption::from(AnswerValue::Coding(coding)))
        .collect()
}

/// Widget used to render a choice item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceControl {
    /// Search-as-you-type
    Autocomplete,
    /// Checkbox list
    Checkbox,
    /// Radio buttons
    Radio,
    /// Drop-down
    Select,
}

/// Pick the widget from the item-control extension, else from the option count
pub fn choice_control_type(item: &QuestionnaireItem) -> ChoiceControl {
    if item.has_item_control("autocomplete") {
        return ChoiceControl::Autocomplete;
    }
    if item.has_item_control("check-box") {
        return ChoiceControl::Checkbox;
    }
    if item.has_item_control("radio-button") {
        return ChoiceControl::Radio;
    }
    if item.has_item_control("drop-down") {
        return ChoiceControl::Select;
    }
    match item.answer_option.as_deref() {
        Some(options) if !options.is_empty() && options.len() < RADIO_OPTION_LIMIT => {
            ChoiceControl::Radio
        }
        _ => ChoiceControl::Select,
    }
}

/// Layout of choice options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChoiceOrientation {
    /// Side by side
    Horizontal,
    /// One per line
    #[default]
    Vertical,
}

/// Orientation from `questionnaire-choiceOrientation`, vertical by default
pub fn choice_orientation(item: &QuestionnaireItem) -> ChoiceOrientation {
    match item
        .extensions(extension_urls::CHOICE_ORIENTATION)
        .find_map(|e| e.value_code())
    {
        Some("horizontal") => ChoiceOrientation::Horizontal,
        _ => ChoiceOrientation::Vertical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Extension, ItemType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn options() -> Vec<AnswerOption> {
        vec![
            AnswerValue::Coding(Coding::new("http://example.org", "red")).into(),
            AnswerValue::String("green".into()).into(),
            AnswerValue::Integer(3).into(),
        ]
    }

    #[test]
    fn finds_options_by_code_string_or_integer() {
        let opts = options();
        assert!(matches!(
            find_in_answer_options(&opts, "red").map(|a| a.value),
            Some(AnswerValue::Coding(_))
        ));
        assert_eq!(find_in_answer_options(&opts, "3"), Some(Answer::integer(3)));
        assert_eq!(find_in_answer_options(&opts, "blue"), None);
    }

    #[test]
    fn multi_select_toggle_is_its_own_inverse() {
        let opts = options();
        let original =
            QuestionnaireResponseItem::new("colour").with_answers(vec![Answer::string("green")]);
        let once = update_checkbox_answers("3", &original, &opts, true).unwrap();
        assert_eq!(once.answers().len(), 2);
        let twice = update_checkbox_answers("3", &once, &opts, true).unwrap();
        assert_eq!(twice, original);
    }

    #[test]
    fn single_select_reselect_clears() {
        let opts = options();
        let item = QuestionnaireResponseItem::new("colour");
        let selected = update_checkbox_answers("green", &item, &opts, false).unwrap();
        assert_eq!(selected.answers(), &[Answer::string("green")]);
        let cleared = update_checkbox_answers("green", &selected, &opts, false).unwrap();
        assert!(cleared.answers().is_empty());
        assert!(update_checkbox_answers("nope", &item, &opts, false).is_none());
    }

    #[test]
    fn control_type_defaults_follow_option_count() {
        let mut item = QuestionnaireItem::new("c", ItemType::Choice);
        item.answer_option = Some(options());
        assert_eq!(choice_control_type(&item), ChoiceControl::Radio);
        item.answer_option = Some(options().into_iter().cycle().take(6).collect());
        assert_eq!(choice_control_type(&item), ChoiceControl::Select);

        item.extension = Some(vec![Extension::with_value(
            extension_urls::ITEM_CONTROL,
            "valueCodeableConcept",
            json!({"coding": [{"code": "check-box"}]}),
        )]);
        assert_eq!(choice_control_type(&item), ChoiceControl::Checkbox);
    }

    #[test]
    fn input_is_parsed_per_item_type() {
        let integer = QuestionnaireItem::new("age", ItemType::Integer);
        assert_eq!(answer_from_input(&integer, " 42 ", &[]), Some(Answer::integer(42)));
        assert_eq!(answer_from_input(&integer, "4.2", &[]), None);

        let mut choice = QuestionnaireItem::new("colour", ItemType::Choice);
        choice.answer_option = Some(options());
        assert_eq!(answer_from_input(&choice, "green", &[]), Some(Answer::string("green")));
        let codings = [Coding::new("http://example.org", "blue")];
        assert_eq!(
            answer_from_input(&choice, "blue", &codings),
            Some(Answer::coding(codings[0].clone()))
        );
        assert_eq!(answer_from_input(&choice, "pink", &codings), None);

        choice.item_type = ItemType::OpenChoice;
        assert_eq!(answer_from_input(&choice, "pink", &codings), Some(Answer::string("pink")));
    }

    #[test]
    fn orientation_reads_extension() {
        let mut item = QuestionnaireItem::new("c", ItemType::Choice);
        assert_eq!(choice_orientation(&item), ChoiceOrientation::Vertical);
        item.extension = Some(vec![Extension::with_value(
            extension_urls::CHOICE_ORIENTATION,
            "valueCode",
            json!("horizontal"),
        )]);
        assert_eq!(choice_orientation(&item), ChoiceOrientation::Horizontal);
    }
}
