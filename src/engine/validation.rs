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

//! Free-text input validation

use regex::Regex;

use crate::error::QuestionnaireError;
use crate::model::{QuestionnaireItem, extension_urls};

/// Compiled `regex` extension of an item
#[derive(Debug, Clone)]
pub struct RegexValidation {
    /// Pattern the input must match somewhere
    pub expression: Regex,
    /// Message built from the item's `entryFormat`, shown instead of the default
    pub feedback: Option<String>,
}

/// Read and compile the `regex` extension of `item`
///
/// An `entryFormat` extension on the item becomes the feedback message. An
/// uncompilable pattern is logged and ignored.
pub fn regex_validation(item: &QuestionnaireItem) -> Option<RegexValidation> {
    let pattern = item
        .extensions(extension_urls::REGEX)
        .find_map(|e| e.value_string())?;
    match Regex::new(pattern) {
        Ok(expression) => Some(RegexValidation {
            expression,
            feedback: item
                .extensions(extension_urls::ENTRY_FORMAT)
                .find_map(|e| e.value_string())
                .map(|format| format!("Input should match the format {format}")),
        }),
        Err(error) => {
            log::warn!(
                "{}",
                QuestionnaireError::rule_definition(
                    &item.link_id,
                    format!("invalid regex: {error}")
                )
            );
            None
        }
    }
}

/// Feedback for `input`, or `None` when it is acceptable
///
/// Empty input is never flagged. Exceeding `max_length` takes precedence over a
/// regex mismatch.
pub fn validation_feedback(
    input: &str,
    regex: Option<&RegexValidation>,
    max_length: Option<usize>,
) -> Option<String> {
    if input.is_empty() {
        return None;
    }
    if max_length.is_some_and(|max| input.chars().count() > max) {
        return Some("Input exceeds maximum character limit.".to_string());
    }
    let regex = regex?;
    (!regex.expression.is_match(input)).then(|| {
        regex.feedback.clone().unwrap_or_else(|| {
            format!("Input should match the specified regex {}", regex.expression.as_str())
        })
    })
}

/// Validate `input` against the constraints declared on `item`
pub fn validate_item_input(item: &QuestionnaireItem, input: &str) -> Option<String> {
    validation_feedback(input, regex_validation(item).as_ref(), item.max_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Extension, ItemType};
    use serde_json::json;

    fn digits() -> RegexValidation {
        RegexValidation {
            expression: Regex::new(r"^\d+$").unwrap(),
            feedback: None,
        }
    }

    #[test]
    fn regex_and_length_feedback() {
        assert_eq!(validation_feedback("", Some(&digits()), Some(1)), None);
        assert_eq!(validation_feedback("123", Some(&digits()), None), None);
        assert_eq!(
            validation_feedback("12a", Some(&digits()), None).as_deref(),
            Some(r"Input should match the specified regex ^\d+$")
        );
        assert_eq!(
            validation_feedback("12a", Some(&digits()), Some(2)).as_deref(),
            Some("Input exceeds maximum character limit.")
        );
    }

    #[test]
    fn item_constraints_are_read_from_the_definition() {
        let mut item = QuestionnaireItem::new("postcode", ItemType::String);
        item.max_length = Some(4);
        item.extension = Some(vec![Extension::with_value(
            extension_urls::REGEX,
            "valueString",
            json!("^[0-9]{4}$"),
        )]);
        assert_eq!(validate_item_input(&item, "2000"), None);
        assert!(validate_item_input(&item, "20a0").is_some());

        item.extension.get_or_insert_with(Vec::new).push(Extension::with_value(
            extension_urls::ENTRY_FORMAT,
            "valueString",
            json!("nnnn"),
        ));
        assert_eq!(
            validate_item_input(&item, "20a0").as_deref(),
            Some("Input should match the format nnnn")
        );

        item.extension = Some(vec![Extension::with_value(
            extension_urls::REGEX,
            "valueString",
            json!("(unclosed"),
        )]);
        assert!(regex_validation(&item).is_none());
    }
}
