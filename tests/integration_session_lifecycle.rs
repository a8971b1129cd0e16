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

//! Session build, tabs, value sets, population and teardown

mod common;

use std::sync::Arc;

use common::{GENDER_VALUE_SET, answer, intake_questionnaire, questionnaire, session_for};
use indexmap::IndexMap;
use octofhir_questionnaire::model::extension_urls;
use octofhir_questionnaire::{
    Answer, AnswerValue, FhirPathEvaluator, QuestionnaireResponse, QuestionnaireSession,
    SessionConfig, StaticTerminologyClient,
};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_build_selects_first_visible_tab() {
    let mut session = session_for(intake_questionnaire()).await;
    let tabs: Vec<_> = session.tabs().keys().cloned().collect();
    assert_eq!(tabs, vec!["consent", "details", "history"]);
    // consent is disabled until age is below 18
    assert_eq!(session.state().current_tab_index, 1);

    assert!(session.switch_tab(2));
    assert_eq!(session.state().current_tab_index, 2);
    assert!(!session.switch_tab(7));
    assert_eq!(session.state().current_tab_index, 2);

    assert!(session.mark_tab_as_complete("details"));
    assert!(session.tabs()["details"].is_complete);
    assert!(session.mark_tab_as_complete("details"));
    assert!(!session.tabs()["details"].is_complete);
    assert!(!session.mark_tab_as_complete("unknown"));
}

#[tokio::test]
async fn test_contained_value_sets_are_expanded_at_build_time() {
    let mut session = session_for(intake_questionnaire()).await;
    assert_eq!(session.state().value_sets.get("#yes-no").map(<[_]>::len), Some(2));
    assert_eq!(session.answer_options("pregnant").len(), 2);

    // Server-backed value sets are resolved on demand
    assert!(session.answer_options("gender").is_empty());
    let codings = session.resolve_value_set(GENDER_VALUE_SET).await.unwrap();
    assert_eq!(codings.len(), 2);
    let codes: Vec<_> = session
        .answer_options("gender")
        .into_iter()
        .filter_map(|option| match option.value {
            AnswerValue::Coding(coding) => coding.code,
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec!["female", "male"]);
}

#[tokio::test]
async fn test_failed_lookup_is_surfaced_as_outcome() {
    let mut session = session_for(intake_questionnaire()).await;
    let url = "http://example.org/ValueSet/unknown";
    assert!(session.resolve_value_set(url).await.is_err());
    let outcome = session.value_set_error(url).unwrap();
    assert_eq!(outcome.issue[0].severity, "error");
    assert!(session.resolve_value_set("#not-contained").await.is_err());
}

#[tokio::test]
async fn test_populated_response_reinitialises_state() {
    let mut session = session_for(intake_questionnaire()).await;
    session.switch_tab(2);

    let populated: QuestionnaireResponse = serde_json::from_value(json!({
        "resourceType": "QuestionnaireResponse",
        "status": "in-progress",
        "item": [{"linkId": "details", "item": [
            {"linkId": "age", "answer": [{"valueInteger": 10}]}
        ]}]
    }))
    .unwrap();

    let updated = session.update_populated_properties(populated.clone(), true);
    assert_eq!(updated.answers_for("age"), vec![Answer::integer(10)]);
    assert_eq!(session.state().current_tab_index, 2);
    assert!(session.visibility()["consent"]);

    session.update_populated_properties(populated, false);
    assert_eq!(session.state().current_tab_index, 0);
    assert_eq!(session.updatable_response().answers_for("age"), vec![Answer::integer(10)]);
}

#[tokio::test]
async fn test_launch_context_variables_and_answer_expressions() {
    let definition = questionnaire(json!({
        "resourceType": "Questionnaire",
        "extension": [{
            "url": extension_urls::LAUNCH_CONTEXT,
            "extension": [
                {"url": "name", "valueCoding": {"code": "patient"}},
                {"url": "type", "valueCode": "Patient"}
            ]
        }],
        "item": [
            {"linkId": "given-name", "type": "string", "extension": [{
                "url": extension_urls::CALCULATED_EXPRESSION,
                "valueExpression": {"language": "text/fhirpath",
                                    "expression": "%patient.name.first().given.first()"}
            }]},
            {"linkId": "colour", "type": "choice", "extension": [{
                "url": extension_urls::ANSWER_EXPRESSION,
                "valueExpression": {"language": "text/fhirpath", "expression": "'red' | 'green'"}
            }]}
        ]
    }));
    let mut variables = IndexMap::new();
    variables.insert(
        "patient".to_string(),
        json!({"resourceType": "Patient", "name": [{"given": ["Ada", "May"], "family": "Lovelace"}]}),
    );

    let mut session = QuestionnaireSession::new(
        SessionConfig::default(),
        Arc::new(FhirPathEvaluator::new()),
        Arc::new(StaticTerminologyClient::new()),
    )
    .unwrap();
    session
        .build_source_questionnaire(definition, None, variables)
        .await;

    assert_eq!(
        session.updatable_response().answers_for("given-name"),
        vec![Answer::string("Ada")]
    );
    assert_eq!(session.model().launch_contexts["patient"].types, vec!["Patient"]);
    assert_eq!(session.answer_options("colour").len(), 2);
}

#[tokio::test]
async fn test_validation_feedback_uses_item_constraints() {
    let definition = questionnaire(json!({
        "resourceType": "Questionnaire",
        "item": [{"linkId": "postcode", "type": "string", "maxLength": 4, "extension": [{
            "url": extension_urls::REGEX, "valueString": "^[0-9]+$"
        }]}]
    }));
    let session = session_for(definition).await;
    assert_eq!(session.validate_input("postcode", "2000"), None);
    assert_eq!(
        session.validate_input("postcode", "20000").as_deref(),
        Some("Input exceeds maximum character limit.")
    );
    assert!(session.validate_input("postcode", "20a").is_some());
}

#[tokio::test]
async fn test_destroy_resets_to_empty_state() {
    let mut session = session_for(intake_questionnaire()).await;
    session.commit_answer(answer("age", Answer::integer(30)));
    session.destroy_source_questionnaire();

    assert!(!session.state().is_built);
    assert!(session.updatable_response().items().is_empty());
    assert!(session.model().enable_when_linked_questions.is_empty());
    assert!(session.tabs().is_empty());
    assert!(session.state().value_sets.is_empty());
    assert!(session.state().fhir_path_context.is_empty());
    assert!(session.state().enable_when_is_activated);
}
