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

//! Calculated expressions driven by questionnaire variables

mod common;

use std::str::FromStr;

use common::{answer, bmi_questionnaire, clear, session_for};
use octofhir_questionnaire::{Answer, FhirPathValue};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

fn decimal(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap()
}

#[tokio::test]
async fn test_bmi_is_calculated_and_written_into_the_response() {
    let mut session = session_for(bmi_questionnaire()).await;
    assert_eq!(session.calculated_values()["bmi"], None);

    assert!(session.commit_answer(answer("weight", Answer::integer(70))));
    assert_eq!(session.calculated_values()["bmi"], None);
    assert!(session.response_item("bmi").is_none());

    assert!(session.commit_answer(answer("height", Answer::decimal(decimal("1.75")))));
    assert_eq!(
        session.calculated_values()["bmi"],
        Some(FhirPathValue::Decimal(decimal("22.86")))
    );
    assert_eq!(
        session.response_item("bmi").map(|item| item.answers().to_vec()),
        Some(vec![Answer::decimal(decimal("22.86"))])
    );

    let link_ids: Vec<_> = session
        .updatable_response()
        .items()
        .iter()
        .map(|item| item.link_id.as_str())
        .collect();
    assert_eq!(link_ids, vec!["weight", "height", "bmi"]);
}

#[tokio::test]
async fn test_recalculation_without_new_answers_is_a_fixed_point() {
    let mut session = session_for(bmi_questionnaire()).await;
    session.commit_answer(answer("weight", Answer::integer(70)));
    session.commit_answer(answer("height", Answer::decimal(decimal("1.75"))));
    let before = session.model().calculated_expressions.clone();

    let response = session.updatable_response().clone();
    assert!(!session.update_expressions(&response));
    assert!(!session.update_expressions(&response));
    assert_eq!(session.model().calculated_expressions, before);
    assert_eq!(
        session.calculated_values()["bmi"],
        Some(FhirPathValue::Decimal(decimal("22.86")))
    );
}

#[tokio::test]
async fn test_dependent_expression_settles_on_the_next_pass() {
    let mut session = session_for(bmi_questionnaire()).await;
    session.commit_answer(answer("weight", Answer::integer(120)));
    session.commit_answer(answer("height", Answer::decimal(decimal("1.75"))));

    assert_eq!(
        session.calculated_values()["bmi"],
        Some(FhirPathValue::Decimal(decimal("39.18")))
    );
    // The enable-when expression read the response before bmi was written
    assert!(!session.visibility()["obese-advice"]);

    let response = session.updatable_response().clone();
    assert!(session.update_expressions(&response));
    assert!(session.visibility()["obese-advice"]);
}

#[tokio::test]
async fn test_clearing_an_input_clears_the_calculated_answer() {
    let mut session = session_for(bmi_questionnaire()).await;
    session.commit_answer(answer("weight", Answer::integer(70)));
    session.commit_answer(answer("height", Answer::decimal(decimal("1.75"))));
    assert!(session.response_item("bmi").is_some());

    assert!(session.commit_answer(clear("weight")));
    assert_eq!(session.calculated_values()["bmi"], None);
    assert!(session.response_item("bmi").is_none());
    assert!(session.response_item("weight").is_none());
}

#[tokio::test]
async fn test_prior_response_is_calculated_at_build_time() {
    use indexmap::IndexMap;
    use octofhir_questionnaire::{QuestionnaireResponse, QuestionnaireSession};

    let response: QuestionnaireResponse = serde_json::from_value(serde_json::json!({
        "resourceType": "QuestionnaireResponse",
        "status": "in-progress",
        "item": [
            {"linkId": "weight", "answer": [{"valueInteger": 70}]},
            {"linkId": "height", "answer": [{"valueDecimal": 1.75}]}
        ]
    }))
    .unwrap();

    let mut session = QuestionnaireSession::new(
        Default::default(),
        std::sync::Arc::new(octofhir_questionnaire::FhirPathEvaluator::new()),
        std::sync::Arc::new(octofhir_questionnaire::StaticTerminologyClient::new()),
    )
    .unwrap();
    session
        .build_source_questionnaire(bmi_questionnaire(), Some(response), IndexMap::new())
        .await;

    assert_eq!(
        session.response_item("bmi").map(|item| item.answers().to_vec()),
        Some(vec![Answer::decimal(decimal("22.86"))])
    );
}
