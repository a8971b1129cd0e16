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

//! Enable-when conditions, reverse index and visibility

mod common;

use common::{answer, clear, intake_questionnaire, questionnaire, session_for};
use octofhir_questionnaire::engine::enable_when::{EnableWhenOperator, evaluate_condition};
use octofhir_questionnaire::engine::model::EnableWhenCondition;
use octofhir_questionnaire::{
    Answer, AnswerValue, Coding, ItemChange, QuestionnaireResponseItem, RepeatGroup,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

fn condition(operator: EnableWhenOperator, answer: AnswerValue) -> EnableWhenCondition {
    EnableWhenCondition {
        question: "trigger".to_string(),
        operator,
        answer,
    }
}

#[rstest]
#[case(EnableWhenOperator::Equal, AnswerValue::Integer(3), vec![Answer::integer(3)], true)]
#[case(EnableWhenOperator::Equal, AnswerValue::Integer(3), vec![Answer::integer(4)], false)]
#[case(EnableWhenOperator::NotEqual, AnswerValue::Integer(3), vec![Answer::integer(4)], true)]
#[case(EnableWhenOperator::NotEqual, AnswerValue::Integer(3), vec![], false)]
#[case(EnableWhenOperator::GreaterThan, AnswerValue::Integer(3), vec![Answer::integer(4)], true)]
#[case(EnableWhenOperator::LessOrEqual, AnswerValue::Integer(3), vec![Answer::integer(3)], true)]
#[case(EnableWhenOperator::LessThan, AnswerValue::Integer(3), vec![], false)]
#[case(EnableWhenOperator::Exists, AnswerValue::Boolean(true), vec![Answer::string("x")], true)]
#[case(EnableWhenOperator::Exists, AnswerValue::Boolean(false), vec![], true)]
#[case(EnableWhenOperator::Exists, AnswerValue::Boolean(false), vec![Answer::string("x")], false)]
#[case(
    EnableWhenOperator::Equal,
    AnswerValue::Coding(Coding::new("http://example.org", "a")),
    vec![Answer::coding(Coding::new("http://example.org", "a").with_display("A"))],
    true
)]
fn test_condition_operators(
    #[case] operator: EnableWhenOperator,
    #[case] expected: AnswerValue,
    #[case] answers: Vec<Answer>,
    #[case] satisfied: bool,
) {
    assert_eq!(evaluate_condition(&condition(operator, expected), &answers), satisfied);
}

#[tokio::test]
async fn test_reverse_index_updates_every_dependent() {
    let mut session = session_for(intake_questionnaire()).await;
    let linked = &session.model().enable_when_linked_questions;
    assert_eq!(linked["age"], vec!["consent".to_string(), "packs".to_string()]);
    assert_eq!(linked["smoker"], vec!["packs".to_string()]);

    assert!(session.update_enable_when_item("age", &[Answer::integer(30)]).is_empty());
    assert_eq!(
        session.update_enable_when_item("smoker", &[Answer::boolean(true)]),
        vec!["packs".to_string()]
    );
    assert!(session.model().enable_when_items["packs"].is_enabled);

    assert_eq!(
        session.update_enable_when_item("age", &[Answer::integer(12)]),
        vec!["consent".to_string(), "packs".to_string()]
    );
}

#[tokio::test]
async fn test_non_trigger_update_is_a_no_op() {
    let mut session = session_for(intake_questionnaire()).await;
    let before = session.model().enable_when_items.clone();
    assert!(session.update_enable_when_item("guardian", &[Answer::string("x")]).is_empty());
    assert_eq!(session.model().enable_when_items, before);
}

#[tokio::test]
async fn test_hidden_group_hides_descendants() {
    let mut session = session_for(intake_questionnaire()).await;
    let visibility = session.visibility();
    assert!(!visibility["consent"]);
    assert!(!visibility["guardian"]);
    assert!(visibility["details"]);

    session.commit_answer(answer("age", Answer::integer(12)));
    let visibility = session.visibility();
    assert!(visibility["consent"]);
    assert!(visibility["guardian"]);
}

#[tokio::test]
async fn test_coding_answers_gate_items() {
    let mut session = session_for(intake_questionnaire()).await;
    assert!(!session.visibility()["pregnant"]);

    let female = Coding::new("http://hl7.org/fhir/administrative-gender", "female");
    assert!(session.commit_answer(answer("gender", Answer::coding(female))));
    assert!(session.visibility()["pregnant"]);

    assert!(session.commit_answer(clear("gender")));
    assert!(!session.visibility()["pregnant"]);
}

#[tokio::test]
async fn test_all_behavior_requires_every_condition() {
    let mut session = session_for(intake_questionnaire()).await;
    session.commit_answer(answer("smoker", Answer::boolean(true)));
    assert!(!session.visibility()["packs"]);
    session.commit_answer(answer("age", Answer::integer(40)));
    assert!(session.visibility()["packs"]);
}

#[tokio::test]
async fn test_deactivation_shows_everything() {
    let mut session = session_for(intake_questionnaire()).await;
    session.toggle_enable_when_activation(false);
    assert!(session.visibility().values().all(|visible| *visible));
}

#[tokio::test]
async fn test_clearing_a_repeat_group_refreshes_its_dependents() {
    let definition = questionnaire(json!({
        "resourceType": "Questionnaire",
        "item": [
            {"linkId": "meds", "type": "string", "repeats": true},
            {"linkId": "why", "type": "text",
             "enableWhen": [{"question": "meds", "operator": "exists", "answerBoolean": true}]}
        ]
    }));
    let mut session = session_for(definition).await;
    assert!(!session.visibility()["why"]);

    let one = QuestionnaireResponseItem::new("meds").with_answers(vec![Answer::string("aspirin")]);
    assert!(session.commit_answer(ItemChange::RepeatGroup(RepeatGroup {
        link_id: "meds".to_string(),
        items: vec![one],
    })));
    assert!(session.visibility()["why"]);

    assert!(session.commit_answer(ItemChange::RepeatGroup(RepeatGroup {
        link_id: "meds".to_string(),
        items: Vec::new(),
    })));
    assert!(session.updatable_response().answers_for("meds").is_empty());
    assert!(!session.visibility()["why"]);
}

#[tokio::test]
async fn test_replacing_a_group_refreshes_removed_triggers() {
    let definition = questionnaire(json!({
        "resourceType": "Questionnaire",
        "item": [
            {"linkId": "g", "type": "group", "item": [
                {"linkId": "age", "type": "integer"},
                {"linkId": "note", "type": "string"}
            ]},
            {"linkId": "adult", "type": "boolean",
             "enableWhen": [{"question": "age", "operator": ">=", "answerInteger": 18}]}
        ]
    }));
    let mut session = session_for(definition).await;

    let with_age = QuestionnaireResponseItem::new("g").with_items(vec![
        QuestionnaireResponseItem::new("age").with_answers(vec![Answer::integer(40)]),
    ]);
    assert!(session.commit_answer(ItemChange::Item(with_age)));
    assert!(session.visibility()["adult"]);

    let without_age = QuestionnaireResponseItem::new("g").with_items(vec![
        QuestionnaireResponseItem::new("note").with_answers(vec![Answer::string("moved")]),
    ]);
    assert!(session.commit_answer(ItemChange::Item(without_age)));
    assert!(session.response_item("age").is_none());
    assert!(!session.visibility()["adult"]);
}
