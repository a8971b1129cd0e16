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

//! Response alignment, merging, pruning and checkbox toggling

mod common;

use common::{answer, clear, intake_questionnaire, questionnaire, session_for};
use octofhir_questionnaire::engine::{
    AlignedResponse, ItemChange, RepeatGroup, apply_index, map_index, merge_item,
    update_checkbox_answers,
};
use octofhir_questionnaire::{
    Answer, AnswerOption, AnswerValue, Coding, QuestionnaireResponse, QuestionnaireResponseItem,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn answered(link_id: &str, text: &str) -> QuestionnaireResponseItem {
    QuestionnaireResponseItem::new(link_id).with_answers(vec![Answer::string(text)])
}

#[test]
fn test_apply_index_groups_repeat_instances() {
    let definition = questionnaire(json!({
        "resourceType": "Questionnaire",
        "item": [
            {"linkId": "A", "type": "string"},
            {"linkId": "B", "type": "string", "repeats": true},
            {"linkId": "C", "type": "string"}
        ]
    }));
    let items = vec![
        answered("A", "a"),
        answered("B", "b1"),
        answered("B", "b2"),
        answered("C", "c"),
    ];
    let index = map_index(definition.items());

    assert_eq!(
        apply_index(definition.items(), &items, &index),
        vec![
            Some(AlignedResponse::Single(items[0].clone())),
            Some(AlignedResponse::Repeated(vec![items[1].clone(), items[2].clone()])),
            Some(AlignedResponse::Single(items[3].clone())),
        ]
    );

    let sparse = vec![answered("C", "c")];
    assert_eq!(
        apply_index(definition.items(), &sparse, &index),
        vec![
            None,
            Some(AlignedResponse::Repeated(Vec::new())),
            Some(AlignedResponse::Single(sparse[0].clone())),
        ]
    );
}

#[test]
fn test_emptied_group_is_pruned_without_item_field() {
    let definition = intake_questionnaire();
    let mut response = QuestionnaireResponse::for_questionnaire(&definition);

    assert!(merge_item(
        &ItemChange::Item(answered("guardian", "Alex")),
        &definition,
        &mut response
    ));
    assert_eq!(response.items()[0].link_id, "consent");

    assert!(merge_item(
        &ItemChange::Item(QuestionnaireResponseItem::new("guardian").with_answers(Vec::new())),
        &definition,
        &mut response
    ));
    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("item").is_none(), "unexpected items in {json}");
}

#[test]
fn test_nested_emptied_group_is_removed_from_its_parent() {
    let definition = questionnaire(json!({
        "resourceType": "Questionnaire",
        "item": [{"linkId": "outer", "type": "group", "item": [
            {"linkId": "inner", "type": "group", "item": [
                {"linkId": "leaf", "type": "string"}
            ]},
            {"linkId": "sibling", "type": "string"}
        ]}]
    }));
    let mut response = QuestionnaireResponse::for_questionnaire(&definition);
    for change in [answered("leaf", "x"), answered("sibling", "y")] {
        assert!(merge_item(&ItemChange::Item(change), &definition, &mut response));
    }

    assert!(merge_item(
        &ItemChange::Item(QuestionnaireResponseItem::new("leaf")),
        &definition,
        &mut response
    ));
    assert_eq!(
        serde_json::to_value(&response).unwrap()["item"],
        json!([{"linkId": "outer", "item": [
            {"linkId": "sibling", "answer": [{"valueString": "y"}]}
        ]}])
    );

    assert!(merge_item(
        &ItemChange::Item(QuestionnaireResponseItem::new("sibling")),
        &definition,
        &mut response
    ));
    assert!(response.item.is_none());
}

#[tokio::test]
async fn test_repeat_group_instances_are_spliced_in_order() {
    let mut session = session_for(intake_questionnaire()).await;
    session.commit_answer(answer("smoker", Answer::boolean(false)));

    let instance = |name: &str| {
        QuestionnaireResponseItem::new("medications")
            .with_items(vec![answered("medication-name", name)])
    };
    let change = ItemChange::RepeatGroup(RepeatGroup {
        link_id: "medications".to_string(),
        items: vec![
            instance("aspirin"),
            QuestionnaireResponseItem::new("medications"),
            instance("statin"),
        ],
    });
    assert!(session.commit_answer(change));

    let history = session.response_item("history").unwrap();
    let link_ids: Vec<_> = history.children().iter().map(|i| i.link_id.as_str()).collect();
    assert_eq!(link_ids, vec!["smoker", "medications", "medications"]);
    assert_eq!(
        session.updatable_response().answers_for("medication-name"),
        vec![Answer::string("aspirin"), Answer::string("statin")]
    );

    // Items inside repeat instances are committed through their group
    assert!(!session.commit_answer(ItemChange::Item(answered("medication-name", "x"))));
}

#[tokio::test]
async fn test_clean_response_drops_hidden_and_blank_answers() {
    let mut session = session_for(intake_questionnaire()).await;
    session.commit_answer(answer("age", Answer::integer(12)));
    session.commit_answer(ItemChange::Item(answered("guardian", "Alex")));
    session.commit_answer(ItemChange::RepeatGroup(RepeatGroup {
        link_id: "medications".to_string(),
        items: vec![
            QuestionnaireResponseItem::new("medications")
                .with_items(vec![answered("medication-name", "")]),
        ],
    }));
    session.commit_answer(answer("age", Answer::integer(30)));

    assert!(session.response_item("guardian").is_some());
    let cleaned = serde_json::to_value(session.clean_response()).unwrap();
    assert_eq!(
        cleaned["item"],
        json!([{"linkId": "details", "item": [
            {"linkId": "age", "answer": [{"valueInteger": 30}]}
        ]}])
    );

    session.commit_answer(clear("age"));
    assert!(session.clean_response().item.is_none());
}

#[test]
fn test_checkbox_toggle_laws() {
    let options: Vec<AnswerOption> = vec![
        AnswerValue::Coding(Coding::new("http://example.org/colour", "red")).into(),
        AnswerValue::Coding(Coding::new("http://example.org/colour", "blue")).into(),
    ];
    let original = QuestionnaireResponseItem::new("colours").with_answers(vec![Answer::coding(
        Coding::new("http://example.org/colour", "red"),
    )]);

    let added = update_checkbox_answers("blue", &original, &options, true).unwrap();
    assert_eq!(added.answers().len(), 2);
    assert_eq!(update_checkbox_answers("blue", &added, &options, true).unwrap(), original);

    let cleared = update_checkbox_answers("red", &original, &options, false).unwrap();
    assert!(cleared.answers().is_empty());
    assert!(update_checkbox_answers("green", &original, &options, true).is_none());
}
