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

//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use indexmap::IndexMap;
use octofhir_questionnaire::model::extension_urls;
use octofhir_questionnaire::{
    Answer, Coding, FhirPathEvaluator, ItemChange, Questionnaire, QuestionnaireResponseItem,
    QuestionnaireSession, SessionConfig, StaticTerminologyClient,
};
use serde_json::{Value, json};

pub const GENDER_VALUE_SET: &str = "http://example.org/ValueSet/gender";

pub fn questionnaire(value: Value) -> Questionnaire {
    serde_json::from_value(value).expect("valid questionnaire fixture")
}

fn fhirpath(expression: &str) -> Value {
    json!({"language": "text/fhirpath", "expression": expression})
}

fn variable(name: &str, expression: &str) -> Value {
    json!({
        "url": extension_urls::VARIABLE,
        "valueExpression": {"name": name, "language": "text/fhirpath", "expression": expression}
    })
}

/// Weight and height feeding a calculated BMI
pub fn bmi_questionnaire() -> Questionnaire {
    questionnaire(json!({
        "resourceType": "Questionnaire",
        "url": "http://example.org/Questionnaire/bmi",
        "status": "active",
        "extension": [
            variable("weight", "%resource.item.where(linkId='weight').answer.value"),
            variable("height", "%resource.item.where(linkId='height').answer.value")
        ],
        "item": [
            {"linkId": "weight", "type": "integer", "text": "Weight (kg)"},
            {"linkId": "height", "type": "decimal", "text": "Height (m)"},
            {"linkId": "bmi", "type": "decimal", "text": "BMI", "readOnly": true, "extension": [{
                "url": extension_urls::CALCULATED_EXPRESSION,
                "valueExpression": fhirpath("(%weight / (%height * %height)).round(2)")
            }]},
            {"linkId": "obese-advice", "type": "display", "extension": [{
                "url": extension_urls::ENABLE_WHEN_EXPRESSION,
                "valueExpression": fhirpath("%resource.item.where(linkId='bmi').answer.value > 30")
            }]}
        ]
    }))
}

/// Tabbed intake form with condition-list enable-when rules
pub fn intake_questionnaire() -> Questionnaire {
    let tab = json!({
        "url": extension_urls::ITEM_CONTROL,
        "valueCodeableConcept": {"coding": [{"code": "tab"}]}
    });
    questionnaire(json!({
        "resourceType": "Questionnaire",
        "status": "active",
        "contained": [{
            "resourceType": "ValueSet",
            "id": "yes-no",
            "compose": {"include": [{
                "system": "http://terminology.hl7.org/CodeSystem/v2-0136",
                "concept": [{"code": "Y", "display": "Yes"}, {"code": "N", "display": "No"}]
            }]}
        }],
        "item": [
            {"linkId": "consent", "type": "group", "extension": [tab.clone()],
             "enableWhen": [{"question": "age", "operator": "<", "answerInteger": 18}],
             "item": [
                {"linkId": "guardian", "type": "string"}
             ]},
            {"linkId": "details", "type": "group", "extension": [tab.clone()], "item": [
                {"linkId": "age", "type": "integer"},
                {"linkId": "gender", "type": "choice", "answerValueSet": GENDER_VALUE_SET},
                {"linkId": "pregnant", "type": "choice", "answerValueSet": "#yes-no",
                 "enableWhen": [{"question": "gender", "operator": "=",
                                 "answerCoding": {"system": "http://hl7.org/fhir/administrative-gender", "code": "female"}}]}
            ]},
            {"linkId": "history", "type": "group", "extension": [tab], "item": [
                {"linkId": "smoker", "type": "boolean"},
                {"linkId": "packs", "type": "integer", "enableBehavior": "all", "enableWhen": [
                    {"question": "smoker", "operator": "=", "answerBoolean": true},
                    {"question": "age", "operator": ">=", "answerInteger": 18}
                ]},
                {"linkId": "medications", "type": "group", "repeats": true, "item": [
                    {"linkId": "medication-name", "type": "string"}
                ]}
            ]}
        ]
    }))
}

pub fn gender_codings() -> Vec<Coding> {
    vec![
        Coding::new("http://hl7.org/fhir/administrative-gender", "female").with_display("Female"),
        Coding::new("http://hl7.org/fhir/administrative-gender", "male").with_display("Male"),
    ]
}

pub async fn session_for(questionnaire: Questionnaire) -> QuestionnaireSession {
    let terminology =
        StaticTerminologyClient::new().with_value_set(GENDER_VALUE_SET, gender_codings());
    let mut session = QuestionnaireSession::new(
        SessionConfig::default(),
        Arc::new(FhirPathEvaluator::new()),
        Arc::new(terminology),
    )
    .expect("default configuration is valid");
    session
        .build_source_questionnaire(questionnaire, None, IndexMap::new())
        .await;
    session
}

pub fn answer(link_id: &str, answer: Answer) -> ItemChange {
    ItemChange::Item(QuestionnaireResponseItem::new(link_id).with_answers(vec![answer]))
}

pub fn clear(link_id: &str) -> ItemChange {
    ItemChange::Item(QuestionnaireResponseItem::new(link_id))
}
