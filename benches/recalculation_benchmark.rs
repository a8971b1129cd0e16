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

//! Recalculation Benchmarks
//!
//! Measures one recalculation pass over a questionnaire with chained variables,
//! calculated expressions and enable-when expressions, with warm and cold
//! expression caches.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use indexmap::IndexMap;
use octofhir_questionnaire::engine::{
    RecalculationInput, evaluate_initial_calculated_expressions, evaluate_updated_expressions,
};
use octofhir_questionnaire::{
    FhirPathEvaluator, Questionnaire, QuestionnaireModel, QuestionnaireResponse,
};
use serde_json::{Value, json};
use std::hint::black_box;

fn variable(name: &str, link_id: &str) -> Value {
    json!({
        "url": "http://hl7.org/fhir/StructureDefinition/variable",
        "valueExpression": {
            "name": name,
            "language": "text/fhirpath",
            "expression": format!("%resource.item.where(linkId='{link_id}').answer.value")
        }
    })
}

/// BMI questionnaire with `copies` extra score items summed into a total
fn generate_questionnaire(copies: usize) -> Questionnaire {
    let mut extensions = vec![variable("weight", "weight"), variable("height", "height")];
    let mut items = vec![
        json!({"linkId": "weight", "type": "integer"}),
        json!({"linkId": "height", "type": "decimal"}),
        json!({"linkId": "bmi", "type": "decimal", "extension": [{
            "url": "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-calculatedExpression",
            "valueExpression": {"language": "text/fhirpath",
                                "expression": "(%weight / (%height * %height)).round(2)"}
        }]}),
        json!({"linkId": "obese-advice", "type": "display", "extension": [{
            "url": "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-enableWhenExpression",
            "valueExpression": {"language": "text/fhirpath",
                                "expression": "%resource.item.where(linkId='bmi').answer.value > 30"}
        }]}),
    ];
    for i in 0..copies {
        let link_id = format!("score-{i}");
        extensions.push(variable(&link_id.replace('-', "_"), &link_id));
        items.push(json!({"linkId": link_id, "type": "integer"}));
    }
    items.push(json!({"linkId": "total", "type": "integer", "extension": [{
        "url": "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-calculatedExpression",
        "valueExpression": {"language": "text/fhirpath",
                            "expression": "%resource.item.where(linkId.startsWith('score-')).answer.value.sum()"}
    }]}));

    serde_json::from_value(json!({
        "resourceType": "Questionnaire",
        "extension": extensions,
        "item": items
    }))
    .expect("benchmark questionnaire")
}

fn generate_response(copies: usize) -> QuestionnaireResponse {
    let mut items = vec![
        json!({"linkId": "weight", "answer": [{"valueInteger": 80}]}),
        json!({"linkId": "height", "answer": [{"valueDecimal": 1.8}]}),
    ];
    for i in 0..copies {
        items.push(json!({"linkId": format!("score-{i}"), "answer": [{"valueInteger": i % 5}]}));
    }
    serde_json::from_value(json!({
        "resourceType": "QuestionnaireResponse",
        "status": "in-progress",
        "item": items
    }))
    .expect("benchmark response")
}

fn bench_recalculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("recalculation");

    for copies in [0usize, 10, 50] {
        let questionnaire = generate_questionnaire(copies);
        let response = generate_response(copies);
        let model = QuestionnaireModel::build(&questionnaire, &IndexMap::new());
        let evaluator = FhirPathEvaluator::new();
        let (calculated, context) = evaluate_initial_calculated_expressions(
            &evaluator,
            &response,
            &model.calculated_expressions,
            &model.variables,
            &model.initial_context,
        );

        group.bench_with_input(BenchmarkId::new("warm_cache", copies), &copies, |b, _| {
            b.iter(|| {
                evaluate_updated_expressions(
                    black_box(&evaluator),
                    RecalculationInput {
                        response: black_box(&response),
                        enable_when_expressions: &model.enable_when_expressions,
                        calculated_expressions: &calculated,
                        variables: &model.variables,
                        context: &context,
                    },
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("cold_cache", copies), &copies, |b, _| {
            b.iter(|| {
                let evaluator = FhirPathEvaluator::new();
                evaluate_updated_expressions(
                    black_box(&evaluator),
                    RecalculationInput {
                        response: black_box(&response),
                        enable_when_expressions: &model.enable_when_expressions,
                        calculated_expressions: &calculated,
                        variables: &model.variables,
                        context: &context,
                    },
                )
            })
        });
    }

    group.finish();
}

fn bench_model_build(c: &mut Criterion) {
    let questionnaire = generate_questionnaire(50);
    c.bench_function("model_build_50_items", |b| {
        b.iter(|| QuestionnaireModel::build(black_box(&questionnaire), &IndexMap::new()))
    });
}

criterion_group!(benches, bench_recalculation, bench_model_build);
criterion_main!(benches);
