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

//! FHIR resource shapes consumed and produced by the questionnaire engine
//!
//! The engine reads and writes standard FHIR R4 JSON verbatim. Only the parts of
//! `Questionnaire` and `QuestionnaireResponse` that the engine interprets are modelled
//! as typed fields; everything else is carried through untouched.

#![warn(missing_docs)]

pub mod answer;
pub mod extension;
pub mod operation_outcome;
pub mod questionnaire;
pub mod response;

pub use answer::{Answer, AnswerValue, Coding, Quantity, Reference};
pub use extension::{Extension, FhirExpression, extension_urls};
pub use operation_outcome::{
    OperationOutcome, OperationOutcomeIssue, create_error_outcome, create_warning_issue,
};
pub use questionnaire::{
    AnswerOption, EnableBehavior, EnableWhen, ItemType, Questionnaire, QuestionnaireItem,
};
pub use response::{ItemContainer, QuestionnaireResponse, QuestionnaireResponseItem};
