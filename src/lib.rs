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

//! Expression and state engine for FHIR SDC questionnaires
//!
//! Keeps a `QuestionnaireResponse` consistent with the rules declared on its
//! `Questionnaire`: enable-when conditions and expressions, calculated expressions,
//! answer expressions and value-set backed answer options.
//!
//! ```no_run
//! use indexmap::IndexMap;
//! use octofhir_questionnaire::{
//!     Answer, ItemChange, Questionnaire, QuestionnaireResponseItem, QuestionnaireSession,
//! };
//!
//! # async fn run(questionnaire: Questionnaire) -> octofhir_questionnaire::Result<()> {
//! let mut session = QuestionnaireSession::with_defaults()?;
//! session
//!     .build_source_questionnaire(questionnaire, None, IndexMap::new())
//!     .await;
//!
//! let weight = QuestionnaireResponseItem::new("weight").with_answers(vec![Answer::integer(70)]);
//! session.commit_answer(ItemChange::Item(weight));
//! println!("{:?}", session.calculated_values());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fhirpath;
pub mod model;
pub mod session;
pub mod terminology;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use engine::{ItemChange, QuestionnaireModel, RepeatGroup};
pub use error::{QuestionnaireError, Result};
pub use fhirpath::{ExpressionEvaluator, FhirPathContext, FhirPathEvaluator, FhirPathValue};
pub use model::{
    Answer, AnswerOption, AnswerValue, Coding, ItemType, Questionnaire, QuestionnaireItem,
    QuestionnaireResponse, QuestionnaireResponseItem,
};
pub use session::{QuestionnaireSession, SessionState};
pub use terminology::{
    HttpTerminologyClient, StaticTerminologyClient, TerminologyClient, ValueSetCache,
};
