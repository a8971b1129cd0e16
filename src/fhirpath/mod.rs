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

//! FHIRPath subset used by questionnaire expressions
//!
//! Expressions are parsed once (see [`FhirPathEvaluator::compile`]) and evaluated
//! against a JSON input with named variables supplied through a [`FhirPathContext`].
//! The engine only depends on the [`ExpressionEvaluator`] trait, so a different
//! FHIRPath implementation can be plugged in.

pub mod error;
pub mod evaluator;
mod functions;
pub mod operators;
pub mod parser;
pub mod tokenizer;
pub mod value;

use indexmap::IndexMap;
use serde_json::Value;

pub use error::{ExpressionError, ExpressionResult};
pub use evaluator::{DEFAULT_CACHE_CAPACITY, FhirPathEvaluator};
pub use parser::{ExpressionNode, parse_expression};
pub use value::FhirPathValue;

/// Named variables visible to expressions as `%name`
pub type FhirPathContext = IndexMap<String, Vec<FhirPathValue>>;

/// Evaluates an expression against an input resource
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` with `input` as the root and `context` providing `%` variables
    fn evaluate(
        &self,
        expression: &str,
        input: &Value,
        context: &FhirPathContext,
    ) -> ExpressionResult<Vec<FhirPathValue>>;
}
