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

//! Error types for the questionnaire engine
//!
//! Nothing in the engine is fatal to a form session. Every variant here degrades a
//! single item's behaviour; callers mostly see them through logs and through
//! [`QuestionnaireModel::diagnostics`](crate::engine::model::QuestionnaireModel).

use thiserror::Error;

use crate::fhirpath::ExpressionError;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, QuestionnaireError>;

/// Errors raised by the questionnaire engine
#[derive(Debug, Clone, Error)]
pub enum QuestionnaireError {
    /// Malformed enable-when, calculated expression or other rule extension on an item
    #[error("invalid rule on item '{link_id}': {message}")]
    RuleDefinition {
        /// Item carrying the rule
        link_id: String,
        /// What is wrong with it
        message: String,
    },

    /// The expression evaluator rejected or failed an expression
    #[error("failed to evaluate '{expression}': {source}")]
    ExpressionEvaluation {
        /// Expression text
        expression: String,
        /// Underlying evaluator error
        #[source]
        source: ExpressionError,
    },

    /// A terminology lookup failed
    #[error("lookup of '{url}' failed: {message}")]
    Lookup {
        /// Value set url
        url: String,
        /// Failure description
        message: String,
    },

    /// A response item cannot be aligned with the definition tree
    #[error("response item '{link_id}' does not align with the questionnaire: {message}")]
    AlignmentAnomaly {
        /// linkId of the offending response item
        link_id: String,
        /// Where the alignment broke
        message: String,
    },

    /// JSON (de)serialization failure
    #[error("JSON error: {message}")]
    Json {
        /// serde_json message
        message: String,
    },

    /// Invalid session configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong
        message: String,
    },
}

impl QuestionnaireError {
    /// Create a rule definition error
    pub fn rule_definition(link_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleDefinition {
            link_id: link_id.into(),
            message: message.into(),
        }
    }

    /// Create an expression evaluation error
    pub fn expression(expression: impl Into<String>, source: ExpressionError) -> Self {
        Self::ExpressionEvaluation {
            expression: expression.into(),
            source,
        }
    }

    /// Create a lookup error
    pub fn lookup(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lookup {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an alignment anomaly
    pub fn alignment(link_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AlignmentAnomaly {
            link_id: link_id.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for QuestionnaireError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json {
            message: error.to_string(),
        }
    }
}
