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

//! Errors raised while parsing or evaluating an expression

use thiserror::Error;

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Errors that can occur while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    /// Invalid syntax
    #[error("parse error at {position}: {message}")]
    Parse {
        /// Byte offset in the expression
        position: usize,
        /// What was expected
        message: String,
    },

    /// Function name not supported by the evaluator
    #[error("unknown function '{name}'")]
    UnknownFunction {
        /// Function name
        name: String,
    },

    /// `%name` not bound in the context
    #[error("variable %{name} is not defined")]
    UndefinedVariable {
        /// Variable name
        name: String,
    },

    /// Operand of the wrong type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type found
        actual: String,
    },

    /// Any other evaluation failure
    #[error("evaluation error: {message}")]
    Evaluation {
        /// Error message
        message: String,
    },
}

impl ExpressionError {
    pub(crate) fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
