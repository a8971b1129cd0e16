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

//! OperationOutcome resources used to hand recoverable errors to the rendering layer

use serde::{Deserialize, Serialize};

/// Human readable issue details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetails {
    /// Free text
    pub text: String,
}

/// A single issue of an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcomeIssue {
    /// `fatal | error | warning | information`
    pub severity: String,
    /// Issue type code
    pub code: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<IssueDetails>,
}

/// Collection of error, warning or information messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    /// Always `OperationOutcome`
    pub resource_type: String,
    /// The issues
    pub issue: Vec<OperationOutcomeIssue>,
}

/// Create an outcome carrying a single `error` issue
pub fn create_error_outcome(message: impl Into<String>) -> OperationOutcome {
    OperationOutcome {
        resource_type: "OperationOutcome".to_string(),
        issue: vec![OperationOutcomeIssue {
            severity: "error".to_string(),
            code: "invalid".to_string(),
            details: Some(IssueDetails {
                text: message.into(),
            }),
        }],
    }
}

/// Create a `warning` issue with the supplied message
pub fn create_warning_issue(message: impl Into<String>) -> OperationOutcomeIssue {
    OperationOutcomeIssue {
        severity: "warning".to_string(),
        code: "invalid".to_string(),
        details: Some(IssueDetails {
            text: message.into(),
        }),
    }
}
