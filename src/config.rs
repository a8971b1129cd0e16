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

//! Session configuration options

use serde::{Deserialize, Serialize};

use crate::error::{QuestionnaireError, Result};
use crate::fhirpath::DEFAULT_CACHE_CAPACITY;
use crate::terminology::DEFAULT_TERMINOLOGY_SERVER;

/// Configuration of a questionnaire session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Base url of the terminology server used for `answerValueSet` lookups
    pub terminology_server_url: String,

    /// Reject answer commits; the form is rendered for preview only
    pub read_only: bool,

    /// Whether enable-when rules hide items at all
    pub enable_when_activated: bool,

    /// Maximum number of compiled expressions kept by the built-in evaluator
    pub expression_cache_size: usize,
}

impl SessionConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Configuration for read-only previews with every item visible
    pub fn preview() -> Self {
        Self {
            read_only: true,
            enable_when_activated: false,
            ..Self::default()
        }
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.terminology_server_url.trim().is_empty() {
            return Err(QuestionnaireError::invalid_config(
                "terminology server url must not be empty",
            ));
        }
        url::Url::parse(&self.terminology_server_url).map_err(|e| {
            QuestionnaireError::invalid_config(format!(
                "terminology server url '{}': {e}",
                self.terminology_server_url
            ))
        })?;
        if self.expression_cache_size == 0 {
            return Err(QuestionnaireError::invalid_config(
                "expression cache size must be at least 1",
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            terminology_server_url: DEFAULT_TERMINOLOGY_SERVER.to_string(),
            read_only: false,
            enable_when_activated: true,
            expression_cache_size: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Fluent builder for [`SessionConfig`]
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Terminology server base url
    pub fn terminology_server_url(mut self, url: impl Into<String>) -> Self {
        self.config.terminology_server_url = url.into();
        self
    }

    /// Read-only mode
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// Enable-when activation
    pub fn enable_when_activated(mut self, activated: bool) -> Self {
        self.config.enable_when_activated = activated;
        self
    }

    /// Compiled expression cache size
    pub fn expression_cache_size(mut self, size: usize) -> Self {
        self.config.expression_cache_size = size;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
