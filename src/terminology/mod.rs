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

//! Terminology collaborator
//!
//! The engine only needs one capability from a terminology server: turn a value set
//! into the codings a choice item offers. [`TerminologyClient`] is that seam;
//! [`HttpTerminologyClient`] talks to a FHIR server through `ValueSet/$expand` and
//! [`StaticTerminologyClient`] serves fixed expansions for offline use and tests.
//!
//! Lookups are single-shot with no retries or cancellation. When two lookups for
//! the same url overlap, whichever resolves last wins the cache entry.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use url::Url;

use crate::error::{QuestionnaireError, Result};
use crate::model::{Coding, OperationOutcome};

/// Public terminology server used when none is configured
pub const DEFAULT_TERMINOLOGY_SERVER: &str = "https://tx.fhir.org/r4";

/// Resolves value sets to codings
#[async_trait]
pub trait TerminologyClient: Send + Sync {
    /// Expand the value set at `url`
    async fn resolve_value_set(&self, url: &str) -> Result<Vec<Coding>>;

    /// Expand an inline ValueSet resource
    ///
    /// Value sets that enumerate their concepts are expanded locally; anything else
    /// needs a client that can ask a server.
    async fn expand_value_set(&self, value_set: &Value) -> Result<Vec<Coding>> {
        let codings = codings_from_value_set(value_set);
        if codings.is_empty() {
            let id = value_set.get("id").and_then(Value::as_str).unwrap_or("inline");
            return Err(QuestionnaireError::lookup(
                format!("#{id}"),
                "value set has no expansion or enumerated concepts",
            ));
        }
        Ok(codings)
    }
}

/// Codings of a ValueSet resource
///
/// Reads `expansion.contains` recursively when present, otherwise the concepts
/// enumerated under `compose.include`.
pub fn codings_from_value_set(value_set: &Value) -> Vec<Coding> {
    fn collect_contains(contains: &[Value], out: &mut Vec<Coding>) {
        for entry in contains {
            if entry.get("code").is_some() {
                if let Ok(coding) = serde_json::from_value::<Coding>(strip_nested(entry)) {
                    out.push(coding);
                }
            }
            if let Some(nested) = entry.get("contains").and_then(Value::as_array) {
                collect_contains(nested, out);
            }
        }
    }

    let mut codings = Vec::new();
    if let Some(contains) = value_set.pointer("/expansion/contains").and_then(Value::as_array) {
        collect_contains(contains, &mut codings);
        return codings;
    }

    let includes = value_set
        .pointer("/compose/include")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for include in includes {
        let system = include.get("system").and_then(Value::as_str);
        let concepts = include.get("concept").and_then(Value::as_array).into_iter().flatten();
        for concept in concepts {
            let Some(code) = concept.get("code").and_then(Value::as_str) else {
                continue;
            };
            codings.push(Coding {
                system: system.map(str::to_string),
                version: include.get("version").and_then(Value::as_str).map(str::to_string),
                code: Some(code.to_string()),
                display: concept.get("display").and_then(Value::as_str).map(str::to_string),
                user_selected: None,
            });
        }
    }
    codings
}

/// Keep only the Coding fields of an expansion entry
fn strip_nested(entry: &Value) -> Value {
    let mut entry = entry.clone();
    if let Some(object) = entry.as_object_mut() {
        object.retain(|key, _| matches!(key.as_str(), "system" | "version" | "code" | "display"));
    }
    entry
}

/// Terminology client backed by a FHIR server's `ValueSet/$expand` operation
#[derive(Debug, Clone)]
pub struct HttpTerminologyClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTerminologyClient {
    /// Client for the server rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            QuestionnaireError::invalid_config(format!("terminology server url '{base_url}': {e}"))
        })?;
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Server base url
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn expand_endpoint(&self) -> String {
        format!("{}/ValueSet/$expand", self.base_url)
    }

    async fn post_expand(&self, lookup_key: &str, parameters: Value) -> Result<Vec<Coding>> {
        log::debug!("expanding value set {lookup_key} via {}", self.base_url);

        let response = self
            .client
            .post(self.expand_endpoint())
            .header("Accept", "application/fhir+json")
            .json(&parameters)
            .send()
            .await
            .map_err(|e| QuestionnaireError::lookup(lookup_key, e.to_string()))?;

        if !response.status().is_success() {
            return Err(QuestionnaireError::lookup(
                lookup_key,
                format!("terminology server returned {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| QuestionnaireError::lookup(lookup_key, format!("invalid response: {e}")))?;
        if body.get("resourceType").and_then(Value::as_str) == Some("OperationOutcome") {
            return Err(QuestionnaireError::lookup(lookup_key, outcome_text(&body)));
        }
        Ok(codings_from_value_set(&body))
    }
}

impl Default for HttpTerminologyClient {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TERMINOLOGY_SERVER.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TerminologyClient for HttpTerminologyClient {
    async fn resolve_value_set(&self, url: &str) -> Result<Vec<Coding>> {
        let parameters = json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "url", "valueUri": url}]
        });
        self.post_expand(url, parameters).await
    }

    async fn expand_value_set(&self, value_set: &Value) -> Result<Vec<Coding>> {
        let local = codings_from_value_set(value_set);
        if !local.is_empty() {
            return Ok(local);
        }
        let id = value_set.get("id").and_then(Value::as_str).unwrap_or("inline");
        let parameters = json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "valueSet", "resource": value_set}]
        });
        self.post_expand(&format!("#{id}"), parameters).await
    }
}

fn outcome_text(outcome: &Value) -> String {
    outcome
        .pointer("/issue/0/details/text")
        .or_else(|| outcome.pointer("/issue/0/diagnostics"))
        .and_then(Value::as_str)
        .unwrap_or("terminology server returned an OperationOutcome")
        .to_string()
}

/// Terminology client answering from a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticTerminologyClient {
    value_sets: IndexMap<String, Vec<Coding>>,
}

impl StaticTerminologyClient {
    /// Empty client; every lookup fails
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the codings of `url`
    pub fn with_value_set(mut self, url: impl Into<String>, codings: Vec<Coding>) -> Self {
        self.value_sets.insert(url.into(), codings);
        self
    }
}

#[async_trait]
impl TerminologyClient for StaticTerminologyClient {
    async fn resolve_value_set(&self, url: &str) -> Result<Vec<Coding>> {
        self.value_sets
            .get(url)
            .cloned()
            .ok_or_else(|| QuestionnaireError::lookup(url, "unknown value set"))
    }
}

/// Codings resolved during a session, keyed by value-set url
///
/// Failed lookups are kept as error outcomes so rendering can show them per item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSetCache {
    codings: IndexMap<String, Vec<Coding>>,
    errors: IndexMap<String, OperationOutcome>,
}

impl ValueSetCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached codings of `url`
    pub fn get(&self, url: &str) -> Option<&[Coding]> {
        self.codings.get(url).map(Vec::as_slice)
    }

    /// True if `url` resolved successfully before
    pub fn contains(&self, url: &str) -> bool {
        self.codings.contains_key(url)
    }

    /// Store the codings of `url`, replacing any earlier entry or error
    pub fn insert(&mut self, url: impl Into<String>, codings: Vec<Coding>) {
        let url = url.into();
        self.errors.shift_remove(&url);
        self.codings.insert(url, codings);
    }

    /// Append `coding` to the entry of `url` unless an equal coding is present
    pub fn add_coding(&mut self, url: &str, coding: Coding) -> bool {
        let codings = self.codings.entry(url.to_string()).or_default();
        if codings.iter().any(|c| c.matches(&coding)) {
            return false;
        }
        codings.push(coding);
        true
    }

    /// Record a failed lookup
    pub fn record_error(&mut self, url: impl Into<String>, outcome: OperationOutcome) {
        self.errors.insert(url.into(), outcome);
    }

    /// Error recorded for `url`
    pub fn error(&self, url: &str) -> Option<&OperationOutcome> {
        self.errors.get(url)
    }

    /// All cached entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Coding])> {
        self.codings.iter().map(|(url, codings)| (url.as_str(), codings.as_slice()))
    }

    /// Number of resolved urls
    pub fn len(&self) -> usize {
        self.codings.len()
    }

    /// True if nothing has been resolved
    pub fn is_empty(&self) -> bool {
        self.codings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::create_error_outcome;
    use pretty_assertions::assert_eq;

    #[test]
    fn expansion_contains_is_read_recursively() {
        let value_set = json!({
            "resourceType": "ValueSet",
            "expansion": {"contains": [
                {"system": "http://loinc.org", "code": "LA33-6", "display": "Yes"},
                {"abstract": true, "display": "Grouped", "contains": [
                    {"system": "http://loinc.org", "code": "LA32-8", "display": "No"}
                ]}
            ]}
        });
        let codes: Vec<_> = codings_from_value_set(&value_set)
            .into_iter()
            .filter_map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["LA33-6", "LA32-8"]);
    }

    #[test]
    fn compose_concepts_are_enumerated() {
        let value_set = json!({
            "resourceType": "ValueSet",
            "id": "smoking",
            "compose": {"include": [{
                "system": "http://example.org/smoking",
                "concept": [{"code": "never", "display": "Never"}, {"code": "former"}]
            }]}
        });
        let codings = codings_from_value_set(&value_set);
        assert_eq!(codings.len(), 2);
        assert_eq!(
            codings[0],
            Coding::new("http://example.org/smoking", "never").with_display("Never")
        );
    }

    #[tokio::test]
    async fn static_client_and_default_inline_expansion() {
        let client = StaticTerminologyClient::new()
            .with_value_set("http://example.org/vs", vec![Coding::new("s", "a")]);
        assert_eq!(client.resolve_value_set("http://example.org/vs").await.unwrap().len(), 1);
        assert!(matches!(
            client.resolve_value_set("http://example.org/other").await,
            Err(QuestionnaireError::Lookup { .. })
        ));
        assert!(client.expand_value_set(&json!({"resourceType": "ValueSet"})).await.is_err());
    }

    #[test]
    fn cache_insert_clears_error_and_dedupes_codings() {
        let mut cache = ValueSetCache::new();
        cache.record_error("vs", create_error_outcome("offline"));
        assert!(cache.error("vs").is_some());

        cache.insert("vs", vec![Coding::new("s", "a")]);
        assert!(cache.error("vs").is_none());
        assert!(!cache.add_coding("vs", Coding::new("s", "a")));
        assert!(cache.add_coding("vs", Coding::new("s", "b")));
        assert_eq!(cache.get("vs").map(<[Coding]>::len), Some(2));
    }

    #[test]
    fn http_client_rejects_invalid_base_url() {
        assert!(HttpTerminologyClient::new("not a url").is_err());
        let client = HttpTerminologyClient::new("https://tx.example.org/r4/").unwrap();
        assert_eq!(client.expand_endpoint(), "https://tx.example.org/r4/ValueSet/$expand");
    }
}
