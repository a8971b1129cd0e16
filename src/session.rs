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

//! Questionnaire session state
//!
//! A [`QuestionnaireSession`] owns everything one form-editing session needs: the
//! source questionnaire, the rule tables derived from it, the live response and
//! the value-set cache. It is created empty, filled by
//! [`build_source_questionnaire`](QuestionnaireSession::build_source_questionnaire)
//! and emptied again by
//! [`destroy_source_questionnaire`](QuestionnaireSession::destroy_source_questionnaire).
//!
//! Mutations that touch the response build the next [`SessionState`] from a copy
//! of the current one and replace it in one assignment, so a change that fails
//! half way leaves the published state untouched.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::config::SessionConfig;
use crate::engine::choice::map_codings_to_options;
use crate::engine::enable_when::{
    EnableWhenState, initialise_enable_when_items, update_enable_when_item,
};
use crate::engine::merge::{ItemChange, merge_item, remove_empty_answers};
use crate::engine::model::QuestionnaireModel;
use crate::engine::recalculation::{
    RESOURCE_VARIABLE, RecalculationInput, answer_from_value, apply_calculated_values,
    evaluate_initial_calculated_expressions, evaluate_initial_enable_when_expressions,
    evaluate_updated_expressions,
};
use crate::engine::tabs::{Tabs, first_visible_tab, mark_tab_as_complete};
use crate::engine::validation::validate_item_input;
use crate::error::{QuestionnaireError, Result};
use crate::fhirpath::{ExpressionEvaluator, FhirPathContext, FhirPathEvaluator, FhirPathValue};
use crate::model::{
    Answer, AnswerOption, Coding, OperationOutcome, Questionnaire, QuestionnaireItem,
    QuestionnaireResponse, QuestionnaireResponseItem, create_error_outcome,
};
use crate::terminology::{HttpTerminologyClient, TerminologyClient, ValueSetCache};

/// Snapshot of a session
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Questionnaire being answered
    pub source_questionnaire: Questionnaire,
    /// Rule tables and their live results
    pub model: QuestionnaireModel,
    /// Current response
    pub updatable_response: QuestionnaireResponse,
    /// Selected tab
    pub current_tab_index: usize,
    /// Whether enable-when rules hide items
    pub enable_when_is_activated: bool,
    /// Whether answer commits are rejected
    pub read_only: bool,
    /// Variables seen by expressions
    pub fhir_path_context: FhirPathContext,
    /// Resolved value sets
    pub value_sets: ValueSetCache,
    /// Set once a questionnaire has been built
    pub is_built: bool,
}

impl SessionState {
    fn empty(config: &SessionConfig) -> Self {
        Self {
            enable_when_is_activated: config.enable_when_activated,
            read_only: config.read_only,
            ..Self::default()
        }
    }

    fn enable_when(&self) -> EnableWhenState<'_> {
        EnableWhenState {
            items: &self.model.enable_when_items,
            expressions: &self.model.enable_when_expressions,
            is_activated: self.enable_when_is_activated,
        }
    }
}

/// Expression and state engine for one questionnaire form
pub struct QuestionnaireSession {
    config: SessionConfig,
    evaluator: Arc<dyn ExpressionEvaluator>,
    terminology: Arc<dyn TerminologyClient>,
    state: SessionState,
}

impl std::fmt::Debug for QuestionnaireSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionnaireSession")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl QuestionnaireSession {
    /// Create an empty session with explicit collaborators
    pub fn new(
        config: SessionConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
        terminology: Arc<dyn TerminologyClient>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: SessionState::empty(&config),
            config,
            evaluator,
            terminology,
        })
    }

    /// Create a session using the built-in evaluator and an HTTP terminology client
    pub fn from_config(config: SessionConfig) -> Result<Self> {
        let evaluator = Arc::new(FhirPathEvaluator::with_cache_capacity(
            config.expression_cache_size,
        ));
        let terminology = Arc::new(HttpTerminologyClient::new(&config.terminology_server_url)?);
        Self::new(config, evaluator, terminology)
    }

    /// [`from_config`](Self::from_config) with the default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::from_config(SessionConfig::default())
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current snapshot
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current response
    pub fn updatable_response(&self) -> &QuestionnaireResponse {
        &self.state.updatable_response
    }

    /// Questionnaire being answered
    pub fn source_questionnaire(&self) -> &Questionnaire {
        &self.state.source_questionnaire
    }

    /// Rule tables of the current questionnaire
    pub fn model(&self) -> &QuestionnaireModel {
        &self.state.model
    }

    /// Load `questionnaire` and optionally a prior `response`
    ///
    /// Builds the rule tables, expands contained value sets, initialises enable-when
    /// state and calculated values from the response and selects the first visible
    /// tab. Any previous session content is replaced.
    pub async fn build_source_questionnaire(
        &mut self,
        questionnaire: Questionnaire,
        response: Option<QuestionnaireResponse>,
        additional_variables: IndexMap<String, Value>,
    ) {
        let model = QuestionnaireModel::build(&questionnaire, &additional_variables);
        let value_sets = self.expand_contained_value_sets(&model).await;
        let response =
            response.unwrap_or_else(|| QuestionnaireResponse::for_questionnaire(&questionnaire));

        let mut next = SessionState {
            fhir_path_context: model.initial_context.clone(),
            source_questionnaire: questionnaire,
            model,
            value_sets,
            is_built: true,
            ..SessionState::empty(&self.config)
        };
        next.updatable_response = self.initialise_from_response(&mut next, response);
        next.current_tab_index = first_visible_tab_index(&next);

        log::debug!(
            "built questionnaire {} with {} tabs",
            next.source_questionnaire
                .canonical()
                .unwrap_or_else(|| "(no url)".to_string()),
            next.model.tabs.len()
        );
        self.state = next;
    }

    async fn expand_contained_value_sets(&self, model: &QuestionnaireModel) -> ValueSetCache {
        let lookups = model
            .contained_value_sets
            .iter()
            .map(|(reference, value_set)| async move {
                (reference, self.terminology.expand_value_set(value_set).await)
            });

        let mut cache = ValueSetCache::new();
        for (reference, result) in join_all(lookups).await {
            match result {
                Ok(codings) => cache.insert(reference.clone(), codings),
                Err(error) => {
                    log::warn!("contained value set {reference}: {error}");
                    cache.record_error(reference.clone(), create_error_outcome(error.to_string()));
                }
            }
        }
        cache
    }

    /// Evaluate calculated and enable-when state for a response that was not typed
    /// in by the user, returning the response with calculated values written into it
    fn initialise_from_response(
        &self,
        state: &mut SessionState,
        mut response: QuestionnaireResponse,
    ) -> QuestionnaireResponse {
        let evaluator = self.evaluator.as_ref();
        let (calculated, context) = evaluate_initial_calculated_expressions(
            evaluator,
            &response,
            &state.model.calculated_expressions,
            &state.model.variables,
            &state.fhir_path_context,
        );
        apply_calculated_values(&state.source_questionnaire, &mut response, &calculated);

        state.model.enable_when_expressions = evaluate_initial_enable_when_expressions(
            evaluator,
            &response,
            &state.model.enable_when_expressions,
            &context,
        );
        initialise_enable_when_items(&mut state.model.enable_when_items, &response);
        state.model.calculated_expressions = calculated;
        state.fhir_path_context = context;
        response
    }

    /// Reset the session to its empty state
    pub fn destroy_source_questionnaire(&mut self) {
        self.state = SessionState::empty(&self.config);
    }

    /// Select tab `index`; out-of-range indices are ignored
    pub fn switch_tab(&mut self, index: usize) -> bool {
        if index >= self.state.model.tabs.len() {
            log::debug!("ignoring switch to missing tab {index}");
            return false;
        }
        self.state.current_tab_index = index;
        true
    }

    /// Toggle the completion flag of the tab `link_id`
    pub fn mark_tab_as_complete(&mut self, link_id: &str) -> bool {
        mark_tab_as_complete(&mut self.state.model.tabs, link_id)
    }

    /// Tabs with their completion flags
    pub fn tabs(&self) -> &Tabs {
        &self.state.model.tabs
    }

    /// Record new answers of the trigger `link_id`; returns the items that toggled
    pub fn update_enable_when_item(
        &mut self,
        link_id: &str,
        answers: &[Answer],
    ) -> Vec<String> {
        let model = &mut self.state.model;
        update_enable_when_item(
            &mut model.enable_when_items,
            &model.enable_when_linked_questions,
            link_id,
            answers,
        )
    }

    /// Switch enable-when hiding on or off
    pub fn toggle_enable_when_activation(&mut self, is_activated: bool) {
        self.state.enable_when_is_activated = is_activated;
    }

    /// Re-evaluate variables and expressions against `response`
    ///
    /// The refreshed context is always kept; expression tables are only replaced when
    /// something changed. Returns whether anything changed.
    pub fn update_expressions(&mut self, response: &QuestionnaireResponse) -> bool {
        let outcome = evaluate_updated_expressions(
            self.evaluator.as_ref(),
            RecalculationInput {
                response,
                enable_when_expressions: &self.state.model.enable_when_expressions,
                calculated_expressions: &self.state.model.calculated_expressions,
                variables: &self.state.model.variables,
                context: &self.state.fhir_path_context,
            },
        );
        if outcome.is_updated {
            self.state.model.enable_when_expressions = outcome.enable_when_expressions;
            self.state.model.calculated_expressions = outcome.calculated_expressions;
        }
        self.state.fhir_path_context = outcome.context;
        outcome.is_updated
    }

    /// Commit one answer change
    ///
    /// Merges the change into a copy of the response, updates enable-when state of
    /// the items it triggers, recalculates expressions, writes changed calculated
    /// values into the response and publishes the result. Returns `false` and leaves
    /// the session untouched when the session is read-only or the change cannot be
    /// placed.
    pub fn commit_answer(&mut self, change: ItemChange) -> bool {
        if !self.state.is_built {
            log::warn!(
                "answer for '{}' committed before a questionnaire was built",
                change.link_id()
            );
            return false;
        }
        if self.state.read_only {
            log::debug!("read-only session, ignoring answer for '{}'", change.link_id());
            return false;
        }

        let mut next = self.state.clone();
        if !merge_item(&change, &next.source_questionnaire, &mut next.updatable_response) {
            return false;
        }

        // The definition subtree also covers triggers the change removed
        let mut changed_link_ids = IndexSet::new();
        changed_link_ids.insert(change.link_id().to_string());
        if let Some(definition) = next.source_questionnaire.find_item(change.link_id()) {
            definition.walk(&mut |i| {
                changed_link_ids.insert(i.link_id.clone());
            });
        }
        for item in change.items() {
            item.walk(&mut |i| {
                changed_link_ids.insert(i.link_id.clone());
            });
        }
        refresh_triggers(&mut next, &changed_link_ids);

        let outcome = evaluate_updated_expressions(
            self.evaluator.as_ref(),
            RecalculationInput {
                response: &next.updatable_response,
                enable_when_expressions: &next.model.enable_when_expressions,
                calculated_expressions: &next.model.calculated_expressions,
                variables: &next.model.variables,
                context: &next.fhir_path_context,
            },
        );
        next.model.enable_when_expressions = outcome.enable_when_expressions;
        next.model.calculated_expressions = outcome.calculated_expressions;
        next.fhir_path_context = outcome.context;

        let calculated_link_ids = apply_calculated_values(
            &next.source_questionnaire,
            &mut next.updatable_response,
            &next.model.calculated_expressions,
        );
        refresh_triggers(&mut next, &calculated_link_ids);

        self.state = next;
        true
    }

    /// Adopt a pre-populated response
    ///
    /// Calculated expressions are evaluated against `populated_response` and written
    /// into it, enable-when state is re-initialised, and the first visible tab is
    /// selected unless `persist_tab_index` is set. The returned response is also
    /// published as the session's response.
    pub fn update_populated_properties(
        &mut self,
        populated_response: QuestionnaireResponse,
        persist_tab_index: bool,
    ) -> QuestionnaireResponse {
        let mut next = self.state.clone();
        let response = self.initialise_from_response(&mut next, populated_response);
        next.updatable_response = response.clone();
        if !persist_tab_index {
            next.current_tab_index = first_visible_tab_index(&next);
        }
        self.state = next;
        response
    }

    /// Replace the cached codings of `url`
    pub fn add_coding_to_cache(&mut self, url: impl Into<String>, codings: Vec<Coding>) {
        self.state.value_sets.insert(url, codings);
    }

    /// Codings of `url`, looked up once and cached for the session
    ///
    /// Local references (`#id`) resolve against contained value sets. A failed
    /// lookup is stored as an error outcome, see [`value_set_error`](Self::value_set_error).
    pub async fn resolve_value_set(&mut self, url: &str) -> Result<Vec<Coding>> {
        if let Some(codings) = self.state.value_sets.get(url) {
            return Ok(codings.to_vec());
        }

        let result = match self.state.model.contained_value_sets.get(url) {
            Some(value_set) => self.terminology.expand_value_set(value_set).await,
            None if url.starts_with('#') => Err(QuestionnaireError::lookup(
                url,
                "no contained value set with this id",
            )),
            None => self.terminology.resolve_value_set(url).await,
        };

        match result {
            Ok(codings) => {
                log::debug!("resolved value set {url}: {} codings", codings.len());
                self.state.value_sets.insert(url, codings.clone());
                Ok(codings)
            }
            Err(error) => {
                log::warn!("{error}");
                self.state
                    .value_sets
                    .record_error(url, create_error_outcome(error.to_string()));
                Err(error)
            }
        }
    }

    /// Error recorded by the last failed lookup of `url`
    pub fn value_set_error(&self, url: &str) -> Option<&OperationOutcome> {
        self.state.value_sets.error(url)
    }

    /// Answer options of `link_id`
    ///
    /// An answer expression takes precedence, then `answerOption`, then the cached
    /// codings of `answerValueSet`. Value sets that have not been resolved yet yield
    /// no options.
    pub fn answer_options(&self, link_id: &str) -> Vec<AnswerOption> {
        let Some(item) = self.state.source_questionnaire.find_item(link_id) else {
            return Vec::new();
        };

        if let Some(answer_expression) = self.state.model.answer_expressions.get(link_id) {
            let response_json = self.state.updatable_response.to_json();
            let mut context = self.state.fhir_path_context.clone();
            context.insert(
                RESOURCE_VARIABLE.to_string(),
                vec![FhirPathValue::Resource(response_json.clone())],
            );
            match self
                .evaluator
                .evaluate(&answer_expression.expression, &response_json, &context)
            {
                Ok(values) => {
                    return values
                        .iter()
                        .filter_map(|value| answer_from_value(value, item.item_type))
                        .map(|answer| AnswerOption::from(answer.value))
                        .collect();
                }
                Err(error) => log::warn!(
                    "answer expression of '{link_id}': {}",
                    QuestionnaireError::expression(&answer_expression.expression, error)
                ),
            }
        }

        if let Some(options) = &item.answer_option {
            return options.clone();
        }

        self.state
            .model
            .value_set_urls
            .get(link_id)
            .and_then(|url| self.state.value_sets.get(url))
            .map(map_codings_to_options)
            .unwrap_or_default()
    }

    /// Validation feedback for free-text `input` on `link_id`
    pub fn validate_input(&self, link_id: &str, input: &str) -> Option<String> {
        let item = self.state.source_questionnaire.find_item(link_id)?;
        validate_item_input(item, input)
    }

    /// True if `item` is hidden by definition or by enable-when rules
    pub fn is_hidden(&self, item: &QuestionnaireItem) -> bool {
        self.state.enable_when().is_hidden(item)
    }

    /// Visibility of every item keyed by linkId
    pub fn visibility(&self) -> IndexMap<String, bool> {
        self.state
            .enable_when()
            .visibility(&self.state.source_questionnaire)
    }

    /// Current value of every calculated expression keyed by linkId
    pub fn calculated_values(&self) -> IndexMap<String, Option<FhirPathValue>> {
        self.state
            .model
            .calculated_expressions
            .iter()
            .map(|(link_id, calculated)| (link_id.clone(), calculated.value.clone()))
            .collect()
    }

    /// Current response without hidden and unanswered items
    pub fn clean_response(&self) -> QuestionnaireResponse {
        let enable_when = self.state.enable_when();
        remove_empty_answers(
            &self.state.source_questionnaire,
            &self.state.updatable_response,
            |item| enable_when.is_hidden(item),
        )
    }

    /// Response item of `link_id`, if answered
    pub fn response_item(&self, link_id: &str) -> Option<&QuestionnaireResponseItem> {
        self.state.updatable_response.find_item(link_id)
    }
}

/// Push the current answers of every trigger in `link_ids` into the enable-when tables
fn refresh_triggers<'a>(state: &mut SessionState, link_ids: impl IntoIterator<Item = &'a String>) {
    for link_id in link_ids {
        if !state.model.is_trigger(link_id) {
            continue;
        }
        let answers = state.updatable_response.answers_for(link_id);
        update_enable_when_item(
            &mut state.model.enable_when_items,
            &state.model.enable_when_linked_questions,
            link_id,
            &answers,
        );
    }
}

fn first_visible_tab_index(state: &SessionState) -> usize {
    let visibility = state.enable_when().visibility(&state.source_questionnaire);
    first_visible_tab(&state.model.tabs, |link_id| {
        visibility.get(link_id).copied().unwrap_or(true)
    })
    .unwrap_or(0)
}
