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

//! Response tree merge and empty-answer removal

use super::index::{ItemIndexMap, align, map_index};
use crate::error::QuestionnaireError;
use crate::model::{
    Answer, ItemContainer, Questionnaire, QuestionnaireItem, QuestionnaireResponse,
    QuestionnaireResponseItem,
};

/// All instances of a repeating item after an edit
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatGroup {
    /// linkId shared by the instances
    pub link_id: String,
    /// Instances in display order; empty ones are dropped on merge
    pub items: Vec<QuestionnaireResponseItem>,
}

/// A single committed edit
#[derive(Debug, Clone, PartialEq)]
pub enum ItemChange {
    /// One non-repeating item replaced
    Item(QuestionnaireResponseItem),
    /// The full instance list of a repeating item replaced
    RepeatGroup(RepeatGroup),
}

impl ItemChange {
    /// linkId the change applies to
    pub fn link_id(&self) -> &str {
        match self {
            ItemChange::Item(item) => &item.link_id,
            ItemChange::RepeatGroup(group) => &group.link_id,
        }
    }

    /// Changed items, for walking the answers they carry
    pub fn items(&self) -> &[QuestionnaireResponseItem] {
        match self {
            ItemChange::Item(item) => std::slice::from_ref(item),
            ItemChange::RepeatGroup(group) => &group.items,
        }
    }
}

/// Merge `change` into `response`
///
/// Mutates `response` in place; callers pass a copy and publish it afterwards.
/// Returns `false` when the changed linkId could not be located in the definition
/// or sits below a repeating group, in which case the response is untouched.
pub fn merge_item(
    change: &ItemChange,
    questionnaire: &Questionnaire,
    response: &mut QuestionnaireResponse,
) -> bool {
    merge_into(change, questionnaire.items(), response)
}

fn merge_into<C: ItemContainer>(
    change: &ItemChange,
    definitions: &[QuestionnaireItem],
    container: &mut C,
) -> bool {
    let link_id = change.link_id();
    let index_map = map_index(definitions);

    if let Some(&ordinal) = index_map.get(link_id) {
        replace_in_group(change, ordinal, &index_map, container);
        return true;
    }

    let Some(parent) = definitions.iter().find(|d| d.contains_link_id(link_id)) else {
        log::warn!("merge target '{link_id}' is not part of the questionnaire");
        return false;
    };
    if parent.is_repeating() {
        log::warn!(
            "{}",
            QuestionnaireError::alignment(
                link_id,
                format!(
                    "lies inside repeating group '{}', commit the group instead",
                    parent.link_id
                )
            )
        );
        return false;
    }

    let Some(parent_ordinal) = index_map.get(&parent.link_id).copied() else {
        return false;
    };
    let items = container.items_mut().get_or_insert_with(Vec::new);
    let position = match items.iter().position(|i| i.link_id == parent.link_id) {
        Some(position) => position,
        None => {
            let at = insertion_point(items, parent_ordinal, &index_map);
            items.insert(at, QuestionnaireResponseItem::from_definition(parent));
            at
        }
    };

    let applied = merge_into(change, parent.children(), &mut items[position]);
    if !items[position].has_content() {
        items.remove(position);
    }
    if items.is_empty() {
        *container.items_mut() = None;
    }
    applied
}

/// First position whose item sorts after `ordinal` in definition order
fn insertion_point(
    items: &[QuestionnaireResponseItem],
    ordinal: usize,
    index_map: &ItemIndexMap,
) -> usize {
    items
        .iter()
        .position(|item| index_map.get(&item.link_id).is_some_and(|&o| o > ordinal))
        .unwrap_or(items.len())
}

fn replace_in_group<C: ItemContainer>(
    change: &ItemChange,
    ordinal: usize,
    index_map: &ItemIndexMap,
    container: &mut C,
) {
    let items = container.items_mut().get_or_insert_with(Vec::new);
    match change {
        ItemChange::Item(new_item) => {
            match items.iter().position(|i| i.link_id == new_item.link_id) {
                Some(position) if new_item.has_content() => items[position] = new_item.clone(),
                Some(position) => {
                    items.remove(position);
                }
                None if new_item.has_content() => {
                    let at = insertion_point(items, ordinal, index_map);
                    items.insert(at, new_item.clone());
                }
                None => {}
            }
        }
        ItemChange::RepeatGroup(group) => {
            let at = items
                .iter()
                .position(|i| i.link_id == group.link_id)
                .unwrap_or_else(|| insertion_point(items, ordinal, index_map));
            items.retain(|i| i.link_id != group.link_id);
            let instances = group.items.iter().filter(|i| i.has_content()).cloned();
            items.splice(at..at, instances);
        }
    }
    if items.is_empty() {
        *container.items_mut() = None;
    }
}

/// Copy of `response` without hidden items, unanswered items and blank first answers
///
/// `is_hidden` decides visibility per definition item; descendants of a removed item
/// are removed with it.
pub fn remove_empty_answers(
    questionnaire: &Questionnaire,
    response: &QuestionnaireResponse,
    is_hidden: impl Fn(&QuestionnaireItem) -> bool,
) -> QuestionnaireResponse {
    let items = clean_items(questionnaire.items(), response.items(), &is_hidden);
    QuestionnaireResponse {
        item: (!items.is_empty()).then_some(items),
        ..response.clone()
    }
}

fn clean_items(
    definitions: &[QuestionnaireItem],
    items: &[QuestionnaireResponseItem],
    is_hidden: &impl Fn(&QuestionnaireItem) -> bool,
) -> Vec<QuestionnaireResponseItem> {
    let index_map = map_index(definitions);
    let mut cleaned = Vec::with_capacity(items.len());
    for alignment in align(definitions, items, &index_map) {
        let definition = &definitions[alignment.definition_index];
        if is_hidden(definition) {
            continue;
        }
        cleaned.extend(
            items[alignment.response_range]
                .iter()
                .filter_map(|item| clean_item(definition, item, is_hidden)),
        );
    }
    cleaned
}

fn clean_item(
    definition: &QuestionnaireItem,
    item: &QuestionnaireResponseItem,
    is_hidden: &impl Fn(&QuestionnaireItem) -> bool,
) -> Option<QuestionnaireResponseItem> {
    let mut item = item.clone();

    if item.item.is_some() {
        let children = clean_items(definition.children(), item.children(), is_hidden);
        item.item = (!children.is_empty()).then_some(children);
    }

    if item.answers().first().is_some_and(Answer::is_blank_string) {
        item.answer = None;
    }
    if let Some(answers) = item.answer.as_mut() {
        for answer in answers.iter_mut() {
            if let Some(nested) = answer.item.take() {
                let children = clean_items(definition.children(), &nested, is_hidden);
                answer.item = (!children.is_empty()).then_some(children);
            }
        }
        if answers.is_empty() {
            item.answer = None;
        }
    }

    item.has_content().then_some(item)
}
