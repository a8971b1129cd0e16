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

//! Alignment of response items with definition items
//!
//! Response items are a sparse, ordered subsequence of the definition items at the
//! same level, with repeat instances appearing as consecutive items that share a
//! linkId. [`align`] is a merge-join over the two sequences: each response run is
//! matched to the definition ordinal of its linkId and the definition cursor only
//! ever moves forward, skipping definitions with no response (hidden or unanswered
//! items). Response items that cannot be placed are reported and treated as absent.

use indexmap::IndexMap;
use std::ops::Range;

use crate::error::QuestionnaireError;
use crate::model::{QuestionnaireItem, QuestionnaireResponseItem};

/// Ordinal position of each definition item at one tree level, keyed by linkId
pub type ItemIndexMap = IndexMap<String, usize>;

/// Build the ordinal index of a definition level
pub fn map_index(definition_items: &[QuestionnaireItem]) -> ItemIndexMap {
    definition_items
        .iter()
        .enumerate()
        .map(|(ordinal, item)| (item.link_id.clone(), ordinal))
        .collect()
}

/// A run of response items matched to one definition item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    /// Position in the definition items
    pub definition_index: usize,
    /// Matching slice of the response items
    pub response_range: Range<usize>,
}

/// Merge-join `response_items` against `definition_items`
pub fn align(
    definition_items: &[QuestionnaireItem],
    response_items: &[QuestionnaireResponseItem],
    index_map: &ItemIndexMap,
) -> Vec<Alignment> {
    let mut alignments = Vec::new();
    let mut cursor = 0;
    let mut position = 0;

    while position < response_items.len() {
        let link_id = &response_items[position].link_id;
        let ordinal = match index_map.get(link_id) {
            Some(&ordinal) if ordinal >= cursor && ordinal < definition_items.len() => ordinal,
            Some(_) => {
                log::warn!(
                    "{}",
                    QuestionnaireError::alignment(link_id, "appears out of definition order")
                );
                position += 1;
                continue;
            }
            None => {
                log::warn!(
                    "{}",
                    QuestionnaireError::alignment(link_id, "no definition item at this level")
                );
                position += 1;
                continue;
            }
        };

        let start = position;
        while position < response_items.len() && response_items[position].link_id == *link_id {
            position += 1;
        }
        alignments.push(Alignment {
            definition_index: ordinal,
            response_range: start..position,
        });
        cursor = ordinal + 1;
    }

    alignments
}

/// Response content matched to one definition item
#[derive(Debug, Clone, PartialEq)]
pub enum AlignedResponse {
    /// A non-repeating item
    Single(QuestionnaireResponseItem),
    /// All instances of a repeating item, possibly none
    Repeated(Vec<QuestionnaireResponseItem>),
}

/// Group response items positionally by definition item
///
/// The result has one slot per definition item. Repeating definitions always get a
/// [`AlignedResponse::Repeated`] slot; other definitions without a response are `None`.
pub fn apply_index(
    definition_items: &[QuestionnaireItem],
    response_items: &[QuestionnaireResponseItem],
    index_map: &ItemIndexMap,
) -> Vec<Option<AlignedResponse>> {
    let mut slots: Vec<Option<AlignedResponse>> = definition_items
        .iter()
        .map(|definition| {
            definition
                .is_repeating()
                .then(|| AlignedResponse::Repeated(Vec::new()))
        })
        .collect();

    for alignment in align(definition_items, response_items, index_map) {
        let definition = &definition_items[alignment.definition_index];
        let run = &response_items[alignment.response_range];
        slots[alignment.definition_index] = if definition.is_repeating() {
            Some(AlignedResponse::Repeated(run.to_vec()))
        } else {
            if run.len() > 1 {
                log::warn!(
                    "{}",
                    QuestionnaireError::alignment(
                        &definition.link_id,
                        format!(
                            "{} instances of a non-repeating item, keeping the first",
                            run.len()
                        )
                    )
                );
            }
            run.first().cloned().map(AlignedResponse::Single)
        };
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Answer, ItemType};
    use pretty_assertions::assert_eq;

    fn definitions() -> Vec<QuestionnaireItem> {
        let mut b = QuestionnaireItem::new("B", ItemType::Group);
        b.repeats = Some(true);
        vec![
            QuestionnaireItem::new("A", ItemType::String),
            b,
            QuestionnaireItem::new("C", ItemType::String),
        ]
    }

    fn answered(link_id: &str, text: &str) -> QuestionnaireResponseItem {
        QuestionnaireResponseItem::new(link_id).with_answers(vec![Answer::string(text)])
    }

    #[test]
    fn repeat_instances_are_grouped() {
        let defs = definitions();
        let response = vec![
            answered("A", "a"),
            answered("B", "b1"),
            answered("B", "b2"),
            answered("C", "c"),
        ];
        let aligned = apply_index(&defs, &response, &map_index(&defs));
        assert_eq!(
            aligned,
            vec![
                Some(AlignedResponse::Single(response[0].clone())),
                Some(AlignedResponse::Repeated(vec![
                    response[1].clone(),
                    response[2].clone()
                ])),
                Some(AlignedResponse::Single(response[3].clone())),
            ]
        );
    }

    #[test]
    fn gaps_and_foreign_items_are_tolerated() {
        let defs = definitions();
        let response = vec![answered("X", "?"), answered("C", "c"), answered("A", "late")];
        let alignments = align(&defs, &response, &map_index(&defs));
        assert_eq!(
            alignments,
            vec![Alignment {
                definition_index: 2,
                response_range: 1..2
            }]
        );

        let aligned = apply_index(&defs, &response, &map_index(&defs));
        assert_eq!(aligned[0], None);
        assert_eq!(aligned[1], Some(AlignedResponse::Repeated(Vec::new())));
    }
}
