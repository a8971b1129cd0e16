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

//! Tab structure of tabbed questionnaires

use indexmap::IndexMap;
use serde::Serialize;

use crate::model::{Questionnaire, QuestionnaireItem};

/// State of one tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Position among the tabs
    pub index: usize,
    /// Set by the user through [`mark_tab_as_complete`]
    pub is_complete: bool,
}

/// Tabs keyed by the linkId of their group item, in display order
pub type Tabs = IndexMap<String, Tab>;

fn is_tab(item: &QuestionnaireItem) -> bool {
    item.has_item_control("tab")
}

/// Collect tab groups at the top level or directly inside a top-level group
pub fn extract_tabs(questionnaire: &Questionnaire) -> Tabs {
    let mut tabs = Tabs::new();
    let mut add = |item: &QuestionnaireItem| {
        let index = tabs.len();
        tabs.entry(item.link_id.clone()).or_insert(Tab {
            index,
            is_complete: false,
        });
    };

    for item in questionnaire.items() {
        if is_tab(item) {
            add(item);
        } else {
            item.children().iter().filter(|c| is_tab(c)).for_each(&mut add);
        }
    }
    tabs
}

/// Toggle the completion flag of a tab; unknown linkIds are ignored
pub fn mark_tab_as_complete(tabs: &mut Tabs, link_id: &str) -> bool {
    match tabs.get_mut(link_id) {
        Some(tab) => {
            tab.is_complete = !tab.is_complete;
            true
        }
        None => false,
    }
}

/// Index of the first tab `is_visible` accepts
pub fn first_visible_tab(tabs: &Tabs, is_visible: impl Fn(&str) -> bool) -> Option<usize> {
    tabs.iter()
        .find(|(link_id, _)| is_visible(link_id))
        .map(|(_, tab)| tab.index)
}
