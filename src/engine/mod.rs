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

//! Questionnaire rule engine
//!
//! Pure functions over the definition and response trees. The session layer owns
//! the state these functions read and produce; nothing here performs I/O.

pub mod choice;
pub mod enable_when;
pub mod index;
pub mod merge;
pub mod model;
pub mod recalculation;
pub mod tabs;
pub mod validation;

pub use choice::{
    ChoiceControl, ChoiceOrientation, answer_from_input, choice_control_type,
    choice_orientation, find_in_answer_options, find_in_answer_value_set_codings,
    get_choice_value, map_codings_to_options, update_checkbox_answers,
};
pub use enable_when::{
    EnableWhenOperator, EnableWhenState, initialise_enable_when_items, update_enable_when_item,
};
pub use index::{AlignedResponse, ItemIndexMap, apply_index, map_index};
pub use merge::{ItemChange, RepeatGroup, merge_item, remove_empty_answers};
pub use model::{
    CalculatedExpression, EnableWhenExpression, EnableWhenItem, LaunchContext, QuestionnaireModel,
    Variables,
};
pub use recalculation::{
    RecalculationInput, RecalculationOutcome, answer_from_value, apply_calculated_values,
    evaluate_initial_calculated_expressions, evaluate_initial_enable_when_expressions,
    evaluate_updated_expressions,
};
pub use tabs::{Tab, Tabs, extract_tabs, first_visible_tab, mark_tab_as_complete};
pub use validation::{RegexValidation, validate_item_input, validation_feedback};
