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

//! Tree-walking evaluator with a parsed-expression cache

use chrono::{DateTime, NaiveDate, NaiveTime};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use super::error::{ExpressionError, ExpressionResult};
use super::functions::{self, truth};
use super::operators::{
    arithmetic, collection_equals, collection_equivalent, comparison, value_equals,
};
use super::parser::{BinaryOperator, ExpressionNode, LiteralValue, UnaryOperator, parse_expression};
use super::value::FhirPathValue;
use super::{ExpressionEvaluator, FhirPathContext};

/// Default number of parsed expressions kept in the cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// FHIR type suffixes of choice elements, longest match first
const CHOICE_TYPES: &[&str] = &[
    "CodeableConcept",
    "Attachment",
    "Reference",
    "Canonical",
    "DateTime",
    "Quantity",
    "Boolean",
    "Decimal",
    "Integer",
    "Instant",
    "Coding",
    "String",
    "Date",
    "Time",
    "Code",
    "Uri",
    "Url",
];

/// FHIRPath evaluator for questionnaire expressions
///
/// Parsed expressions are cached by source text. When the cache reaches its
/// capacity it is cleared wholesale.
pub struct FhirPathEvaluator {
    cache: RwLock<FxHashMap<String, Arc<ExpressionNode>>>,
    cache_capacity: usize,
}

impl FhirPathEvaluator {
    /// Create an evaluator with the default cache capacity
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create an evaluator caching at most `cache_capacity` parsed expressions
    pub fn with_cache_capacity(cache_capacity: usize) -> Self {
        Self {
            cache: RwLock::new(FxHashMap::default()),
            cache_capacity,
        }
    }

    /// Parse an expression, reusing a cached AST when available
    pub fn compile(&self, expression: &str) -> ExpressionResult<Arc<ExpressionNode>> {
        if let Some(ast) = self.cache.read().get(expression) {
            return Ok(Arc::clone(ast));
        }

        let ast = Arc::new(parse_expression(expression)?);
        if self.cache_capacity > 0 {
            let mut cache = self.cache.write();
            if cache.len() >= self.cache_capacity {
                log::debug!("expression cache full ({} entries), clearing", cache.len());
                cache.clear();
            }
            cache.insert(expression.to_string(), Arc::clone(&ast));
        }
        Ok(ast)
    }

    /// Number of cached expressions
    pub fn cached_expressions(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for FhirPathEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEvaluator for FhirPathEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        input: &Value,
        context: &FhirPathContext,
    ) -> ExpressionResult<Vec<FhirPathValue>> {
        let ast = self.compile(expression)?;
        let root = FhirPathValue::from_json(input);
        let interpreter = Interpreter {
            context,
            root: &root,
        };
        interpreter.eval(
            &ast,
            Frame {
                focus: &root,
                index: None,
                total: None,
            },
        )
    }
}

/// Evaluation state for one call
pub(super) struct Interpreter<'a> {
    context: &'a FhirPathContext,
    root: &'a [FhirPathValue],
}

/// Focus and iteration variables for the expression being evaluated
#[derive(Clone, Copy)]
pub(super) struct Frame<'f> {
    /// `$this` and the input of bare identifiers
    pub focus: &'f [FhirPathValue],
    /// `$index`
    pub index: Option<usize>,
    /// `$total`
    pub total: Option<&'f [FhirPathValue]>,
}

impl Interpreter<'_> {
    pub(super) fn eval(
        &self,
        node: &ExpressionNode,
        frame: Frame<'_>,
    ) -> ExpressionResult<Vec<FhirPathValue>> {
        match node {
            ExpressionNode::Literal(literal) => Ok(vec![literal_value(literal)?]),
            ExpressionNode::Empty => Ok(Vec::new()),
            ExpressionNode::Identifier(name) => Ok(navigate(frame.focus, name)),
            ExpressionNode::Variable(name) => self.variable(name),
            ExpressionNode::This => Ok(frame.focus.to_vec()),
            ExpressionNode::Index => Ok(frame
                .index
                .map(|i| FhirPathValue::Integer(i as i64))
                .into_iter()
                .collect()),
            ExpressionNode::Total => Ok(frame.total.map(<[_]>::to_vec).unwrap_or_default()),
            ExpressionNode::Path { base, name } => {
                let base = self.eval(base, frame)?;
                Ok(navigate(&base, name))
            }
            ExpressionNode::FunctionCall { base, name, args } => {
                let input = match base {
                    Some(base) => self.eval(base, frame)?,
                    None => frame.focus.to_vec(),
                };
                functions::call(self, name, &input, args, frame)
            }
            ExpressionNode::Indexer { base, index } => {
                let base = self.eval(base, frame)?;
                let index = self.eval(index, frame)?;
                match index.as_slice() {
                    [] => Ok(Vec::new()),
                    [FhirPathValue::Integer(i)] => Ok(usize::try_from(*i)
                        .ok()
                        .and_then(|i| base.get(i).cloned())
                        .into_iter()
                        .collect()),
                    [other] => Err(ExpressionError::type_mismatch("Integer", other.type_name())),
                    _ => Err(ExpressionError::evaluation("index must be a single value")),
                }
            }
            ExpressionNode::Binary { op, left, right } => self.binary(*op, left, right, frame),
            ExpressionNode::Unary { op, operand } => {
                let values = self.eval(operand, frame)?;
                match (op, single(&values)?) {
                    (_, None) => Ok(Vec::new()),
                    (UnaryOperator::Positive, Some(value)) => Ok(vec![value.clone()]),
                    (UnaryOperator::Negate, Some(FhirPathValue::Integer(i))) => i
                        .checked_neg()
                        .map(|n| vec![FhirPathValue::Integer(n)])
                        .ok_or_else(|| ExpressionError::evaluation("arithmetic overflow")),
                    (UnaryOperator::Negate, Some(FhirPathValue::Decimal(d))) => {
                        Ok(vec![FhirPathValue::Decimal(-*d)])
                    }
                    (UnaryOperator::Negate, Some(other)) => {
                        Err(ExpressionError::type_mismatch("number", other.type_name()))
                    }
                }
            }
        }
    }

    fn variable(&self, name: &str) -> ExpressionResult<Vec<FhirPathValue>> {
        if let Some(values) = self.context.get(name) {
            return Ok(values.clone());
        }
        let constant = |s: &str| Ok(vec![FhirPathValue::String(s.to_string())]);
        match name {
            "resource" | "rootResource" | "context" => Ok(self.root.to_vec()),
            "ucum" => constant("http://unitsofmeasure.org"),
            "sct" => constant("http://snomed.info/sct"),
            "loinc" => constant("http://loinc.org"),
            _ => Err(ExpressionError::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }

    fn binary(
        &self,
        op: BinaryOperator,
        left: &ExpressionNode,
        right: &ExpressionNode,
        frame: Frame<'_>,
    ) -> ExpressionResult<Vec<FhirPathValue>> {
        use BinaryOperator as Op;

        let lhs = self.eval(left, frame)?;

        // Short-circuit where the right operand cannot change the outcome
        match (op, truth(&lhs)) {
            (Op::And, Ok(Some(false))) => return Ok(bool_result(false)),
            (Op::Or, Ok(Some(true))) => return Ok(bool_result(true)),
            (Op::Implies, Ok(Some(false))) => return Ok(bool_result(true)),
            _ => {}
        }

        let rhs = self.eval(right, frame)?;

        match op {
            Op::And | Op::Or | Op::Xor | Op::Implies => {
                let (l, r) = (truth(&lhs)?, truth(&rhs)?);
                let result = match op {
                    Op::And => match (l, r) {
                        (Some(false), _) | (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    },
                    Op::Or => match (l, r) {
                        (Some(true), _) | (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    },
                    Op::Xor => match (l, r) {
                        (Some(a), Some(b)) => Some(a != b),
                        _ => None,
                    },
                    _ => match (l, r) {
                        (Some(false), _) | (_, Some(true)) => Some(true),
                        (Some(true), Some(false)) => Some(false),
                        _ => None,
                    },
                };
                Ok(result.map(bool_result).unwrap_or_default())
            }
            Op::Equal => Ok(collection_equals(&lhs, &rhs)
                .map(bool_result)
                .unwrap_or_default()),
            Op::NotEqual => Ok(collection_equals(&lhs, &rhs)
                .map(|b| bool_result(!b))
                .unwrap_or_default()),
            Op::Equivalent => Ok(bool_result(collection_equivalent(&lhs, &rhs))),
            Op::NotEquivalent => Ok(bool_result(!collection_equivalent(&lhs, &rhs))),
            Op::LessThan | Op::LessThanOrEqual | Op::GreaterThan | Op::GreaterThanOrEqual => {
                match (single(&lhs)?, single(&rhs)?) {
                    (Some(l), Some(r)) => Ok(comparison(op, l, r)?
                        .map(bool_result)
                        .unwrap_or_default()),
                    _ => Ok(Vec::new()),
                }
            }
            Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::IntegerDivide | Op::Modulo => {
                match (single(&lhs)?, single(&rhs)?) {
                    (Some(l), Some(r)) => Ok(arithmetic(op, l, r)?.into_iter().collect()),
                    _ => Ok(Vec::new()),
                }
            }
            Op::Concatenate => {
                let text = |values: &[FhirPathValue]| -> ExpressionResult<String> {
                    Ok(single(values)?.map(ToString::to_string).unwrap_or_default())
                };
                Ok(vec![FhirPathValue::String(format!(
                    "{}{}",
                    text(&lhs)?,
                    text(&rhs)?
                ))])
            }
            Op::Union => {
                let mut out: Vec<FhirPathValue> = Vec::with_capacity(lhs.len() + rhs.len());
                for value in lhs.into_iter().chain(rhs) {
                    if !out.iter().any(|seen| value_equals(seen, &value)) {
                        out.push(value);
                    }
                }
                Ok(out)
            }
            Op::In => membership(&lhs, &rhs),
            Op::Contains => membership(&rhs, &lhs),
        }
    }
}

fn bool_result(value: bool) -> Vec<FhirPathValue> {
    vec![FhirPathValue::Boolean(value)]
}

fn single(values: &[FhirPathValue]) -> ExpressionResult<Option<&FhirPathValue>> {
    match values {
        [] => Ok(None),
        [value] => Ok(Some(value)),
        _ => Err(ExpressionError::evaluation(format!(
            "operator requires a single value, got a collection of {}",
            values.len()
        ))),
    }
}

fn membership(
    item: &[FhirPathValue],
    collection: &[FhirPathValue],
) -> ExpressionResult<Vec<FhirPathValue>> {
    match single(item)? {
        None => Ok(Vec::new()),
        Some(item) => Ok(bool_result(
            collection.iter().any(|candidate| value_equals(item, candidate)),
        )),
    }
}

fn literal_value(literal: &LiteralValue) -> ExpressionResult<FhirPathValue> {
    Ok(match literal {
        LiteralValue::Boolean(b) => FhirPathValue::Boolean(*b),
        LiteralValue::Integer(i) => FhirPathValue::Integer(*i),
        LiteralValue::Decimal(d) => FhirPathValue::Decimal(*d),
        LiteralValue::String(s) => FhirPathValue::String(s.clone()),
        LiteralValue::DateTime(text) => temporal_literal(text)?,
    })
}

fn temporal_literal(text: &str) -> ExpressionResult<FhirPathValue> {
    let invalid = || ExpressionError::evaluation(format!("invalid date/time literal @{text}"));
    if let Some(time) = text.strip_prefix('T') {
        return NaiveTime::parse_from_str(time, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .map(FhirPathValue::Time)
            .map_err(|_| invalid());
    }
    if text.contains('T') {
        return DateTime::parse_from_rfc3339(text)
            .map(FhirPathValue::DateTime)
            .or_else(|_| {
                // Local date-time without offset
                chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|dt| FhirPathValue::DateTime(dt.and_utc().fixed_offset()))
            })
            .map_err(|_| invalid());
    }
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => Ok(FhirPathValue::Date(date)),
        // Partial dates (year or year-month) compare as text
        Err(_) if !text.is_empty() => Ok(FhirPathValue::String(text.to_string())),
        Err(_) => Err(invalid()),
    }
}

/// Member navigation over a collection
fn navigate(focus: &[FhirPathValue], name: &str) -> Vec<FhirPathValue> {
    focus.iter().flat_map(|item| member(item, name)).collect()
}

fn member(item: &FhirPathValue, name: &str) -> Vec<FhirPathValue> {
    match item {
        FhirPathValue::Resource(Value::Object(object)) => {
            if object.get("resourceType").and_then(Value::as_str) == Some(name) {
                return vec![item.clone()];
            }
            if let Some(value) = object.get(name) {
                return FhirPathValue::from_json_typed(value, type_suffix(name));
            }
            // Polymorphic element: `value` resolves `valueDecimal`, `valueCoding`, ...
            object
                .iter()
                .filter_map(|(key, value)| {
                    let suffix = key.strip_prefix(name)?;
                    CHOICE_TYPES
                        .contains(&suffix)
                        .then(|| FhirPathValue::from_json_typed(value, Some(suffix)))
                })
                .flatten()
                .collect()
        }
        FhirPathValue::Quantity(quantity) => match name {
            "value" => quantity.value.map(FhirPathValue::Decimal).into_iter().collect(),
            "unit" => string_field(&quantity.unit),
            "code" => string_field(&quantity.code),
            "system" => string_field(&quantity.system),
            "comparator" => string_field(&quantity.comparator),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn string_field(field: &Option<String>) -> Vec<FhirPathValue> {
    field
        .iter()
        .map(|s| FhirPathValue::String(s.clone()))
        .collect()
}

/// Type implied by an explicit choice element name such as `valueDate`
fn type_suffix(name: &str) -> Option<&str> {
    CHOICE_TYPES.iter().copied().find(|suffix| {
        name.len() > suffix.len()
            && name.ends_with(suffix)
            && name[..name.len() - suffix.len()]
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_lowercase())
    })
}
