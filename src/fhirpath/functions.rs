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

//! Built-in function library

use chrono::Local;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::VecDeque;
use std::str::FromStr;

use super::error::{ExpressionError, ExpressionResult};
use super::evaluator::{Frame, Interpreter};
use super::operators::value_equals;
use super::parser::ExpressionNode;
use super::value::FhirPathValue;
use serde_json::Value;

/// Upper bound on items produced by `repeat()` and `descendants()`
const MAX_REPEAT_ITEMS: usize = 10_000;

type Collection = Vec<FhirPathValue>;

/// Dispatch a function call on `input`
pub(super) fn call(
    interpreter: &Interpreter<'_>,
    name: &str,
    input: &[FhirPathValue],
    args: &[ExpressionNode],
    frame: Frame<'_>,
) -> ExpressionResult<Collection> {
    let call = Call {
        interpreter,
        name,
        input,
        args,
        frame,
    };
    match name {
        "empty" => call.arity(0).map(|_| boolean(input.is_empty())),
        "exists" => match args.first() {
            Some(criteria) => Ok(boolean(!call.filter(criteria)?.is_empty())),
            None => Ok(boolean(!input.is_empty())),
        },
        "all" => {
            call.arity(1)?;
            for (index, item) in input.iter().enumerate() {
                if !call.test(&args[0], item, index)? {
                    return Ok(boolean(false));
                }
            }
            Ok(boolean(true))
        }
        "allTrue" => Ok(boolean(input.iter().all(|v| v.as_bool() == Some(true)))),
        "anyTrue" => Ok(boolean(input.iter().any(|v| v.as_bool() == Some(true)))),
        "allFalse" => Ok(boolean(input.iter().all(|v| v.as_bool() == Some(false)))),
        "anyFalse" => Ok(boolean(input.iter().any(|v| v.as_bool() == Some(false)))),
        "count" => Ok(vec![FhirPathValue::Integer(input.len() as i64)]),
        "first" => Ok(input.first().cloned().into_iter().collect()),
        "last" => Ok(input.last().cloned().into_iter().collect()),
        "tail" => Ok(input.iter().skip(1).cloned().collect()),
        "skip" => {
            let n = call.integer_arg(0)?.unwrap_or(0).max(0) as usize;
            Ok(input.iter().skip(n).cloned().collect())
        }
        "take" => {
            let n = call.integer_arg(0)?.unwrap_or(0).max(0) as usize;
            Ok(input.iter().take(n).cloned().collect())
        }
        "single" => match input {
            [] => Ok(Vec::new()),
            [only] => Ok(vec![only.clone()]),
            _ => Err(ExpressionError::evaluation(
                "single() called on a collection with more than one item",
            )),
        },
        "where" => {
            call.arity(1)?;
            call.filter(&args[0])
        }
        "select" => {
            call.arity(1)?;
            let mut out = Vec::new();
            for (index, item) in input.iter().enumerate() {
                out.extend(call.project(&args[0], item, index)?);
            }
            Ok(out)
        }
        "repeat" => {
            call.arity(1)?;
            call.repeat(|item, index| call.project(&args[0], item, index))
        }
        "children" => Ok(input.iter().flat_map(children).collect()),
        "descendants" => call.repeat(|item, _| Ok(children(item))),
        "distinct" => Ok(distinct(input)),
        "isDistinct" => Ok(boolean(distinct(input).len() == input.len())),
        "not" => match truth(input)? {
            Some(b) => Ok(boolean(!b)),
            None => Ok(Vec::new()),
        },
        "iif" => {
            if !(2..=3).contains(&args.len()) {
                return Err(ExpressionError::evaluation("iif() takes two or three arguments"));
            }
            let criterion = call.evaluate_arg(0)?;
            if truth(&criterion)?.unwrap_or(false) {
                call.evaluate_arg(1)
            } else if args.len() == 3 {
                call.evaluate_arg(2)
            } else {
                Ok(Vec::new())
            }
        }
        "sum" => sum(input),
        "min" | "max" => extreme(input, name == "max"),
        "avg" => {
            let total = sum(input)?;
            match total.first().and_then(FhirPathValue::as_decimal) {
                Some(total) if !input.is_empty() => Ok(vec![FhirPathValue::Decimal(
                    total / Decimal::from(input.len() as i64),
                )]),
                _ => Ok(Vec::new()),
            }
        }
        "round" => {
            let precision = call.integer_arg(0)?.unwrap_or(0);
            let precision = u32::try_from(precision).map_err(|_| {
                ExpressionError::evaluation("round() precision must not be negative")
            })?;
            call.numeric(|d| {
                d.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
            })
        }
        "abs" => match call.single_input()? {
            Some(FhirPathValue::Integer(i)) => {
                let abs = i
                    .checked_abs()
                    .ok_or_else(|| ExpressionError::evaluation("arithmetic overflow"))?;
                Ok(vec![FhirPathValue::Integer(abs)])
            }
            _ => call.numeric(|d| d.abs()),
        },
        "ceiling" => call.integral(|d| d.ceil()),
        "floor" => call.integral(|d| d.floor()),
        "truncate" => call.integral(|d| d.trunc()),
        "toString" => Ok(call
            .single_input()?
            .and_then(to_string)
            .map(FhirPathValue::String)
            .into_iter()
            .collect()),
        "toInteger" => Ok(call.single_input()?.and_then(to_integer).into_iter().collect()),
        "toDecimal" => Ok(call.single_input()?.and_then(to_decimal).into_iter().collect()),
        "convertsToInteger" => Ok(call
            .single_input()?
            .map(|v| boolean(to_integer(v).is_some()))
            .unwrap_or_default()),
        "convertsToDecimal" => Ok(call
            .single_input()?
            .map(|v| boolean(to_decimal(v).is_some()))
            .unwrap_or_default()),
        "hasValue" => Ok(boolean(matches!(
            input,
            [item] if !matches!(item, FhirPathValue::Resource(_))
        ))),
        "length" => call.string_map(|s| FhirPathValue::Integer(s.chars().count() as i64)),
        "lower" => call.string_map(|s| FhirPathValue::String(s.to_lowercase())),
        "upper" => call.string_map(|s| FhirPathValue::String(s.to_uppercase())),
        "trim" => call.string_map(|s| FhirPathValue::String(s.trim().to_string())),
        "contains" => {
            let needle = call.string_arg(0)?;
            call.string_map(|s| {
                FhirPathValue::Boolean(needle.as_deref().is_some_and(|n| s.contains(n)))
            })
        }
        "startsWith" => {
            let prefix = call.string_arg(0)?;
            call.string_map(|s| {
                FhirPathValue::Boolean(prefix.as_deref().is_some_and(|p| s.starts_with(p)))
            })
        }
        "endsWith" => {
            let suffix = call.string_arg(0)?;
            call.string_map(|s| {
                FhirPathValue::Boolean(suffix.as_deref().is_some_and(|p| s.ends_with(p)))
            })
        }
        "join" => {
            let separator = call.string_arg(0)?.unwrap_or_default();
            let parts: Vec<String> = input.iter().filter_map(to_string).collect();
            Ok(vec![FhirPathValue::String(parts.join(&separator))])
        }
        "today" => Ok(vec![FhirPathValue::Date(Local::now().date_naive())]),
        "now" => Ok(vec![FhirPathValue::DateTime(Local::now().fixed_offset())]),
        _ => Err(ExpressionError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}

struct Call<'c, 'a> {
    interpreter: &'c Interpreter<'a>,
    name: &'c str,
    input: &'c [FhirPathValue],
    args: &'c [ExpressionNode],
    frame: Frame<'c>,
}

impl Call<'_, '_> {
    fn arity(&self, expected: usize) -> ExpressionResult<()> {
        if self.args.len() == expected {
            Ok(())
        } else {
            Err(ExpressionError::evaluation(format!(
                "{}() expects {expected} argument(s), got {}",
                self.name,
                self.args.len()
            )))
        }
    }

    /// Evaluate a non-lambda argument against the calling context
    fn evaluate_arg(&self, index: usize) -> ExpressionResult<Collection> {
        match self.args.get(index) {
            Some(arg) => self.interpreter.eval(
                arg,
                Frame {
                    focus: self.input,
                    ..self.frame
                },
            ),
            None => Ok(Vec::new()),
        }
    }

    fn integer_arg(&self, index: usize) -> ExpressionResult<Option<i64>> {
        let values = self.evaluate_arg(index)?;
        match values.as_slice() {
            [] => Ok(None),
            [FhirPathValue::Integer(i)] => Ok(Some(*i)),
            [other] => Err(ExpressionError::type_mismatch("Integer", other.type_name())),
            _ => Err(ExpressionError::evaluation(format!(
                "{}() argument must be a single value",
                self.name
            ))),
        }
    }

    fn string_arg(&self, index: usize) -> ExpressionResult<Option<String>> {
        let values = self.evaluate_arg(index)?;
        match values.as_slice() {
            [] => Ok(None),
            [FhirPathValue::String(s)] => Ok(Some(s.clone())),
            [other] => Err(ExpressionError::type_mismatch("String", other.type_name())),
            _ => Err(ExpressionError::evaluation(format!(
                "{}() argument must be a single value",
                self.name
            ))),
        }
    }

    fn single_input(&self) -> ExpressionResult<Option<&FhirPathValue>> {
        match self.input {
            [] => Ok(None),
            [item] => Ok(Some(item)),
            _ => Err(ExpressionError::evaluation(format!(
                "{}() requires a single input item, got {}",
                self.name,
                self.input.len()
            ))),
        }
    }

    /// Evaluate a lambda argument with `$this` bound to `item`
    fn project(
        &self,
        arg: &ExpressionNode,
        item: &FhirPathValue,
        index: usize,
    ) -> ExpressionResult<Collection> {
        self.interpreter.eval(
            arg,
            Frame {
                focus: std::slice::from_ref(item),
                index: Some(index),
                total: self.frame.total,
            },
        )
    }

    fn test(
        &self,
        arg: &ExpressionNode,
        item: &FhirPathValue,
        index: usize,
    ) -> ExpressionResult<bool> {
        Ok(truth(&self.project(arg, item, index)?)?.unwrap_or(false))
    }

    fn filter(&self, criteria: &ExpressionNode) -> ExpressionResult<Collection> {
        let mut out = Vec::new();
        for (index, item) in self.input.iter().enumerate() {
            if self.test(criteria, item, index)? {
                out.push(item.clone());
            }
        }
        Ok(out)
    }

    fn repeat(
        &self,
        step: impl Fn(&FhirPathValue, usize) -> ExpressionResult<Collection>,
    ) -> ExpressionResult<Collection> {
        let mut out: Collection = Vec::new();
        let mut queue: VecDeque<FhirPathValue> = self.input.iter().cloned().collect();
        let mut index = 0;
        while let Some(item) = queue.pop_front() {
            for next in step(&item, index)? {
                if out.iter().any(|seen| value_equals(seen, &next)) {
                    continue;
                }
                if out.len() >= MAX_REPEAT_ITEMS {
                    return Err(ExpressionError::evaluation(format!(
                        "{}() produced more than {MAX_REPEAT_ITEMS} items",
                        self.name
                    )));
                }
                queue.push_back(next.clone());
                out.push(next);
            }
            index += 1;
        }
        Ok(out)
    }

    fn numeric(&self, op: impl Fn(Decimal) -> Decimal) -> ExpressionResult<Collection> {
        match self.single_input()? {
            None => Ok(Vec::new()),
            Some(value) => value
                .as_decimal()
                .map(|d| vec![FhirPathValue::Decimal(op(d))])
                .ok_or_else(|| ExpressionError::type_mismatch("number", value.type_name())),
        }
    }

    fn integral(&self, op: impl Fn(Decimal) -> Decimal) -> ExpressionResult<Collection> {
        match self.single_input()? {
            None => Ok(Vec::new()),
            Some(value) => value
                .as_decimal()
                .and_then(|d| op(d).to_i64())
                .map(|i| vec![FhirPathValue::Integer(i)])
                .ok_or_else(|| ExpressionError::type_mismatch("number", value.type_name())),
        }
    }

    fn string_map(&self, op: impl Fn(&str) -> FhirPathValue) -> ExpressionResult<Collection> {
        match self.single_input()? {
            None => Ok(Vec::new()),
            Some(FhirPathValue::String(s)) => Ok(vec![op(s)]),
            Some(other) => Err(ExpressionError::type_mismatch("String", other.type_name())),
        }
    }
}

fn boolean(value: bool) -> Collection {
    vec![FhirPathValue::Boolean(value)]
}

/// Singleton evaluation of a collection as a boolean
///
/// Empty is unknown; a single non-boolean item counts as `true`.
pub(super) fn truth(values: &[FhirPathValue]) -> ExpressionResult<Option<bool>> {
    match values {
        [] => Ok(None),
        [FhirPathValue::Boolean(b)] => Ok(Some(*b)),
        [_] => Ok(Some(true)),
        _ => Err(ExpressionError::evaluation(format!(
            "expected a single boolean, got a collection of {}",
            values.len()
        ))),
    }
}

fn children(item: &FhirPathValue) -> Collection {
    match item {
        FhirPathValue::Resource(Value::Object(object)) => object
            .iter()
            .filter(|(key, _)| key.as_str() != "resourceType")
            .flat_map(|(_, value)| FhirPathValue::from_json(value))
            .collect(),
        _ => Vec::new(),
    }
}

fn distinct(input: &[FhirPathValue]) -> Collection {
    let mut out: Collection = Vec::with_capacity(input.len());
    for item in input {
        if !out.iter().any(|seen| value_equals(seen, item)) {
            out.push(item.clone());
        }
    }
    out
}

fn sum(input: &[FhirPathValue]) -> ExpressionResult<Collection> {
    if input.iter().all(|v| matches!(v, FhirPathValue::Integer(_))) {
        let mut total: i64 = 0;
        for value in input {
            if let FhirPathValue::Integer(i) = value {
                total = total
                    .checked_add(*i)
                    .ok_or_else(|| ExpressionError::evaluation("arithmetic overflow"))?;
            }
        }
        return Ok(vec![FhirPathValue::Integer(total)]);
    }
    let mut total = Decimal::ZERO;
    for value in input {
        let d = value
            .as_decimal()
            .ok_or_else(|| ExpressionError::type_mismatch("number", value.type_name()))?;
        total = total
            .checked_add(d)
            .ok_or_else(|| ExpressionError::evaluation("arithmetic overflow"))?;
    }
    Ok(vec![FhirPathValue::Decimal(total)])
}

fn extreme(input: &[FhirPathValue], max: bool) -> ExpressionResult<Collection> {
    let mut best: Option<&FhirPathValue> = None;
    for value in input {
        best = match best {
            None => Some(value),
            Some(current) => {
                let ordering = super::operators::compare(value, current)?;
                let replace = match ordering {
                    Some(std::cmp::Ordering::Greater) => max,
                    Some(std::cmp::Ordering::Less) => !max,
                    _ => false,
                };
                Some(if replace { value } else { current })
            }
        };
    }
    Ok(best.cloned().into_iter().collect())
}

fn to_string(value: &FhirPathValue) -> Option<String> {
    match value {
        FhirPathValue::Resource(_) => None,
        other => Some(other.to_string()),
    }
}

fn to_integer(value: &FhirPathValue) -> Option<FhirPathValue> {
    match value {
        FhirPathValue::Integer(i) => Some(FhirPathValue::Integer(*i)),
        FhirPathValue::Boolean(b) => Some(FhirPathValue::Integer(i64::from(*b))),
        FhirPathValue::String(s) => s.trim().parse::<i64>().ok().map(FhirPathValue::Integer),
        FhirPathValue::Decimal(d) if d.fract().is_zero() => d.to_i64().map(FhirPathValue::Integer),
        _ => None,
    }
}

fn to_decimal(value: &FhirPathValue) -> Option<FhirPathValue> {
    match value {
        FhirPathValue::Integer(_) | FhirPathValue::Decimal(_) => {
            value.as_decimal().map(FhirPathValue::Decimal)
        }
        FhirPathValue::Boolean(b) => Some(FhirPathValue::Decimal(if *b {
            Decimal::ONE
        } else {
            Decimal::ZERO
        })),
        FhirPathValue::String(s) => Decimal::from_str(s.trim()).ok().map(FhirPathValue::Decimal),
        _ => None,
    }
}
