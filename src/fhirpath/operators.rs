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

//! Equality, comparison and arithmetic over expression values

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;

use super::error::{ExpressionError, ExpressionResult};
use super::parser::BinaryOperator;
use super::value::FhirPathValue;
use crate::model::Quantity;

fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

/// FHIRPath `=` on single items
pub fn value_equals(left: &FhirPathValue, right: &FhirPathValue) -> bool {
    use FhirPathValue as V;
    match (left, right) {
        (V::Integer(_) | V::Decimal(_), V::Integer(_) | V::Decimal(_)) => {
            left.as_decimal() == right.as_decimal()
        }
        (V::Date(d), V::String(s)) | (V::String(s), V::Date(d)) => {
            parse_date_prefix(s).is_some_and(|p| p == *d) && s.len() == 10
        }
        (V::DateTime(dt), V::String(s)) | (V::String(s), V::DateTime(dt)) => {
            chrono::DateTime::parse_from_rfc3339(s).is_ok_and(|p| p == *dt)
        }
        (V::Quantity(a), V::Quantity(b)) => quantity_equals(a, b),
        (V::Resource(a), V::Resource(b)) => a == b,
        _ => left == right,
    }
}

fn quantity_equals(a: &Quantity, b: &Quantity) -> bool {
    let unit_a = a.code.as_ref().or(a.unit.as_ref());
    let unit_b = b.code.as_ref().or(b.unit.as_ref());
    a.value == b.value && unit_a == unit_b
}

/// FHIRPath `=` on collections; `None` when either side is empty
pub fn collection_equals(left: &[FhirPathValue], right: &[FhirPathValue]) -> Option<bool> {
    if left.is_empty() || right.is_empty() {
        return None;
    }
    if left.len() != right.len() {
        return Some(false);
    }
    Some(left.iter().zip(right).all(|(l, r)| value_equals(l, r)))
}

fn value_equivalent(left: &FhirPathValue, right: &FhirPathValue) -> bool {
    match (left, right) {
        (FhirPathValue::String(a), FhirPathValue::String(b)) => {
            let normalize =
                |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
            normalize(a) == normalize(b)
        }
        (FhirPathValue::Decimal(_) | FhirPathValue::Integer(_), _) => {
            match (left.as_decimal(), right.as_decimal()) {
                (Some(a), Some(b)) => {
                    let scale = a.scale().min(b.scale());
                    a.round_dp(scale) == b.round_dp(scale)
                }
                _ => false,
            }
        }
        _ => value_equals(left, right),
    }
}

/// FHIRPath `~` on collections; order-independent and never empty
pub fn collection_equivalent(left: &[FhirPathValue], right: &[FhirPathValue]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|l| right.iter().any(|r| value_equivalent(l, r)))
}

/// Ordering for `<`, `<=`, `>`, `>=`
pub fn compare(left: &FhirPathValue, right: &FhirPathValue) -> ExpressionResult<Option<Ordering>> {
    use FhirPathValue as V;
    let ordering = match (left, right) {
        (V::Integer(_) | V::Decimal(_), V::Integer(_) | V::Decimal(_)) => {
            left.as_decimal().partial_cmp(&right.as_decimal())
        }
        (V::String(a), V::String(b)) => Some(a.cmp(b)),
        (V::Date(a), V::Date(b)) => Some(a.cmp(b)),
        (V::DateTime(a), V::DateTime(b)) => Some(a.cmp(b)),
        (V::Date(a), V::DateTime(b)) => Some(a.cmp(&b.date_naive())),
        (V::DateTime(a), V::Date(b)) => Some(a.date_naive().cmp(b)),
        (V::Time(a), V::Time(b)) => Some(a.cmp(b)),
        (V::Date(d), V::String(s)) => parse_date_prefix(s).map(|p| d.cmp(&p)),
        (V::String(s), V::Date(d)) => parse_date_prefix(s).map(|p| p.cmp(d)),
        (V::Quantity(a), V::Quantity(b)) if a.unit == b.unit && a.code == b.code => {
            a.value.partial_cmp(&b.value)
        }
        _ => {
            return Err(ExpressionError::type_mismatch(
                left.type_name(),
                right.type_name(),
            ));
        }
    };
    Ok(ordering)
}

/// Evaluate a comparison operator on singleton operands
pub fn comparison(
    op: BinaryOperator,
    left: &FhirPathValue,
    right: &FhirPathValue,
) -> ExpressionResult<Option<bool>> {
    let Some(ordering) = compare(left, right)? else {
        return Ok(None);
    };
    Ok(Some(match op {
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        BinaryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
        other => {
            return Err(ExpressionError::evaluation(format!(
                "{other:?} is not a comparison operator"
            )));
        }
    }))
}

fn overflow() -> ExpressionError {
    ExpressionError::evaluation("arithmetic overflow")
}

/// Evaluate an arithmetic operator on singleton operands
///
/// Returns `Ok(None)` where FHIRPath defines an empty result, e.g. division by zero.
pub fn arithmetic(
    op: BinaryOperator,
    left: &FhirPathValue,
    right: &FhirPathValue,
) -> ExpressionResult<Option<FhirPathValue>> {
    use FhirPathValue as V;

    match (op, left, right) {
        (BinaryOperator::Add, V::String(a), V::String(b)) => {
            return Ok(Some(V::String(format!("{a}{b}"))));
        }
        (BinaryOperator::Add | BinaryOperator::Subtract, V::Quantity(a), V::Quantity(b))
            if a.unit == b.unit =>
        {
            let (Some(x), Some(y)) = (a.value, b.value) else {
                return Ok(None);
            };
            let value = if op == BinaryOperator::Add {
                x.checked_add(y)
            } else {
                x.checked_sub(y)
            };
            return Ok(Some(V::Quantity(Quantity {
                value: Some(value.ok_or_else(overflow)?),
                ..a.clone()
            })));
        }
        _ => {}
    }

    if let (V::Integer(a), V::Integer(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOperator::Add => a.checked_add(b),
            BinaryOperator::Subtract => a.checked_sub(b),
            BinaryOperator::Multiply => a.checked_mul(b),
            BinaryOperator::IntegerDivide => {
                if b == 0 {
                    return Ok(None);
                }
                a.checked_div(b)
            }
            BinaryOperator::Modulo => {
                if b == 0 {
                    return Ok(None);
                }
                a.checked_rem(b)
            }
            BinaryOperator::Divide => {
                return decimal_arithmetic(op, Decimal::from(a), Decimal::from(b));
            }
            _ => None,
        };
        return result.map(|v| Some(V::Integer(v))).ok_or_else(overflow);
    }

    match (left.as_decimal(), right.as_decimal()) {
        (Some(a), Some(b)) => decimal_arithmetic(op, a, b),
        _ => Err(ExpressionError::type_mismatch(
            format!("operands compatible with {op:?}"),
            format!("{} and {}", left.type_name(), right.type_name()),
        )),
    }
}

fn decimal_arithmetic(
    op: BinaryOperator,
    a: Decimal,
    b: Decimal,
) -> ExpressionResult<Option<FhirPathValue>> {
    let value = match op {
        BinaryOperator::Add => a.checked_add(b),
        BinaryOperator::Subtract => a.checked_sub(b),
        BinaryOperator::Multiply => a.checked_mul(b),
        BinaryOperator::Divide => {
            if b.is_zero() {
                return Ok(None);
            }
            a.checked_div(b)
        }
        BinaryOperator::IntegerDivide => {
            if b.is_zero() {
                return Ok(None);
            }
            return a
                .checked_div(b)
                .and_then(|q| q.trunc().to_i64())
                .map(|i| Some(FhirPathValue::Integer(i)))
                .ok_or_else(overflow);
        }
        BinaryOperator::Modulo => {
            if b.is_zero() {
                return Ok(None);
            }
            a.checked_rem(b)
        }
        other => {
            return Err(ExpressionError::evaluation(format!(
                "{other:?} is not an arithmetic operator"
            )));
        }
    };
    value
        .map(|d| Some(FhirPathValue::Decimal(d)))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> FhirPathValue {
        FhirPathValue::Decimal(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn mixed_numeric_equality() {
        assert!(value_equals(&FhirPathValue::Integer(2), &dec("2.0")));
        assert!(!value_equals(&FhirPathValue::Integer(2), &FhirPathValue::String("2".into())));
        assert_eq!(collection_equals(&[], &[FhirPathValue::Integer(1)]), None);
    }

    #[test]
    fn division_yields_decimal_and_empty_on_zero() {
        let seven = FhirPathValue::Integer(7);
        let result =
            arithmetic(BinaryOperator::Divide, &seven, &FhirPathValue::Integer(2)).unwrap();
        assert_eq!(result, Some(dec("3.5")));
        let by_zero =
            arithmetic(BinaryOperator::Divide, &seven, &FhirPathValue::Integer(0)).unwrap();
        assert_eq!(by_zero, None);
    }

    #[test]
    fn string_equivalence_ignores_case_and_spacing() {
        assert!(collection_equivalent(
            &[FhirPathValue::String("Hello  World".into())],
            &[FhirPathValue::String("hello world".into())]
        ));
    }

    #[test]
    fn comparing_incompatible_types_fails() {
        assert!(compare(&FhirPathValue::Integer(1), &FhirPathValue::Boolean(true)).is_err());
        assert_eq!(
            comparison(BinaryOperator::GreaterThan, &dec("1.5"), &FhirPathValue::Integer(1)).unwrap(),
            Some(true)
        );
    }
}
