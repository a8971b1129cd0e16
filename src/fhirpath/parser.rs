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

//! Pratt parser producing the expression AST
//!
//! Operator precedence follows the FHIRPath grammar; `implies` is the only
//! right-associative operator.

use rust_decimal::Decimal;
use std::str::FromStr;

use super::error::{ExpressionError, ExpressionResult};
use super::tokenizer::{Spanned, Token, Tokenizer};

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// Boolean literal
    Boolean(bool),
    /// Integer literal
    Integer(i64),
    /// Decimal literal
    Decimal(Decimal),
    /// String literal
    String(String),
    /// `@` date/time literal text
    DateTime(String),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `div`
    IntegerDivide,
    /// `mod`
    Modulo,
    /// `&`
    Concatenate,
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `~`
    Equivalent,
    /// `!~`
    NotEquivalent,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `implies`
    Implies,
    /// `|`
    Union,
    /// `in`
    In,
    /// `contains`
    Contains,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `+`
    Positive,
    /// `-`
    Negate,
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionNode {
    /// Literal value
    Literal(LiteralValue),
    /// `{}`
    Empty,
    /// Bare identifier evaluated against the focus
    Identifier(String),
    /// `%name`
    Variable(String),
    /// `$this`
    This,
    /// `$index`
    Index,
    /// `$total`
    Total,
    /// `base.name`
    Path {
        /// Navigation source
        base: Box<ExpressionNode>,
        /// Member name
        name: String,
    },
    /// `name(args)` or `base.name(args)`
    FunctionCall {
        /// Input collection; `None` means the current focus
        base: Option<Box<ExpressionNode>>,
        /// Function name
        name: String,
        /// Unevaluated arguments
        args: Vec<ExpressionNode>,
    },
    /// `base[index]`
    Indexer {
        /// Indexed collection
        base: Box<ExpressionNode>,
        /// Index expression
        index: Box<ExpressionNode>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOperator,
        /// Left operand
        left: Box<ExpressionNode>,
        /// Right operand
        right: Box<ExpressionNode>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOperator,
        /// Operand
        operand: Box<ExpressionNode>,
    },
}

/// Operator precedence levels (higher = tighter binding)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Implies = 1,
    Or = 2,
    And = 3,
    Membership = 4,
    Equality = 5,
    Inequality = 6,
    Union = 7,
    Additive = 8,
    Multiplicative = 9,
    Invocation = 10,
}

impl Precedence {
    const fn next_level(self) -> Self {
        match self {
            Precedence::Implies => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Membership,
            Precedence::Membership => Precedence::Equality,
            Precedence::Equality => Precedence::Inequality,
            Precedence::Inequality => Precedence::Union,
            Precedence::Union => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative | Precedence::Invocation => Precedence::Invocation,
        }
    }
}

fn precedence(token: &Token<'_>) -> Option<Precedence> {
    match token {
        Token::Dot | Token::LeftBracket => Some(Precedence::Invocation),
        Token::Equal | Token::NotEqual | Token::Equivalent | Token::NotEquivalent => {
            Some(Precedence::Equality)
        }
        Token::Plus | Token::Minus | Token::Ampersand => Some(Precedence::Additive),
        Token::And => Some(Precedence::And),
        Token::Or | Token::Xor => Some(Precedence::Or),
        Token::Multiply | Token::Divide | Token::Div | Token::Mod => {
            Some(Precedence::Multiplicative)
        }
        Token::LessThan
        | Token::LessThanOrEqual
        | Token::GreaterThan
        | Token::GreaterThanOrEqual => Some(Precedence::Inequality),
        Token::In | Token::Contains => Some(Precedence::Membership),
        Token::Union => Some(Precedence::Union),
        Token::Implies => Some(Precedence::Implies),
        _ => None,
    }
}

fn binary_operator(token: &Token<'_>) -> Option<BinaryOperator> {
    match token {
        Token::Equal => Some(BinaryOperator::Equal),
        Token::NotEqual => Some(BinaryOperator::NotEqual),
        Token::Plus => Some(BinaryOperator::Add),
        Token::Minus => Some(BinaryOperator::Subtract),
        Token::And => Some(BinaryOperator::And),
        Token::Or => Some(BinaryOperator::Or),
        Token::Equivalent => Some(BinaryOperator::Equivalent),
        Token::NotEquivalent => Some(BinaryOperator::NotEquivalent),
        Token::LessThan => Some(BinaryOperator::LessThan),
        Token::LessThanOrEqual => Some(BinaryOperator::LessThanOrEqual),
        Token::GreaterThan => Some(BinaryOperator::GreaterThan),
        Token::GreaterThanOrEqual => Some(BinaryOperator::GreaterThanOrEqual),
        Token::In => Some(BinaryOperator::In),
        Token::Contains => Some(BinaryOperator::Contains),
        Token::Multiply => Some(BinaryOperator::Multiply),
        Token::Divide => Some(BinaryOperator::Divide),
        Token::Div => Some(BinaryOperator::IntegerDivide),
        Token::Mod => Some(BinaryOperator::Modulo),
        Token::Union => Some(BinaryOperator::Union),
        Token::Ampersand => Some(BinaryOperator::Concatenate),
        Token::Xor => Some(BinaryOperator::Xor),
        Token::Implies => Some(BinaryOperator::Implies),
        _ => None,
    }
}

/// Parse an expression string into an AST
pub fn parse_expression(input: &str) -> ExpressionResult<ExpressionNode> {
    let tokens = Tokenizer::new(input).tokenize_all()?;
    let mut parser = Parser {
        tokens,
        position: 0,
        input_len: input.len(),
    };
    let node = parser.expression(Precedence::Implies)?;
    match parser.peek() {
        None => Ok(node),
        Some(extra) => Err(ExpressionError::parse(
            extra.offset,
            format!("unexpected token {:?}", extra.token),
        )),
    }
}

struct Parser<'input> {
    tokens: Vec<Spanned<'input>>,
    position: usize,
    input_len: usize,
}

impl<'input> Parser<'input> {
    fn peek(&self) -> Option<&Spanned<'input>> {
        self.tokens.get(self.position)
    }

    fn peek_token(&self) -> Option<&Token<'input>> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned<'input>> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn current_offset(&self) -> usize {
        self.peek().map(|s| s.offset).unwrap_or(self.input_len)
    }

    fn expect(&mut self, expected: Token<'static>, what: &str) -> ExpressionResult<()> {
        match self.advance() {
            Some(spanned) if spanned.token == expected => Ok(()),
            Some(spanned) => Err(ExpressionError::parse(
                spanned.offset,
                format!("expected {what}, found {:?}", spanned.token),
            )),
            None => Err(ExpressionError::parse(self.input_len, format!("expected {what}"))),
        }
    }

    fn expression(&mut self, min: Precedence) -> ExpressionResult<ExpressionNode> {
        let mut left = self.prefix()?;

        while let Some(token) = self.peek_token() {
            let Some(prec) = precedence(token) else {
                break;
            };
            if prec < min {
                break;
            }
            let Some(spanned) = self.advance() else {
                break;
            };

            left = match spanned.token {
                Token::Dot => self.member(left)?,
                Token::LeftBracket => {
                    let index = self.expression(Precedence::Implies)?;
                    self.expect(Token::RightBracket, "']'")?;
                    ExpressionNode::Indexer {
                        base: Box::new(left),
                        index: Box::new(index),
                    }
                }
                other => {
                    let op = binary_operator(&other).ok_or_else(|| {
                        ExpressionError::parse(spanned.offset, "expected binary operator")
                    })?;
                    let next = if prec == Precedence::Implies {
                        prec
                    } else {
                        prec.next_level()
                    };
                    let right = self.expression(next)?;
                    ExpressionNode::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
            };
        }

        Ok(left)
    }

    fn member(&mut self, base: ExpressionNode) -> ExpressionResult<ExpressionNode> {
        let offset = self.current_offset();
        let name = self
            .advance()
            .and_then(|s| s.token.as_member_name().map(str::to_string))
            .ok_or_else(|| ExpressionError::parse(offset, "expected member name after '.'"))?;

        if self.peek_token() == Some(&Token::LeftParen) {
            let args = self.arguments()?;
            Ok(ExpressionNode::FunctionCall {
                base: Some(Box::new(base)),
                name,
                args,
            })
        } else {
            Ok(ExpressionNode::Path {
                base: Box::new(base),
                name,
            })
        }
    }

    fn arguments(&mut self) -> ExpressionResult<Vec<ExpressionNode>> {
        self.expect(Token::LeftParen, "'('")?;
        let mut args = Vec::new();
        if self.peek_token() == Some(&Token::RightParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression(Precedence::Implies)?);
            match self.advance() {
                Some(Spanned {
                    token: Token::Comma,
                    ..
                }) => continue,
                Some(Spanned {
                    token: Token::RightParen,
                    ..
                }) => return Ok(args),
                Some(other) => {
                    return Err(ExpressionError::parse(
                        other.offset,
                        format!("expected ',' or ')', found {:?}", other.token),
                    ));
                }
                None => return Err(ExpressionError::parse(self.input_len, "unclosed '('")),
            }
        }
    }

    fn prefix(&mut self) -> ExpressionResult<ExpressionNode> {
        let offset = self.current_offset();
        let Some(spanned) = self.advance() else {
            return Err(ExpressionError::parse(offset, "unexpected end of expression"));
        };

        match spanned.token {
            Token::Integer(i) => Ok(ExpressionNode::Literal(LiteralValue::Integer(i))),
            Token::Decimal(text) => Decimal::from_str(text)
                .map(|d| ExpressionNode::Literal(LiteralValue::Decimal(d)))
                .map_err(|e| ExpressionError::parse(spanned.offset, e.to_string())),
            Token::String(s) => Ok(ExpressionNode::Literal(LiteralValue::String(s))),
            Token::DateTime(text) => Ok(ExpressionNode::Literal(LiteralValue::DateTime(
                text.to_string(),
            ))),
            Token::True => Ok(ExpressionNode::Literal(LiteralValue::Boolean(true))),
            Token::False => Ok(ExpressionNode::Literal(LiteralValue::Boolean(false))),
            Token::External(name) => Ok(ExpressionNode::Variable(name)),
            Token::DollarThis => Ok(ExpressionNode::This),
            Token::DollarIndex => Ok(ExpressionNode::Index),
            Token::DollarTotal => Ok(ExpressionNode::Total),
            Token::LeftParen => {
                let inner = self.expression(Precedence::Implies)?;
                self.expect(Token::RightParen, "')'")?;
                Ok(inner)
            }
            Token::LeftBrace => {
                self.expect(Token::RightBrace, "'}'")?;
                Ok(ExpressionNode::Empty)
            }
            Token::Minus | Token::Plus => {
                let op = if spanned.token == Token::Minus {
                    UnaryOperator::Negate
                } else {
                    UnaryOperator::Positive
                };
                let operand = self.expression(Precedence::Multiplicative)?;
                Ok(ExpressionNode::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            token => match token.as_member_name() {
                Some(name) => {
                    let name = name.to_string();
                    if self.peek_token() == Some(&Token::LeftParen) {
                        let args = self.arguments()?;
                        Ok(ExpressionNode::FunctionCall {
                            base: None,
                            name,
                            args,
                        })
                    } else {
                        Ok(ExpressionNode::Identifier(name))
                    }
                }
                None => Err(ExpressionError::parse(
                    spanned.offset,
                    format!("unexpected token {token:?}"),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(op: BinaryOperator, left: ExpressionNode, right: ExpressionNode) -> ExpressionNode {
        ExpressionNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn var(name: &str) -> ExpressionNode {
        ExpressionNode::Variable(name.to_string())
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        let ast = parse_expression("%a + %b * %c").unwrap();
        assert_eq!(
            ast,
            binary(
                BinaryOperator::Add,
                var("a"),
                binary(BinaryOperator::Multiply, var("b"), var("c"))
            )
        );
    }

    #[test]
    fn parenthesised_division() {
        let ast = parse_expression("%weight / (%height * %height)").unwrap();
        assert_eq!(
            ast,
            binary(
                BinaryOperator::Divide,
                var("weight"),
                binary(BinaryOperator::Multiply, var("height"), var("height"))
            )
        );
    }

    #[test]
    fn method_calls_chain_on_paths() {
        let ast = parse_expression("item.where(linkId = 'a').answer.exists()").unwrap();
        let ExpressionNode::FunctionCall { name, base, args } = ast else {
            panic!("expected function call");
        };
        assert_eq!(name, "exists");
        assert!(args.is_empty());
        assert!(matches!(base.as_deref(), Some(ExpressionNode::Path { name, .. }) if name == "answer"));
    }

    #[test]
    fn keyword_members_and_indexers() {
        assert!(parse_expression("'abc'.contains('b')").is_ok());
        assert!(matches!(
            parse_expression("item[0]").unwrap(),
            ExpressionNode::Indexer { .. }
        ));
        assert!(matches!(
            parse_expression("%a contains 1").unwrap(),
            ExpressionNode::Binary {
                op: BinaryOperator::Contains,
                ..
            }
        ));
    }

    #[test]
    fn implies_is_right_associative() {
        let ast = parse_expression("%a implies %b implies %c").unwrap();
        assert_eq!(
            ast,
            binary(
                BinaryOperator::Implies,
                var("a"),
                binary(BinaryOperator::Implies, var("b"), var("c"))
            )
        );
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(matches!(
            parse_expression("(1 + 2"),
            Err(ExpressionError::Parse { .. })
        ));
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("1 2").is_err());
    }
}
