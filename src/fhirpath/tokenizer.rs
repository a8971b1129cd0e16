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

//! Tokenizer for FHIRPath expressions

use super::error::{ExpressionError, ExpressionResult};

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'input> {
    /// Integer literal (e.g., 42)
    Integer(i64),
    /// Decimal literal as string slice, parsed on demand (e.g., 3.14)
    Decimal(&'input str),
    /// String literal with escapes resolved
    String(String),
    /// Date, DateTime or Time literal without the leading `@`
    DateTime(&'input str),
    /// Identifier (plain or backtick delimited)
    Identifier(String),
    /// External constant `%name`
    External(String),
    /// `$this`
    DollarThis,
    /// `$index`
    DollarIndex,
    /// `$total`
    DollarTotal,
    /// `true`
    True,
    /// `false`
    False,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `div`
    Div,
    /// `mod`
    Mod,
    /// `&`
    Ampersand,
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
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `.`
    Dot,
    /// `,`
    Comma,
}

impl Token<'_> {
    /// Name usable after `.`; keywords such as `contains` double as function names
    pub fn as_member_name(&self) -> Option<&str> {
        match self {
            Token::Identifier(name) => Some(name),
            Token::Contains => Some("contains"),
            Token::In => Some("in"),
            Token::Div => Some("div"),
            Token::Mod => Some("mod"),
            Token::And => Some("and"),
            Token::Or => Some("or"),
            Token::Xor => Some("xor"),
            Token::Implies => Some("implies"),
            _ => None,
        }
    }
}

/// Token with its byte offset
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'input> {
    /// The token
    pub token: Token<'input>,
    /// Byte offset of the first character
    pub offset: usize,
}

/// Streaming tokenizer over an expression string
pub struct Tokenizer<'input> {
    input: &'input str,
    bytes: &'input [u8],
    position: usize,
}

impl<'input> Tokenizer<'input> {
    /// Create a tokenizer for `input`
    pub fn new(input: &'input str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            position: 0,
        }
    }

    /// Tokenize the whole input
    pub fn tokenize_all(mut self) -> ExpressionResult<Vec<Spanned<'input>>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.position + ahead).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_byte(0) {
                Some(b) if b.is_ascii_whitespace() => self.position += 1,
                Some(b'/') if self.peek_byte(1) == Some(b'/') => {
                    while let Some(b) = self.peek_byte(0) {
                        if b == b'\n' {
                            break;
                        }
                        self.position += 1;
                    }
                }
                Some(b'/') if self.peek_byte(1) == Some(b'*') => {
                    self.position += 2;
                    while self.position < self.bytes.len()
                        && !(self.peek_byte(0) == Some(b'*') && self.peek_byte(1) == Some(b'/'))
                    {
                        self.position += 1;
                    }
                    self.position = (self.position + 2).min(self.bytes.len());
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> ExpressionResult<Option<Spanned<'input>>> {
        self.skip_whitespace_and_comments();
        let offset = self.position;
        let Some(byte) = self.peek_byte(0) else {
            return Ok(None);
        };

        let token = match byte {
            b'(' => self.single(Token::LeftParen),
            b')' => self.single(Token::RightParen),
            b'[' => self.single(Token::LeftBracket),
            b']' => self.single(Token::RightBracket),
            b'{' => self.single(Token::LeftBrace),
            b'}' => self.single(Token::RightBrace),
            b'.' => self.single(Token::Dot),
            b',' => self.single(Token::Comma),
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => self.single(Token::Multiply),
            b'/' => self.single(Token::Divide),
            b'&' => self.single(Token::Ampersand),
            b'|' => self.single(Token::Union),
            b'~' => self.single(Token::Equivalent),
            b'=' => self.single(Token::Equal),
            b'!' => match self.peek_byte(1) {
                Some(b'=') => self.double(Token::NotEqual),
                Some(b'~') => self.double(Token::NotEquivalent),
                _ => return Err(ExpressionError::parse(offset, "expected '=' or '~' after '!'")),
            },
            b'<' => match self.peek_byte(1) {
                Some(b'=') => self.double(Token::LessThanOrEqual),
                _ => self.single(Token::LessThan),
            },
            b'>' => match self.peek_byte(1) {
                Some(b'=') => self.double(Token::GreaterThanOrEqual),
                _ => self.single(Token::GreaterThan),
            },
            b'\'' => Token::String(self.quoted(b'\'')?),
            b'`' => Token::Identifier(self.quoted(b'`')?),
            b'@' => self.date_time(),
            b'%' => self.external()?,
            b'$' => self.dollar()?,
            b'0'..=b'9' => self.number()?,
            b if b.is_ascii_alphabetic() || b == b'_' => self.word(),
            _ => {
                let found = self
                    .input
                    .get(offset..)
                    .and_then(|rest| rest.chars().next())
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                return Err(ExpressionError::parse(
                    offset,
                    format!("unexpected character '{found}'"),
                ));
            }
        };

        Ok(Some(Spanned { token, offset }))
    }

    fn single(&mut self, token: Token<'input>) -> Token<'input> {
        self.position += 1;
        token
    }

    fn double(&mut self, token: Token<'input>) -> Token<'input> {
        self.position += 2;
        token
    }

    fn quoted(&mut self, quote: u8) -> ExpressionResult<String> {
        let start = self.position;
        self.position += 1;
        let mut out = String::new();
        loop {
            let Some(b) = self.peek_byte(0) else {
                return Err(ExpressionError::parse(start, "unterminated literal"));
            };
            if b == quote {
                self.position += 1;
                return Ok(out);
            }
            if b == b'\\' {
                let escaped = self
                    .peek_byte(1)
                    .ok_or_else(|| ExpressionError::parse(self.position, "dangling escape"))?;
                out.push(match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'f' => '\u{c}',
                    other => other as char,
                });
                self.position += 2;
                continue;
            }
            // Copy one UTF-8 scalar at a time
            let rest = &self.input[self.position..];
            let ch = rest.chars().next().unwrap_or_default();
            out.push(ch);
            self.position += ch.len_utf8().max(1);
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'input str {
        let start = self.position;
        while self.peek_byte(0).is_some_and(&pred) {
            self.position += 1;
        }
        &self.input[start..self.position]
    }

    fn date_time(&mut self) -> Token<'input> {
        self.position += 1;
        let literal = self.take_while(|b| {
            b.is_ascii_digit() || matches!(b, b'-' | b':' | b'T' | b'Z' | b'+' | b'.')
        });
        Token::DateTime(literal)
    }

    fn external(&mut self) -> ExpressionResult<Token<'input>> {
        self.position += 1;
        match self.peek_byte(0) {
            Some(b'`') => Ok(Token::External(self.quoted(b'`')?)),
            Some(b'\'') => Ok(Token::External(self.quoted(b'\'')?)),
            _ => {
                let name = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
                if name.is_empty() {
                    Err(ExpressionError::parse(self.position, "expected name after '%'"))
                } else {
                    Ok(Token::External(name.to_string()))
                }
            }
        }
    }

    fn dollar(&mut self) -> ExpressionResult<Token<'input>> {
        let start = self.position;
        self.position += 1;
        match self.take_while(|b| b.is_ascii_alphabetic()) {
            "this" => Ok(Token::DollarThis),
            "index" => Ok(Token::DollarIndex),
            "total" => Ok(Token::DollarTotal),
            other => Err(ExpressionError::parse(start, format!("unknown variable ${other}"))),
        }
    }

    fn number(&mut self) -> ExpressionResult<Token<'input>> {
        let start = self.position;
        self.take_while(|b| b.is_ascii_digit());
        let is_decimal =
            self.peek_byte(0) == Some(b'.') && self.peek_byte(1).is_some_and(|b| b.is_ascii_digit());
        if is_decimal {
            self.position += 1;
            self.take_while(|b| b.is_ascii_digit());
            return Ok(Token::Decimal(&self.input[start..self.position]));
        }
        let digits = &self.input[start..self.position];
        digits
            .parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| ExpressionError::parse(start, format!("integer out of range: {digits}")))
    }

    fn word(&mut self) -> Token<'input> {
        let word = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_');
        match word {
            "true" => Token::True,
            "false" => Token::False,
            "and" => Token::And,
            "or" => Token::Or,
            "xor" => Token::Xor,
            "implies" => Token::Implies,
            "div" => Token::Div,
            "mod" => Token::Mod,
            "in" => Token::In,
            "contains" => Token::Contains,
            other => Token::Identifier(other.to_string()),
        }
    }
}
