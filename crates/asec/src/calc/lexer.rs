// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CALC tokenizer.

use super::Op;
use crate::error::CompileError;

/// A built-in function: name, opcode, argument count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Function {
    pub name: &'static str,
    pub op: Op,
    pub arity: usize,
}

const FUNCTIONS: &[Function] = &[
    Function { name: "ABS", op: Op::Abs, arity: 1 },
    Function { name: "ACOS", op: Op::Acos, arity: 1 },
    Function { name: "ASIN", op: Op::Asin, arity: 1 },
    Function { name: "ATAN", op: Op::Atan, arity: 1 },
    Function { name: "ATAN2", op: Op::Atan2, arity: 2 },
    Function { name: "CEIL", op: Op::Ceil, arity: 1 },
    Function { name: "COS", op: Op::Cos, arity: 1 },
    Function { name: "COSH", op: Op::Cosh, arity: 1 },
    Function { name: "EXP", op: Op::Exp, arity: 1 },
    Function { name: "FLOOR", op: Op::Floor, arity: 1 },
    Function { name: "LN", op: Op::Ln, arity: 1 },
    Function { name: "LOG", op: Op::Log10, arity: 1 },
    Function { name: "LOGE", op: Op::Ln, arity: 1 },
    Function { name: "MAX", op: Op::Max, arity: 2 },
    Function { name: "MIN", op: Op::Min, arity: 2 },
    Function { name: "NINT", op: Op::Nint, arity: 1 },
    Function { name: "SIN", op: Op::Sin, arity: 1 },
    Function { name: "SINH", op: Op::Sinh, arity: 1 },
    Function { name: "SQR", op: Op::Sqrt, arity: 1 },
    Function { name: "SQRT", op: Op::Sqrt, arity: 1 },
    Function { name: "TAN", op: Op::Tan, arity: 1 },
    Function { name: "TANH", op: Op::Tanh, arity: 1 },
];

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Number(f64),
    Input(u8),
    Function(Function),
    /// `!`, `~`, `NOT` (negation)
    Unary(Op),
    /// `-`: negation or subtraction, decided by the compiler
    Minus,
    Binary(Op),
    LParen,
    RParen,
    Comma,
    Question,
    Colon,
    /// `:=`, never accepted
    Assign,
    Eof,
}

pub(super) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    /// Consume `expected` if it is next.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.next_char();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.next_char();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.next_char();
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    fn read_digits(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.next_char();
        }
    }

    fn read_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.read_digits();
        if self.eat('.') {
            self.read_digits();
        }

        // Exponent only when digits follow, so "1E" stays 1 then input E.
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let mark = self.pos;
            self.next_char();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.next_char();
            }
            if matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                self.read_digits();
            } else {
                self.pos = mark;
            }
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| CompileError::BadLiteral {
                position: start,
                text: text.to_string(),
            })
    }

    fn word_token(word: &str, position: usize) -> Result<Token, CompileError> {
        let upper = word.to_ascii_uppercase();
        if upper.len() == 1 {
            if let Some(index) = super::input_index(upper.as_bytes()[0] as char) {
                return Ok(Token::Input(index as u8));
            }
        }
        let token = match upper.as_str() {
            "PI" => Token::Number(std::f64::consts::PI),
            "D2R" => Token::Number(std::f64::consts::PI / 180.0),
            "R2D" => Token::Number(180.0 / std::f64::consts::PI),
            "AND" => Token::Binary(Op::BitAnd),
            "OR" => Token::Binary(Op::BitOr),
            "XOR" => Token::Binary(Op::BitXor),
            // arithmetic negation, like unary `-`
            "NOT" => Token::Unary(Op::Neg),
            _ => match FUNCTIONS.iter().find(|f| f.name == upper) {
                Some(f) => Token::Function(*f),
                None => {
                    return Err(CompileError::UnknownIdentifier {
                        position,
                        name: word.to_string(),
                    })
                }
            },
        };
        Ok(token)
    }

    /// Next token and the byte offset it starts at.
    pub fn next_token(&mut self) -> Result<(Token, usize), CompileError> {
        self.skip_whitespace();
        let position = self.pos;

        let ch = match self.peek_char() {
            Some(c) => c,
            None => return Ok((Token::Eof, position)),
        };

        if ch.is_ascii_digit()
            || (ch == '.' && matches!(self.peek_second(), Some(c) if c.is_ascii_digit()))
        {
            return Ok((self.read_number()?, position));
        }

        if ch.is_ascii_alphabetic() {
            let word = self.read_identifier();
            return Ok((Self::word_token(word, position)?, position));
        }

        self.next_char();
        let token = match ch {
            '+' => Token::Binary(Op::Add),
            '-' => Token::Minus,
            '*' => {
                if self.eat('*') {
                    Token::Binary(Op::Pow)
                } else {
                    Token::Binary(Op::Mul)
                }
            }
            '/' => Token::Binary(Op::Div),
            '%' => Token::Binary(Op::Mod),
            '^' => Token::Binary(Op::Pow),
            '|' => {
                if self.eat('|') {
                    Token::Binary(Op::Or)
                } else {
                    Token::Binary(Op::BitOr)
                }
            }
            '&' => {
                if self.eat('&') {
                    Token::Binary(Op::And)
                } else {
                    Token::Binary(Op::BitAnd)
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Binary(Op::Ge)
                } else if self.eat('>') {
                    Token::Binary(Op::Shr)
                } else {
                    Token::Binary(Op::Gt)
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Binary(Op::Le)
                } else if self.eat('<') {
                    Token::Binary(Op::Shl)
                } else {
                    Token::Binary(Op::Lt)
                }
            }
            '=' => {
                self.eat('=');
                Token::Binary(Op::Eq)
            }
            '!' => {
                if self.eat('=') {
                    Token::Binary(Op::Ne)
                } else {
                    Token::Unary(Op::Not)
                }
            }
            '#' => Token::Binary(Op::Ne),
            '~' => Token::Unary(Op::BitNot),
            ':' => {
                if self.eat('=') {
                    Token::Assign
                } else {
                    Token::Colon
                }
            }
            '?' => Token::Question,
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => {
                return Err(CompileError::UnknownIdentifier {
                    position,
                    name: other.to_string(),
                })
            }
        };
        Ok((token, position))
    }
}
