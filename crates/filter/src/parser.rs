// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lexer and recursive-descent parser for filter s-expressions.
//!
//! Errors carry the byte offset of the offending token so clients get
//! a human-readable location. The outermost parentheses may be
//! omitted; unrecognized atoms are syntax errors.

use crate::ast::{Filter, StatusPred, StringPred, TimeSpan, TimeUnit};
use thiserror::Error;

/// User-surface filter errors, returned verbatim to clients.
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("invalid regex {pattern:?}: {message}")]
    Regex { pattern: String, message: String },
}

fn syntax(offset: usize, message: impl Into<String>) -> FilterError {
    FilterError::Syntax {
        offset,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen(usize),
    RParen(usize),
    Atom(usize, String),
    Str(usize, String),
}

impl Token {
    fn offset(&self) -> usize {
        match self {
            Token::LParen(o) | Token::RParen(o) => *o,
            Token::Atom(o, _) | Token::Str(o, _) => *o,
        }
    }
}

fn lex(input: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen(i));
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen(i));
                i += 1;
            }
            '"' => {
                let start = i;
                i += 1;
                let mut value = String::new();
                loop {
                    if i >= bytes.len() {
                        return Err(syntax(start, "unterminated string"));
                    }
                    match bytes[i] as char {
                        '"' => {
                            i += 1;
                            break;
                        }
                        '\\' => {
                            if i + 1 >= bytes.len() {
                                return Err(syntax(start, "unterminated string"));
                            }
                            match bytes[i + 1] as char {
                                '"' => value.push('"'),
                                '\\' => value.push('\\'),
                                other => {
                                    return Err(syntax(
                                        i,
                                        format!("unknown escape '\\{}'", other),
                                    ))
                                }
                            }
                            i += 2;
                        }
                        _ => {
                            // Consume one full UTF-8 character.
                            let rest = &input[i..];
                            let ch = match rest.chars().next() {
                                Some(ch) => ch,
                                None => return Err(syntax(start, "unterminated string")),
                            };
                            value.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                tokens.push(Token::Str(start, value));
            }
            _ => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token::Atom(start, input[start..i].to_string()));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input_len: usize,
}

/// Parse a filter expression.
pub fn parse(input: &str) -> Result<Filter, FilterError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(syntax(0, "empty filter"));
    }
    let bare = !matches!(tokens.first(), Some(Token::LParen(_)));
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let filter = if bare {
        // Outermost parens omitted: treat the whole input as one form.
        let (offset, head) = parser.head_atom()?;
        parser.form_body(offset, &head, true)?
    } else {
        parser.expr()?
    };
    if let Some(extra) = parser.peek() {
        return Err(syntax(extra.offset(), "unexpected trailing input"));
    }
    Ok(filter)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eof_offset(&self) -> usize {
        self.input_len
    }

    fn expect_lparen(&mut self) -> Result<usize, FilterError> {
        match self.next() {
            Some(Token::LParen(offset)) => Ok(offset),
            Some(token) => Err(syntax(token.offset(), "expected '('")),
            None => Err(syntax(self.eof_offset(), "expected '('")),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), FilterError> {
        match self.next() {
            Some(Token::RParen(_)) => Ok(()),
            Some(token) => Err(syntax(token.offset(), "expected ')'")),
            None => Err(syntax(self.eof_offset(), "expected ')'")),
        }
    }

    fn head_atom(&mut self) -> Result<(usize, String), FilterError> {
        match self.next() {
            Some(Token::Atom(offset, atom)) => Ok((offset, atom)),
            Some(token) => Err(syntax(token.offset(), "expected a keyword atom")),
            None => Err(syntax(self.eof_offset(), "expected a keyword atom")),
        }
    }

    fn at_end_of_form(&self, bare: bool) -> bool {
        match self.peek() {
            None => bare,
            Some(Token::RParen(_)) => !bare,
            Some(_) => false,
        }
    }

    fn close_form(&mut self, bare: bool) -> Result<(), FilterError> {
        if bare {
            match self.peek() {
                None => Ok(()),
                Some(token) => Err(syntax(token.offset(), "unexpected trailing input")),
            }
        } else {
            self.expect_rparen()
        }
    }

    fn expr(&mut self) -> Result<Filter, FilterError> {
        self.expect_lparen()?;
        let (offset, head) = self.head_atom()?;
        self.form_body(offset, &head, false)
    }

    fn form_body(&mut self, offset: usize, head: &str, bare: bool) -> Result<Filter, FilterError> {
        let filter = match head {
            "all" => {
                self.close_form(bare)?;
                Filter::All
            }
            "and" | "or" => {
                let mut parts = Vec::new();
                while !self.at_end_of_form(bare) {
                    parts.push(self.expr()?);
                }
                self.close_form(bare)?;
                if head == "and" {
                    Filter::And(parts)
                } else {
                    Filter::Or(parts)
                }
            }
            "not" => {
                let inner = self.expr()?;
                self.close_form(bare)?;
                Filter::Not(Box::new(inner))
            }
            "name" | "id" => {
                let pred = self.pred()?;
                self.close_form(bare)?;
                if head == "name" {
                    Filter::Name(pred)
                } else {
                    Filter::Id(pred)
                }
            }
            "tags" => {
                let mut preds = Vec::new();
                while !self.at_end_of_form(bare) {
                    preds.push(self.pred()?);
                }
                self.close_form(bare)?;
                Filter::Tags(preds)
            }
            "created-in-the-past" => {
                let span = self.span()?;
                self.close_form(bare)?;
                Filter::CreatedInThePast(span)
            }
            // Aliases: compile-time macros resolved to base forms.
            "recent" => {
                self.close_form(bare)?;
                Filter::CreatedInThePast(TimeSpan {
                    unit: TimeUnit::Weeks,
                    amount: 2.0,
                })
            }
            other => {
                let Some(pred) = status_pred(other) else {
                    return Err(syntax(offset, format!("unknown filter atom '{}'", other)));
                };
                self.close_form(bare)?;
                Filter::Status(pred)
            }
        };
        Ok(filter)
    }

    fn pred(&mut self) -> Result<StringPred, FilterError> {
        match self.next() {
            Some(Token::Str(_, value)) | Some(Token::Atom(_, value)) => {
                Ok(StringPred::Equals(value))
            }
            Some(Token::LParen(_)) => {
                let (offset, head) = self.head_atom()?;
                let value = match self.next() {
                    Some(Token::Str(_, value)) | Some(Token::Atom(_, value)) => value,
                    Some(token) => return Err(syntax(token.offset(), "expected a string")),
                    None => return Err(syntax(self.eof_offset(), "expected a string")),
                };
                self.expect_rparen()?;
                match head.as_str() {
                    "equals" => Ok(StringPred::Equals(value)),
                    // `matches` is an alias for `re`.
                    "re" | "matches" => Ok(StringPred::Re(value)),
                    other => Err(syntax(offset, format!("unknown predicate '{}'", other))),
                }
            }
            Some(token) => Err(syntax(token.offset(), "expected a string predicate")),
            None => Err(syntax(self.eof_offset(), "expected a string predicate")),
        }
    }

    fn span(&mut self) -> Result<TimeSpan, FilterError> {
        self.expect_lparen()?;
        let (offset, head) = self.head_atom()?;
        let unit = match head.as_str() {
            "hours" => TimeUnit::Hours,
            "days" => TimeUnit::Days,
            "weeks" => TimeUnit::Weeks,
            other => return Err(syntax(offset, format!("unknown time unit '{}'", other))),
        };
        let amount = match self.next() {
            Some(Token::Atom(offset, text)) => text
                .parse::<f64>()
                .map_err(|_| syntax(offset, format!("invalid number '{}'", text)))?,
            Some(token) => return Err(syntax(token.offset(), "expected a number")),
            None => return Err(syntax(self.eof_offset(), "expected a number")),
        };
        self.expect_rparen()?;
        Ok(TimeSpan { unit, amount })
    }
}

fn status_pred(atom: &str) -> Option<StatusPred> {
    Some(match atom {
        "is-activable" => StatusPred::Activable,
        "is-in-progress" => StatusPred::InProgress,
        "is-successful" => StatusPred::Successful,
        "is-failed" => StatusPred::Failed,
        "is-really-running" => StatusPred::ReallyRunning,
        "is-killable" => StatusPred::Killable,
        "is-dependency-dead" => StatusPred::DependencyDead,
        "is-activated-by-user" => StatusPred::ActivatedByUser,
        "killed-from-passive" => StatusPred::KilledFromPassive,
        "failed-from-running" => StatusPred::FailedFromRunning,
        "failed-from-starting" => StatusPred::FailedFromStarting,
        "failed-from-condition" => StatusPred::FailedFromCondition,
        // Word aliases for the common cases.
        "successful" => StatusPred::Successful,
        "failed" => StatusPred::Failed,
        "in-progress" => StatusPred::InProgress,
        "dependency-dead" => StatusPred::DependencyDead,
        _ => return None,
    })
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
