//! Definition-before-use check over the token stream.
//!
//! `za` opens a scope and `az` closes it. An assignment target or a loop
//! variable is a definition; every other identifier is a use. A definition
//! only becomes visible when the next statement starts, so the right-hand
//! side of its own assignment (or the header of its own loop) cannot see it.

use std::{collections::HashMap, fmt::Display};

use pjc_parser::lexer::{Token, TokenKind};
use thiserror::Error;
use tracing::{debug, trace};

/// A use of `name` on `used_at` that resolved to the definition on
/// `defined_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub name: String,
    pub used_at: usize,
    pub defined_at: usize,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.used_at, self.defined_at, self.name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Identifier \"{name}\" on line {line} is used before it is defined")]
pub struct Unresolved {
    pub name: String,
    pub line: usize,
}

impl Unresolved {
    pub fn render(&self) -> String {
        format!("err {} {}", self.line, self.name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub resolutions: Vec<Resolution>,
    /// The first use that did not resolve. Checking stops there.
    pub unresolved: Option<Unresolved>,
}

impl Report {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for resolution in &self.resolutions {
            out.push_str(&resolution.to_string());
            out.push('\n');
        }
        if let Some(unresolved) = &self.unresolved {
            out.push_str(&unresolved.render());
            out.push('\n');
        }
        out
    }

    pub fn into_result(self) -> Result<Vec<Resolution>, Unresolved> {
        match self.unresolved {
            Some(unresolved) => Err(unresolved),
            None => Ok(self.resolutions),
        }
    }
}

type Scope = HashMap<String, usize>;

struct Pending {
    name: String,
    line: usize,
    scope: usize,
    loop_var: bool,
}

struct State {
    /// Root first.
    scopes: Vec<Scope>,
    pending: Option<Pending>,
}

impl State {
    fn new() -> Self {
        Self {
            scopes: vec![Scope::new()],
            pending: None,
        }
    }

    fn innermost(&self) -> usize {
        self.scopes.len() - 1
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn commit(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        if !pending.loop_var && self.lookup(&pending.name).is_some() {
            return;
        }

        trace!(
            name = %pending.name,
            line = pending.line,
            scope = pending.scope,
            "definition visible"
        );
        self.scopes[pending.scope].insert(pending.name, pending.line);
    }

    fn define(&mut self, token: &Token, loop_var: bool) {
        self.pending = Some(Pending {
            name: token.lexeme.clone(),
            line: token.line,
            scope: self.innermost(),
            loop_var,
        });
    }
}

pub fn check_tokens(tokens: &[Token]) -> Report {
    let mut state = State::new();
    let mut report = Report::default();

    for (i, token) in tokens.iter().enumerate() {
        let next = tokens.get(i + 1).map(|tok| tok.kind);

        match token.kind {
            TokenKind::KWFor => {
                state.commit();
                state.scopes.push(Scope::new());
            }
            TokenKind::KWEnd => {
                state.commit();
                // A stray `az` never closes the root scope.
                if state.scopes.len() > 1 {
                    state.scopes.pop();
                }
            }
            TokenKind::Identifier if next == Some(TokenKind::Assign) => {
                state.commit();
                state.define(token, false);
            }
            TokenKind::Identifier if next == Some(TokenKind::KWFrom) => {
                state.define(token, true);
            }
            TokenKind::Identifier => match state.lookup(&token.lexeme) {
                Some(defined_at) => report.resolutions.push(Resolution {
                    name: token.lexeme.clone(),
                    used_at: token.line,
                    defined_at,
                }),
                None => {
                    report.unresolved = Some(Unresolved {
                        name: token.lexeme.clone(),
                        line: token.line,
                    });
                    break;
                }
            },
            _ => {}
        }
    }

    debug!(
        uses = report.resolutions.len(),
        unresolved = report.unresolved.is_some(),
        "definition check finished"
    );
    report
}
