pub mod derivation;
pub mod lexer;

use thiserror::Error;
use tracing::debug;

use crate::{
    derivation::{DerivationTree, Node, Nonterminal},
    lexer::{Token, TokenKind},
};

/// How many expressions and loops may be open at once before parsing gives up.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// A syntax error carries either free text or the token it stopped at.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Token(Token),
}

impl SyntaxError {
    /// Input ran out in the middle of a construct.
    pub fn unexpected_end() -> Self {
        Self::Message("kraj".to_owned())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParserError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("{}", describe_last_identifier(.last_identifier))]
    BracketImbalance { last_identifier: Option<Token> },
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

impl ParserError {
    /// The single line printed in place of the derivation tree.
    pub fn render(&self) -> String {
        format!("err {self}")
    }
}

fn describe_last_identifier(token: &Option<Token>) -> String {
    token.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Predictive recursive-descent parser that records every grammar symbol it
/// visits as a line of the derivation tree.
///
/// Right-recursive lists (`stmt_list`, `expr_tail`, `term_tail`) are walked in
/// loops; only the emitted depth grows for them. Every other level of nesting
/// counts against `max_depth`.
#[derive(Debug)]
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,

    depth: usize,
    nesting: usize,
    max_depth: usize,

    tree: DerivationTree,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            nesting: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            tree: DerivationTree::default(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn cur_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn cur_kind(&self) -> Option<TokenKind> {
        self.cur_token().map(|tok| tok.kind)
    }

    fn cur_token_is(&self, kind: TokenKind) -> bool {
        self.cur_kind() == Some(kind)
    }

    /// Records the current token as a terminal line and moves past it.
    fn next_token(&mut self) {
        if let Some(token) = self.tokens.get(self.pos).cloned() {
            self.tree.push(self.depth, Node::Terminal(token));
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ParserError {
        match self.cur_token() {
            Some(token) => SyntaxError::Token(token.clone()).into(),
            None => SyntaxError::unexpected_end().into(),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<(), ParserError> {
        if self.cur_token_is(expected) {
            self.next_token();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn enter(&mut self, nonterminal: Nonterminal) {
        self.tree.push(self.depth, Node::Tag(nonterminal));
        self.depth += 1;
    }

    fn epsilon(&mut self) {
        self.tree.push(self.depth, Node::Epsilon);
    }

    fn descend(&mut self) -> Result<(), ParserError> {
        self.nesting += 1;
        if self.nesting > self.max_depth {
            return Err(ParserError::NestingTooDeep(self.max_depth));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.nesting -= 1;
    }

    pub fn parse_program(mut self) -> Result<DerivationTree, ParserError> {
        check_brackets(&self.tokens)?;

        self.enter(Nonterminal::Program);
        self.parse_statement_list()?;

        // A stray `az` ends the top level list early.
        if self.cur_token().is_some() {
            return Err(self.unexpected());
        }

        debug!(
            tokens = self.tokens.len(),
            lines = self.tree.len(),
            "derivation tree built"
        );
        Ok(self.tree)
    }

    fn parse_statement_list(&mut self) -> Result<(), ParserError> {
        let base = self.depth;

        loop {
            self.enter(Nonterminal::StatementList);
            match self.cur_kind() {
                Some(TokenKind::Identifier | TokenKind::KWFor) => self.parse_statement()?,
                Some(TokenKind::KWEnd) | None => {
                    self.epsilon();
                    break;
                }
                // An `=` here has lost the identifier it should follow.
                Some(_) => return Err(self.unexpected()),
            }
        }

        self.depth = base;
        Ok(())
    }

    fn parse_statement(&mut self) -> Result<(), ParserError> {
        let base = self.depth;
        self.enter(Nonterminal::Statement);

        match self.cur_kind() {
            Some(TokenKind::Identifier) => self.parse_assignment()?,
            Some(TokenKind::KWFor) => self.parse_for_loop()?,
            _ => return Err(self.unexpected()),
        }

        self.depth = base;
        Ok(())
    }

    fn parse_assignment(&mut self) -> Result<(), ParserError> {
        let base = self.depth;
        self.enter(Nonterminal::Assignment);

        self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::Assign)?;

        if self.cur_token().is_none() {
            return Err(SyntaxError::unexpected_end().into());
        }
        self.parse_expression()?;

        self.depth = base;
        Ok(())
    }

    fn parse_for_loop(&mut self) -> Result<(), ParserError> {
        self.descend()?;
        let base = self.depth;
        self.enter(Nonterminal::ForLoop);

        self.expect(TokenKind::KWFor)?;
        self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::KWFrom)?;
        self.parse_expression()?;
        self.expect(TokenKind::KWTo)?;
        self.parse_expression()?;
        self.parse_statement_list()?;
        self.expect(TokenKind::KWEnd)?;

        self.depth = base;
        self.ascend();
        Ok(())
    }

    fn parse_expression(&mut self) -> Result<(), ParserError> {
        self.descend()?;
        let base = self.depth;

        loop {
            self.enter(Nonterminal::Expression);
            self.parse_term()?;
            if !self.parse_expression_tail()? {
                break;
            }
        }

        self.depth = base;
        self.ascend();
        Ok(())
    }

    /// Emits `<E_lista>`. Returns true when an operator was consumed and the
    /// caller has to parse the expression that follows it.
    fn parse_expression_tail(&mut self) -> Result<bool, ParserError> {
        self.enter(Nonterminal::ExpressionTail);

        match self.cur_kind() {
            Some(TokenKind::Plus | TokenKind::Minus) => {
                self.next_token();
                Ok(true)
            }
            kind if ends_expression(kind) => {
                self.epsilon();
                Ok(false)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_term(&mut self) -> Result<(), ParserError> {
        let base = self.depth;

        loop {
            self.enter(Nonterminal::Term);
            self.parse_primary()?;

            self.enter(Nonterminal::TermTail);
            match self.cur_kind() {
                Some(TokenKind::Asterisk | TokenKind::Slash) => self.next_token(),
                kind if ends_term(kind) => {
                    self.epsilon();
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }

        self.depth = base;
        Ok(())
    }

    /// Each sign opens one more `<P>` and counts against `max_depth`.
    fn parse_primary(&mut self) -> Result<(), ParserError> {
        let base = self.depth;
        let mut signs = 0;

        loop {
            self.enter(Nonterminal::Primary);
            match self.cur_kind() {
                Some(TokenKind::Identifier | TokenKind::Number) => {
                    self.next_token();
                    break;
                }
                Some(TokenKind::Plus | TokenKind::Minus) => {
                    self.next_token();
                    if starts_primary(self.cur_kind()) {
                        self.descend()?;
                        signs += 1;
                        continue;
                    }
                    // A sign with nothing to apply to continues the
                    // surrounding expression, not the term.
                    if self.parse_expression_tail()? {
                        self.parse_expression()?;
                    }
                    break;
                }
                Some(TokenKind::OpenParen) => {
                    self.next_token();
                    self.parse_expression()?;
                    self.expect(TokenKind::CloseParen)?;
                    break;
                }
                _ => return Err(self.unexpected()),
            }
        }

        for _ in 0..signs {
            self.ascend();
        }
        self.depth = base;
        Ok(())
    }
}

pub fn parse(tokens: Vec<Token>) -> Result<DerivationTree, ParserError> {
    Parser::new(tokens).parse_program()
}

fn starts_primary(kind: Option<TokenKind>) -> bool {
    matches!(
        kind,
        Some(
            TokenKind::Identifier
                | TokenKind::Number
                | TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::OpenParen
        )
    )
}

fn ends_expression(kind: Option<TokenKind>) -> bool {
    matches!(
        kind,
        None | Some(
            TokenKind::Identifier
                | TokenKind::KWFor
                | TokenKind::KWTo
                | TokenKind::KWEnd
                | TokenKind::CloseParen
        )
    )
}

fn ends_term(kind: Option<TokenKind>) -> bool {
    matches!(kind, Some(TokenKind::Plus | TokenKind::Minus)) || ends_expression(kind)
}

/// Runs before any descent. Remembers the identifier opening the first line
/// after a line that contained a bracket, and reports it on imbalance.
fn check_brackets(tokens: &[Token]) -> Result<(), ParserError> {
    let mut count: i64 = 0;
    let mut after_bracket = false;
    let mut last_identifier = None;
    let mut current_line = None;

    for token in tokens {
        if current_line != Some(token.line) {
            current_line = Some(token.line);
            if after_bracket && token.kind == TokenKind::Identifier {
                after_bracket = false;
                last_identifier = Some(token.clone());
            }
        }

        match token.kind {
            TokenKind::OpenParen => {
                after_bracket = true;
                count += 1;
            }
            TokenKind::CloseParen => {
                after_bracket = true;
                count -= 1;
            }
            _ => {}
        }
    }

    if count != 0 {
        return Err(ParserError::BracketImbalance { last_identifier });
    }

    Ok(())
}
