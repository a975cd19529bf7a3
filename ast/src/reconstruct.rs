//! Rebuilds the typed AST from a serialized derivation tree.
//!
//! Everything works on indices into the flat line list. A node's children are
//! found with [`DerivationTree::children`], which is built on the subtree
//! extraction primitive, so no step ever slices or re-reads text.

use pjc_parser::{
    derivation::{DerivationError, DerivationTree, Node, Nonterminal},
    lexer::{Token, TokenKind},
    DEFAULT_MAX_DEPTH,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    AdditiveOperator, Expression, Identifier, Instruction, MultiplicativeOperator, Primary,
    Program, Sign, Term,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("{0}")]
    Read(#[from] DerivationError),
    #[error("Malformed derivation tree at node {node}: expected {expected}")]
    MalformedTree { node: usize, expected: &'static str },
    #[error("Number \"{0}\" does not fit in 64 bits")]
    InvalidNumber(String),
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

pub struct Reconstructor<'a> {
    tree: &'a DerivationTree,
    nesting: usize,
    max_depth: usize,
}

impl<'a> Reconstructor<'a> {
    pub fn new(tree: &'a DerivationTree) -> Self {
        Self {
            tree,
            nesting: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn node(&self, index: usize) -> &'a Node {
        self.tree.node(index)
    }

    fn is_tag(&self, index: usize, nonterminal: Nonterminal) -> bool {
        matches!(self.node(index), Node::Tag(tag) if *tag == nonterminal)
    }

    fn expect_tag(&self, index: usize, nonterminal: Nonterminal) -> Result<(), ReconstructError> {
        if self.is_tag(index, nonterminal) {
            Ok(())
        } else {
            Err(malformed(index, nonterminal.as_str()))
        }
    }

    fn terminal(&self, index: usize) -> Option<&'a Token> {
        match self.node(index) {
            Node::Terminal(token) => Some(token),
            _ => None,
        }
    }

    fn expect_terminal(
        &self,
        index: usize,
        kind: TokenKind,
    ) -> Result<&'a Token, ReconstructError> {
        self.terminal(index)
            .filter(|token| token.kind == kind)
            .ok_or_else(|| malformed(index, kind.as_str()))
    }

    /// Child `position` of a node, or a structural error naming what was
    /// expected there.
    fn child(
        children: &[usize],
        parent: usize,
        position: usize,
        expected: &'static str,
    ) -> Result<usize, ReconstructError> {
        children
            .get(position)
            .copied()
            .ok_or_else(|| malformed(parent, expected))
    }

    fn descend(&mut self) -> Result<(), ReconstructError> {
        self.nesting += 1;
        if self.nesting > self.max_depth {
            return Err(ReconstructError::NestingTooDeep(self.max_depth));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.nesting -= 1;
    }

    pub fn program(&mut self) -> Result<Program, ReconstructError> {
        if self.tree.is_empty() {
            return Err(malformed(0, "program"));
        }
        self.expect_tag(0, Nonterminal::Program)?;

        let children = self.tree.children(0);
        let list = Self::child(&children, 0, 0, "lista_naredbi")?;
        let instructions = self.statement_list(list)?;

        let end = self.tree.subtree(0).end;
        if end != self.tree.len() {
            return Err(malformed(end, "end of the derivation tree"));
        }

        debug!(instructions = instructions.len(), "program reconstructed");
        Ok(Program(instructions))
    }

    fn statement_list(&mut self, index: usize) -> Result<Vec<Instruction>, ReconstructError> {
        let mut instructions = vec![];
        let mut cur = index;

        loop {
            self.expect_tag(cur, Nonterminal::StatementList)?;
            let children = self.tree.children(cur);

            match children.as_slice() {
                [epsilon] if *self.node(*epsilon) == Node::Epsilon => break,
                [statement, rest] => {
                    instructions.push(self.statement(*statement)?);
                    cur = *rest;
                }
                _ => return Err(malformed(cur, "naredba or $")),
            }
        }

        Ok(instructions)
    }

    fn statement(&mut self, index: usize) -> Result<Instruction, ReconstructError> {
        self.expect_tag(index, Nonterminal::Statement)?;
        let children = self.tree.children(index);
        let inner = Self::child(&children, index, 0, "naredba_pridruzivanja or za_petlja")?;

        match self.node(inner) {
            Node::Tag(Nonterminal::Assignment) => self.assignment(inner),
            Node::Tag(Nonterminal::ForLoop) => self.for_loop(inner),
            _ => Err(malformed(inner, "naredba_pridruzivanja or za_petlja")),
        }
    }

    fn assignment(&mut self, index: usize) -> Result<Instruction, ReconstructError> {
        let children = self.tree.children(index);

        let target = self.identifier(Self::child(&children, index, 0, "IDN")?)?;
        self.expect_terminal(Self::child(&children, index, 1, "OP_PRIDRUZI")?, TokenKind::Assign)?;
        let expr = self.expression(Self::child(&children, index, 2, "E")?)?;

        Ok(Instruction::Assign { target, expr })
    }

    fn for_loop(&mut self, index: usize) -> Result<Instruction, ReconstructError> {
        self.descend()?;
        let children = self.tree.children(index);

        self.expect_terminal(Self::child(&children, index, 0, "KR_ZA")?, TokenKind::KWFor)?;
        let var = self.identifier(Self::child(&children, index, 1, "IDN")?)?;
        self.expect_terminal(Self::child(&children, index, 2, "KR_OD")?, TokenKind::KWFrom)?;

        let to_position = children
            .iter()
            .position(|&child| {
                self.terminal(child)
                    .is_some_and(|token| token.kind == TokenKind::KWTo)
            })
            .ok_or_else(|| malformed(index, "KR_DO"))?;
        let body_position = children
            .iter()
            .position(|&child| self.is_tag(child, Nonterminal::StatementList))
            .ok_or_else(|| malformed(index, "lista_naredbi"))?;

        if to_position != 4 || body_position != 6 {
            return Err(malformed(index, "E between KR_OD, KR_DO and the body"));
        }

        let from = self.expression(children[3])?;
        let to = self.expression(children[5])?;
        let body = self.statement_list(children[6])?;

        self.expect_terminal(Self::child(&children, index, 7, "KR_AZ")?, TokenKind::KWEnd)?;
        if children.len() != 8 {
            return Err(malformed(children[8], "end of za_petlja"));
        }

        self.ascend();
        Ok(Instruction::ForLoop {
            var,
            from,
            to,
            body,
        })
    }

    fn identifier(&self, index: usize) -> Result<Identifier, ReconstructError> {
        let token = self.expect_terminal(index, TokenKind::Identifier)?;
        Ok(Identifier::new(token.lexeme.clone(), token.line))
    }

    fn expression(&mut self, index: usize) -> Result<Expression, ReconstructError> {
        self.descend()?;
        let mut terms = vec![];
        let mut cur = index;

        let last = loop {
            self.expect_tag(cur, Nonterminal::Expression)?;
            let children = self.tree.children(cur);

            let term = self.term(Self::child(&children, cur, 0, "T")?)?;
            let tail = Self::child(&children, cur, 1, "E_lista")?;

            match self.expression_tail(tail)? {
                Some((op, next)) => {
                    terms.push((term, op));
                    cur = next;
                }
                None => break term,
            }
        };

        let mut expr = Expression::from(last);
        while let Some((term, op)) = terms.pop() {
            expr = Expression::with_tail(term, op, expr);
        }

        self.ascend();
        Ok(expr)
    }

    /// `<E_lista>`: `$`, or an operator and the `<E>` index that follows it.
    fn expression_tail(
        &self,
        index: usize,
    ) -> Result<Option<(AdditiveOperator, usize)>, ReconstructError> {
        self.expect_tag(index, Nonterminal::ExpressionTail)?;
        let children = self.tree.children(index);

        match children.as_slice() {
            [epsilon] if *self.node(*epsilon) == Node::Epsilon => Ok(None),
            [op, next] if self.is_tag(*next, Nonterminal::Expression) => {
                let op = match self.terminal(*op).map(|token| token.kind) {
                    Some(TokenKind::Plus) => AdditiveOperator::Add,
                    Some(TokenKind::Minus) => AdditiveOperator::Subtract,
                    _ => return Err(malformed(*op, "OP_PLUS or OP_MINUS")),
                };
                Ok(Some((op, *next)))
            }
            _ => Err(malformed(index, "$ or an additive operator")),
        }
    }

    fn term(&mut self, index: usize) -> Result<Term, ReconstructError> {
        let mut primaries = vec![];
        let mut cur = index;

        let last = loop {
            self.expect_tag(cur, Nonterminal::Term)?;
            let children = self.tree.children(cur);

            let primary = self.primary(Self::child(&children, cur, 0, "P")?)?;
            let tail = Self::child(&children, cur, 1, "T_lista")?;

            match self.term_tail(tail)? {
                Some((op, next)) => {
                    primaries.push((primary, op));
                    cur = next;
                }
                None => break primary,
            }
        };

        let mut term = Term::from(last);
        while let Some((primary, op)) = primaries.pop() {
            term = Term::with_tail(primary, op, term);
        }

        Ok(term)
    }

    fn term_tail(
        &self,
        index: usize,
    ) -> Result<Option<(MultiplicativeOperator, usize)>, ReconstructError> {
        self.expect_tag(index, Nonterminal::TermTail)?;
        let children = self.tree.children(index);

        match children.as_slice() {
            [epsilon] if *self.node(*epsilon) == Node::Epsilon => Ok(None),
            [op, next] if self.is_tag(*next, Nonterminal::Term) => {
                let op = match self.terminal(*op).map(|token| token.kind) {
                    Some(TokenKind::Asterisk) => MultiplicativeOperator::Multiply,
                    Some(TokenKind::Slash) => MultiplicativeOperator::Divide,
                    _ => return Err(malformed(*op, "OP_PUTA or OP_DIJELI")),
                };
                Ok(Some((op, *next)))
            }
            _ => Err(malformed(index, "$ or a multiplicative operator")),
        }
    }

    /// Every sign is one more level of nesting.
    fn primary(&mut self, index: usize) -> Result<Primary, ReconstructError> {
        let mut signs = vec![];
        let mut cur = index;

        let innermost = loop {
            self.expect_tag(cur, Nonterminal::Primary)?;
            let children = self.tree.children(cur);
            let first = Self::child(&children, cur, 0, "IDN, BROJ, a sign or L_ZAGRADA")?;
            let Some(token) = self.terminal(first) else {
                return Err(malformed(first, "IDN, BROJ, a sign or L_ZAGRADA"));
            };

            match token.kind {
                TokenKind::Identifier if children.len() == 1 => {
                    break Primary::Identifier(Identifier::new(token.lexeme.clone(), token.line))
                }
                TokenKind::Number if children.len() == 1 => break number(token)?,
                TokenKind::Plus | TokenKind::Minus => {
                    self.descend()?;
                    signs.push(if token.kind == TokenKind::Plus {
                        Sign::Plus
                    } else {
                        Sign::Minus
                    });

                    let operand = Self::child(&children, cur, 1, "P after a sign")?;
                    if !self.is_tag(operand, Nonterminal::Primary) {
                        // The parser accepts a sign followed directly by the
                        // expression continuation; there is no value to sign.
                        return Err(malformed(operand, "P after a sign"));
                    }
                    cur = operand;
                }
                TokenKind::OpenParen if children.len() == 3 => {
                    let expr = self.expression(children[1])?;
                    self.expect_terminal(children[2], TokenKind::CloseParen)?;
                    break Primary::Parenthesized(Box::new(expr));
                }
                _ => return Err(malformed(first, "IDN, BROJ, a sign or L_ZAGRADA")),
            }
        };

        let mut primary = innermost;
        while let Some(sign) = signs.pop() {
            primary = Primary::Signed(sign, Box::new(primary));
            self.ascend();
        }

        Ok(primary)
    }
}

fn malformed(index: usize, expected: &'static str) -> ReconstructError {
    ReconstructError::MalformedTree {
        node: index + 1,
        expected,
    }
}

fn number(token: &Token) -> Result<Primary, ReconstructError> {
    token
        .lexeme
        .parse()
        .map(Primary::Number)
        .map_err(|_| ReconstructError::InvalidNumber(token.lexeme.clone()))
}

pub fn reconstruct_program(tree: &DerivationTree) -> Result<Program, ReconstructError> {
    Reconstructor::new(tree).program()
}

/// Reads derivation tree text and rebuilds the program it describes.
pub fn reconstruct(text: &str) -> Result<Program, ReconstructError> {
    let tree: DerivationTree = text.parse()?;
    reconstruct_program(&tree)
}
