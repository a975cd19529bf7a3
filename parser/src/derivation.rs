use std::{fmt::Display, ops::Range, str::FromStr};

use thiserror::Error;

use crate::lexer::{Token, TokenStreamError};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Line {number} is not a derivation node (\"{text}\"): {source}")]
    InvalidLine {
        number: usize,
        text: String,
        source: TokenStreamError,
    },
    #[error("Unknown nonterminal <{0}>")]
    UnknownNonterminal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nonterminal {
    Program,
    StatementList,
    Statement,
    Assignment,
    ForLoop,
    Expression,
    ExpressionTail,
    Term,
    TermTail,
    Primary,
}

impl Nonterminal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Nonterminal::Program => "program",
            Nonterminal::StatementList => "lista_naredbi",
            Nonterminal::Statement => "naredba",
            Nonterminal::Assignment => "naredba_pridruzivanja",
            Nonterminal::ForLoop => "za_petlja",
            Nonterminal::Expression => "E",
            Nonterminal::ExpressionTail => "E_lista",
            Nonterminal::Term => "T",
            Nonterminal::TermTail => "T_lista",
            Nonterminal::Primary => "P",
        }
    }
}

impl Display for Nonterminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.as_str())
    }
}

impl FromStr for Nonterminal {
    type Err = DerivationError;

    /// Expects the name without angle brackets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "program" => Self::Program,
            "lista_naredbi" => Self::StatementList,
            "naredba" => Self::Statement,
            "naredba_pridruzivanja" => Self::Assignment,
            "za_petlja" => Self::ForLoop,
            "E" => Self::Expression,
            "E_lista" => Self::ExpressionTail,
            "T" => Self::Term,
            "T_lista" => Self::TermTail,
            "P" => Self::Primary,
            other => return Err(DerivationError::UnknownNonterminal(other.to_owned())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Tag(Nonterminal),
    Terminal(Token),
    /// `$`
    Epsilon,
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Tag(nonterminal) => write!(f, "{nonterminal}"),
            Node::Terminal(token) => write!(f, "{token}"),
            Node::Epsilon => f.write_str("$"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationLine {
    pub depth: usize,
    pub node: Node,
}

/// A derivation tree kept in its serialized shape: a flat list of lines,
/// each carrying the depth it was emitted at.
///
/// Where every node's subtree ends is recorded as lines are pushed, so
/// [`DerivationTree::subtree`] and [`DerivationTree::children`] never scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DerivationTree {
    lines: Vec<DerivationLine>,
    /// One past the last line of each node's subtree, once a later line has
    /// closed it. `None` while the subtree still runs to the end.
    ends: Vec<Option<usize>>,
    /// Nodes whose subtree is still open, shallowest first.
    open: Vec<usize>,
}

impl DerivationTree {
    pub fn push(&mut self, depth: usize, node: Node) {
        let index = self.lines.len();

        while let Some(&top) = self.open.last() {
            if self.lines[top].depth < depth {
                break;
            }
            self.ends[top] = Some(index);
            self.open.pop();
        }

        self.lines.push(DerivationLine { depth, node });
        self.ends.push(None);
        self.open.push(index);
    }

    pub fn lines(&self) -> &[DerivationLine] {
        &self.lines
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.lines[index].node
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The lines belonging to the node at `index`: every following line with a
    /// greater depth, up to the first one that is not.
    pub fn subtree(&self, index: usize) -> Range<usize> {
        let end = self.ends[index].unwrap_or(self.lines.len());
        index + 1..end
    }

    /// Indices of the immediate children of the node at `index`.
    pub fn children(&self, index: usize) -> Vec<usize> {
        let range = self.subtree(index);
        let mut children = vec![];
        let mut i = range.start;

        while i < range.end {
            children.push(i);
            i = self.subtree(i).end;
        }

        children
    }

    /// Terminal leaves in order.
    pub fn terminals(&self) -> impl Iterator<Item = &Token> {
        self.lines.iter().filter_map(|line| match &line.node {
            Node::Terminal(token) => Some(token),
            _ => None,
        })
    }
}

impl Display for DerivationTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}{}", " ".repeat(line.depth), line.node)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationTree {
    type Err = DerivationError;

    /// Depth is the number of leading whitespace characters, so any
    /// consistent indentation unit works.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tree = DerivationTree::default();

        for (i, line) in s.lines().enumerate() {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let depth = line.chars().take_while(|ch| ch.is_whitespace()).count();

            let node = if text == "$" {
                Node::Epsilon
            } else if let Some(name) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
                Node::Tag(name.parse()?)
            } else {
                Node::Terminal(text.parse().map_err(|source| DerivationError::InvalidLine {
                    number: i + 1,
                    text: text.to_owned(),
                    source,
                })?)
            };

            tree.push(depth, node);
        }

        Ok(tree)
    }
}
