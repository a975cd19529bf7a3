pub mod reconstruct;

pub use reconstruct::{reconstruct, reconstruct_program, ReconstructError, Reconstructor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    /// Source line of this occurrence.
    pub line: usize,
}

impl Identifier {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program(pub Vec<Instruction>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Assign {
        target: Identifier,
        expr: Expression,
    },
    ForLoop {
        var: Identifier,
        from: Expression,
        to: Expression,
        body: Vec<Instruction>,
    },
}

/// `term (+|- expression)?`, nested to the right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub term: Term,
    pub tail: Option<(AdditiveOperator, Box<Expression>)>,
}

/// `primary (*|/ term)?`, nested to the right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub primary: Primary,
    pub tail: Option<(MultiplicativeOperator, Box<Term>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primary {
    Identifier(Identifier),
    Number(i64),
    Signed(Sign, Box<Primary>),
    Parenthesized(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdditiveOperator {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplicativeOperator {
    Multiply,
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Expression {
    pub fn with_tail(term: Term, op: AdditiveOperator, rest: Expression) -> Self {
        Self {
            term,
            tail: Some((op, Box::new(rest))),
        }
    }

    /// The operands of the chain in source order, each with the operator
    /// written in front of it. `a - b - c` is still `a - (b - c)`.
    pub fn operands(&self) -> Vec<(Option<AdditiveOperator>, &Term)> {
        let mut operands = vec![(None, &self.term)];
        let mut cur = self;

        while let Some((op, next)) = &cur.tail {
            operands.push((Some(*op), &next.term));
            cur = next;
        }

        operands
    }
}

impl Term {
    pub fn with_tail(primary: Primary, op: MultiplicativeOperator, rest: Term) -> Self {
        Self {
            primary,
            tail: Some((op, Box::new(rest))),
        }
    }

    pub fn operands(&self) -> Vec<(Option<MultiplicativeOperator>, &Primary)> {
        let mut operands = vec![(None, &self.primary)];
        let mut cur = self;

        while let Some((op, next)) = &cur.tail {
            operands.push((Some(*op), &next.primary));
            cur = next;
        }

        operands
    }
}

// Long chains would otherwise be dropped one recursive call per link.
impl Drop for Expression {
    fn drop(&mut self) {
        let mut tail = self.tail.take();
        while let Some((_, mut next)) = tail {
            tail = next.tail.take();
        }
    }
}

impl Drop for Term {
    fn drop(&mut self) {
        let mut tail = self.tail.take();
        while let Some((_, mut next)) = tail {
            tail = next.tail.take();
        }
    }
}

impl From<Primary> for Term {
    fn from(primary: Primary) -> Self {
        Self {
            primary,
            tail: None,
        }
    }
}

impl From<Term> for Expression {
    fn from(term: Term) -> Self {
        Self { term, tail: None }
    }
}

impl From<Primary> for Expression {
    fn from(primary: Primary) -> Self {
        Term::from(primary).into()
    }
}
