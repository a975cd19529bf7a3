//! FRISC assembly as typed lines.

#[cfg(feature = "ast")]
pub mod ast;
pub mod emit;
pub mod runtime;

pub use emit::EmitAsm;

/// Initial stack pointer, the top of FRISC memory used by generated code.
pub const STACK_TOP: u32 = 0x40000;

/// Smallest and largest values a 20-bit signed immediate can hold.
pub const IMMEDIATE_MIN: i64 = -(1 << 19);
pub const IMMEDIATE_MAX: i64 = (1 << 19) - 1;

pub fn fits_immediate(value: i64) -> bool {
    (IMMEDIATE_MIN..=IMMEDIATE_MAX).contains(&value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    /// Subroutine results and the program's final value.
    R6,
    /// Stack pointer.
    R7,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operand {
    Register(Register),
    /// Rendered in decimal (`%D`).
    Imm(i32),
    /// Rendered in FRISC's default hexadecimal.
    Hex(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Address {
    Label(String),
    /// `(Rn+offset)`
    Offset(Register, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BinaryOperator {
    Add,
    Sub,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CondCode {
    Z,
    SLT,
    SLE,
    SGE,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Instruction {
    Move {
        src: Operand,
        dst: Register,
    },
    Load {
        dst: Register,
        src: Address,
    },
    Store {
        src: Register,
        dst: Address,
    },
    Push(Register),
    Pop(Register),
    Binary {
        op: BinaryOperator,
        lhs: Register,
        rhs: Operand,
        dst: Register,
    },
    Cmp {
        lhs: Register,
        rhs: Operand,
    },
    Jump(String),
    JumpCC(CondCode, String),
    Call(String),
    Ret,
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Instruction(Instruction),
    Label(String),
    /// `<label> DW <value>`
    Data { label: String, value: i32 },
}

impl From<Instruction> for Line {
    fn from(value: Instruction) -> Self {
        Line::Instruction(value)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Program(pub Vec<Line>);

impl Program {
    pub fn push(&mut self, line: impl Into<Line>) {
        self.0.push(line.into());
    }

    pub fn label(&mut self, name: impl Into<String>) {
        self.0.push(Line::Label(name.into()));
    }

    pub fn data(&mut self, label: impl Into<String>, value: i32) {
        self.0.push(Line::Data {
            label: label.into(),
            value,
        });
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = Line>) {
        self.0.extend(lines);
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.0.iter().filter_map(|line| match line {
            Line::Instruction(inst) => Some(inst),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_range() {
        assert!(fits_immediate(0));
        assert!(fits_immediate(524287));
        assert!(fits_immediate(-524288));
        assert!(!fits_immediate(524288));
        assert!(!fits_immediate(-524289));
    }

    #[test]
    fn test_instructions_skip_labels_and_data() {
        let mut program = Program::default();
        program.label("LOOP1");
        program.push(Instruction::Push(Register::R0));
        program.data("V_rez", 0);
        program.push(Instruction::Halt);

        assert_eq!(
            program.instructions().collect::<Vec<_>>(),
            vec![&Instruction::Push(Register::R0), &Instruction::Halt]
        );
    }
}
