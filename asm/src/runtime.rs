//! Multiplication and division subroutines appended to every program.
//!
//! Calling convention: the caller pushes the left operand, then the right
//! operand, and `CALL`s the routine. Inside, the return address is on top of
//! the stack, so the operands sit at `(R7+8)` and `(R7+4)`. The result is left
//! in R6; R0-R2 are clobbered. The caller drops the operands afterwards.

use crate::{Address, BinaryOperator, CondCode, Instruction, Line, Operand, Program, Register};

pub const MUL: &str = "MUL";
pub const DIV: &str = "DIV";

const LEFT_OFFSET: u32 = 8;
const RIGHT_OFFSET: u32 = 4;

/// Bytes the caller drops from the stack after a call returns.
pub const OPERANDS_SIZE: u32 = 8;

pub fn subroutines() -> Vec<Line> {
    let mut program = Program::default();
    multiply(&mut program);
    divide(&mut program);
    program.0
}

fn imm(value: i32) -> Operand {
    Operand::Imm(value)
}

fn negate(program: &mut Program, reg: Register) {
    program.push(Instruction::Binary {
        op: BinaryOperator::Xor,
        lhs: reg,
        rhs: imm(-1),
        dst: reg,
    });
    program.push(Instruction::Binary {
        op: BinaryOperator::Add,
        lhs: reg,
        rhs: imm(1),
        dst: reg,
    });
}

/// Loads both operands and clears the sign flag (R2) and the result (R6).
fn load_operands(program: &mut Program) {
    program.push(Instruction::Load {
        dst: Register::R0,
        src: Address::Offset(Register::R7, LEFT_OFFSET),
    });
    program.push(Instruction::Load {
        dst: Register::R1,
        src: Address::Offset(Register::R7, RIGHT_OFFSET),
    });
    for reg in [Register::R2, Register::R6] {
        program.push(Instruction::Move {
            src: imm(0),
            dst: reg,
        });
    }
}

/// Replaces `reg` with its absolute value, flipping the sign flag in R2 when
/// it was negative.
fn make_positive(program: &mut Program, reg: Register, done: &str) {
    program.push(Instruction::Cmp {
        lhs: reg,
        rhs: imm(0),
    });
    program.push(Instruction::JumpCC(CondCode::SGE, done.to_owned()));
    negate(program, reg);
    program.push(Instruction::Binary {
        op: BinaryOperator::Xor,
        lhs: Register::R2,
        rhs: imm(1),
        dst: Register::R2,
    });
    program.label(done);
}

/// Negates R6 when the sign flag is set, then returns.
fn apply_sign(program: &mut Program, prefix: &str) {
    let end = format!("{prefix}_END");

    program.label(format!("{prefix}_SIGN"));
    program.push(Instruction::Cmp {
        lhs: Register::R2,
        rhs: imm(0),
    });
    program.push(Instruction::JumpCC(CondCode::Z, end.clone()));
    negate(program, Register::R6);
    program.label(end);
    program.push(Instruction::Ret);
}

/// R6 = R0 * R1 by repeated addition of |R0|, |R1| times.
fn multiply(program: &mut Program) {
    program.label(MUL);
    load_operands(program);
    make_positive(program, Register::R0, "MUL_A");
    make_positive(program, Register::R1, "MUL_B");

    program.label("MUL_LOOP");
    program.push(Instruction::Cmp {
        lhs: Register::R1,
        rhs: imm(0),
    });
    program.push(Instruction::JumpCC(CondCode::Z, "MUL_SIGN".to_owned()));
    program.push(Instruction::Binary {
        op: BinaryOperator::Add,
        lhs: Register::R6,
        rhs: Operand::Register(Register::R0),
        dst: Register::R6,
    });
    program.push(Instruction::Binary {
        op: BinaryOperator::Sub,
        lhs: Register::R1,
        rhs: imm(1),
        dst: Register::R1,
    });
    program.push(Instruction::Jump("MUL_LOOP".to_owned()));

    apply_sign(program, MUL);
}

/// R6 = R0 / R1 truncated toward zero, counting subtractions. Dividing by
/// zero yields zero.
fn divide(program: &mut Program) {
    program.label(DIV);
    load_operands(program);
    program.push(Instruction::Cmp {
        lhs: Register::R1,
        rhs: imm(0),
    });
    program.push(Instruction::JumpCC(CondCode::Z, "DIV_END".to_owned()));
    make_positive(program, Register::R0, "DIV_A");
    make_positive(program, Register::R1, "DIV_B");

    program.label("DIV_LOOP");
    program.push(Instruction::Cmp {
        lhs: Register::R0,
        rhs: Operand::Register(Register::R1),
    });
    program.push(Instruction::JumpCC(CondCode::SLT, "DIV_SIGN".to_owned()));
    program.push(Instruction::Binary {
        op: BinaryOperator::Sub,
        lhs: Register::R0,
        rhs: Operand::Register(Register::R1),
        dst: Register::R0,
    });
    program.push(Instruction::Binary {
        op: BinaryOperator::Add,
        lhs: Register::R6,
        rhs: imm(1),
        dst: Register::R6,
    });
    program.push(Instruction::Jump("DIV_LOOP".to_owned()));

    apply_sign(program, DIV);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::EmitAsm;

    use super::*;

    fn labels(lines: &[Line]) -> Vec<&str> {
        lines
            .iter()
            .filter_map(|line| match line {
                Line::Label(label) => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_entry_points_and_unique_labels() {
        let lines = subroutines();
        let labels = labels(&lines);

        assert_eq!(lines[0], Line::Label(MUL.to_owned()));
        assert!(labels.contains(&DIV));

        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn test_jumps_target_defined_labels() {
        let lines = subroutines();
        let labels = labels(&lines);

        for line in &lines {
            if let Line::Instruction(Instruction::Jump(target) | Instruction::JumpCC(_, target)) =
                line
            {
                assert!(labels.contains(&target.as_str()), "undefined {target}");
            }
        }
    }

    #[test]
    fn test_every_routine_returns() {
        let lines = subroutines();
        let rets = lines
            .iter()
            .filter(|line| **line == Line::Instruction(Instruction::Ret))
            .count();
        assert_eq!(rets, 2);
        assert_eq!(lines.last(), Some(&Line::Instruction(Instruction::Ret)));
    }

    #[test]
    fn test_division_by_zero_short_circuits() {
        let text = Program(subroutines()).emit(0);
        let div = &text[text.find("DIV\n").expect("DIV present")..];

        assert!(div.starts_with(
            "DIV
\tLOAD R0, (R7+8)
\tLOAD R1, (R7+4)
\tMOVE %D 0, R2
\tMOVE %D 0, R6
\tCMP R1, %D 0
\tJP_Z DIV_END
"
        ));
    }
}
