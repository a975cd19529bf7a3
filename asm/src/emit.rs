use crate::{Address, BinaryOperator, CondCode, Instruction, Line, Operand, Program, Register};

/// A Structure that implements this trait, can emit assembly using the provided function.
/// Instructions are indented, labels and data declarations start at column zero.
pub trait EmitAsm {
    /// The indent_depth argument only needs to be used when you have to indent something.
    fn emit(&self, indent_depth: u32) -> String;
}

impl Register {
    fn emit(&self) -> &'static str {
        match self {
            Register::R0 => "R0",
            Register::R1 => "R1",
            Register::R2 => "R2",
            Register::R3 => "R3",
            Register::R4 => "R4",
            Register::R5 => "R5",
            Register::R6 => "R6",
            Register::R7 => "R7",
        }
    }
}

impl Operand {
    fn emit(&self) -> String {
        match self {
            Operand::Register(reg) => reg.emit().to_owned(),
            Operand::Imm(val) => format!("%D {}", val),
            Operand::Hex(val) => format!("{:X}", val),
        }
    }
}

impl Address {
    fn emit(&self) -> String {
        match self {
            Address::Label(label) => format!("({})", label),
            Address::Offset(reg, 0) => format!("({})", reg.emit()),
            Address::Offset(reg, offset) => format!("({}+{:X})", reg.emit(), offset),
        }
    }
}

impl EmitAsm for BinaryOperator {
    fn emit(&self, _: u32) -> String {
        match self {
            BinaryOperator::Add => "ADD",
            BinaryOperator::Sub => "SUB",
            BinaryOperator::Xor => "XOR",
        }
        .to_owned()
    }
}

impl EmitAsm for CondCode {
    fn emit(&self, _: u32) -> String {
        match self {
            CondCode::Z => "Z",
            CondCode::SLT => "SLT",
            CondCode::SLE => "SLE",
            CondCode::SGE => "SGE",
        }
        .to_owned()
    }
}

impl EmitAsm for Instruction {
    fn emit(&self, indent_depth: u32) -> String {
        let tabs = "\t".repeat(indent_depth as usize);

        match self {
            Instruction::Move { src, dst } => {
                format!("{}MOVE {}, {}\n", tabs, src.emit(), dst.emit())
            }
            Instruction::Load { dst, src } => {
                format!("{}LOAD {}, {}\n", tabs, dst.emit(), src.emit())
            }
            Instruction::Store { src, dst } => {
                format!("{}STORE {}, {}\n", tabs, src.emit(), dst.emit())
            }
            Instruction::Push(reg) => format!("{}PUSH {}\n", tabs, reg.emit()),
            Instruction::Pop(reg) => format!("{}POP {}\n", tabs, reg.emit()),
            Instruction::Binary { op, lhs, rhs, dst } => format!(
                "{}{} {}, {}, {}\n",
                tabs,
                op.emit(indent_depth),
                lhs.emit(),
                rhs.emit(),
                dst.emit()
            ),
            Instruction::Cmp { lhs, rhs } => {
                format!("{}CMP {}, {}\n", tabs, lhs.emit(), rhs.emit())
            }
            Instruction::Jump(label) => format!("{}JP {}\n", tabs, label),
            Instruction::JumpCC(cond_code, label) => {
                format!("{}JP_{} {}\n", tabs, cond_code.emit(indent_depth), label)
            }
            Instruction::Call(label) => format!("{}CALL {}\n", tabs, label),
            Instruction::Ret => format!("{}RET\n", tabs),
            Instruction::Halt => format!("{}HALT\n", tabs),
        }
    }
}

impl EmitAsm for Line {
    fn emit(&self, indent_depth: u32) -> String {
        match self {
            Line::Instruction(inst) => inst.emit(indent_depth + 1),
            Line::Label(label) => format!("{}\n", label),
            Line::Data { label, value } => format!("{} DW %D {}\n", label, value),
        }
    }
}

impl EmitAsm for Program {
    fn emit(&self, indent_depth: u32) -> String {
        self.0.iter().map(|line| line.emit(indent_depth)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_text() {
        let cases = [
            (
                Instruction::Move {
                    src: Operand::Hex(0x40000),
                    dst: Register::R7,
                },
                "MOVE 40000, R7\n",
            ),
            (
                Instruction::Move {
                    src: Operand::Imm(-12),
                    dst: Register::R0,
                },
                "MOVE %D -12, R0\n",
            ),
            (
                Instruction::Load {
                    dst: Register::R0,
                    src: Address::Label("V_rez".to_owned()),
                },
                "LOAD R0, (V_rez)\n",
            ),
            (
                Instruction::Load {
                    dst: Register::R1,
                    src: Address::Offset(Register::R7, 12),
                },
                "LOAD R1, (R7+C)\n",
            ),
            (
                Instruction::Binary {
                    op: BinaryOperator::Sub,
                    lhs: Register::R0,
                    rhs: Operand::Register(Register::R1),
                    dst: Register::R2,
                },
                "SUB R0, R1, R2\n",
            ),
            (
                Instruction::JumpCC(CondCode::SLE, "LOOP3".to_owned()),
                "JP_SLE LOOP3\n",
            ),
            (Instruction::Call("MUL".to_owned()), "CALL MUL\n"),
        ];

        for (inst, text) in cases {
            assert_eq!(inst.emit(0), text);
        }
    }

    #[test]
    fn test_lines_indent_only_instructions() {
        let program = Program(vec![
            Line::Instruction(Instruction::Push(Register::R0)),
            Line::Label("LOOP1".to_owned()),
            Line::Instruction(Instruction::Halt),
            Line::Data {
                label: "V_rez".to_owned(),
                value: 0,
            },
        ]);

        assert_eq!(
            program.emit(0),
            "\tPUSH R0\nLOOP1\n\tHALT\nV_rez DW %D 0\n"
        );
    }
}
