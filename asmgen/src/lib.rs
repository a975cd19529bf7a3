//! Lowers the AST to FRISC with a value stack.
//!
//! Every expression leaves exactly one value on the runtime stack. Binary
//! operators pop both operands and push the result; `*` and `/` call the
//! runtime subroutines. Variables live in `DW` words named by the symbol
//! table.

pub mod symbol_table;

use pjc_asm::{
    ast::subroutine, fits_immediate, runtime, Address, BinaryOperator, CondCode, Instruction,
    Operand, Program, Register, STACK_TOP,
};
use pjc_ast::{Expression, Identifier, Primary, Sign, Term};
use pjc_utils::unique_id::{self, IdSource, Sequential};
use thiserror::Error;
use tracing::debug;

use crate::symbol_table::{SymbolTable, SymbolTableError, RESULT_NAME};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodegenError {
    #[error(transparent)]
    Symbol(#[from] SymbolTableError),
    #[error("Constant {0} does not fit in a 32-bit word")]
    ConstantOutOfRange(i64),
}

pub struct CodeGenerator<I: IdSource> {
    ids: I,
    symbols: SymbolTable,
    /// Loop ids of the enclosing loops, outermost first.
    scope_path: Vec<u64>,
    program: Program,
    /// Values too wide for an immediate, stored as `C<index>` words.
    constants: Vec<i32>,
}

impl<I: IdSource> CodeGenerator<I> {
    pub fn new(ids: I) -> Self {
        Self {
            ids,
            symbols: SymbolTable::new(),
            scope_path: vec![],
            program: Program::default(),
            constants: vec![],
        }
    }

    pub fn generate(mut self, program: &pjc_ast::Program) -> Result<Program, CodegenError> {
        self.program.push(Instruction::Move {
            src: Operand::Hex(STACK_TOP),
            dst: Register::R7,
        });

        for instruction in &program.0 {
            self.instruction(instruction)?;
        }

        let result = self.symbols.lookup(RESULT_NAME, &[])?;
        self.program.push(Instruction::Load {
            dst: Register::R6,
            src: Address::Label(result),
        });
        self.program.push(Instruction::Halt);

        for label in self.symbols.list_labels() {
            self.program.data(label, 0);
        }
        for (index, value) in self.constants.iter().enumerate() {
            self.program
                .data(unique_id::constant_label_name(index), *value);
        }
        self.program.extend(runtime::subroutines());

        debug!(
            lines = self.program.0.len(),
            constants = self.constants.len(),
            "assembly generated"
        );
        Ok(self.program)
    }

    fn instruction(&mut self, instruction: &pjc_ast::Instruction) -> Result<(), CodegenError> {
        match instruction {
            pjc_ast::Instruction::Assign { target, expr } => self.assignment(target, expr),
            pjc_ast::Instruction::ForLoop {
                var,
                from,
                to,
                body,
            } => self.for_loop(var, from, to, body),
        }
    }

    /// The right-hand side is lowered before the target is declared, so it
    /// cannot see a variable it introduces.
    fn assignment(&mut self, target: &Identifier, expr: &Expression) -> Result<(), CodegenError> {
        self.expression(expr)?;

        let label = self.symbols.declare(&target.name, &self.scope_path)?;
        self.program.push(Instruction::Pop(Register::R0));
        self.program.push(Instruction::Store {
            src: Register::R0,
            dst: Address::Label(label),
        });
        Ok(())
    }

    /// Post-test loop: the body runs once before the bound is first compared.
    fn for_loop(
        &mut self,
        var: &Identifier,
        from: &Expression,
        to: &Expression,
        body: &[pjc_ast::Instruction],
    ) -> Result<(), CodegenError> {
        self.expression(from)?;

        let id = self.ids.next_id();
        let counter = self
            .symbols
            .declare_loop_var(id, &var.name, &self.scope_path)?;
        let start = unique_id::loop_label_name(id);
        debug!(loop_id = id, var = %var.name, line = var.line, "lowering loop");

        self.program.push(Instruction::Pop(Register::R0));
        self.program.push(Instruction::Store {
            src: Register::R0,
            dst: Address::Label(counter.clone()),
        });
        self.program.label(start.clone());

        self.scope_path.push(id);
        for instruction in body {
            self.instruction(instruction)?;
        }
        self.scope_path.pop();

        self.program.push(Instruction::Load {
            dst: Register::R0,
            src: Address::Label(counter.clone()),
        });
        self.program.push(Instruction::Binary {
            op: BinaryOperator::Add,
            lhs: Register::R0,
            rhs: Operand::Imm(1),
            dst: Register::R0,
        });
        self.program.push(Instruction::Store {
            src: Register::R0,
            dst: Address::Label(counter.clone()),
        });

        self.expression(to)?;
        self.program.push(Instruction::Pop(Register::R1));
        self.program.push(Instruction::Load {
            dst: Register::R0,
            src: Address::Label(counter),
        });
        self.program.push(Instruction::Cmp {
            lhs: Register::R0,
            rhs: Operand::Register(Register::R1),
        });
        self.program.push(Instruction::JumpCC(CondCode::SLE, start));

        Ok(())
    }

    /// `a - b - c` is `a - (b - c)`: the left operand is pushed, then the
    /// whole right side, then they are combined. Pushing every operand first
    /// and combining from the right emits exactly that without recursing.
    fn expression(&mut self, expr: &Expression) -> Result<(), CodegenError> {
        let operands = expr.operands();
        for (_, term) in &operands {
            self.term(term)?;
        }
        for op in operands.iter().rev().filter_map(|(op, _)| *op) {
            self.combine(op.into());
        }
        Ok(())
    }

    /// Nests to the right like [`CodeGenerator::expression`].
    fn term(&mut self, term: &Term) -> Result<(), CodegenError> {
        let operands = term.operands();
        for (_, primary) in &operands {
            self.primary(primary)?;
        }
        for op in operands.iter().rev().filter_map(|(op, _)| *op) {
            self.call(subroutine(op));
        }
        Ok(())
    }

    fn primary(&mut self, primary: &Primary) -> Result<(), CodegenError> {
        let mut negative = false;
        let mut cur = primary;

        while let Primary::Signed(sign, inner) = cur {
            if *sign == Sign::Minus {
                negative = !negative;
            }
            cur = inner;
        }

        match cur {
            Primary::Signed(..) => unreachable!("signs are folded above"),
            Primary::Number(value) => {
                let value = if negative {
                    value
                        .checked_neg()
                        .ok_or_else(|| CodegenError::ConstantOutOfRange(*value))?
                } else {
                    *value
                };
                self.load_constant(value)?;
            }
            Primary::Identifier(ident) => {
                let label = self.symbols.lookup(&ident.name, &self.scope_path)?;
                self.program.push(Instruction::Load {
                    dst: Register::R0,
                    src: Address::Label(label),
                });
                if negative {
                    self.negate(Register::R0);
                }
            }
            Primary::Parenthesized(expr) => {
                self.expression(expr)?;
                if !negative {
                    return Ok(());
                }
                self.program.push(Instruction::Pop(Register::R0));
                self.negate(Register::R0);
            }
        }

        self.program.push(Instruction::Push(Register::R0));
        Ok(())
    }

    fn load_constant(&mut self, value: i64) -> Result<(), CodegenError> {
        let word =
            i32::try_from(value).map_err(|_| CodegenError::ConstantOutOfRange(value))?;

        if fits_immediate(value) {
            self.program.push(Instruction::Move {
                src: Operand::Imm(word),
                dst: Register::R0,
            });
            return Ok(());
        }

        let index = match self.constants.iter().position(|c| *c == word) {
            Some(index) => index,
            None => {
                self.constants.push(word);
                self.constants.len() - 1
            }
        };
        self.program.push(Instruction::Load {
            dst: Register::R0,
            src: Address::Label(unique_id::constant_label_name(index)),
        });
        Ok(())
    }

    fn negate(&mut self, reg: Register) {
        self.program.push(Instruction::Binary {
            op: BinaryOperator::Xor,
            lhs: reg,
            rhs: Operand::Imm(-1),
            dst: reg,
        });
        self.program.push(Instruction::Binary {
            op: BinaryOperator::Add,
            lhs: reg,
            rhs: Operand::Imm(1),
            dst: reg,
        });
    }

    /// Pops the right then the left operand and pushes `left op right`.
    fn combine(&mut self, op: BinaryOperator) {
        self.program.push(Instruction::Pop(Register::R1));
        self.program.push(Instruction::Pop(Register::R0));
        self.program.push(Instruction::Binary {
            op,
            lhs: Register::R0,
            rhs: Operand::Register(Register::R1),
            dst: Register::R2,
        });
        self.program.push(Instruction::Push(Register::R2));
    }

    fn call(&mut self, subroutine: &str) {
        self.program.push(Instruction::Call(subroutine.to_owned()));
        self.program.push(Instruction::Binary {
            op: BinaryOperator::Add,
            lhs: Register::R7,
            rhs: Operand::Imm(runtime::OPERANDS_SIZE as i32),
            dst: Register::R7,
        });
        self.program.push(Instruction::Push(Register::R6));
    }
}

pub fn generate_program_with<I: IdSource>(
    program: &pjc_ast::Program,
    ids: I,
) -> Result<Program, CodegenError> {
    CodeGenerator::new(ids).generate(program)
}

/// Generates with loop ids counting up from 1.
pub fn generate_program(program: &pjc_ast::Program) -> Result<Program, CodegenError> {
    generate_program_with(program, Sequential::starting_at(1))
}

#[cfg(test)]
mod tests {
    use pjc_asm::{EmitAsm, Line};
    use pjc_parser::{lexer::Lexer, parse};

    use super::*;

    fn ast(input: &str) -> pjc_ast::Program {
        let tokens = Lexer::new(input.to_owned())
            .tokenize()
            .expect("should tokenize");
        let tree = parse(tokens).expect("should parse");
        pjc_ast::reconstruct_program(&tree).expect("should reconstruct")
    }

    fn assembly(input: &str) -> String {
        generate_program(&ast(input))
            .expect("should generate")
            .emit(0)
    }

    /// Everything before the runtime subroutines.
    fn main_part(input: &str) -> String {
        let text = assembly(input);
        let end = text.find("\nMUL\n").expect("runtime present") + 1;
        text[..end].to_owned()
    }

    #[test]
    fn test_addition() {
        assert_eq!(
            main_part("rez = 1 + 2"),
            "\tMOVE 40000, R7
\tMOVE %D 1, R0
\tPUSH R0
\tMOVE %D 2, R0
\tPUSH R0
\tPOP R1
\tPOP R0
\tADD R0, R1, R2
\tPUSH R2
\tPOP R0
\tSTORE R0, (V_rez)
\tLOAD R6, (V_rez)
\tHALT
V_rez DW %D 0
"
        );
    }

    #[test]
    fn test_for_loop() {
        assert_eq!(
            main_part("za i od 1 do 3\n  rez = i\naz"),
            "\tMOVE 40000, R7
\tMOVE %D 1, R0
\tPUSH R0
\tPOP R0
\tSTORE R0, (V1_i)
LOOP1
\tLOAD R0, (V1_i)
\tPUSH R0
\tPOP R0
\tSTORE R0, (V_rez)
\tLOAD R0, (V1_i)
\tADD R0, %D 1, R0
\tSTORE R0, (V1_i)
\tMOVE %D 3, R0
\tPUSH R0
\tPOP R1
\tLOAD R0, (V1_i)
\tCMP R0, R1
\tJP_SLE LOOP1
\tLOAD R6, (V_rez)
\tHALT
V_rez DW %D 0
V1_i DW %D 0
"
        );
    }

    #[test]
    fn test_descending_range_still_enters_body() {
        let text = main_part("za i od 5 do 1\n  rez = i\naz");
        let body = text.find("STORE R0, (V_rez)").expect("body emitted");
        let check = text.find("CMP R0, R1").expect("check emitted");

        // Nothing jumps over the body: the only branch is the one back to it.
        assert!(body < check);
        assert_eq!(text.matches("JP").count(), 1);
        assert!(text.contains("LOOP1\n"));
    }

    #[test]
    fn test_multiplication_calls_runtime() {
        let program = generate_program(&ast("rez = 2 * 3")).expect("should generate");
        let instructions: Vec<_> = program.instructions().cloned().collect();

        assert_eq!(
            instructions[1..8],
            [
                Instruction::Move {
                    src: Operand::Imm(2),
                    dst: Register::R0
                },
                Instruction::Push(Register::R0),
                Instruction::Move {
                    src: Operand::Imm(3),
                    dst: Register::R0
                },
                Instruction::Push(Register::R0),
                Instruction::Call("MUL".to_owned()),
                Instruction::Binary {
                    op: BinaryOperator::Add,
                    lhs: Register::R7,
                    rhs: Operand::Imm(8),
                    dst: Register::R7
                },
                Instruction::Push(Register::R6),
            ]
        );
        assert!(program.0.contains(&Line::Label("MUL".to_owned())));
        assert!(program.0.contains(&Line::Label("DIV".to_owned())));
    }

    #[test]
    fn test_chains_nest_to_the_right() {
        // 8 - (2 - 1): 2 and 1 are combined before 8 joins in.
        assert_eq!(
            main_part("rez = 8 - 2 - 1"),
            "\tMOVE 40000, R7
\tMOVE %D 8, R0
\tPUSH R0
\tMOVE %D 2, R0
\tPUSH R0
\tMOVE %D 1, R0
\tPUSH R0
\tPOP R1
\tPOP R0
\tSUB R0, R1, R2
\tPUSH R2
\tPOP R1
\tPOP R0
\tSUB R0, R1, R2
\tPUSH R2
\tPOP R0
\tSTORE R0, (V_rez)
\tLOAD R6, (V_rez)
\tHALT
V_rez DW %D 0
"
        );

        // 8 / (2 * 3)
        let text = main_part("rez = 8 / 2 * 3");
        let three = text.find("MOVE %D 3, R0").expect("3 loaded");
        let mul = text.find("CALL MUL").expect("multiplication");
        let div = text.find("CALL DIV").expect("division");
        assert!(three < mul && mul < div);
    }

    #[test]
    fn test_mixed_chain_order() {
        // 1 - 2 * 3 + 4 is 1 - ((2 * 3) + 4)
        let program = generate_program(&ast("rez = 1 - 2 * 3 + 4")).expect("should generate");
        let ops: Vec<_> = program
            .instructions()
            .take_while(|instruction| !matches!(instruction, Instruction::Halt))
            .filter_map(|instruction| match instruction {
                Instruction::Binary {
                    op: op @ (BinaryOperator::Add | BinaryOperator::Sub),
                    dst: Register::R2,
                    ..
                } => Some(op.emit(0)),
                Instruction::Call(name) => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec!["MUL", "ADD", "SUB"]);
    }

    #[test]
    fn test_long_chain() {
        let input = format!("rez = 1{}", " - 1".repeat(50_000));
        let text = main_part(&input);

        assert_eq!(text.matches("\tSUB R0, R1, R2\n").count(), 50_000);
        assert_eq!(text.matches("\tMOVE %D 1, R0\n").count(), 50_001);
    }

    #[test]
    fn test_many_signs() {
        let input = format!("rez = {}1", "-".repeat(501));
        assert!(main_part(&input).contains("\tMOVE %D -1, R0\n"));
    }

    #[test]
    fn test_signs() {
        let text = main_part("x = --5\nrez = -x\ny = -(x)");

        assert!(text.contains("\tMOVE %D 5, R0\n"));
        assert!(text.contains(
            "\tLOAD R0, (V_x)
\tXOR R0, %D -1, R0
\tADD R0, %D 1, R0
\tPUSH R0
"
        ));
        assert!(text.contains(
            "\tLOAD R0, (V_x)
\tPUSH R0
\tPOP R0
\tXOR R0, %D -1, R0
\tADD R0, %D 1, R0
\tPUSH R0
"
        ));
        assert!(main_part("rez = -+7").contains("\tMOVE %D -7, R0\n"));
    }

    #[test]
    fn test_large_constants_use_the_pool() {
        let text = main_part("rez = 1000000 + 1000000 - 524287");

        assert_eq!(text.matches("\tLOAD R0, (C0)\n").count(), 2);
        assert!(text.contains("\tMOVE %D 524287, R0\n"));
        assert!(text.ends_with("V_rez DW %D 0\nC0 DW %D 1000000\n"));

        assert!(main_part("rez = -524288").contains("\tMOVE %D -524288, R0\n"));
        assert!(main_part("rez = 524288").contains("C0 DW %D 524288\n"));
    }

    #[test]
    fn test_constant_out_of_range() {
        assert_eq!(
            generate_program(&ast("rez = 4294967296")),
            Err(CodegenError::ConstantOutOfRange(4294967296))
        );
        generate_program(&ast("rez = -2147483648")).expect("i32::MIN fits");
    }

    #[test]
    fn test_unresolved_identifiers() {
        assert_eq!(
            generate_program(&ast("x = x")),
            Err(CodegenError::Symbol(SymbolTableError::UnresolvedIdentifier {
                name: "x".to_owned(),
                scope_path: vec![]
            }))
        );

        // Loop-local variables end with their loop.
        assert_eq!(
            generate_program(&ast("za i od 1 do 2\n t = i\naz\nrez = t")),
            Err(CodegenError::Symbol(SymbolTableError::UnresolvedIdentifier {
                name: "t".to_owned(),
                scope_path: vec![]
            }))
        );

        // The upper bound is evaluated outside the loop scope.
        assert!(generate_program(&ast("za i od 1 do i az")).is_err());
    }

    #[test]
    fn test_nested_loops_and_shadowing() {
        let text = main_part(
            "x = 0
za i od 1 do 2
  za i od 1 do 2
    x = x + i
  az
  t = i
az
rez = x",
        );

        assert!(text.contains("LOOP1\n"));
        assert!(text.contains("LOOP2\n"));
        assert!(text.contains("\tLOAD R0, (V1_2_i)\n"));
        assert!(text.contains("\tSTORE R0, (V1_t)\n"));
        assert!(text.ends_with(
            "V_rez DW %D 0
V_x DW %D 0
V1_i DW %D 0
V1_t DW %D 0
V1_2_i DW %D 0
"
        ));
    }

    #[test]
    fn test_injected_ids() {
        let program = generate_program_with(
            &ast("za i od 1 do 2 az\nza i od 1 do 2 az"),
            Sequential::starting_at(10),
        )
        .expect("should generate");
        let text = program.emit(0);

        assert!(text.contains("LOOP10\n"));
        assert!(text.contains("LOOP11\n"));
        assert!(text.contains("V10_i DW %D 0\n"));
        assert!(text.contains("V11_i DW %D 0\n"));
    }
}
