use crate::BinaryOperator;

impl From<pjc_ast::AdditiveOperator> for BinaryOperator {
    fn from(value: pjc_ast::AdditiveOperator) -> Self {
        match value {
            pjc_ast::AdditiveOperator::Add => BinaryOperator::Add,
            pjc_ast::AdditiveOperator::Subtract => BinaryOperator::Sub,
        }
    }
}

/// Name of the runtime subroutine implementing a multiplicative operator.
pub fn subroutine(op: pjc_ast::MultiplicativeOperator) -> &'static str {
    match op {
        pjc_ast::MultiplicativeOperator::Multiply => crate::runtime::MUL,
        pjc_ast::MultiplicativeOperator::Divide => crate::runtime::DIV,
    }
}
