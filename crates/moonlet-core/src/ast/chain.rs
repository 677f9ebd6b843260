//! Operator chains: flat operand/operator sequences resolved by precedence
//!
//! The parser feeds a chain with operands and operator tokens in source
//! order, then commits it. Committing folds the chain one precedence level at
//! a time, tightest first, grouping left-to-right except for `^` and `..`,
//! which group right-to-left.

use crate::bytecode::{CompileError, CompileResult};
use crate::lexer::{Span, Token};

use super::{BinOp, Expr, ExprKind};

/// Precedence levels in folding order
const LEVELS: [u8; 11] = [12, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1];

/// An operator chain under construction
#[derive(Debug, Default)]
pub struct OperatorChain {
    operands: Vec<Expr>,
    operators: Vec<BinOp>,
    span: Option<Span>,
}

impl OperatorChain {
    /// Start an empty chain
    #[must_use]
    pub fn begin() -> Self {
        Self::default()
    }

    /// Append an operand; fails if the previous item was also an operand
    pub fn add_expression(&mut self, expr: Expr) -> CompileResult<()> {
        if self.operands.len() > self.operators.len() {
            return Err(CompileError::internal(
                "operator chain received two operands in a row",
                expr.span,
            ));
        }
        self.extend_span(expr.span);
        self.operands.push(expr);
        Ok(())
    }

    /// Append a binary operator token
    pub fn add_operator(&mut self, token: &Token) -> CompileResult<()> {
        let Some(op) = BinOp::from_token(token.kind) else {
            return Err(CompileError::internal(
                format!("{} is not a binary operator", token.kind),
                token.span,
            ));
        };
        if self.operands.len() == self.operators.len() {
            return Err(CompileError::internal(
                format!("operator '{op}' has no left operand"),
                token.span,
            ));
        }
        self.extend_span(token.span);
        self.operators.push(op);
        Ok(())
    }

    /// Number of operands added so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// Resolve the chain into a single expression tree
    pub fn commit(self) -> CompileResult<Expr> {
        let span = self.span.unwrap_or_default();
        let OperatorChain {
            mut operands,
            mut operators,
            ..
        } = self;

        if operands.is_empty() || operands.len() != operators.len() + 1 {
            return Err(CompileError::internal(
                "operator chain ends with a dangling operator",
                span,
            ));
        }

        for level in LEVELS {
            if !operators.iter().any(|op| op.precedence() == level) {
                continue;
            }
            let right_assoc = operators
                .iter()
                .find(|op| op.precedence() == level)
                .is_some_and(|op| op.is_right_associative());
            if right_assoc {
                fold_right(&mut operands, &mut operators, level);
            } else {
                fold_left(&mut operands, &mut operators, level);
            }
        }

        match (operands.pop(), operands.is_empty(), operators.is_empty()) {
            (Some(expr), true, true) => Ok(expr),
            _ => Err(CompileError::internal(
                "operator chain reduction left unresolved nodes",
                span,
            )),
        }
    }

    fn extend_span(&mut self, span: Span) {
        self.span = Some(self.span.map_or(span, |s| s.to(span)));
    }
}

/// Build `base ^ exponent`; callers nest the exponent first for right associativity
#[must_use]
pub fn create_power_expression(base: Expr, exponent: Expr) -> Expr {
    Expr::power(base, exponent)
}

fn merge_at(operands: &mut Vec<Expr>, operators: &mut Vec<BinOp>, i: usize) {
    let op = operators.remove(i);
    let right = operands.remove(i + 1);
    let left = std::mem::replace(&mut operands[i], Expr::new(ExprKind::Nil, Span::default()));
    operands[i] = Expr::binary(op, left, right);
}

fn fold_left(operands: &mut Vec<Expr>, operators: &mut Vec<BinOp>, level: u8) {
    let mut i = 0;
    while i < operators.len() {
        if operators[i].precedence() == level {
            merge_at(operands, operators, i);
        } else {
            i += 1;
        }
    }
}

fn fold_right(operands: &mut Vec<Expr>, operators: &mut Vec<BinOp>, level: u8) {
    let mut i = operators.len();
    while i > 0 {
        i -= 1;
        if operators[i].precedence() == level {
            merge_at(operands, operators, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::TokenKind;

    fn num(n: f64) -> Expr {
        Expr::new(ExprKind::Number(n), Span::default())
    }

    fn op(kind: TokenKind) -> Token {
        Token::new(kind, Span::default(), "")
    }

    fn chain(items: &[Result<f64, TokenKind>]) -> CompileResult<Expr> {
        let mut chain = OperatorChain::begin();
        for item in items {
            match item {
                Ok(n) => chain.add_expression(num(*n))?,
                Err(kind) => chain.add_operator(&op(*kind))?,
            }
        }
        chain.commit()
    }

    /// Render with full parenthesization
    fn show(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Number(n) => format!("{n}"),
            ExprKind::Binary { op, left, right } => {
                format!("({} {} {})", show(left), op.symbol(), show(right))
            }
            ExprKind::Power { base, exponent } => format!("({} ^ {})", show(base), show(exponent)),
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter() {
        let e = chain(&[Ok(1.0), Err(TokenKind::Plus), Ok(2.0), Err(TokenKind::Star), Ok(3.0)]);
        assert_eq!(show(&e.unwrap()), "(1 + (2 * 3))");
    }

    #[test]
    fn subtraction_groups_left() {
        let e = chain(&[Ok(1.0), Err(TokenKind::Minus), Ok(2.0), Err(TokenKind::Minus), Ok(3.0)]);
        assert_eq!(show(&e.unwrap()), "((1 - 2) - 3)");
    }

    #[test]
    fn power_and_concat_group_right() {
        let e = chain(&[Ok(2.0), Err(TokenKind::Caret), Ok(3.0), Err(TokenKind::Caret), Ok(2.0)]);
        assert_eq!(show(&e.unwrap()), "(2 ^ (3 ^ 2))");
        let e = chain(&[Ok(1.0), Err(TokenKind::DotDot), Ok(2.0), Err(TokenKind::DotDot), Ok(3.0)]);
        assert_eq!(show(&e.unwrap()), "(1 .. (2 .. 3))");
    }

    #[test]
    fn logical_operators_bind_loosest() {
        let e = chain(&[
            Ok(1.0),
            Err(TokenKind::Or),
            Ok(2.0),
            Err(TokenKind::And),
            Ok(3.0),
            Err(TokenKind::Lt),
            Ok(4.0),
        ]);
        assert_eq!(show(&e.unwrap()), "(1 or (2 and (3 < 4)))");
    }

    #[test]
    fn bitwise_levels() {
        let e = chain(&[
            Ok(1.0),
            Err(TokenKind::Pipe),
            Ok(2.0),
            Err(TokenKind::Tilde),
            Ok(3.0),
            Err(TokenKind::Ampersand),
            Ok(4.0),
            Err(TokenKind::ShiftLeft),
            Ok(5.0),
        ]);
        assert_eq!(show(&e.unwrap()), "(1 | (2 ~ (3 & (4 << 5))))");
    }

    #[test]
    fn two_operands_in_a_row_is_internal() {
        let err = chain(&[Ok(1.0), Ok(2.0)]).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn comma_is_rejected_as_internal() {
        let err = chain(&[Ok(1.0), Err(TokenKind::Comma), Ok(2.0)]).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn dangling_operator_is_internal() {
        let err = chain(&[Ok(1.0), Err(TokenKind::Plus)]).unwrap_err();
        assert!(err.is_internal());
        assert!(OperatorChain::begin().commit().unwrap_err().is_internal());
    }

    #[test]
    fn power_expression_nests_exponent() {
        let e = create_power_expression(num(2.0), create_power_expression(num(3.0), num(2.0)));
        assert_eq!(show(&e), "(2 ^ (3 ^ 2))");
    }
}
