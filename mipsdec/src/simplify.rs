//! Expression cleanups: multiplication-chain folding and boolean condition
//! simplification.

use std::rc::Rc;

use crate::ir::{BinOp, BinaryExpr, Expr, is_repeatable};

/// Rewrite shift/add/multiply chains into a single multiplication where that
/// reads better, e.g. `(x << 3) + x` into `x * 9`. Left-shifts by small
/// numbers are easier to understand written as multiplications (they compile
/// to the same thing); a lone larger shift is kept as a shift.
pub fn fold_mul_chains(expr: Expr) -> Expr {
    let (base, num) = fold(&expr, true);
    if num == 1 {
        expr
    } else {
        BinaryExpr::int(base, BinOp::Mul, Expr::lit(num))
    }
}

fn fold(expr: &Expr, toplevel: bool) -> (Expr, i64) {
    match expr {
        Expr::Binary(binary) => {
            let (lbase, lnum) = fold(&binary.left, false);
            let (rbase, rnum) = fold(&binary.right, false);
            if binary.op == BinOp::Shl
                && let Expr::Lit(shift) = &binary.right
            {
                if toplevel && lnum == 1 && !(1..=4).contains(&shift.value) {
                    return (expr.clone(), 1);
                }
                return (lbase, lnum << shift.value);
            }
            if binary.op == BinOp::Mul
                && let Expr::Lit(factor) = &binary.right
            {
                return (lbase, lnum * factor.value);
            }
            if binary.op == BinOp::Add && lbase == rbase {
                return (lbase, lnum + rnum);
            }
            if binary.op == BinOp::Sub && lbase == rbase {
                return (lbase, lnum - rnum);
            }
            (expr.clone(), 1)
        }
        Expr::Unary(unary) if !toplevel => {
            let (base, num) = fold(&unary.expr, false);
            (base, -num)
        }
        Expr::Once(once) => {
            let (base, num) = fold(&once.wrapped, false);
            if num != 1 && is_repeatable(&base) {
                (base, num)
            } else {
                (expr.clone(), 1)
            }
        }
        _ => (expr.clone(), 1),
    }
}

/// Simplify a boolean expression, collapsing `(b == 0)` into the negation of
/// `b` and `(b != 0)` into `b`, descending through single-use temporaries.
///
/// This function may produce wrong results while code is still being
/// generated, since at that point the final status of temporaries is not
/// known.
pub fn simplify_condition(expr: &Expr) -> Expr {
    if let Expr::Once(once) = expr
        && once.num_usages() <= 1
    {
        return simplify_condition(&once.wrapped);
    }
    if let Expr::Binary(binary) = expr {
        let left = simplify_condition(&binary.left);
        let right = simplify_condition(&binary.right);
        if let Expr::Binary(inner) = &left
            && inner.is_boolean()
            && right == Expr::lit(0)
        {
            if binary.op == BinOp::Eq {
                return simplify_condition(&inner.negated());
            }
            if binary.op == BinOp::Ne {
                return left;
            }
        }
        return Expr::Binary(Rc::new(BinaryExpr {
            left,
            op: binary.op,
            right,
            ty: binary.ty.clone(),
        }));
    }
    expr.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::UnOp;
    use crate::types::Type;

    fn var(name: &str) -> Expr {
        Expr::Global(Rc::new(crate::ir::GlobalSymbol {
            name: name.into(),
            ty: Type::any(),
        }))
    }

    #[test]
    fn shift_add_chain_becomes_multiplication() {
        // (x << 3) + x == x * 9
        let x = var("x");
        let shifted = BinaryExpr::int(x.clone(), BinOp::Shl, Expr::lit(3));
        let sum = BinaryExpr::int(shifted, BinOp::Add, x.clone());
        let folded = fold_mul_chains(sum);
        match &folded {
            Expr::Binary(b) => {
                assert_eq!(b.op, BinOp::Mul);
                assert_eq!(b.right, Expr::lit(9));
            }
            other => panic!("expected multiplication, got {other}"),
        }
    }

    #[test]
    fn small_shift_becomes_multiplication_but_large_stays() {
        let x = var("x");
        let small = BinaryExpr::int(x.clone(), BinOp::Shl, Expr::lit(2));
        assert_eq!(fold_mul_chains(small).to_string(), "(x * 4)");
        let large = BinaryExpr::int(x.clone(), BinOp::Shl, Expr::lit(8));
        assert_eq!(fold_mul_chains(large).to_string(), "(x << 8)");
    }

    #[test]
    fn subtraction_of_equal_bases_combines() {
        // (x * 5) - x == x * 4
        let x = var("x");
        let times5 = BinaryExpr::int(x.clone(), BinOp::Mul, Expr::lit(5));
        let diff = BinaryExpr::int(times5, BinOp::Sub, x);
        assert_eq!(fold_mul_chains(diff).to_string(), "(x * 4)");
    }

    #[test]
    fn negation_flips_the_coefficient() {
        // (x * 5) + -(x * 2) == x * 3
        let x = var("x");
        let times5 = BinaryExpr::int(x.clone(), BinOp::Mul, Expr::lit(5));
        let times2 = BinaryExpr::int(x.clone(), BinOp::Mul, Expr::lit(2));
        let neg = Expr::unary(UnOp::Neg, times2, Type::s32());
        let sum = BinaryExpr::int(times5, BinOp::Add, neg);
        assert_eq!(fold_mul_chains(sum).to_string(), "(x * 3)");
    }

    #[test]
    fn coefficient_one_is_left_untouched() {
        let x = var("x");
        let sum = BinaryExpr::int(x.clone(), BinOp::Add, var("y"));
        let folded = fold_mul_chains(sum.clone());
        assert_eq!(folded, sum);
    }

    #[test]
    fn eq_zero_negates_and_ne_zero_unwraps() {
        let inner = BinaryExpr::icmp(var("a"), BinOp::Lt, var("b"));
        let eq = BinaryExpr::icmp(inner.clone(), BinOp::Eq, Expr::lit(0));
        assert_eq!(simplify_condition(&eq).to_string(), "(a >= b)");
        let ne = BinaryExpr::icmp(inner, BinOp::Ne, Expr::lit(0));
        assert_eq!(simplify_condition(&ne).to_string(), "(a < b)");
    }

    #[test]
    fn double_negation_round_trips() {
        let inner = BinaryExpr::icmp(var("a"), BinOp::Le, var("b"));
        let Expr::Binary(b) = &inner else {
            unreachable!();
        };
        let negated = b.negated();
        let eq_zero = BinaryExpr::icmp(negated, BinOp::Eq, Expr::lit(0));
        assert_eq!(
            simplify_condition(&eq_zero).to_string(),
            simplify_condition(&inner).to_string()
        );
    }
}
