//! Maps registers to the expressions currently held in them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use crate::ir::Expr;
use crate::reg::{CALLER_SAVE_REGS, Reg};
use crate::stack::StackInfo;
use crate::translate::TranslateError;

#[derive(Debug, Default)]
pub struct RegFile {
    contents: BTreeMap<Reg, Expr>,
    written_in_block: BTreeSet<Reg>,
}

impl RegFile {
    pub fn new(contents: BTreeMap<Reg, Expr>, written_in_block: BTreeSet<Reg>) -> RegFile {
        RegFile {
            contents,
            written_in_block,
        }
    }

    /// Read a register. The fixed zero register reads as the literal 0.
    ///
    /// Reading an argument register that still holds the as-received
    /// (non-copied) argument mints a fresh `copied` view, records the
    /// argument as discovered, and unifies its interned type with whatever
    /// the register's type has been refined to - this is how "argument as
    /// received" is distinguished from "argument as used".
    pub fn get(&self, key: Reg, stack: &mut StackInfo) -> Result<Expr, TranslateError> {
        if key == Reg::Zero {
            return Ok(Expr::lit(0));
        }
        let ret = self
            .get_raw(key)
            .ok_or(TranslateError::UnsetRegister(key))?;
        if let Expr::Arg(arg) = &ret
            && !arg.copied
        {
            let copied = stack.get_argument(arg.offset);
            stack.add_argument(arg.offset);
            copied.ty().unify(&arg.ty);
            return Ok(copied);
        }
        Ok(ret)
    }

    pub fn get_raw(&self, key: Reg) -> Option<Expr> {
        self.contents.get(&key).cloned()
    }

    pub fn contains(&self, key: Reg) -> bool {
        self.contents.contains_key(&key)
    }

    /// Write a register (`None` clears it). Writes to `f0` or `v0` mirror
    /// into the synthetic `return_reg`, which `jr $ra` reads.
    pub fn set(&mut self, key: Reg, value: Option<Expr>) {
        debug_assert!(key != Reg::Zero);
        match &value {
            Some(expr) => {
                self.contents.insert(key, expr.clone());
            }
            None => {
                self.contents.remove(&key);
            }
        }
        if matches!(key, Reg::F0 | Reg::V0) {
            self.set(Reg::ReturnReg, value);
        }
        self.written_in_block.insert(key);
    }

    pub fn delete(&mut self, key: Reg) {
        debug_assert!(key != Reg::Zero);
        self.contents.remove(&key);
    }

    pub fn clear_caller_save(&mut self) {
        for reg in CALLER_SAVE_REGS {
            self.contents.remove(&reg);
        }
    }

    pub fn contents(&self) -> &BTreeMap<Reg, Expr> {
        &self.contents
    }

    pub fn written_in_block(&self) -> &BTreeSet<Reg> {
        &self.written_in_block
    }
}

impl Display for RegFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (reg, expr)) in self.contents.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{reg}: {expr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowGraph;
    use crate::parse;
    use crate::types::Type;
    use std::rc::Rc;

    fn stack() -> StackInfo {
        let file = parse::parse("glabel f\n  jr $ra\n  nop\n", "t.s").unwrap();
        let flow = FlowGraph::build(&file.functions[0]).unwrap();
        StackInfo::analyze("f", flow.entry()).unwrap()
    }

    #[test]
    fn zero_register_reads_as_zero() {
        let regs = RegFile::default();
        let mut stack = stack();
        assert_eq!(regs.get(Reg::Zero, &mut stack).unwrap(), Expr::lit(0));
    }

    #[test]
    fn unset_register_is_an_error() {
        let regs = RegFile::default();
        let mut stack = stack();
        assert!(matches!(
            regs.get(Reg::T0, &mut stack),
            Err(TranslateError::UnsetRegister(Reg::T0))
        ));
    }

    #[test]
    fn reading_an_argument_mints_a_copy() {
        let mut regs = RegFile::default();
        let mut stack = stack();
        regs.set(
            Reg::A0,
            Some(Expr::Arg(Rc::new(crate::ir::PassedInArg {
                offset: 0,
                copied: false,
                ty: Type::intptr(),
            }))),
        );
        let got = regs.get(Reg::A0, &mut stack).unwrap();
        match &got {
            Expr::Arg(arg) => assert!(arg.copied),
            other => panic!("expected argument, got {other:?}"),
        }
        assert!(stack.argument_offsets.contains(&0));
        // The raw register still holds the non-copied version.
        match regs.get_raw(Reg::A0) {
            Some(Expr::Arg(arg)) => assert!(!arg.copied),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v0_mirrors_into_return_reg() {
        let mut regs = RegFile::default();
        regs.set(Reg::V0, Some(Expr::lit(5)));
        assert_eq!(regs.get_raw(Reg::ReturnReg), Some(Expr::lit(5)));
        regs.set(Reg::V0, None);
        assert_eq!(regs.get_raw(Reg::ReturnReg), None);
        assert!(regs.written_in_block().contains(&Reg::ReturnReg));
    }

    #[test]
    fn clear_caller_save_spares_callee_saves() {
        let mut regs = RegFile::default();
        regs.set(Reg::T0, Some(Expr::lit(1)));
        regs.set(Reg::S0, Some(Expr::lit(2)));
        regs.clear_caller_save();
        assert!(!regs.contains(Reg::T0));
        assert!(regs.contains(Reg::S0));
    }
}
