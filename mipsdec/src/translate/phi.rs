//! Phi placement over the dominator tree and post-translation resolution.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::rc::Rc;

use crate::flow::{FlowGraph, NodeId};
use crate::ir::{Expr, PhiExpr, SetPhiStmt, Stmt, mark_phi_used, mark_used};
use crate::parse::{Arg, Instruction};
use crate::reg::{CALLER_SAVE_REGS, Reg};
use crate::stack::StackInfo;
use crate::translate::instr::{
    is_branch_mnemonic, is_dest_first_mnemonic, is_float_branch_mnemonic, is_float_comp_mnemonic,
    is_hi_lo_mnemonic, is_source_first_mnemonic, is_store_mnemonic,
};
use crate::translate::{BlockInfo, TranslateError};

fn reg_at(instr: &Instruction, index: usize) -> Option<Reg> {
    match instr.args.get(index) {
        Some(Arg::Reg(reg)) => Some(*reg),
        _ => None,
    }
}

/// The registers an instruction writes. Unknown mnemonics write nothing
/// here; they fail their own block during body translation instead.
pub(crate) fn output_regs(instr: &Instruction) -> Vec<Reg> {
    let mnemonic = instr.mnemonic.as_str();
    if mnemonic == "nop"
        || mnemonic == "jr"
        || is_store_mnemonic(mnemonic)
        || is_branch_mnemonic(mnemonic)
        || is_float_branch_mnemonic(mnemonic)
    {
        return Vec::new();
    }
    if mnemonic == "jal" {
        return vec![Reg::ReturnReg, Reg::F0, Reg::V0, Reg::V1];
    }
    if is_source_first_mnemonic(mnemonic) {
        return reg_at(instr, 1).into_iter().collect();
    }
    if is_float_comp_mnemonic(mnemonic) {
        return vec![Reg::ConditionBit];
    }
    if is_hi_lo_mnemonic(mnemonic) {
        return vec![Reg::Hi, Reg::Lo];
    }
    if is_dest_first_mnemonic(mnemonic) {
        return reg_at(instr, 0).into_iter().collect();
    }
    Vec::new()
}

/// The union of registers written on any path strictly between a node's
/// immediate dominator and the node itself. A `jal` clobbers the whole
/// caller-save set.
pub(crate) fn regs_clobbered_until_dominator(flow: &FlowGraph, node: NodeId) -> BTreeSet<Reg> {
    let Some(dominator) = flow.node(node).immediate_dominator else {
        return BTreeSet::new();
    };
    let mut seen: HashSet<NodeId> = HashSet::from([dominator]);
    let mut stack = flow.node(node).parents.clone();
    let mut clobbered = BTreeSet::new();
    while let Some(n) = stack.pop() {
        if !seen.insert(n) {
            continue;
        }
        for instr in &flow.node(n).instructions {
            clobbered.extend(output_regs(instr));
            if instr.mnemonic == "jal" {
                clobbered.extend(CALLER_SAVE_REGS);
            }
        }
        stack.extend(flow.node(n).parents.iter().copied());
    }
    clobbered
}

/// Whether, along every path from the immediate dominator to the node, the
/// last relevant event for `reg` is a write rather than a `jal` clobber.
/// Paths that reach the dominator count as set only if `dom_set` says the
/// dominator's state holds the register.
pub(crate) fn reg_always_set(flow: &FlowGraph, node: NodeId, reg: Reg, dom_set: bool) -> bool {
    let Some(dominator) = flow.node(node).immediate_dominator else {
        return false;
    };
    let mut seen: HashSet<NodeId> = HashSet::from([dominator]);
    let mut stack = flow.node(node).parents.clone();
    while let Some(n) = stack.pop() {
        if n == dominator && !dom_set {
            return false;
        }
        if !seen.insert(n) {
            continue;
        }
        let mut clobbered: Option<bool> = None;
        for instr in &flow.node(n).instructions {
            if instr.mnemonic == "jal" && reg.is_caller_save() {
                clobbered = Some(true);
            }
            if output_regs(instr).contains(&reg) {
                clobbered = Some(false);
            }
        }
        match clobbered {
            Some(true) => return false,
            Some(false) => {}
            None => stack.extend(flow.node(n).parents.iter().copied()),
        }
    }
    true
}

/// Resolve every used phi once the whole function has been translated.
///
/// The worklist grows while it is processed: materializing one phi's
/// assignments can make a predecessor's phi used for the first time.
pub(crate) fn assign_phis(
    flow: &FlowGraph,
    blocks: &mut [Option<BlockInfo>],
    stack: &mut StackInfo,
    mut used_phis: Vec<Rc<PhiExpr>>,
) -> Result<(), TranslateError> {
    let mut index = 0;
    while index < used_phis.len() {
        let phi = used_phis[index].clone();
        debug_assert!(phi.num_usages() > 0);
        let parents = flow.node(phi.node).parents.clone();
        debug_assert!(!parents.is_empty());

        let mut exprs = Vec::with_capacity(parents.len());
        for &parent in &parents {
            let block = blocks[parent.0]
                .as_ref()
                .ok_or(TranslateError::PhiWithoutParent(phi.reg))?;
            exprs.push(block.final_register_states.get(phi.reg, stack)?);
        }

        if exprs.iter().all(|e| *e == exprs[0]) {
            // Every incoming value is the same (e.g. an expression was
            // recomputed after a store, or a register restored after a
            // call). Use that value instead of introducing a phi variable.
            let replacement = exprs[0].clone();
            for _ in 0..phi.num_usages() {
                mark_used(&replacement, &mut used_phis);
            }
            phi.set_replacement(replacement);
        } else {
            for (&parent, expr) in parents.iter().zip(exprs) {
                if let Expr::Phi(source) = &expr {
                    // Mark how the expression is used if it is itself a phi,
                    // so phi sets can propagate and shed temporaries.
                    mark_phi_used(source, Some(&phi), &mut used_phis);
                } else {
                    mark_used(&expr, &mut used_phis);
                }
                let block = blocks[parent.0]
                    .as_mut()
                    .ok_or(TranslateError::PhiWithoutParent(phi.reg))?;
                block.to_write.push(Stmt::SetPhi(Rc::new(SetPhiStmt {
                    phi: phi.clone(),
                    expr,
                })));
            }
        }
        index += 1;
    }

    // Name the survivors: phis that were neither replaced by a common value
    // nor forwarded into another phi.
    let mut name_counter: BTreeMap<Reg, u32> = BTreeMap::new();
    for phi in &used_phis {
        if phi.replacement().is_none() && Rc::ptr_eq(&phi.propagates_to(), phi) {
            let counter = name_counter.entry(phi.reg).or_insert(0);
            *counter += 1;
            let prefix = format!("phi_{}", phi.reg);
            phi.set_name(if *counter > 1 {
                format!("{prefix}_{counter}")
            } else {
                prefix
            });
            stack.phi_vars.push(phi.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_instruction;

    fn outputs(line: &str) -> Vec<Reg> {
        output_regs(&parse_instruction(line).unwrap())
    }

    #[test]
    fn output_register_classification() {
        assert_eq!(outputs("addiu $v0, $zero, 5"), vec![Reg::V0]);
        assert_eq!(outputs("sw $v0, 0($sp)"), Vec::<Reg>::new());
        assert_eq!(outputs("beqz $a0, .L1"), Vec::<Reg>::new());
        assert_eq!(outputs("mtc1 $v0, $f4"), vec![Reg::F4]);
        assert_eq!(outputs("div $zero, $a0, $a1"), vec![Reg::Hi, Reg::Lo]);
        assert_eq!(outputs("c.lt.s $f0, $f2"), vec![Reg::ConditionBit]);
        assert_eq!(
            outputs("jal some_function"),
            vec![Reg::ReturnReg, Reg::F0, Reg::V0, Reg::V1]
        );
        assert_eq!(outputs("jr $ra"), Vec::<Reg>::new());
    }

    #[test]
    fn unknown_mnemonics_write_nothing() {
        assert_eq!(outputs("teq $a0, $a1"), Vec::<Reg>::new());
    }
}
