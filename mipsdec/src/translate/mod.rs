//! The translation core: abstract interpretation of the register state over
//! the dominator tree, producing typed statements per block.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::flow::{FlowError, FlowGraph, NodeId};
use crate::ir::{BinaryExpr, Expr, PassedInArg, PhiExpr, Stmt};
use crate::parse::AsmFunction;
use crate::reg::{CALLEE_SAVE_REGS, Reg, SPECIAL_REGS};
use crate::regfile::RegFile;
use crate::stack::StackInfo;
use crate::types::Type;

pub mod instr;
pub mod phi;

use instr::translate_block;
use phi::{assign_phis, reg_always_set, regs_clobbered_until_dominator};

/// A block-local translation failure. Under the default options a failing
/// block is replaced by a comment and translation continues.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("read from unset register {0}")]
    UnsetRegister(Reg),
    #[error("I don't know how to handle {0}!")]
    UnknownMnemonic(String),
    #[error("unexpected operand {index} for {mnemonic}")]
    BadArgument { mnemonic: String, index: usize },
    #[error("expected a literal operand")]
    ExpectedLiteral,
    #[error("%hi macro outside of lui")]
    HiOutsideLui,
    #[error("jump tables are not supported yet")]
    JumpTable,
    #[error("return outside of the return node")]
    MisplacedReturn,
    #[error("double access to odd register {0}")]
    DoubleRegister(Reg),
    #[error("float branch without a preceding comparison")]
    MissingConditionBit,
    #[error("block has more than one branch")]
    SecondBranch,
    #[error("jal to a non-symbol target")]
    BadCallTarget,
    #[error("unsupported prologue: {0}")]
    BadPrologue(&'static str),
    #[error("phi for {0} in a block with an untranslated parent")]
    PhiWithoutParent(Reg),
}

/// A function-level translation failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    /// Fail the whole function on the first block-level error instead of
    /// embedding a comment and carrying on.
    pub stop_on_error: bool,
}

/// The translated form of one block, handed to the emitter.
#[derive(Debug)]
pub struct BlockInfo {
    pub to_write: Vec<Stmt>,
    pub return_value: Option<Expr>,
    pub branch_condition: Option<Rc<BinaryExpr>>,
    pub final_register_states: RegFile,
}

/// Everything known about one translated function.
#[derive(Debug)]
pub struct FunctionInfo {
    pub name: String,
    pub stack: StackInfo,
    pub flow: FlowGraph,
    /// Indexed by node; `None` for blocks unreachable from the entry.
    pub blocks: Vec<Option<BlockInfo>>,
}

/// Translate a parsed function into per-block statements, resolving phis
/// once the whole dominator tree has been walked.
pub fn translate_function(function: &AsmFunction, options: &Options) -> Result<FunctionInfo, Error> {
    let flow = FlowGraph::build(function)?;
    let mut stack = StackInfo::analyze(&function.name, flow.entry())?;
    debug!("{stack}");

    let mut initial: BTreeMap<Reg, Expr> = BTreeMap::new();
    for (reg, offset, ty) in [
        (Reg::A0, 0, Type::intptr()),
        (Reg::A1, 4, Type::intptr()),
        (Reg::A2, 8, Type::any()),
        (Reg::A3, 12, Type::any()),
        (Reg::F12, 0, Type::f32()),
        (Reg::F14, 4, Type::f32()),
    ] {
        initial.insert(
            reg,
            Expr::Arg(Rc::new(PassedInArg {
                offset,
                copied: false,
                ty,
            })),
        );
    }
    // Callee-save and special registers start out as symbols named after
    // themselves, so save/restore round-trips reproduce them faithfully.
    for reg in CALLEE_SAVE_REGS.into_iter().chain(SPECIAL_REGS).chain([Reg::Sp]) {
        initial.insert(reg, stack.global_symbol(&reg.to_string()));
    }
    // A function that never writes its return register returns whatever the
    // caller left in $v0; represent that as a symbol named after it.
    let v0 = stack.global_symbol("v0");
    initial.insert(Reg::V0, v0.clone());
    initial.insert(Reg::ReturnReg, v0);
    let written: BTreeSet<Reg> = initial.keys().copied().collect();
    let start_regs = RegFile::new(initial, written);

    let mut translator = Translator {
        flow: &flow,
        stack,
        blocks: (0..flow.nodes.len()).map(|_| None).collect(),
        used_phis: Vec::new(),
        options: options.clone(),
    };
    translator.visit(NodeId(0), start_regs)?;

    let Translator {
        mut stack,
        mut blocks,
        used_phis,
        ..
    } = translator;
    assign_phis(&flow, &mut blocks, &mut stack, used_phis)?;

    Ok(FunctionInfo {
        name: function.name.clone(),
        stack,
        flow,
        blocks,
    })
}

struct Translator<'a> {
    flow: &'a FlowGraph,
    stack: StackInfo,
    blocks: Vec<Option<BlockInfo>>,
    used_phis: Vec<Rc<PhiExpr>>,
    options: Options,
}

impl Translator<'_> {
    /// Translate one node, then descend to everything it immediately
    /// dominates, threading the final register state through with phi
    /// placeholders for registers clobbered on some path in between.
    fn visit(&mut self, node_id: NodeId, mut regs: RegFile) -> Result<(), TranslateError> {
        let flow = self.flow;
        let node = flow.node(node_id);
        debug!(node = node_id.0, "translating block");

        let body = translate_block(node, &mut regs, &mut self.stack, &mut self.used_phis);
        let (to_write, return_value, branch_condition) = match body {
            Ok(out) => out,
            Err(err) if !self.options.stop_on_error => {
                warn!(node = node_id.0, "translation failed: {err}");
                (vec![Stmt::Comment(format!("Error: {err}"))], None, None)
            }
            Err(err) => return Err(err),
        };
        debug!(node = node_id.0, registers = %regs, "final register state");

        let mut child_inits = Vec::new();
        for &child in &node.immediately_dominates {
            let mut contents = regs.contents().clone();
            for reg in regs_clobbered_until_dominator(flow, child) {
                if reg_always_set(flow, child, reg, regs.contains(reg)) {
                    contents.insert(reg, Expr::Phi(PhiExpr::new(reg, child)));
                } else {
                    contents.remove(&reg);
                }
            }
            child_inits.push((child, RegFile::new(contents, BTreeSet::new())));
        }

        self.blocks[node_id.0] = Some(BlockInfo {
            to_write,
            return_value,
            branch_condition,
            final_register_states: regs,
        });

        for (child, child_regs) in child_inits {
            self.visit(child, child_regs)?;
        }
        Ok(())
    }
}
