//! Per-mnemonic translation of instructions into IR builders.
//!
//! Mnemonics fall into disjoint families: stores, source-first register
//! copies, integer branches, float branches, jumps, float comparisons,
//! HI/LO pairs, and the destination-first rest.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::flow::{Node, NodeKind};
use crate::ir::{
    BinOp, BinaryExpr, CallExpr, EvalOnceExpr, Expr, PhiExpr, Stmt, StoreStmt, UnOp, as_f32,
    as_f64, as_intish, as_s32, as_type, as_u32, is_repeatable, mark_used,
};
use crate::parse::{Arg, Instruction, MacroKind};
use crate::reg::{CALL_ARGUMENT_ORDER, Reg};
use crate::regfile::RegFile;
use crate::simplify::fold_mul_chains;
use crate::stack::StackInfo;
use crate::translate::TranslateError;
use crate::types::Type;

pub(crate) fn is_store_mnemonic(mnemonic: &str) -> bool {
    matches!(mnemonic, "sb" | "sh" | "sw" | "swc1" | "sdc1")
}

pub(crate) fn is_source_first_mnemonic(mnemonic: &str) -> bool {
    matches!(mnemonic, "mtc1" | "ctc1")
}

pub(crate) fn is_branch_mnemonic(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "b" | "j" | "beq" | "bne" | "beqz" | "bnez" | "blez" | "bgtz" | "bltz" | "bgez"
    )
}

pub(crate) fn is_float_branch_mnemonic(mnemonic: &str) -> bool {
    matches!(mnemonic, "bc1t" | "bc1f")
}

pub(crate) fn is_float_comp_mnemonic(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "c.eq.s" | "c.le.s" | "c.lt.s" | "c.eq.d" | "c.le.d" | "c.lt.d"
    )
}

pub(crate) fn is_hi_lo_mnemonic(mnemonic: &str) -> bool {
    matches!(mnemonic, "div" | "divu" | "multu")
}

pub(crate) fn is_dest_first_mnemonic(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "slt"
            | "slti"
            | "sltu"
            | "sltiu"
            | "addi"
            | "addiu"
            | "addu"
            | "subu"
            | "negu"
            | "mfhi"
            | "mflo"
            | "add.s"
            | "sub.s"
            | "neg.s"
            | "div.s"
            | "mul.s"
            | "add.d"
            | "sub.d"
            | "neg.d"
            | "div.d"
            | "mul.d"
            | "cvt.d.s"
            | "cvt.d.w"
            | "cvt.s.d"
            | "cvt.s.u"
            | "cvt.s.w"
            | "cvt.w.d"
            | "cvt.w.s"
            | "trunc.w.s"
            | "trunc.w.d"
            | "ori"
            | "and"
            | "or"
            | "xor"
            | "andi"
            | "xori"
            | "sll"
            | "sllv"
            | "srl"
            | "srlv"
            | "sra"
            | "srav"
            | "move"
            | "mfc1"
            | "cfc1"
            | "mov.s"
            | "mov.d"
            | "li"
            | "lui"
            | "lb"
            | "lh"
            | "lw"
            | "lbu"
            | "lhu"
            | "lwu"
            | "lwc1"
            | "ldc1"
    )
}

fn bad_arg(instr: &Instruction, index: usize) -> TranslateError {
    TranslateError::BadArgument {
        mnemonic: instr.mnemonic.clone(),
        index,
    }
}

fn reg_ref(instr: &Instruction, index: usize) -> Result<Reg, TranslateError> {
    match instr.args.get(index) {
        Some(Arg::Reg(reg)) => Ok(*reg),
        _ => Err(bad_arg(instr, index)),
    }
}

/// Replace `%lo(...)` by 0, and reject `%hi(...)`. `%hi`s only ever occur in
/// `lui`, where they expand to the entire value rather than just the upper
/// half; this preserves semantics in all reasonable cases.
fn strip_macros(arg: &Arg) -> Result<Arg, TranslateError> {
    match arg {
        Arg::Macro {
            kind: MacroKind::Lo,
            ..
        } => Ok(Arg::Literal(0)),
        Arg::Macro {
            kind: MacroKind::Hi,
            ..
        } => Err(TranslateError::HiOutsideLui),
        Arg::AddressMode {
            offset: Some(offset),
            base,
        } => match offset.as_ref() {
            Arg::Macro {
                kind: MacroKind::Lo,
                ..
            } => Ok(Arg::AddressMode {
                offset: None,
                base: *base,
            }),
            Arg::Macro {
                kind: MacroKind::Hi,
                ..
            } => Err(TranslateError::HiOutsideLui),
            _ => Ok(arg.clone()),
        },
        _ => Ok(arg.clone()),
    }
}

/// Duplicate the destination of a two-argument pseudo-form, e.g.
/// `addiu $reg, IMM` into `addiu $reg, $reg, IMM`.
fn with_dest_duplicated(instr: &Instruction) -> Instruction {
    if instr.args.len() == 2 {
        Instruction {
            mnemonic: instr.mnemonic.clone(),
            args: vec![
                instr.args[0].clone(),
                instr.args[0].clone(),
                instr.args[1].clone(),
            ],
        }
    } else {
        instr.clone()
    }
}

/// A memory operand: either an offset from a base register or a bare global.
enum MemRef {
    Address { offset: i64, base: Reg },
    Global(Expr),
}

enum Control {
    Continue,
    Return,
}

fn as_binary(expr: Expr) -> Result<Rc<BinaryExpr>, TranslateError> {
    match expr {
        Expr::Binary(binary) => Ok(binary),
        _ => Err(TranslateError::MissingConditionBit),
    }
}

struct Ctx<'a> {
    regs: &'a mut RegFile,
    stack: &'a mut StackInfo,
    used_phis: &'a mut Vec<Rc<PhiExpr>>,
    to_write: Vec<Stmt>,
    /// The most recent register-sourced write per local, for collapsing
    /// spill/restore round-trips.
    local_var_writes: HashMap<i64, (Reg, Expr)>,
    /// Stores into the outgoing argument region, pending the next `jal`.
    subroutine_args: Vec<(Expr, i64)>,
    branch_condition: Option<Rc<BinaryExpr>>,
    return_value: Option<Expr>,
}

/// Translate the body of one node, mutating the register file as it goes.
pub(crate) fn translate_block(
    node: &Node,
    regs: &mut RegFile,
    stack: &mut StackInfo,
    used_phis: &mut Vec<Rc<PhiExpr>>,
) -> Result<(Vec<Stmt>, Option<Expr>, Option<Rc<BinaryExpr>>), TranslateError> {
    let mut ctx = Ctx {
        regs,
        stack,
        used_phis,
        to_write: Vec::new(),
        local_var_writes: HashMap::new(),
        subroutine_args: Vec::new(),
        branch_condition: None,
        return_value: None,
    };

    for instr in &node.instructions {
        if instr.mnemonic == "nop" {
            continue;
        }
        trace!(%instr, "translating");
        if let Control::Return = ctx.translate_instr(node, instr)? {
            break;
        }
    }

    if let Some(ret) = &ctx.return_value {
        mark_used(ret, ctx.used_phis);
    } else if let Some(cond) = &ctx.branch_condition {
        mark_used(&Expr::Binary(cond.clone()), ctx.used_phis);
    }
    Ok((ctx.to_write, ctx.return_value, ctx.branch_condition))
}

impl Ctx<'_> {
    fn reg(&mut self, instr: &Instruction, index: usize) -> Result<Expr, TranslateError> {
        self.regs.get(reg_ref(instr, index)?, self.stack)
    }

    /// Extract a double from a register pair. Unless the named (even)
    /// register already holds a 64-bit literal, the odd successor supplies
    /// the high half (low half in the even register).
    fn dreg(&mut self, instr: &Instruction, index: usize) -> Result<Expr, TranslateError> {
        let reg = reg_ref(instr, index)?;
        if !reg.is_float() {
            return Err(bad_arg(instr, index));
        }
        let ret = self.regs.get(reg, self.stack)?;
        match &ret {
            Expr::Lit(lit) if lit.ty.size() != 64 => {
                let low = lit.value;
                let partner = reg.float_partner().ok_or(TranslateError::DoubleRegister(reg))?;
                let other = self.regs.get(partner, self.stack)?;
                let Expr::Lit(high) = &other else {
                    return Err(TranslateError::DoubleRegister(partner));
                };
                if high.ty.size() == 64 {
                    return Err(TranslateError::DoubleRegister(partner));
                }
                let value = low | (high.value << 32);
                Ok(Expr::typed_lit(value, Type::f64()))
            }
            _ => Ok(ret),
        }
    }

    fn imm(&mut self, instr: &Instruction, index: usize) -> Result<Expr, TranslateError> {
        let arg = strip_macros(instr.args.get(index).ok_or_else(|| bad_arg(instr, index))?)?;
        let ret = self.literal_expr(&arg)?;
        if let Expr::Global(_) = ret {
            Ok(Expr::addr_of(ret))
        } else {
            Ok(ret)
        }
    }

    fn hi_imm(&mut self, instr: &Instruction, index: usize) -> Result<Expr, TranslateError> {
        let Some(Arg::Macro {
            kind: MacroKind::Hi,
            arg,
        }) = instr.args.get(index)
        else {
            return Err(bad_arg(instr, index));
        };
        let ret = self.literal_expr(arg)?;
        if let Expr::Global(_) = ret {
            Ok(Expr::addr_of(ret))
        } else {
            Ok(ret)
        }
    }

    fn literal_expr(&mut self, arg: &Arg) -> Result<Expr, TranslateError> {
        match arg {
            Arg::Symbol(name) => Ok(self.stack.global_symbol(name)),
            Arg::Literal(value) => Ok(Expr::lit(*value)),
            Arg::BinOp { lhs, op, rhs } => {
                let left = self.literal_expr(lhs)?;
                let right = self.literal_expr(rhs)?;
                Ok(BinaryExpr::int(left, *op, right))
            }
            _ => Err(TranslateError::ExpectedLiteral),
        }
    }

    fn memory_ref(&mut self, instr: &Instruction, index: usize) -> Result<MemRef, TranslateError> {
        let arg = strip_macros(instr.args.get(index).ok_or_else(|| bad_arg(instr, index))?)?;
        match arg {
            Arg::AddressMode { offset, base } => {
                let offset = match offset.as_deref() {
                    None => 0,
                    Some(Arg::Literal(value)) => *value,
                    Some(_) => return Err(bad_arg(instr, index)),
                };
                Ok(MemRef::Address { offset, base })
            }
            Arg::Symbol(name) => Ok(MemRef::Global(self.stack.global_symbol(&name))),
            _ => Err(bad_arg(instr, index)),
        }
    }

    /// Dereference a memory operand. Frame-relative accesses classify into
    /// stack variables; anything else is a struct access through a pointer,
    /// with one interned type per (base identity, offset) pair.
    fn deref(&mut self, mem: MemRef, store: bool) -> Result<Expr, TranslateError> {
        match mem {
            MemRef::Address { offset, base } if matches!(base, Reg::Sp | Reg::Fp) => {
                Ok(self.stack.get_stack_var(offset, store))
            }
            MemRef::Address { offset, base } => {
                let var = self.regs.get(base, self.stack)?;
                var.ty().unify(&Type::ptr());
                let ty = self.stack.struct_type_for(crate::ir::identity(&var), offset);
                Ok(Expr::Struct(Rc::new(crate::ir::StructAccess {
                    base: var,
                    offset,
                    ty,
                })))
            }
            MemRef::Global(sym) => Ok(sym),
        }
    }

    fn eval_once(&mut self, expr: Expr, always_emit: bool, prefix: &str) -> Expr {
        if always_emit {
            // (otherwise this is marked used once num_usages reaches 1)
            mark_used(&expr, self.used_phis);
        }
        let once = EvalOnceExpr::new(expr, always_emit, prefix, self.stack.temp_counters.clone());
        self.to_write.push(Stmt::EvalOnce(once.clone()));
        self.stack.temp_vars.push(once.clone());
        Expr::Once(once)
    }

    /// Store a computed expression into a register, wrapping unrepeatable
    /// expressions in a temporary. Reloading a local that this same register
    /// just spilled substitutes the original value instead.
    fn set_reg(&mut self, reg: Reg, expr: Option<Expr>) {
        let mut expr = expr;
        if let Some(Expr::Local(local)) = &expr
            && let Some((orig_reg, orig_expr)) = self.local_var_writes.get(&local.offset)
            && *orig_reg == reg
        {
            expr = Some(orig_expr.clone());
        }
        let expr = match expr {
            Some(expr) if !is_repeatable(&expr) => {
                Some(self.eval_once(expr, false, &reg.to_string()))
            }
            other => other,
        };
        self.regs.set(reg, expr);
    }

    fn translate_instr(
        &mut self,
        node: &Node,
        instr: &Instruction,
    ) -> Result<Control, TranslateError> {
        let mnemonic = instr.mnemonic.as_str();

        if is_store_mnemonic(mnemonic) {
            let ty = match mnemonic {
                "sb" => Type::of_size(8),
                "sh" => Type::of_size(16),
                "sw" => Type::of_size(32),
                "swc1" => Type::f32(),
                "sdc1" => Type::f64(),
                _ => unreachable!(),
            };
            self.translate_store(instr, ty)?;
        } else if is_source_first_mnemonic(mnemonic) {
            // Reversed operand order: copy the source into the coprocessor
            // register named second.
            let value = self.reg(instr, 0)?;
            let dest = reg_ref(instr, 1)?;
            self.set_reg(dest, Some(value));
        } else if is_branch_mnemonic(mnemonic) {
            if self.branch_condition.is_some() {
                return Err(TranslateError::SecondBranch);
            }
            self.branch_condition = match mnemonic {
                "b" | "j" => None,
                "beq" => Some(as_binary(BinaryExpr::icmp(
                    self.reg(instr, 0)?,
                    BinOp::Eq,
                    self.reg(instr, 1)?,
                ))?),
                "bne" => Some(as_binary(BinaryExpr::icmp(
                    self.reg(instr, 0)?,
                    BinOp::Ne,
                    self.reg(instr, 1)?,
                ))?),
                _ => {
                    let op = match mnemonic {
                        "beqz" => BinOp::Eq,
                        "bnez" => BinOp::Ne,
                        "blez" => BinOp::Le,
                        "bgtz" => BinOp::Gt,
                        "bltz" => BinOp::Lt,
                        "bgez" => BinOp::Ge,
                        _ => unreachable!(),
                    };
                    Some(as_binary(BinaryExpr::icmp(
                        self.reg(instr, 0)?,
                        op,
                        Expr::lit(0),
                    ))?)
                }
            };
        } else if is_float_branch_mnemonic(mnemonic) {
            if self.branch_condition.is_some() {
                return Err(TranslateError::SecondBranch);
            }
            // The comparison already set the condition bit; `bc1f` tests its
            // negation.
            let cond = self.regs.get(Reg::ConditionBit, self.stack)?;
            let cond = as_binary(cond)?;
            self.branch_condition = Some(match mnemonic {
                "bc1t" => cond,
                _ => as_binary(cond.negated())?,
            });
        } else if mnemonic == "jal" {
            self.translate_call(instr)?;
        } else if mnemonic == "jr" {
            if reg_ref(instr, 0)? != Reg::Ra {
                return Err(TranslateError::JumpTable);
            }
            if node.kind != NodeKind::Return {
                return Err(TranslateError::MisplacedReturn);
            }
            self.return_value = self.regs.get_raw(Reg::ReturnReg);
            return Ok(Control::Return);
        } else if is_float_comp_mnemonic(mnemonic) {
            let cmp = match mnemonic {
                "c.eq.s" => BinaryExpr::fcmp(self.reg(instr, 0)?, BinOp::Eq, self.reg(instr, 1)?),
                "c.le.s" => BinaryExpr::fcmp(self.reg(instr, 0)?, BinOp::Le, self.reg(instr, 1)?),
                "c.lt.s" => BinaryExpr::fcmp(self.reg(instr, 0)?, BinOp::Lt, self.reg(instr, 1)?),
                "c.eq.d" => BinaryExpr::dcmp(self.dreg(instr, 0)?, BinOp::Eq, self.dreg(instr, 1)?),
                "c.le.d" => BinaryExpr::dcmp(self.dreg(instr, 0)?, BinOp::Le, self.dreg(instr, 1)?),
                "c.lt.d" => BinaryExpr::dcmp(self.dreg(instr, 0)?, BinOp::Lt, self.dreg(instr, 1)?),
                _ => unreachable!(),
            };
            self.regs.set(Reg::ConditionBit, Some(cmp));
        } else if is_hi_lo_mnemonic(mnemonic) {
            // Division and multiplication produce two results at once.
            let (hi, lo) = match mnemonic {
                "div" => (
                    Some(BinaryExpr::s32(
                        self.reg(instr, 1)?,
                        BinOp::Mod,
                        self.reg(instr, 2)?,
                    )),
                    Some(BinaryExpr::s32(
                        self.reg(instr, 1)?,
                        BinOp::Div,
                        self.reg(instr, 2)?,
                    )),
                ),
                "divu" => (
                    Some(BinaryExpr::u32(
                        self.reg(instr, 1)?,
                        BinOp::Mod,
                        self.reg(instr, 2)?,
                    )),
                    Some(BinaryExpr::u32(
                        self.reg(instr, 1)?,
                        BinOp::Div,
                        self.reg(instr, 2)?,
                    )),
                ),
                // The high half of a multiplication has no direct C form.
                "multu" => (
                    None,
                    Some(BinaryExpr::int(
                        self.reg(instr, 0)?,
                        BinOp::Mul,
                        self.reg(instr, 1)?,
                    )),
                ),
                _ => unreachable!(),
            };
            self.set_reg(Reg::Hi, hi);
            self.set_reg(Reg::Lo, lo);
        } else if is_dest_first_mnemonic(mnemonic) {
            let value = self.destination_first(instr)?;
            self.set_reg(reg_ref(instr, 0)?, Some(value));
        } else {
            return Err(TranslateError::UnknownMnemonic(mnemonic.to_owned()));
        }
        Ok(Control::Continue)
    }

    fn destination_first(&mut self, instr: &Instruction) -> Result<Expr, TranslateError> {
        Ok(match instr.mnemonic.as_str() {
            // Flag-setting instructions.
            "slt" => BinaryExpr::icmp(self.reg(instr, 1)?, BinOp::Lt, self.reg(instr, 2)?),
            "slti" => BinaryExpr::icmp(self.reg(instr, 1)?, BinOp::Lt, self.imm(instr, 2)?),
            "sltu" => BinaryExpr::ucmp(self.reg(instr, 1)?, BinOp::Lt, self.reg(instr, 2)?),
            "sltiu" => BinaryExpr::ucmp(self.reg(instr, 1)?, BinOp::Lt, self.imm(instr, 2)?),
            // Integer arithmetic.
            "addi" | "addiu" => self.handle_addi(instr)?,
            "addu" => fold_mul_chains(BinaryExpr::intptr(
                self.reg(instr, 1)?,
                BinOp::Add,
                self.reg(instr, 2)?,
            )),
            "subu" => fold_mul_chains(BinaryExpr::intptr(
                self.reg(instr, 1)?,
                BinOp::Sub,
                self.reg(instr, 2)?,
            )),
            "negu" => fold_mul_chains(Expr::unary(
                UnOp::Neg,
                as_s32(self.reg(instr, 1)?),
                Type::s32(),
            )),
            // HI/LO register reads, used after division/multiplication.
            "mfhi" => self.regs.get(Reg::Hi, self.stack)?,
            "mflo" => self.regs.get(Reg::Lo, self.stack)?,
            // Single-precision arithmetic.
            "add.s" => BinaryExpr::f32(self.reg(instr, 1)?, BinOp::Add, self.reg(instr, 2)?),
            "sub.s" => BinaryExpr::f32(self.reg(instr, 1)?, BinOp::Sub, self.reg(instr, 2)?),
            "div.s" => BinaryExpr::f32(self.reg(instr, 1)?, BinOp::Div, self.reg(instr, 2)?),
            "mul.s" => BinaryExpr::f32(self.reg(instr, 1)?, BinOp::Mul, self.reg(instr, 2)?),
            "neg.s" => Expr::unary(UnOp::Neg, as_f32(self.reg(instr, 1)?), Type::f32()),
            // Double-precision arithmetic.
            "add.d" => BinaryExpr::f64(self.dreg(instr, 1)?, BinOp::Add, self.dreg(instr, 2)?),
            "sub.d" => BinaryExpr::f64(self.dreg(instr, 1)?, BinOp::Sub, self.dreg(instr, 2)?),
            "div.d" => BinaryExpr::f64(self.dreg(instr, 1)?, BinOp::Div, self.dreg(instr, 2)?),
            "mul.d" => BinaryExpr::f64(self.dreg(instr, 1)?, BinOp::Mul, self.dreg(instr, 2)?),
            "neg.d" => Expr::unary(UnOp::Neg, as_f64(self.dreg(instr, 1)?), Type::f64()),
            // Floating point conversions.
            "cvt.d.s" => Expr::cast(as_f32(self.reg(instr, 1)?), Type::f64(), false, true),
            "cvt.d.w" => Expr::cast(as_intish(self.reg(instr, 1)?), Type::f64(), false, true),
            "cvt.s.d" => Expr::cast(as_f64(self.dreg(instr, 1)?), Type::f32(), false, true),
            "cvt.s.u" => Expr::cast(as_u32(self.reg(instr, 1)?), Type::f32(), false, true),
            "cvt.s.w" => Expr::cast(as_intish(self.reg(instr, 1)?), Type::f32(), false, true),
            "cvt.w.d" | "trunc.w.d" => {
                Expr::cast(as_f64(self.dreg(instr, 1)?), Type::s32(), false, true)
            }
            "cvt.w.s" | "trunc.w.s" => {
                Expr::cast(as_f32(self.reg(instr, 1)?), Type::s32(), false, true)
            }
            // Bit arithmetic.
            "ori" => self.handle_ori(instr)?,
            "and" => BinaryExpr::int(self.reg(instr, 1)?, BinOp::BitAnd, self.reg(instr, 2)?),
            "or" => BinaryExpr::int(self.reg(instr, 1)?, BinOp::BitOr, self.reg(instr, 2)?),
            "xor" => BinaryExpr::int(self.reg(instr, 1)?, BinOp::BitXor, self.reg(instr, 2)?),
            "andi" => BinaryExpr::int(self.reg(instr, 1)?, BinOp::BitAnd, self.imm(instr, 2)?),
            "xori" => BinaryExpr::int(self.reg(instr, 1)?, BinOp::BitXor, self.imm(instr, 2)?),
            "sll" => fold_mul_chains(BinaryExpr::int(
                self.reg(instr, 1)?,
                BinOp::Shl,
                self.imm(instr, 2)?,
            )),
            "sllv" => BinaryExpr::int(self.reg(instr, 1)?, BinOp::Shl, self.reg(instr, 2)?),
            // Right shifts force the sign of their operand and result.
            "srl" => Expr::Binary(Rc::new(BinaryExpr {
                left: as_u32(self.reg(instr, 1)?),
                op: BinOp::Shr,
                right: as_intish(self.imm(instr, 2)?),
                ty: Type::u32(),
            })),
            "srlv" => Expr::Binary(Rc::new(BinaryExpr {
                left: as_u32(self.reg(instr, 1)?),
                op: BinOp::Shr,
                right: as_intish(self.reg(instr, 2)?),
                ty: Type::u32(),
            })),
            "sra" => Expr::Binary(Rc::new(BinaryExpr {
                left: as_s32(self.reg(instr, 1)?),
                op: BinOp::Shr,
                right: as_intish(self.imm(instr, 2)?),
                ty: Type::s32(),
            })),
            "srav" => Expr::Binary(Rc::new(BinaryExpr {
                left: as_s32(self.reg(instr, 1)?),
                op: BinOp::Shr,
                right: as_intish(self.reg(instr, 2)?),
                ty: Type::s32(),
            })),
            // Moves.
            "move" | "mfc1" | "cfc1" | "mov.s" => self.reg(instr, 1)?,
            "mov.d" => as_f64(self.dreg(instr, 1)?),
            // Loads.
            "li" => self.imm(instr, 1)?,
            "lui" => self.load_upper(instr)?,
            "lb" | "lh" | "lw" | "lbu" | "lhu" | "lwu" | "lwc1" | "ldc1" => {
                let mem = self.memory_ref(instr, 1)?;
                self.deref(mem, false)?
            }
            other => return Err(TranslateError::UnknownMnemonic(other.to_owned())),
        })
    }

    /// `addiu` and friends: a literal load, a move, an address-of on the
    /// frame, or plain addition, depending on the operands.
    fn handle_addi(&mut self, instr: &Instruction) -> Result<Expr, TranslateError> {
        // Two-argument form, mostly used for "addiu $reg, %lo(...)".
        let instr = with_dest_duplicated(instr);
        let source_reg = reg_ref(&instr, 1)?;
        let imm = self.imm(&instr, 2)?;
        if source_reg == Reg::Zero {
            // addiu $reg, $zero, imm is one way of writing li.
            return Ok(imm);
        }
        let source = self.reg(&instr, 1)?;
        if imm == Expr::lit(0) {
            // addiu $reg1, $reg2, 0 is a move.
            return Ok(source);
        }
        if matches!(source_reg, Reg::Sp | Reg::Fp) {
            // Adding to sp, i.e. passing an address.
            let Expr::Lit(lit) = &imm else {
                return Err(TranslateError::ExpectedLiteral);
            };
            if matches!(reg_ref(&instr, 0)?, Reg::Sp | Reg::Fp) {
                // Changing sp itself. Just ignore that.
                return Ok(source);
            }
            let var = self.stack.get_stack_var(lit.value, false);
            if let Expr::Local(local) = &var {
                // Keep track of all locals that we take addresses of.
                self.stack.add_local_var(local.offset);
            }
            return Ok(Expr::addr_of(var));
        }
        Ok(BinaryExpr::intptr(source, BinOp::Add, imm))
    }

    /// `ori`: either the low-half completion of a preceding `lui`, or a
    /// regular bitwise OR.
    fn handle_ori(&mut self, instr: &Instruction) -> Result<Expr, TranslateError> {
        // Two-argument form, mostly used for "ori $reg, (x & 0xffff)".
        let instr = with_dest_duplicated(instr);
        let imm = self.imm(&instr, 2)?;
        if let Expr::Binary(binary) = &imm
            && binary.op == BinOp::BitAnd
        {
            // "ori REG, (lhs & 0xFFFF)": the lui (hopefully) already handled
            // this; put lhs into this register too.
            if binary.right != Expr::lit(0xFFFF) {
                return Err(bad_arg(&instr, 2));
            }
            return Ok(binary.left.clone());
        }
        let source = self.reg(&instr, 1)?;
        Ok(BinaryExpr::int(source, BinOp::BitOr, imm))
    }

    /// `lui`: a `%hi` macro expands to the whole value; the assembler's
    /// pre-shifted `(lhs >> 16)` form yields `lhs`; a plain immediate is
    /// shifted up.
    fn load_upper(&mut self, instr: &Instruction) -> Result<Expr, TranslateError> {
        if matches!(instr.args.get(1), Some(Arg::Macro { .. })) {
            return self.hi_imm(instr, 1);
        }
        let expr = self.imm(instr, 1)?;
        if let Expr::Binary(binary) = &expr
            && binary.op == BinOp::Shr
        {
            if binary.right != Expr::lit(16) {
                return Err(bad_arg(instr, 1));
            }
            return Ok(binary.left.clone());
        }
        let Expr::Lit(lit) = &expr else {
            return Err(TranslateError::ExpectedLiteral);
        };
        Ok(Expr::lit(lit.value << 16))
    }

    /// Stores. Register-preservation bookkeeping into the frame is elided;
    /// stores into the outgoing argument region divert to the pending
    /// subroutine-argument list; everything else is written out.
    fn translate_store(&mut self, instr: &Instruction, ty: Type) -> Result<(), TranslateError> {
        let source_reg = reg_ref(instr, 0)?;
        let source_val = self.reg(instr, 0)?;
        let target = self.memory_ref(instr, 1)?;
        if (source_reg.is_callee_save() || source_reg.is_argument() || source_reg.is_special())
            && matches!(
                target,
                MemRef::Address {
                    base: Reg::Sp | Reg::Fp,
                    ..
                }
            )
        {
            // Elide register preserval.
            return Ok(());
        }
        let dest = self.deref(target, true)?;
        dest.ty().unify(&ty);
        let source = as_type(source_val, ty, false);

        if let Expr::SubArg(sub) = &dest {
            // About to call a subroutine with this argument.
            self.subroutine_args.push((source, sub.offset));
            return Ok(());
        }
        if let Expr::Local(local) = &dest {
            self.stack.add_local_var(local.offset);
            let inner = match &source {
                Expr::Cast(cast) if cast.reinterpret => cast.expr.clone(),
                other => other.clone(),
            };
            self.local_var_writes.insert(local.offset, (source_reg, inner));
        }
        mark_used(&source, self.used_phis);
        mark_used(&dest, self.used_phis);
        self.to_write.push(Stmt::Store(Rc::new(StoreStmt { source, dest })));
        Ok(())
    }

    /// `jal`: collect plausible arguments, emit the call as an always-emit
    /// temporary, clear caller-save state and seed the return registers.
    fn translate_call(&mut self, instr: &Instruction) -> Result<(), TranslateError> {
        let target = self.imm(instr, 0)?;
        let Expr::AddrOf(addr) = &target else {
            return Err(TranslateError::BadCallTarget);
        };
        let Expr::Global(symbol) = &addr.expr else {
            return Err(TranslateError::BadCallTarget);
        };

        // At most one of $f12 and $a0 may be passed, and at most one of $f14
        // and $a1. We could try to figure out which ones and cap the call at
        // the first empty register, but for now that is left for manual
        // fixup. Registers still holding the as-received argument are meant
        // for us, not the callee; skipping them can give false positives
        // when an argument is forwarded in the position it arrived in, but
        // that is impossible to resolve without callee signatures.
        let mut args = Vec::new();
        for reg in CALL_ARGUMENT_ORDER {
            if let Some(expr) = self.regs.get_raw(reg) {
                let as_received = matches!(&expr, Expr::Arg(arg) if !arg.copied);
                if !as_received {
                    args.push(expr);
                }
            }
        }
        // Stack arguments follow the register ones, in frame order.
        self.subroutine_args.sort_by_key(|(_, offset)| *offset);
        for (expr, _) in self.subroutine_args.drain(..) {
            args.push(expr);
        }

        let call = Expr::Call(Rc::new(CallExpr {
            function: symbol.name.clone(),
            args,
            ty: Type::any(),
        }));
        let call = self.eval_once(call, true, "ret");

        // Clear out caller-save registers, for clarity and so that argument
        // registers don't leak into the next call.
        self.regs.clear_caller_save();

        // The callee's return register is unknown (could be $v0, $f0, or
        // neither), so seed all of them with casts of the call.
        self.regs
            .set(Reg::F0, Some(Expr::cast(call.clone(), Type::f32(), true, true)));
        self.regs
            .set(Reg::V0, Some(Expr::cast(call.clone(), Type::intish(), true, true)));
        self.regs.set(
            Reg::V1,
            Some(as_u32(Expr::cast(call.clone(), Type::u64(), true, false))),
        );
        self.regs.set(Reg::ReturnReg, Some(call));
        Ok(())
    }
}
